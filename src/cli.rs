use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start rollcall as a service.
    Daemon {},

    /// Add a profile
    Add {
        /// Full name, must be unique across the directory
        #[clap(long)]
        name: String,

        /// Primary skill (e.g. "Fullstack")
        #[clap(long)]
        skill: String,

        /// Graduation year
        #[clap(short, long)]
        grad_year: String,

        /// One-line headline
        #[clap(long)]
        header: Option<String>,

        /// Longer free-form description
        #[clap(short, long)]
        description: Option<String>,

        /// Comma-separated secondary skills
        #[clap(short, long)]
        secondary_skills: Option<String>,

        #[clap(long)]
        personal_site: Option<String>,

        #[clap(long)]
        x_url: Option<String>,

        #[clap(long)]
        linkedin_url: Option<String>,
    },

    /// List newest profiles
    List {
        #[clap(short, long, default_value = "20")]
        limit: usize,
    },

    /// Semantic search over profiles
    Search {
        query: String,

        #[clap(short, long, default_value = "10")]
        limit: usize,
    },

    /// Re-embed profiles whose vectors are missing or outdated
    Backfill {},

    /// Download and initialize the embedding model
    Preload {},
}
