use std::sync::{Arc, RwLock};

use anyhow::bail;
use clap::Parser;

mod app;
mod auth;
mod blobs;
mod cli;
mod config;
mod eid;
mod images;
mod profiles;
mod semantic;
mod skills;
#[cfg(test)]
mod tests;
mod web;

use config::Config;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let base_path = app::local::base_path();
    let config = Arc::new(RwLock::new(Config::load_with(&base_path)));
    let mut app = app::AppLocal::new(config, &base_path)?;

    match args.command {
        cli::Command::Daemon {} => {
            app.run_queue();
            web::start_daemon(app);
            Ok(())
        }

        cli::Command::Add {
            name,
            skill,
            grad_year,
            header,
            description,
            secondary_skills,
            personal_site,
            x_url,
            linkedin_url,
        } => {
            app.run_queue();

            let create = profiles::ProfileCreate {
                name,
                skill,
                grad_year,
                header: header.unwrap_or_default(),
                description: description.unwrap_or_default(),
                secondary_skills: secondary_skills
                    .map(|s| {
                        s.split(',')
                            .map(|v| v.trim().to_string())
                            .filter(|v| !v.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
                personal_site,
                x_url,
                linkedin_url,
                profile_image_url: None,
            };

            let profile = app.create(create)?;
            println!("{}", serde_json::to_string_pretty(&profile).unwrap());

            // let the queued embedding refresh finish before exiting
            app.shutdown();
            app.wait_task_queue_finish();
            Ok(())
        }

        cli::Command::List { limit } => {
            let profiles = app.list(limit)?;
            println!("{}", serde_json::to_string_pretty(&profiles).unwrap());
            Ok(())
        }

        cli::Command::Search { query, limit } => {
            let results: Vec<web::SearchHit> = app
                .search_text(&query, limit)?
                .into_iter()
                .map(|(profile, score)| web::SearchHit { profile, score })
                .collect();

            println!("{}", serde_json::to_string_pretty(&results).unwrap());
            Ok(())
        }

        cli::Command::Backfill {} => {
            let count = app.backfill()?;
            println!("{count} profiles re-embedded");
            Ok(())
        }

        cli::Command::Preload {} => {
            if app.preload() {
                println!("embedding model ready");
                Ok(())
            } else {
                bail!("embedding model failed to load");
            }
        }
    }
}
