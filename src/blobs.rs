//! Blob storage for uploaded profile images.

use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Where uploaded files end up. `put` returns the public URL path the file
/// is served under.
pub trait BlobStore: Send + Sync {
    fn put(&self, data: &[u8], extension: &str) -> io::Result<String>;
}

/// Local-filesystem blob store serving files through the daemon.
pub struct BackendLocal {
    base_dir: PathBuf,
    public_prefix: String,
}

impl BackendLocal {
    pub fn new(base_dir: PathBuf, public_prefix: impl Into<String>) -> io::Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            public_prefix: public_prefix.into(),
        })
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Collision-resistant file name: millisecond timestamp plus a random
    /// suffix.
    fn generate_name(extension: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let suffix: u32 = rand::rng().random();
        format!("{millis}-{suffix:08x}.{extension}")
    }
}

impl BlobStore for BackendLocal {
    fn put(&self, data: &[u8], extension: &str) -> io::Result<String> {
        let name = Self::generate_name(extension);

        let final_path = self.base_dir.join(&name);
        let temp_path = self.base_dir.join(format!(".{name}.tmp"));

        std::fs::write(&temp_path, data)?;
        std::fs::rename(&temp_path, &final_path)?;

        Ok(format!("{}/{name}", self.public_prefix))
    }
}
