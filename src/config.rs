use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::semantic::DEFAULT_MODEL;

const LISTEN_ADDR: &str = "0.0.0.0:8080";
const TASK_QUEUE_MAX_THREADS: u16 = 2;
const TASK_QUEUE_MAX_RETRIES: usize = 5;

/// Longest side of a stored profile image, in pixels
const IMAGE_MAX_DIMENSION: u32 = 800;
/// Lossy WebP quality (1-100)
const IMAGE_QUALITY: u8 = 85;

/// Default per-request embedding timeout in seconds
const DEFAULT_EMBED_TIMEOUT_SECS: u64 = 30;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Embedding model configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_semantic_model")]
    pub model: String,

    /// How long a search request waits for an embedding before giving up
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            embed_timeout_secs: DEFAULT_EMBED_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

fn default_semantic_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_embed_timeout_secs() -> u64 {
    DEFAULT_EMBED_TIMEOUT_SECS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_image_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_image_quality")]
    pub quality: u8,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            max_dimension: IMAGE_MAX_DIMENSION,
            quality: IMAGE_QUALITY,
        }
    }
}

fn default_image_max_dimension() -> u32 {
    IMAGE_MAX_DIMENSION
}

fn default_image_quality() -> u8 {
    IMAGE_QUALITY
}

/// One issued editing credential.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub email: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer tokens the daemon accepts for profile edits
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "task_queue_max_threads")]
    pub task_queue_max_threads: u16,
    #[serde(default = "task_queue_max_retries")]
    pub task_queue_max_retries: usize,

    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: LISTEN_ADDR.to_string(),
            task_queue_max_threads: TASK_QUEUE_MAX_THREADS,
            task_queue_max_retries: TASK_QUEUE_MAX_RETRIES,
            images: ImagesConfig::default(),
            semantic: SemanticConfig::default(),
            auth: AuthConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_listen_addr() -> String {
    LISTEN_ADDR.to_string()
}

fn task_queue_max_threads() -> u16 {
    TASK_QUEUE_MAX_THREADS
}

fn task_queue_max_retries() -> usize {
    TASK_QUEUE_MAX_RETRIES
}

impl Config {
    fn validate(&mut self) {
        if self.task_queue_max_threads == 0 {
            self.task_queue_max_threads = 1
        }

        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            panic!("listen_addr '{}' is not a socket address", self.listen_addr);
        }

        if self.images.max_dimension == 0 {
            panic!("images.max_dimension must be greater than 0");
        }
        if !(1..=100).contains(&self.images.quality) {
            panic!("images.quality must be between 1 and 100, got {}", self.images.quality);
        }

        if self.semantic.model.trim().is_empty() {
            panic!("semantic.model must not be empty");
        }
        if self.semantic.embed_timeout_secs == 0 {
            panic!("semantic.embed_timeout_secs must be greater than 0");
        }
        if self.semantic.download_timeout_secs == 0 {
            panic!("semantic.download_timeout_secs must be greater than 0");
        }

        for (idx, entry) in self.auth.tokens.iter().enumerate() {
            if entry.token.trim().is_empty() || entry.email.trim().is_empty() {
                let idx = idx + 1;
                panic!("auth token #{idx} needs both a token and an email");
            }
        }
    }

    pub fn load_with(base_path: &Path) -> Self {
        std::fs::create_dir_all(base_path).expect("cannot create base directory");
        let config_path = base_path.join("config.yaml");

        // create new if does not exist
        if !config_path.exists() {
            std::fs::write(
                &config_path,
                serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
            )
            .expect("cannot write default config");
        }

        let config_str =
            std::fs::read_to_string(&config_path).expect("config file is not readable");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_path_buf();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let config_str = serde_yml::to_string(&self).unwrap();
        std::fs::write(self.base_path.join("config.yaml"), config_str.as_bytes())
            .expect("cannot write config");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path());

        assert!(dir.path().join("config.yaml").exists());
        assert_eq!(config.listen_addr, LISTEN_ADDR);
        assert_eq!(config.semantic.model, DEFAULT_MODEL);
        assert!(config.auth.tokens.is_empty());
    }

    #[test]
    fn test_partial_config_filled_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "listen_addr: 127.0.0.1:9999\nauth:\n  tokens:\n    - token: tok-a\n      email: a@example.com\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path());
        assert_eq!(config.listen_addr, "127.0.0.1:9999");
        assert_eq!(config.images.max_dimension, IMAGE_MAX_DIMENSION);
        assert_eq!(config.auth.tokens.len(), 1);

        // missing keys got written back
        let resaved = std::fs::read_to_string(dir.path().join("config.yaml")).unwrap();
        assert!(resaved.contains("semantic"));
    }

    #[test]
    #[should_panic(expected = "listen_addr")]
    fn test_bad_listen_addr_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "listen_addr: not-an-addr\n").unwrap();
        Config::load_with(dir.path());
    }

    #[test]
    #[should_panic(expected = "auth token")]
    fn test_empty_token_entry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "auth:\n  tokens:\n    - token: ''\n      email: a@example.com\n",
        )
        .unwrap();
        Config::load_with(dir.path());
    }
}
