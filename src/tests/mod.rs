use std::sync::{mpsc, Arc, RwLock};
use std::time::Duration;

use crate::app::task_runner::Task;
use crate::app::AppLocal;
use crate::auth::StaticTokenProvider;
use crate::blobs;
use crate::config::Config;
use crate::profiles::{BackendCsv, ProfileCreate};
use crate::semantic::{hash_model_name, EmbeddingWorker, DEFAULT_MODEL, EMBEDDING_DIM};


/// Creates an isolated AppLocal using a unique temp directory.
/// Each test gets its own directory so parallel tests never collide,
/// and no real data is touched. The task channel's receiver is dropped;
/// tests that need embeddings write them through the store directly.
pub fn create_app() -> (AppLocal, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");

    let config = Arc::new(RwLock::new(Config::load_with(tmp.path())));

    let model = DEFAULT_MODEL.to_string();
    let store = Arc::new(
        BackendCsv::load(
            tmp.path().join("profiles.csv"),
            tmp.path().join("vectors.bin"),
            hash_model_name(&model),
        )
        .expect("failed to create profile csv"),
    );

    let blob_store = Arc::new(
        blobs::BackendLocal::new(tmp.path().join("uploads"), "/api/file")
            .expect("failed to create blob store"),
    );

    let identity = Arc::new(StaticTokenProvider::new([
        ("tok-alice".to_string(), "alice@example.com".to_string()),
        ("tok-bob".to_string(), "bob@example.com".to_string()),
    ]));

    // spawned but never asked to load the model
    let embedder = Arc::new(EmbeddingWorker::spawn(
        model,
        tmp.path().join("models"),
        Duration::from_secs(300),
    ));

    let (task_tx, _) = mpsc::channel::<Task>();

    let app = AppLocal::new_with(
        store,
        blob_store,
        identity,
        embedder,
        Arc::new(task_tx),
        config,
        tmp.path().to_path_buf(),
    );
    (app, tmp)
}

pub fn profile_fixture(name: &str, skill: &str) -> ProfileCreate {
    ProfileCreate {
        name: name.to_string(),
        skill: skill.to_string(),
        grad_year: "2025".to_string(),
        header: "Builds things".to_string(),
        ..Default::default()
    }
}

/// Unit vector with a 1.0 in the given component.
pub fn basis(component: usize) -> Vec<f32> {
    let mut v = vec![0.0; EMBEDDING_DIM];
    v[component] = 1.0;
    v
}
