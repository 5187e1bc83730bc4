use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, RwLock},
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use homedir::my_home;

use super::errors::AppError;
use super::task_runner::{self, Status, Task};
use crate::{
    auth::{IdentityProvider, StaticTokenProvider},
    blobs::{self, BlobStore},
    config::Config,
    eid::Eid,
    images,
    profiles::{self, Profile, ProfileCreate, ProfileField, ProfileStore, ProfileUpdate},
    semantic::{hash_model_name, text, EmbeddingWorker},
    skills,
};

/// Data directory: $ROLLCALL_BASE_PATH or ~/.local/share/rollcall
pub fn base_path() -> PathBuf {
    std::env::var("ROLLCALL_BASE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            my_home()
                .expect("couldnt find home dir")
                .expect("couldnt find home dir")
                .join(".local/share/rollcall")
        })
}

pub struct AppLocal {
    pub store: Arc<dyn ProfileStore>,
    pub blobs: Arc<dyn BlobStore>,
    identity: Arc<dyn IdentityProvider>,
    embedder: Arc<EmbeddingWorker>,

    task_tx: Option<Arc<mpsc::Sender<Task>>>,
    task_queue_handle: Option<std::thread::JoinHandle<()>>,

    config: Arc<RwLock<Config>>,
    base_path: PathBuf,
}

impl AppLocal {
    pub fn new(config: Arc<RwLock<Config>>, base_path: &Path) -> anyhow::Result<Self> {
        let (model, download_timeout, token_entries) = {
            let config = config.read().unwrap();
            (
                config.semantic.model.clone(),
                Duration::from_secs(config.semantic.download_timeout_secs),
                config
                    .auth
                    .tokens
                    .iter()
                    .map(|t| (t.token.clone(), t.email.clone()))
                    .collect::<Vec<_>>(),
            )
        };

        let store = Arc::new(profiles::BackendCsv::load(
            base_path.join("profiles.csv"),
            base_path.join("vectors.bin"),
            hash_model_name(&model),
        )?);

        let blobs = Arc::new(blobs::BackendLocal::new(
            base_path.join("uploads"),
            "/api/file",
        )?);

        let identity = Arc::new(StaticTokenProvider::new(token_entries));

        let embedder = Arc::new(EmbeddingWorker::spawn(
            model,
            base_path.to_path_buf(),
            download_timeout,
        ));

        Ok(Self {
            store,
            blobs,
            identity,
            embedder,
            task_tx: None,
            task_queue_handle: None,
            config,
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn run_queue(&mut self) {
        let (task_tx, task_rx) = mpsc::channel::<Task>();

        let handle = std::thread::spawn({
            let store = self.store.clone();
            let embedder = self.embedder.clone();
            let config = self.config.clone();
            let base_path = self.base_path.clone();

            let mut queue_dump = task_runner::read_queue_dump(&base_path);
            let task_list = queue_dump.queue.clone();

            queue_dump.queue = Vec::new();
            task_runner::write_queue_dump(&base_path, &queue_dump);

            std::thread::spawn({
                let task_tx = task_tx.clone();

                move || {
                    for task in task_list {
                        if let Status::Done | Status::Rejected(_) = task.status {
                            continue;
                        }

                        log::info!("restarting interrupted task \"{:?}\"", task.task);
                        if let Err(err) = task_tx.send(task.task) {
                            log::error!("failed to initialize interrupted task: {err:?}");
                        }
                    }
                }
            });

            move || {
                task_runner::start_queue(task_rx, store, embedder, config, base_path);
            }
        });

        self.task_queue_handle = Some(handle);
        self.task_tx = Some(Arc::new(task_tx));
    }

    pub fn config(&self) -> Arc<RwLock<Config>> {
        self.config.clone()
    }

    /// Directory uploaded files are served from.
    pub fn uploads_dir(&self) -> PathBuf {
        self.base_path.join("uploads")
    }

    pub fn shutdown(&self) {
        if let Some(task_tx) = self.task_tx.as_ref() {
            if let Err(err) = task_tx.send(Task::Shutdown) {
                log::error!("{err}");
            }
        }
        self.embedder.shutdown();
    }

    pub fn wait_task_queue_finish(&mut self) {
        if let Some(handle) = self.task_queue_handle.take() {
            handle.join().unwrap();
        }
    }

    /// Queue a background re-embed. A full queue or dead runner must never
    /// fail the write that triggered it.
    fn schedule_refresh_embedding(&self, profile_id: &Eid) {
        let Some(task_tx) = self.task_tx.as_ref() else {
            log::warn!("task queue not running, embedding for {profile_id} stays stale");
            return;
        };

        if let Err(err) = task_tx.send(Task::RefreshEmbedding {
            profile_id: profile_id.clone(),
        }) {
            log::error!("failed to queue embedding refresh for {profile_id}: {err}");
        }
    }
}

// profile operations
impl AppLocal {
    pub fn create(&self, create: ProfileCreate) -> Result<Profile, AppError> {
        let create = normalize_create(create)?;

        // ordered duplicate checks, first collision wins the error message
        if self
            .store
            .find_by_field(ProfileField::Name, &create.name)?
            .is_some()
        {
            return Err(AppError::Duplicate(
                "A profile with this name already exists.".to_string(),
            ));
        }
        if let Some(linkedin) = create.linkedin_url.as_deref() {
            if self
                .store
                .find_by_field(ProfileField::LinkedinUrl, linkedin)?
                .is_some()
            {
                return Err(AppError::Duplicate(
                    "A profile with this LinkedIn URL already exists.".to_string(),
                ));
            }
        }
        if let Some(site) = create.personal_site.as_deref().and_then(profiles::derive_site) {
            if self
                .store
                .find_by_field(ProfileField::Site, &site)?
                .is_some()
            {
                return Err(AppError::Duplicate(
                    "A profile with this personal site already exists.".to_string(),
                ));
            }
        }

        // the store re-checks under its write lock, so a race between the
        // checks above and the insert still cannot commit a duplicate
        let profile = self.store.insert(create)?;

        self.schedule_refresh_embedding(&profile.id);

        Ok(profile)
    }

    /// Apply a partial update on behalf of the token's owner.
    ///
    /// The token's email decides which profile may be edited: an email
    /// already bound to a profile always edits that one; otherwise the
    /// addressed profile is claimed if it is still unclaimed.
    pub fn update(
        &self,
        token: &str,
        id: &Eid,
        update: ProfileUpdate,
    ) -> Result<Profile, AppError> {
        let email = self.identity.verify(token)?;
        let mut update = normalize_update(update)?;

        let target = match self.store.find_by_field(ProfileField::Email, &email)? {
            Some(own) => own,
            None => {
                let profile = self.store.get(id)?.ok_or(AppError::NotFound)?;
                if !profile.is_unclaimed() {
                    return Err(AppError::Forbidden);
                }
                update.bind_email = Some(email);
                profile
            }
        };

        let needs_reembed = update.touches_search_text();
        let updated = self.store.update(&target.id, update)?;

        if needs_reembed {
            self.schedule_refresh_embedding(&updated.id);
        }

        Ok(updated)
    }

    pub fn get(&self, id: &Eid) -> Result<Profile, AppError> {
        self.store.get(id)?.ok_or(AppError::NotFound)
    }

    pub fn list(&self, limit: usize) -> Result<Vec<Profile>, AppError> {
        Ok(self.store.list(limit)?)
    }

    pub fn total(&self) -> Result<usize, AppError> {
        Ok(self.store.total()?)
    }

    /// Semantic search from a text query. Embeds on the worker thread with
    /// a deadline; an unavailable or slow model surfaces as an error rather
    /// than an empty result set.
    pub fn search_text(&self, query: &str, k: usize) -> Result<Vec<(Profile, f32)>, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::Validation("query must not be empty".to_string()));
        }

        let timeout = Duration::from_secs(self.config.read().unwrap().semantic.embed_timeout_secs);
        let vector = self.embedder.embed_timeout(query, timeout)?;

        Ok(self.store.semantic_search(&vector, k)?)
    }

    /// Semantic search from a caller-provided vector, bypassing the model.
    pub fn search_vector(&self, vector: &[f32], k: usize) -> Result<Vec<(Profile, f32)>, AppError> {
        Ok(self.store.semantic_search(vector, k)?)
    }

    /// Decode an uploaded base64 image, normalize it to bounded WebP and
    /// store it. Returns the public URL of the stored file.
    pub fn upload_image(&self, base64_data: &str) -> Result<String, AppError> {
        // tolerate data-URL payloads from browsers
        let raw = match base64_data.split_once("base64,") {
            Some((_, tail)) => tail,
            None => base64_data,
        };
        let data = BASE64.decode(raw.trim())?;

        let (max_dimension, quality) = {
            let config = self.config.read().unwrap();
            (config.images.max_dimension, config.images.quality)
        };

        let prepared = images::prepare_profile_image(&data, max_dimension, quality)
            .map_err(|err| AppError::Validation(format!("unusable image: {err}")))?;

        if prepared.was_resized {
            log::debug!(
                "upload resized {:?} -> {:?}",
                prepared.original_dimensions,
                prepared.final_dimensions
            );
        }

        Ok(self.blobs.put(&prepared.data, "webp")?)
    }

    /// Load the embedding model ahead of the first query.
    pub fn preload(&self) -> bool {
        self.embedder.preload()
    }

    /// Re-embed every profile whose vector is missing or out of date.
    /// Runs synchronously; used by the backfill command.
    pub fn backfill(&self) -> Result<usize, AppError> {
        let stale = self.store.stale_embeddings()?;
        let total = stale.len();

        log::info!("backfill: {total} profiles need embeddings");

        for (idx, id) in stale.iter().enumerate() {
            let profile = match self.store.get(id)? {
                Some(p) => p,
                None => continue,
            };

            let vector = self.embedder.embed(&text::to_search_text(&profile))?;
            self.store.set_embedding(id, vector)?;

            log::info!("backfill: {}/{total} {}", idx + 1, profile.name);
        }

        Ok(total)
    }
}

fn normalize_skill(skill: &str) -> Result<String, AppError> {
    skills::canonical_skill(skill.trim())
        .map(String::from)
        .ok_or_else(|| {
            AppError::Validation(format!(
                "unknown skill '{}', expected one of {:?}",
                skill.trim(),
                skills::SKILLS
            ))
        })
}

/// Canonicalize and dedupe secondary skills, capped at the allowed count.
fn normalize_secondary(raw: Vec<String>) -> Result<Vec<String>, AppError> {
    let mut result: Vec<String> = Vec::new();
    for skill in raw {
        let canonical = normalize_skill(&skill)?;
        if !result.contains(&canonical) {
            result.push(canonical);
        }
    }

    if result.len() > skills::MAX_SECONDARY_SKILLS {
        return Err(AppError::Validation(format!(
            "at most {} secondary skills allowed",
            skills::MAX_SECONDARY_SKILLS
        )));
    }

    Ok(result)
}

fn normalize_create(mut create: ProfileCreate) -> Result<ProfileCreate, AppError> {
    create.name = create.name.trim().to_string();
    if create.name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    if create.grad_year.trim().is_empty() {
        return Err(AppError::Validation("grad_year is required".to_string()));
    }
    if create.header.trim().is_empty() {
        return Err(AppError::Validation("header is required".to_string()));
    }

    create.skill = normalize_skill(&create.skill)?;
    create.secondary_skills = normalize_secondary(create.secondary_skills)?;

    Ok(create)
}

fn normalize_update(mut update: ProfileUpdate) -> Result<ProfileUpdate, AppError> {
    if let Some(name) = &update.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("name must not be empty".to_string()));
        }
        update.name = Some(name);
    }

    if let Some(grad_year) = &update.grad_year {
        if grad_year.trim().is_empty() {
            return Err(AppError::Validation(
                "grad_year must not be empty".to_string(),
            ));
        }
    }

    if let Some(skill) = &update.skill {
        update.skill = Some(normalize_skill(skill)?);
    }

    if let Some(secondary) = update.secondary_skills.take() {
        update.secondary_skills = Some(normalize_secondary(secondary)?);
    }

    Ok(update)
}

#[cfg(test)]
impl AppLocal {
    pub fn new_with(
        store: Arc<dyn ProfileStore>,
        blobs: Arc<dyn BlobStore>,
        identity: Arc<dyn IdentityProvider>,
        embedder: Arc<EmbeddingWorker>,
        task_tx: Arc<mpsc::Sender<Task>>,
        config: Arc<RwLock<Config>>,
        base_path: PathBuf,
    ) -> Self {
        Self {
            store,
            blobs,
            identity,
            embedder,
            task_tx: Some(task_tx),
            task_queue_handle: None,
            config,
            base_path,
        }
    }
}
