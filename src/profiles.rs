use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Instant,
};

use crate::eid::Eid;
use crate::semantic::{
    text, IndexError, VectorIndex, VectorStorage, VectorStorageError,
};

/// A directory profile. `email` is empty until the record is claimed by its
/// first authenticated editor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub id: Eid,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    pub name: String,
    pub header: String,
    pub description: String,
    pub skill: String,
    pub secondary_skills: Vec<String>,
    pub grad_year: String,

    pub personal_site: Option<String>,
    /// Derived from `personal_site`: scheme and leading `www.` stripped.
    /// Doubles as a uniqueness key.
    pub site: Option<String>,
    pub x_url: Option<String>,
    pub linkedin_url: Option<String>,
    pub profile_image_url: Option<String>,
}

impl Profile {
    pub fn is_unclaimed(&self) -> bool {
        self.email.as_deref().unwrap_or("").is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProfileCreate {
    pub name: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub description: String,
    pub skill: String,
    #[serde(default)]
    pub secondary_skills: Vec<String>,
    pub grad_year: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

/// Wraps any present value, including an explicit null, in the outer `Some`.
/// Plain serde folds `null` into the outer `None`, which is indistinguishable
/// from the key being absent.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update. Link fields use double options so JSON can distinguish
/// "leave alone" (absent) from "clear" (null).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grad_year: Option<String>,

    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub personal_site: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub x_url: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub linkedin_url: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_image_url: Option<Option<String>>,

    /// Set by the update path when an unclaimed record is being claimed.
    /// Never taken from the request body.
    #[serde(skip)]
    pub bind_email: Option<String>,
}

impl ProfileUpdate {
    /// Whether applying this update can change the profile's search text.
    pub fn touches_search_text(&self) -> bool {
        self.name.is_some()
            || self.header.is_some()
            || self.description.is_some()
            || self.skill.is_some()
            || self.secondary_skills.is_some()
            || self.grad_year.is_some()
    }
}

/// Fields the store can look profiles up by (case-insensitive exact match).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Name,
    Email,
    LinkedinUrl,
    Site,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Duplicate(String),

    #[error("profile not found")]
    NotFound,

    #[error("profile is already claimed by another account")]
    AlreadyClaimed,

    #[error(transparent)]
    MalformedVector(#[from] IndexError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    VectorStorage(#[from] VectorStorageError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

/// The profile store boundary. The reference backend is a local CSV file
/// with a binary vector sidecar; a hosted database would implement the same
/// trait, with `semantic_search` pushed down as a stored procedure.
pub trait ProfileStore: Send + Sync {
    fn get(&self, id: &Eid) -> Result<Option<Profile>, StoreError>;

    /// Newest profiles first.
    fn list(&self, limit: usize) -> Result<Vec<Profile>, StoreError>;

    fn total(&self) -> Result<usize, StoreError>;

    fn find_by_field(&self, field: ProfileField, value: &str)
        -> Result<Option<Profile>, StoreError>;

    /// Insert a new profile. Re-checks the uniqueness invariants under the
    /// store's own write lock, so two racing creates cannot both commit.
    fn insert(&self, create: ProfileCreate) -> Result<Profile, StoreError>;

    fn update(&self, id: &Eid, update: ProfileUpdate) -> Result<Profile, StoreError>;

    /// Attach an embedding to a profile. Wrong-width vectors are rejected
    /// before anything is written.
    fn set_embedding(&self, id: &Eid, embedding: Vec<f32>) -> Result<(), StoreError>;

    fn embedding(&self, id: &Eid) -> Result<Option<Vec<f32>>, StoreError>;

    /// Profiles whose embedding is missing or no longer matches their
    /// current search text.
    fn stale_embeddings(&self) -> Result<Vec<Eid>, StoreError>;

    /// Rank profiles with embeddings against a query vector, best first.
    /// Profiles without embeddings simply don't appear.
    fn semantic_search(&self, query: &[f32], k: usize)
        -> Result<Vec<(Profile, f32)>, StoreError>;
}

/// Strip scheme and leading `www.` from a personal site URL.
/// Returns `None` when nothing displayable remains.
pub fn derive_site(personal_site: &str) -> Option<String> {
    let stripped = personal_site
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let stripped = stripped.strip_prefix("www.").unwrap_or(stripped);

    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Canonical form for LinkedIn URL comparisons: trimmed, trailing slashes
/// dropped, lowercased.
pub fn normalize_linkedin(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

const CSV_HEADERS: [&str; 13] = [
    "id",
    "email",
    "name",
    "header",
    "description",
    "skill",
    "secondary_skills",
    "grad_year",
    "personal_site",
    "site",
    "x_url",
    "linkedin_url",
    "profile_image_url",
];

/// CSV-backed profile store with a vectors.bin sidecar for embeddings.
pub struct BackendCsv {
    profiles: Arc<RwLock<Vec<Profile>>>,
    vectors: Arc<RwLock<VectorIndex>>,
    csv_path: PathBuf,
    vector_storage: VectorStorage,
    model_id: [u8; 32],
}

impl BackendCsv {
    /// Open (or create) the store. `model_id` is the hash of the embedding
    /// model name; a sidecar written by a different model is discarded.
    pub fn load(
        csv_path: PathBuf,
        vectors_path: PathBuf,
        model_id: [u8; 32],
    ) -> Result<Self, StoreError> {
        if let Err(err) = std::fs::metadata(&csv_path) {
            match err.kind() {
                ErrorKind::NotFound => {
                    log::info!("creating new profile database at {}", csv_path.display());
                    let mut csv_wrt = csv::Writer::from_path(&csv_path)?;
                    csv_wrt.write_record(CSV_HEADERS)?;
                    csv_wrt.flush()?;
                }
                _ => Err(err)?,
            }
        }

        let now = Instant::now();
        let mut csv_reader = csv::Reader::from_path(&csv_path)?;

        let mut profiles = vec![];
        for record in csv_reader.records() {
            profiles.push(record_to_profile(&record?)?);
        }

        log::debug!(
            "took {}ms to read {} profiles",
            now.elapsed().as_micros() as f64 / 1000.0,
            profiles.len()
        );

        let vector_storage = VectorStorage::new(vectors_path);
        let vectors = if vector_storage.exists() {
            match vector_storage.load(&model_id) {
                Ok(index) => {
                    log::info!("loaded {} profile vectors", index.len());
                    index
                }
                Err(VectorStorageError::ModelMismatch) => {
                    log::warn!("embedding model changed, discarding stored vectors");
                    VectorIndex::new()
                }
                Err(VectorStorageError::VersionMismatch(file_ver, _)) => {
                    log::warn!("vectors.bin version {file_ver} unsupported, starting fresh");
                    VectorIndex::new()
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            VectorIndex::new()
        };

        Ok(BackendCsv {
            profiles: Arc::new(RwLock::new(profiles)),
            vectors: Arc::new(RwLock::new(vectors)),
            csv_path,
            vector_storage,
            model_id,
        })
    }

    fn save(&self, profiles: &[Profile]) -> Result<(), StoreError> {
        let temp_path = self.csv_path.with_extension("csv.tmp");
        let mut csv_wrt = csv::Writer::from_path(&temp_path)?;
        csv_wrt.write_record(CSV_HEADERS)?;
        for profile in profiles {
            csv_wrt.write_record(profile_to_record(profile))?;
        }
        csv_wrt.flush()?;
        drop(csv_wrt);
        std::fs::rename(&temp_path, &self.csv_path)?;
        Ok(())
    }

    fn save_vectors(&self, vectors: &VectorIndex) -> Result<(), StoreError> {
        self.vector_storage.save(vectors, &self.model_id)?;
        Ok(())
    }

    /// Uniqueness checks against every profile except `skip_id`.
    /// Runs under the caller's write lock, in the fixed order
    /// name, LinkedIn, site, short-circuiting on the first collision.
    fn check_unique(
        profiles: &[Profile],
        skip_id: Option<&Eid>,
        name: Option<&str>,
        linkedin_url: Option<&str>,
        site: Option<&str>,
    ) -> Result<(), StoreError> {
        // one key at a time across all profiles, so a multi-key collision
        // still reports the highest-priority key
        let others = || {
            profiles
                .iter()
                .filter(move |p| skip_id.map(|id| &p.id != id).unwrap_or(true))
        };

        if let Some(name) = name {
            let name = name.trim();
            if others().any(|p| p.name.eq_ignore_ascii_case(name)) {
                return Err(StoreError::Duplicate(
                    "A profile with this name already exists.".to_string(),
                ));
            }
        }

        if let Some(linkedin) = linkedin_url {
            let needle = normalize_linkedin(linkedin);
            if others().any(|p| {
                p.linkedin_url
                    .as_deref()
                    .map(|u| normalize_linkedin(u) == needle)
                    .unwrap_or(false)
            }) {
                return Err(StoreError::Duplicate(
                    "A profile with this LinkedIn URL already exists.".to_string(),
                ));
            }
        }

        if let Some(site) = site {
            if others().any(|p| {
                p.site
                    .as_deref()
                    .map(|s| s.eq_ignore_ascii_case(site))
                    .unwrap_or(false)
            }) {
                return Err(StoreError::Duplicate(
                    "A profile with this personal site already exists.".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl ProfileStore for BackendCsv {
    fn get(&self, id: &Eid) -> Result<Option<Profile>, StoreError> {
        let profiles = self.profiles.read().unwrap();
        Ok(profiles.iter().find(|p| &p.id == id).cloned())
    }

    fn list(&self, limit: usize) -> Result<Vec<Profile>, StoreError> {
        let profiles = self.profiles.read().unwrap();
        Ok(profiles.iter().rev().take(limit).cloned().collect())
    }

    fn total(&self) -> Result<usize, StoreError> {
        Ok(self.profiles.read().unwrap().len())
    }

    fn find_by_field(
        &self,
        field: ProfileField,
        value: &str,
    ) -> Result<Option<Profile>, StoreError> {
        let profiles = self.profiles.read().unwrap();

        let found = match field {
            ProfileField::Name => profiles
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(value.trim())),
            ProfileField::Email => profiles.iter().find(|p| {
                p.email
                    .as_deref()
                    .map(|e| e.eq_ignore_ascii_case(value.trim()))
                    .unwrap_or(false)
            }),
            ProfileField::LinkedinUrl => {
                let needle = normalize_linkedin(value);
                profiles.iter().find(|p| {
                    p.linkedin_url
                        .as_deref()
                        .map(|u| normalize_linkedin(u) == needle)
                        .unwrap_or(false)
                })
            }
            ProfileField::Site => profiles.iter().find(|p| {
                p.site
                    .as_deref()
                    .map(|s| s.eq_ignore_ascii_case(value.trim()))
                    .unwrap_or(false)
            }),
        };

        Ok(found.cloned())
    }

    fn insert(&self, create: ProfileCreate) -> Result<Profile, StoreError> {
        let mut profiles = self.profiles.write().unwrap();

        let site = create.personal_site.as_deref().and_then(derive_site);

        Self::check_unique(
            &profiles,
            None,
            Some(&create.name),
            create.linkedin_url.as_deref(),
            site.as_deref(),
        )?;

        let profile = Profile {
            id: Eid::new(),
            email: None,
            name: create.name,
            header: create.header,
            description: create.description,
            skill: create.skill,
            secondary_skills: create.secondary_skills,
            grad_year: create.grad_year,
            personal_site: create.personal_site,
            site,
            x_url: create.x_url,
            linkedin_url: create.linkedin_url,
            profile_image_url: create.profile_image_url,
        };

        profiles.push(profile.clone());
        self.save(&profiles)?;

        Ok(profile)
    }

    fn update(&self, id: &Eid, update: ProfileUpdate) -> Result<Profile, StoreError> {
        let mut profiles = self.profiles.write().unwrap();

        let idx = profiles
            .iter()
            .position(|p| &p.id == id)
            .ok_or(StoreError::NotFound)?;

        // re-check the claim under the write lock: two racing first edits
        // both see an unclaimed record, only one may bind its email
        if update.bind_email.is_some() && !profiles[idx].is_unclaimed() {
            return Err(StoreError::AlreadyClaimed);
        }

        // build the post-update uniqueness keys before mutating anything
        let new_site = match &update.personal_site {
            Some(Some(ps)) => derive_site(ps),
            Some(None) => None,
            None => profiles[idx].site.clone(),
        };
        let site_changed = update.personal_site.is_some();

        Self::check_unique(
            &profiles,
            Some(id),
            update.name.as_deref(),
            update
                .linkedin_url
                .as_ref()
                .and_then(|inner| inner.as_deref()),
            if site_changed { new_site.as_deref() } else { None },
        )?;

        let profile = &mut profiles[idx];

        if let Some(email) = update.bind_email {
            profile.email = Some(email.to_lowercase());
        }
        if let Some(name) = update.name {
            profile.name = name;
        }
        if let Some(header) = update.header {
            profile.header = header;
        }
        if let Some(description) = update.description {
            profile.description = description;
        }
        if let Some(skill) = update.skill {
            profile.skill = skill;
        }
        if let Some(secondary_skills) = update.secondary_skills {
            profile.secondary_skills = secondary_skills;
        }
        if let Some(grad_year) = update.grad_year {
            profile.grad_year = grad_year;
        }
        if let Some(personal_site) = update.personal_site {
            profile.personal_site = personal_site;
            profile.site = new_site;
        }
        if let Some(x_url) = update.x_url {
            profile.x_url = x_url;
        }
        if let Some(linkedin_url) = update.linkedin_url {
            profile.linkedin_url = linkedin_url;
        }
        if let Some(profile_image_url) = update.profile_image_url {
            profile.profile_image_url = profile_image_url;
        }

        let result = profile.clone();
        self.save(&profiles)?;

        Ok(result)
    }

    fn set_embedding(&self, id: &Eid, embedding: Vec<f32>) -> Result<(), StoreError> {
        let profile = self.get(id)?.ok_or(StoreError::NotFound)?;
        let text_hash = text::search_text_hash(&profile);

        let mut vectors = self.vectors.write().unwrap();
        vectors.insert(id.clone(), text_hash, embedding)?;
        self.save_vectors(&vectors)?;

        Ok(())
    }

    fn embedding(&self, id: &Eid) -> Result<Option<Vec<f32>>, StoreError> {
        let vectors = self.vectors.read().unwrap();
        Ok(vectors.get(id).map(|entry| entry.embedding.clone()))
    }

    fn stale_embeddings(&self) -> Result<Vec<Eid>, StoreError> {
        let profiles = self.profiles.read().unwrap();
        let vectors = self.vectors.read().unwrap();

        Ok(profiles
            .iter()
            .filter(|p| {
                vectors
                    .get(&p.id)
                    .map(|entry| entry.text_hash != text::search_text_hash(p))
                    .unwrap_or(true)
            })
            .map(|p| p.id.clone())
            .collect())
    }

    fn semantic_search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(Profile, f32)>, StoreError> {
        let ranked = {
            let vectors = self.vectors.read().unwrap();
            vectors.search(query, k)?
        };

        let profiles = self.profiles.read().unwrap();
        Ok(ranked
            .into_iter()
            .filter_map(|r| {
                profiles
                    .iter()
                    .find(|p| p.id == r.id)
                    .map(|p| (p.clone(), r.score))
            })
            .collect())
    }
}

fn opt_column(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn record_to_profile(record: &csv::StringRecord) -> Result<Profile, StoreError> {
    let column = |idx: usize, name: &str| -> Result<String, StoreError> {
        Ok(record
            .get(idx)
            .ok_or_else(|| anyhow!("couldnt get record {name}"))?
            .to_string())
    };

    let secondary_skills = column(6, "secondary_skills")?;

    Ok(Profile {
        id: Eid::from(column(0, "id")?),
        email: opt_column(&column(1, "email")?),
        name: column(2, "name")?,
        header: column(3, "header")?,
        description: column(4, "description")?,
        skill: column(5, "skill")?,
        secondary_skills: if secondary_skills.is_empty() {
            vec![]
        } else {
            secondary_skills.split(',').map(String::from).collect()
        },
        grad_year: column(7, "grad_year")?,
        personal_site: opt_column(&column(8, "personal_site")?),
        site: opt_column(&column(9, "site")?),
        x_url: opt_column(&column(10, "x_url")?),
        linkedin_url: opt_column(&column(11, "linkedin_url")?),
        profile_image_url: opt_column(&column(12, "profile_image_url")?),
    })
}

fn profile_to_record(profile: &Profile) -> [String; 13] {
    [
        profile.id.to_string(),
        profile.email.clone().unwrap_or_default(),
        profile.name.clone(),
        profile.header.clone(),
        profile.description.clone(),
        profile.skill.clone(),
        profile.secondary_skills.join(","),
        profile.grad_year.clone(),
        profile.personal_site.clone().unwrap_or_default(),
        profile.site.clone().unwrap_or_default(),
        profile.x_url.clone().unwrap_or_default(),
        profile.linkedin_url.clone().unwrap_or_default(),
        profile.profile_image_url.clone().unwrap_or_default(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{hash_model_name, EMBEDDING_DIM};

    fn test_store() -> (BackendCsv, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = BackendCsv::load(
            dir.path().join("profiles.csv"),
            dir.path().join("vectors.bin"),
            hash_model_name("all-MiniLM-L6-v2"),
        )
        .unwrap();
        (store, dir)
    }

    fn jane() -> ProfileCreate {
        ProfileCreate {
            name: "Jane Doe".to_string(),
            header: "Builder of things".to_string(),
            description: "Ships web apps".to_string(),
            skill: "Fullstack".to_string(),
            secondary_skills: vec!["Design".to_string()],
            grad_year: "2025".to_string(),
            personal_site: Some("https://www.janedoe.dev".to_string()),
            linkedin_url: Some("https://linkedin.com/in/janedoe".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_derive_site() {
        assert_eq!(derive_site("https://www.janedoe.dev"), Some("janedoe.dev".to_string()));
        assert_eq!(derive_site("http://janedoe.dev"), Some("janedoe.dev".to_string()));
        assert_eq!(derive_site("janedoe.dev"), Some("janedoe.dev".to_string()));
        assert_eq!(derive_site("https://www."), None);
        assert_eq!(derive_site(""), None);
    }

    #[test]
    fn test_insert_derives_site_and_assigns_id() {
        let (store, _dir) = test_store();
        let profile = store.insert(jane()).unwrap();

        assert!(!profile.id.is_empty());
        assert_eq!(profile.site.as_deref(), Some("janedoe.dev"));
        assert!(profile.is_unclaimed());
        assert_eq!(store.total().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_name_case_insensitive() {
        let (store, _dir) = test_store();
        store.insert(jane()).unwrap();

        let mut dup = jane();
        dup.name = "jane doe".to_string();
        dup.personal_site = None;
        dup.linkedin_url = None;

        let result = store.insert(dup);
        assert!(matches!(result, Err(StoreError::Duplicate(msg)) if msg.contains("name")));
        assert_eq!(store.total().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_linkedin_ignores_trailing_slash_and_case() {
        let (store, _dir) = test_store();
        store.insert(jane()).unwrap();

        let mut dup = jane();
        dup.name = "Someone Else".to_string();
        dup.personal_site = None;
        dup.linkedin_url = Some("HTTPS://LINKEDIN.COM/IN/JANEDOE/".to_string());

        let result = store.insert(dup);
        assert!(matches!(result, Err(StoreError::Duplicate(msg)) if msg.contains("LinkedIn")));
    }

    #[test]
    fn test_duplicate_site_after_derivation() {
        let (store, _dir) = test_store();
        store.insert(jane()).unwrap();

        let mut dup = jane();
        dup.name = "Someone Else".to_string();
        dup.linkedin_url = None;
        dup.personal_site = Some("http://JaneDoe.dev".to_string());

        let result = store.insert(dup);
        assert!(matches!(result, Err(StoreError::Duplicate(msg)) if msg.contains("site")));
    }

    #[test]
    fn test_update_binds_email_and_clears_links() {
        let (store, _dir) = test_store();
        let profile = store.insert(jane()).unwrap();

        let updated = store
            .update(
                &profile.id,
                ProfileUpdate {
                    header: Some("New header".to_string()),
                    personal_site: Some(None),
                    bind_email: Some("Alice@Example.com".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.email.as_deref(), Some("alice@example.com"));
        assert_eq!(updated.header, "New header");
        assert_eq!(updated.personal_site, None);
        assert_eq!(updated.site, None);
        // untouched fields survive
        assert_eq!(updated.name, "Jane Doe");
    }

    #[test]
    fn test_update_json_null_clears_while_absent_leaves_alone() {
        // an explicit null must survive deserialization as Some(None)
        let update: ProfileUpdate = serde_json::from_str(r#"{"personal_site": null}"#).unwrap();
        assert_eq!(update.personal_site, Some(None));
        assert_eq!(update.x_url, None);

        let update: ProfileUpdate = serde_json::from_str("{}").unwrap();
        assert_eq!(update.personal_site, None);
        assert_eq!(update.linkedin_url, None);

        let update: ProfileUpdate =
            serde_json::from_str(r#"{"x_url": "https://x.com/janedoe"}"#).unwrap();
        assert_eq!(update.x_url, Some(Some("https://x.com/janedoe".to_string())));

        // and the deserialized null actually clears the stored link
        let (store, _dir) = test_store();
        let profile = store.insert(jane()).unwrap();
        assert_eq!(profile.site.as_deref(), Some("janedoe.dev"));

        let update: ProfileUpdate = serde_json::from_str(r#"{"personal_site": null}"#).unwrap();
        let updated = store.update(&profile.id, update).unwrap();
        assert_eq!(updated.personal_site, None);
        assert_eq!(updated.site, None);
    }

    #[test]
    fn test_second_claim_rejected_under_write_lock() {
        let (store, _dir) = test_store();
        let profile = store.insert(jane()).unwrap();

        store
            .update(
                &profile.id,
                ProfileUpdate {
                    bind_email: Some("alice@example.com".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        // a second first-edit that raced past the service-level check
        let result = store.update(
            &profile.id,
            ProfileUpdate {
                bind_email: Some("bob@example.com".to_string()),
                header: Some("taken over".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(StoreError::AlreadyClaimed)));

        // the first claim and the profile's fields are untouched
        let current = store.get(&profile.id).unwrap().unwrap();
        assert_eq!(current.email.as_deref(), Some("alice@example.com"));
        assert_eq!(current.header, "Builder of things");
    }

    #[test]
    fn test_multi_key_collision_reports_name_first() {
        let (store, _dir) = test_store();
        store.insert(jane()).unwrap();

        let mut other = jane();
        other.name = "John Roe".to_string();
        other.personal_site = None;
        other.linkedin_url = Some("https://linkedin.com/in/johnroe".to_string());
        store.insert(other).unwrap();

        // collides with John's name and Jane's site; name has priority
        let mut dup = jane();
        dup.name = "JOHN ROE".to_string();
        dup.linkedin_url = None;
        dup.personal_site = Some("https://janedoe.dev".to_string());

        let result = store.insert(dup);
        assert!(matches!(result, Err(StoreError::Duplicate(msg)) if msg.contains("name")));
    }

    #[test]
    fn test_update_rejects_stealing_anothers_name() {
        let (store, _dir) = test_store();
        store.insert(jane()).unwrap();

        let mut other = jane();
        other.name = "John Roe".to_string();
        other.personal_site = None;
        other.linkedin_url = None;
        let other = store.insert(other).unwrap();

        let result = store.update(
            &other.id,
            ProfileUpdate {
                name: Some("JANE DOE".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
    }

    #[test]
    fn test_update_keeping_own_name_is_not_a_duplicate() {
        let (store, _dir) = test_store();
        let profile = store.insert(jane()).unwrap();

        let updated = store.update(
            &profile.id,
            ProfileUpdate {
                name: Some("Jane Doe".to_string()),
                ..Default::default()
            },
        );
        assert!(updated.is_ok());
    }

    #[test]
    fn test_set_embedding_rejects_wrong_width_without_partial_state() {
        let (store, _dir) = test_store();
        let profile = store.insert(jane()).unwrap();

        let result = store.set_embedding(&profile.id, vec![1.0; 100]);
        assert!(matches!(result, Err(StoreError::MalformedVector(_))));

        // the profile is still retrievable, just unindexed
        assert!(store.get(&profile.id).unwrap().is_some());
        assert!(store.embedding(&profile.id).unwrap().is_none());

        // a later backfill populates it without re-running uniqueness checks
        let mut vector = vec![0.0; EMBEDDING_DIM];
        vector[0] = 1.0;
        store.set_embedding(&profile.id, vector.clone()).unwrap();
        assert_eq!(store.embedding(&profile.id).unwrap(), Some(vector));
    }

    #[test]
    fn test_stale_embeddings_tracks_text_changes() {
        let (store, _dir) = test_store();
        let profile = store.insert(jane()).unwrap();

        assert_eq!(store.stale_embeddings().unwrap(), vec![profile.id.clone()]);

        let mut vector = vec![0.0; EMBEDDING_DIM];
        vector[1] = 1.0;
        store.set_embedding(&profile.id, vector).unwrap();
        assert!(store.stale_embeddings().unwrap().is_empty());

        store
            .update(
                &profile.id,
                ProfileUpdate {
                    description: Some("Now ships infra too".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(store.stale_embeddings().unwrap(), vec![profile.id]);
    }

    #[test]
    fn test_semantic_search_hydrates_profiles_in_rank_order() {
        let (store, _dir) = test_store();

        let researcher = store
            .insert(ProfileCreate {
                name: "AI Researcher".to_string(),
                skill: "Backend".to_string(),
                grad_year: "2024".to_string(),
                ..Default::default()
            })
            .unwrap();
        let designer = store
            .insert(ProfileCreate {
                name: "Product Designer".to_string(),
                skill: "Design".to_string(),
                grad_year: "2024".to_string(),
                ..Default::default()
            })
            .unwrap();

        let mut v0 = vec![0.0; EMBEDDING_DIM];
        v0[0] = 1.0;
        let mut v1 = vec![0.0; EMBEDDING_DIM];
        v1[1] = 1.0;

        store.set_embedding(&researcher.id, v0.clone()).unwrap();
        store.set_embedding(&designer.id, v1).unwrap();

        let results = store.semantic_search(&v0, 5).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.name, "AI Researcher");
        assert!(results[0].1 > results[1].1);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("profiles.csv");
        let vectors_path = dir.path().join("vectors.bin");
        let model_id = hash_model_name("all-MiniLM-L6-v2");

        let id = {
            let store =
                BackendCsv::load(csv_path.clone(), vectors_path.clone(), model_id).unwrap();
            let profile = store.insert(jane()).unwrap();
            let mut vector = vec![0.0; EMBEDDING_DIM];
            vector[3] = 1.0;
            store.set_embedding(&profile.id, vector).unwrap();
            profile.id
        };

        let store = BackendCsv::load(csv_path, vectors_path, model_id).unwrap();
        let profile = store.get(&id).unwrap().unwrap();
        assert_eq!(profile.name, "Jane Doe");
        assert_eq!(profile.secondary_skills, vec!["Design".to_string()]);
        assert!(store.embedding(&id).unwrap().is_some());
    }

    #[test]
    fn test_list_is_newest_first() {
        let (store, _dir) = test_store();

        for i in 0..3 {
            store
                .insert(ProfileCreate {
                    name: format!("Person {i}"),
                    skill: "Backend".to_string(),
                    grad_year: "2025".to_string(),
                    ..Default::default()
                })
                .unwrap();
        }

        let listed = store.list(2).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "Person 2");
        assert_eq!(listed[1].name, "Person 1");
    }

    #[test]
    fn test_find_by_field_email_case_insensitive() {
        let (store, _dir) = test_store();
        let profile = store.insert(jane()).unwrap();
        store
            .update(
                &profile.id,
                ProfileUpdate {
                    bind_email: Some("alice@example.com".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let found = store
            .find_by_field(ProfileField::Email, "ALICE@example.COM")
            .unwrap();
        assert_eq!(found.unwrap().id, profile.id);

        assert!(store
            .find_by_field(ProfileField::Email, "bob@example.com")
            .unwrap()
            .is_none());
    }
}
