//! Binary sidecar storage for profile embeddings.
//!
//! The profile CSV stays human-readable; vectors live next to it in
//! vectors.bin.
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of the header fields before the checksum)
//!
//! Entries (repeated):
//! - profile_id: u128 (little-endian ULID bits)
//! - text_hash: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rusty_ulid::Ulid;

use crate::eid::Eid;
use crate::semantic::index::VectorIndex;
use crate::semantic::EMBEDDING_DIM;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

/// Reader/writer for the vectors.bin sidecar.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the vector index, validating version, model and dimensions.
    pub fn load(&self, expected_model_id: &[u8; 32]) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;

        if header.version != FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(
                header.version,
                FORMAT_VERSION,
            ));
        }
        if &header.model_id != expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        if header.dimensions as usize != EMBEDDING_DIM {
            return Err(VectorStorageError::DimensionMismatch {
                expected: EMBEDDING_DIM,
                got: header.dimensions as usize,
            });
        }

        let mut index = VectorIndex::with_capacity(header.entry_count as usize);

        for _ in 0..header.entry_count {
            let (id, text_hash, embedding) = read_entry(&mut reader)?;
            if let Err(err) = index.insert(id, text_hash, embedding) {
                // a bad entry degrades recall for one profile, not the whole file
                log::warn!("skipping unusable vector entry: {err}");
            }
        }

        Ok(index)
    }

    /// Write the whole index atomically (tmp file + rename).
    pub fn save(
        &self,
        index: &VectorIndex,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let temp_path = self.path.with_extension("bin.tmp");

        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);

            write_header(&mut writer, model_id, index.len() as u64)?;

            for (id, entry) in index.iter() {
                write_entry(&mut writer, id, entry.text_hash, &entry.embedding)?;
            }

            writer.flush()?;
        }

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn write_header<W: Write>(
    writer: &mut W,
    model_id: &[u8; 32],
    entry_count: u64,
) -> Result<(), VectorStorageError> {
    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.push(FORMAT_VERSION);
    header.extend_from_slice(model_id);
    header.extend_from_slice(&(EMBEDDING_DIM as u16).to_le_bytes());
    header.extend_from_slice(&entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&header);
    header.extend_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header)?;
    Ok(())
}

fn read_header<R: Read>(reader: &mut R) -> Result<Header, VectorStorageError> {
    let mut buf = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut buf)
        .map_err(|_| VectorStorageError::InvalidFormat("file too short for header".into()))?;

    let stored_checksum = u32::from_le_bytes(
        buf[HEADER_SIZE - 4..]
            .try_into()
            .expect("fixed-size header slice"),
    );
    let computed_checksum = crc32fast::hash(&buf[..HEADER_SIZE - 4]);
    if stored_checksum != computed_checksum {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let version = buf[0];
    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&buf[1..33]);
    let dimensions = u16::from_le_bytes(buf[33..35].try_into().expect("fixed-size slice"));
    let entry_count = u64::from_le_bytes(buf[35..43].try_into().expect("fixed-size slice"));

    Ok(Header {
        version,
        model_id,
        dimensions,
        entry_count,
    })
}

fn write_entry<W: Write>(
    writer: &mut W,
    id: &Eid,
    text_hash: u64,
    embedding: &[f32],
) -> Result<(), VectorStorageError> {
    let ulid = id.as_ulid().map_err(|_| {
        VectorStorageError::InvalidFormat(format!("profile id {id} is not a ULID"))
    })?;

    writer.write_all(&u128::from(ulid).to_le_bytes())?;
    writer.write_all(&text_hash.to_le_bytes())?;
    for value in embedding {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn read_entry<R: Read>(reader: &mut R) -> Result<(Eid, u64, Vec<f32>), VectorStorageError> {
    let mut id_buf = [0u8; 16];
    reader
        .read_exact(&mut id_buf)
        .map_err(|_| VectorStorageError::InvalidFormat("truncated entry id".into()))?;
    let id = Eid::from(Ulid::from(u128::from_le_bytes(id_buf)));

    let mut hash_buf = [0u8; 8];
    reader
        .read_exact(&mut hash_buf)
        .map_err(|_| VectorStorageError::InvalidFormat("truncated entry hash".into()))?;
    let text_hash = u64::from_le_bytes(hash_buf);

    let mut embedding = Vec::with_capacity(EMBEDDING_DIM);
    let mut value_buf = [0u8; 4];
    for _ in 0..EMBEDDING_DIM {
        reader
            .read_exact(&mut value_buf)
            .map_err(|_| VectorStorageError::InvalidFormat("truncated embedding".into()))?;
        embedding.push(f32::from_le_bytes(value_buf));
    }

    Ok((id, text_hash, embedding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::embeddings::hash_model_name;

    fn unit_vector(component: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[component] = 1.0;
        v
    }

    fn temp_storage(tag: &str) -> (VectorStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = VectorStorage::new(dir.path().join(format!("vectors-{tag}.bin")));
        (storage, dir)
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (storage, _dir) = temp_storage("roundtrip");
        let model_id = hash_model_name("all-MiniLM-L6-v2");

        let id_a = Eid::new();
        let id_b = Eid::new();

        let mut index = VectorIndex::new();
        index.insert(id_a.clone(), 11, unit_vector(0)).unwrap();
        index.insert(id_b.clone(), 22, unit_vector(5)).unwrap();

        storage.save(&index, &model_id).unwrap();
        assert!(storage.exists());

        let loaded = storage.load(&model_id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(&id_a).unwrap().text_hash, 11);
        assert_eq!(loaded.get(&id_b).unwrap().embedding, unit_vector(5));
    }

    #[test]
    fn test_model_change_detected() {
        let (storage, _dir) = temp_storage("model");
        let mut index = VectorIndex::new();
        index.insert(Eid::new(), 0, unit_vector(0)).unwrap();

        storage
            .save(&index, &hash_model_name("all-MiniLM-L6-v2"))
            .unwrap();

        let result = storage.load(&hash_model_name("bge-small-en-v1.5"));
        assert!(matches!(result, Err(VectorStorageError::ModelMismatch)));
    }

    #[test]
    fn test_corrupted_header_detected() {
        let (storage, _dir) = temp_storage("corrupt");
        let model_id = hash_model_name("all-MiniLM-L6-v2");

        let mut index = VectorIndex::new();
        index.insert(Eid::new(), 0, unit_vector(0)).unwrap();
        storage.save(&index, &model_id).unwrap();

        // flip a byte inside the header
        let mut bytes = std::fs::read(storage.path()).unwrap();
        bytes[10] ^= 0xFF;
        std::fs::write(storage.path(), &bytes).unwrap();

        let result = storage.load(&model_id);
        assert!(matches!(result, Err(VectorStorageError::ChecksumMismatch)));
    }

    #[test]
    fn test_truncated_file_detected() {
        let (storage, _dir) = temp_storage("truncated");
        let model_id = hash_model_name("all-MiniLM-L6-v2");

        let mut index = VectorIndex::new();
        index.insert(Eid::new(), 0, unit_vector(0)).unwrap();
        storage.save(&index, &model_id).unwrap();

        let bytes = std::fs::read(storage.path()).unwrap();
        std::fs::write(storage.path(), &bytes[..bytes.len() - 100]).unwrap();

        let result = storage.load(&model_id);
        assert!(matches!(result, Err(VectorStorageError::InvalidFormat(_))));
    }

    #[test]
    fn test_empty_index_roundtrip() {
        let (storage, _dir) = temp_storage("empty");
        let model_id = hash_model_name("all-MiniLM-L6-v2");

        storage.save(&VectorIndex::new(), &model_id).unwrap();
        let loaded = storage.load(&model_id).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let (storage, _dir) = temp_storage("missing");
        let result = storage.load(&hash_model_name("all-MiniLM-L6-v2"));
        assert!(matches!(result, Err(VectorStorageError::Io(_))));
    }
}
