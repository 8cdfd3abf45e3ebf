use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::Document;
use crate::error::PersistenceError;

/// Whole-document storage supplied by the host.
///
/// The engine only ever reads the full document once and writes it back in
/// full after every change.
pub trait DocumentStore: Send {
    /// `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Document>, PersistenceError>;

    fn save(&mut self, document: &Document) -> Result<(), PersistenceError>;
}

/// Stores the document as one JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        JsonFileStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentStore for JsonFileStore {
    fn load(&self) -> Result<Option<Document>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let buffer = fs::read(&self.path).map_err(|e| PersistenceError::io(&self.path, e))?;
        let document = serde_json::from_slice(&buffer).map_err(PersistenceError::Decode)?;
        Ok(Some(document))
    }

    fn save(&mut self, document: &Document) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let serialized = serde_json::to_vec_pretty(document).map_err(PersistenceError::Encode)?;

        // Write to a temporary file first
        let temp_path = self.path.with_extension("tmp");
        let mut file = File::create(&temp_path).map_err(|e| PersistenceError::io(&temp_path, e))?;
        file.write_all(&serialized)
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| PersistenceError::io(&temp_path, e))?;

        // Rename over the previous document (atomic on most filesystems)
        fs::rename(&temp_path, &self.path).map_err(|e| PersistenceError::io(&self.path, e))?;

        log::debug!("wrote {} bytes to {}", serialized.len(), self.path.display());
        Ok(())
    }
}

/// Keeps the serialized document in memory.
///
/// Clones share the same slot, so a test can hand one clone to the engine
/// and inspect what was written through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// The last document written, decoded again.
    pub fn snapshot(&self) -> Result<Option<Document>, PersistenceError> {
        self.load()
    }

    pub fn saved_json(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self) -> Result<Option<Document>, PersistenceError> {
        self.saved_json()
            .map(|json| serde_json::from_str(&json).map_err(PersistenceError::Decode))
            .transpose()
    }

    fn save(&mut self, document: &Document) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(document).map_err(PersistenceError::Encode)?;
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Register;

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("nested").join("afyadb.json"));
        assert!(store.load().unwrap().is_none());

        let mut document = Document::default();
        document.registers.push(Register::new("OPD"));
        store.save(&document).unwrap();

        assert_eq!(store.load().unwrap(), Some(document));
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afyadb.json");
        fs::write(&path, b"{ not json").unwrap();

        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, PersistenceError::Decode(_)));
    }

    #[test]
    fn memory_store_clones_share_state() {
        let observer = MemoryStore::new();
        let mut writer = observer.clone();

        writer.save(&Document::default()).unwrap();
        assert_eq!(observer.snapshot().unwrap(), Some(Document::default()));
    }
}
