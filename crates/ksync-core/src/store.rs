use crate::error::StorageError;
use crate::lockfile::LockFile;
use crate::model::RepositoryRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const STORE_VERSION: u64 = 1;

/// Result of [`RepositoryStore::mutate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// The closure accepted the change; the persisted record is returned.
    Applied(RepositoryRecord),
    /// The closure declined; nothing was written. The current record is returned.
    Rejected(RepositoryRecord),
    Missing,
}

/// Persistence for repository records. Last write wins; there are no
/// multi-record transactions.
pub trait RepositoryStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<RepositoryRecord>, StorageError>;
    fn list(&self) -> Result<Vec<RepositoryRecord>, StorageError>;
    fn upsert(&self, record: &RepositoryRecord) -> Result<(), StorageError>;
    fn remove(&self, name: &str) -> Result<bool, StorageError>;

    /// Read-modify-write of one record, atomic with respect to other callers
    /// of the same store. `apply` returns `false` to leave the record as is.
    fn mutate(
        &self,
        name: &str,
        apply: &mut dyn FnMut(&mut RepositoryRecord) -> bool,
    ) -> Result<Mutation, StorageError>;
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct StoreFile {
    version: u64,
    #[serde(default)]
    repositories: BTreeMap<String, RepositoryRecord>,
}

impl StoreFile {
    fn new() -> Self {
        Self {
            version: STORE_VERSION,
            repositories: BTreeMap::new(),
        }
    }

    fn load(path: &Path) -> Result<Self, StorageError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = fs::read_to_string(path).map_err(|source| StorageError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if data.trim().is_empty() {
            return Ok(Self::new());
        }
        let json: serde_json::Value =
            serde_json::from_str(&data).map_err(|source| StorageError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        match json.get("version").and_then(|value| value.as_u64()) {
            Some(STORE_VERSION) | None => {
                let mut file: StoreFile =
                    serde_json::from_value(json).map_err(|source| StorageError::Decode {
                        path: path.to_path_buf(),
                        source,
                    })?;
                file.version = STORE_VERSION;
                Ok(file)
            }
            Some(other) => Err(StorageError::UnsupportedVersion(other)),
        }
    }

    /// Writes to a sibling temp file and renames it over the store so a crash
    /// never leaves a half-written file behind.
    fn save(&self, path: &Path) -> Result<(), StorageError> {
        let write_err = |source| StorageError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let data = serde_json::to_string_pretty(self).map_err(StorageError::Encode)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)?;
        Ok(())
    }
}

/// Repository records in a single JSON file.
///
/// Writers are serialized in-process by a mutex and across processes by an
/// exclusive lock on `<store>.lock`. Every call re-reads the file, so two
/// instances over the same path observe each other's writes.
#[derive(Debug)]
pub struct JsonRepositoryStore {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

impl JsonRepositoryStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        let store = Self {
            path,
            lock_path,
            guard: Mutex::new(()),
        };
        // Surface corrupt or unsupported files at construction.
        StoreFile::load(&store.path)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_file<T>(
        &self,
        write: bool,
        f: impl FnOnce(&mut StoreFile) -> (T, bool),
    ) -> Result<T, StorageError> {
        let _guard = self.guard.lock().map_err(|_| StorageError::Poisoned)?;
        let _lock = LockFile::acquire(&self.lock_path)?;
        let mut file = StoreFile::load(&self.path)?;
        let (value, dirty) = f(&mut file);
        if write && dirty {
            file.save(&self.path)?;
            debug!(path = %self.path.display(), "repository store saved");
        }
        Ok(value)
    }
}

impl RepositoryStore for JsonRepositoryStore {
    fn get(&self, name: &str) -> Result<Option<RepositoryRecord>, StorageError> {
        self.with_file(false, |file| (file.repositories.get(name).cloned(), false))
    }

    fn list(&self) -> Result<Vec<RepositoryRecord>, StorageError> {
        self.with_file(false, |file| {
            (file.repositories.values().cloned().collect(), false)
        })
    }

    fn upsert(&self, record: &RepositoryRecord) -> Result<(), StorageError> {
        self.with_file(true, |file| {
            file.repositories
                .insert(record.name.clone(), record.clone());
            ((), true)
        })
    }

    fn remove(&self, name: &str) -> Result<bool, StorageError> {
        self.with_file(true, |file| {
            let removed = file.repositories.remove(name).is_some();
            (removed, removed)
        })
    }

    fn mutate(
        &self,
        name: &str,
        apply: &mut dyn FnMut(&mut RepositoryRecord) -> bool,
    ) -> Result<Mutation, StorageError> {
        self.with_file(true, |file| mutate_in(&mut file.repositories, name, apply))
    }
}

/// Records held in memory; dropping the store drops the data.
#[derive(Debug, Default)]
pub struct MemoryRepositoryStore {
    records: Mutex<BTreeMap<String, RepositoryRecord>>,
}

impl MemoryRepositoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = RepositoryRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }
}

impl RepositoryStore for MemoryRepositoryStore {
    fn get(&self, name: &str) -> Result<Option<RepositoryRecord>, StorageError> {
        let records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(records.get(name).cloned())
    }

    fn list(&self) -> Result<Vec<RepositoryRecord>, StorageError> {
        let records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(records.values().cloned().collect())
    }

    fn upsert(&self, record: &RepositoryRecord) -> Result<(), StorageError> {
        let mut records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
        records.insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<bool, StorageError> {
        let mut records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(records.remove(name).is_some())
    }

    fn mutate(
        &self,
        name: &str,
        apply: &mut dyn FnMut(&mut RepositoryRecord) -> bool,
    ) -> Result<Mutation, StorageError> {
        let mut records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(mutate_in(&mut records, name, apply).0)
    }
}

fn mutate_in(
    records: &mut BTreeMap<String, RepositoryRecord>,
    name: &str,
    apply: &mut dyn FnMut(&mut RepositoryRecord) -> bool,
) -> (Mutation, bool) {
    let Some(current) = records.get(name) else {
        return (Mutation::Missing, false);
    };
    let mut candidate = current.clone();
    if apply(&mut candidate) {
        records.insert(name.to_string(), candidate.clone());
        (Mutation::Applied(candidate), true)
    } else {
        (Mutation::Rejected(candidate), false)
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "repositories.json".into());
    name.push(".lock");
    path.with_file_name(name)
}
