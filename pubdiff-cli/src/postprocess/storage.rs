//! File storages consulted by the file index post-processor

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::source::{FixtureSource, Properties, Side};

/// Failure to reach a file storage
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    /// No storage with this uid is configured
    NotFound { storage: i64 },
    /// The storage exists but cannot be used right now
    Unavailable { storage: i64, reason: String },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::NotFound { storage } => write!(f, "Storage {} not found", storage),
            StorageError::Unavailable { storage, reason } => {
                write!(f, "Storage {} unavailable: {}", storage, reason)
            }
        }
    }
}

impl std::error::Error for StorageError {}

/// A file storage of both environments
pub trait Storage: Send + Sync {
    fn uid(&self) -> i64;

    /// Warm the foreign file information of the given identifiers in one call
    fn batch_prefetch(&self, identifiers: &[String]) -> Result<(), StorageError>;

    /// File information of an identifier on one side, if the file exists there
    fn file_info(&self, side: Side, identifier: &str) -> Option<Properties>;
}

/// Looks up storages by uid
pub trait StorageResolver: Send + Sync {
    fn resolve_storage(&self, uid: i64) -> Result<Arc<dyn Storage>, StorageError>;
}

/// Storage answering from in-memory file listings
#[derive(Debug, Clone, Default)]
pub struct StaticStorage {
    uid: i64,
    local: BTreeMap<String, Properties>,
    foreign: BTreeMap<String, Properties>,
}

impl StaticStorage {
    pub fn new(
        uid: i64,
        local: BTreeMap<String, Properties>,
        foreign: BTreeMap<String, Properties>,
    ) -> Self {
        Self {
            uid,
            local,
            foreign,
        }
    }
}

impl Storage for StaticStorage {
    fn uid(&self) -> i64 {
        self.uid
    }

    fn batch_prefetch(&self, identifiers: &[String]) -> Result<(), StorageError> {
        log::debug!("Prefetching {} files of storage {}", identifiers.len(), self.uid);
        Ok(())
    }

    fn file_info(&self, side: Side, identifier: &str) -> Option<Properties> {
        let files = match side {
            Side::Local => &self.local,
            Side::Foreign => &self.foreign,
        };
        files.get(identifier).cloned()
    }
}

/// Resolver over a fixed set of storages
#[derive(Clone, Default)]
pub struct StaticStorageResolver {
    storages: BTreeMap<i64, Arc<StaticStorage>>,
}

impl StaticStorageResolver {
    pub fn new(storages: impl IntoIterator<Item = StaticStorage>) -> Self {
        Self {
            storages: storages
                .into_iter()
                .map(|storage| (storage.uid, Arc::new(storage)))
                .collect(),
        }
    }

    /// Storages listed in the `files` section of either fixture side
    pub fn from_fixtures(source: &FixtureSource) -> Self {
        let mut storages: BTreeMap<i64, StaticStorage> = BTreeMap::new();
        for side in Side::both() {
            for (uid, files) in &source.data(side).files {
                let Ok(uid) = uid.trim().parse::<i64>() else {
                    log::warn!("Ignoring files of storage with invalid uid '{}'", uid);
                    continue;
                };
                let storage = storages.entry(uid).or_insert_with(|| StaticStorage {
                    uid,
                    ..Default::default()
                });
                match side {
                    Side::Local => storage.local = files.clone(),
                    Side::Foreign => storage.foreign = files.clone(),
                }
            }
        }
        Self::new(storages.into_values())
    }

    pub fn len(&self) -> usize {
        self.storages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }
}

impl StorageResolver for StaticStorageResolver {
    fn resolve_storage(&self, uid: i64) -> Result<Arc<dyn Storage>, StorageError> {
        self.storages
            .get(&uid)
            .map(|storage| Arc::clone(storage) as Arc<dyn Storage>)
            .ok_or(StorageError::NotFound { storage: uid })
    }
}
