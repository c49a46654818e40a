use crate::error::RemoteError;
use crate::metadata::MetadataEntity;
use smbdoc_types::{ResourceKey, UnixTime};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Entities older than this are reported as [CacheState::Expired].
pub const CACHE_EXPIRATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Miss,
    Hit,

    /// The entity is there but should be refreshed.
    Expired,
}

/// Result of [MetadataCache::get].
#[derive(Debug, Clone)]
pub struct CacheResult {
    pub state: CacheState,

    /// Set unless the state is [CacheState::Miss].
    pub entity: Option<Arc<MetadataEntity>>,
}

impl CacheResult {
    fn miss() -> Self {
        Self {
            state: CacheState::Miss,
            entity: None,
        }
    }

    pub fn is_miss(&self) -> bool {
        self.state == CacheState::Miss
    }
}

#[derive(Default)]
struct Entries {
    entities: HashMap<ResourceKey, Arc<MetadataEntity>>,

    /// Errors of loads that produced no entity.
    errors: HashMap<ResourceKey, RemoteError>,
}

impl Entries {
    fn put(&mut self, entity: Arc<MetadataEntity>) {
        let key = entity.key();
        if let Some(parent) = key.parent().and_then(|p| self.entities.get(&p)) {
            parent.put_child(Arc::clone(&entity));
        }
        log::debug!("{key}: cached");
        self.entities.insert(key, entity);
    }

    fn remove(&mut self, key: &ResourceKey) -> Option<Arc<MetadataEntity>> {
        self.errors.remove(key);
        if let Some(parent) = key.parent().and_then(|p| self.entities.get(&p)) {
            parent.remove_child(key);
        }

        self.entities.remove(key)
    }
}

/// In-memory store of [MetadataEntity], by key.
///
/// Every operation is atomic with respect to the others. When both
/// are needed, the cache lock is taken before any entity lock.
#[derive(Default)]
pub struct MetadataCache {
    entries: RwLock<Entries>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ResourceKey) -> CacheResult {
        self.get_at(key, UnixTime::now())
    }

    /// Look up `key` as if the current time was `now`.
    pub fn get_at(&self, key: &ResourceKey, now: UnixTime) -> CacheResult {
        let entries = self.entries.read().unwrap();
        let entity = match entries.entities.get(key) {
            None => return CacheResult::miss(),
            Some(entity) => Arc::clone(entity),
        };
        let state = if now.duration_since(&entity.timestamp()) >= CACHE_EXPIRATION {
            CacheState::Expired
        } else {
            CacheState::Hit
        };

        CacheResult {
            state,
            entity: Some(entity),
        }
    }

    /// Store `entity` under its key, replacing any previous one.
    ///
    /// If the parent is in the cache with its children loaded, the
    /// entity is added to those children.
    pub fn put(&self, entity: Arc<MetadataEntity>) {
        self.entries.write().unwrap().put(entity);
    }

    /// Remove the entity of `key`, its error and its link from the
    /// parent. Does nothing if `key` isn't cached.
    pub fn remove(&self, key: &ResourceKey) {
        self.entries.write().unwrap().remove(key);
    }

    /// Move a cached entity to a new key, relinking it to its new
    /// parent.
    ///
    /// Does nothing if `old` isn't cached.
    pub fn rename(&self, old: &ResourceKey, new: &ResourceKey) {
        let mut entries = self.entries.write().unwrap();
        if let Some(entity) = entries.remove(old) {
            entity.rename(new.clone());
            entries.put(entity);
        }
    }

    /// Remember that loading `key` failed.
    pub fn put_error(&self, key: &ResourceKey, err: RemoteError) {
        self.entries
            .write()
            .unwrap()
            .errors
            .insert(key.clone(), err);
    }

    /// Return the error stored by [MetadataCache::put_error], if any,
    /// and forget it.
    pub fn take_error(&self, key: &ResourceKey) -> Option<RemoteError> {
        self.entries.write().unwrap().errors.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
