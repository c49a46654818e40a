use crate::error::RemoteError;
use crate::remote::Remote;
use smbdoc_types::{DirectoryEntry, EntryType, ResourceKey, StatInfo, UnixTime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Last known state of one remote resource.
///
/// Each facet (stat, children, errors) is swapped independently.
/// Reading the stat and then the children gives no guarantee that
/// both come from the same load.
///
/// Entities are shared as `Arc<MetadataEntity>` between the cache,
/// the children of their parent and the load tasks.
#[derive(Debug)]
pub struct MetadataEntity {
    key: RwLock<ResourceKey>,
    entry: RwLock<DirectoryEntry>,

    /// Only ever set for files.
    stat: Mutex<Option<StatInfo>>,

    /// None until the first successful listing.
    children: Mutex<Option<HashMap<ResourceKey, Arc<MetadataEntity>>>>,

    child_load_error: Mutex<Option<RemoteError>>,
    stat_load_failed: AtomicBool,

    /// Last refresh, in milliseconds since the epoch. Never moves
    /// backward.
    timestamp: AtomicU64,
}

impl MetadataEntity {
    /// Create an entity for `key` with nothing loaded.
    pub fn new(key: ResourceKey, entry: DirectoryEntry) -> Self {
        Self {
            key: RwLock::new(key),
            entry: RwLock::new(entry),
            stat: Mutex::new(None),
            children: Mutex::new(None),
            child_load_error: Mutex::new(None),
            stat_load_failed: AtomicBool::new(false),
            timestamp: AtomicU64::new(UnixTime::now().as_millis()),
        }
    }

    /// Create an entity for a child of `parent` from its listing entry.
    ///
    /// Returns None for entries that can't be exposed; see
    /// [MetadataEntity::child_key].
    pub fn from_entry(parent: &ResourceKey, entry: DirectoryEntry) -> Option<Self> {
        let key = Self::child_key(parent, &entry)?;

        Some(Self::new(key, entry))
    }

    pub fn create_share(key: ResourceKey) -> Self {
        Self::create(key, EntryType::FileShare)
    }

    pub fn create_server(key: ResourceKey) -> Self {
        Self::create(key, EntryType::Server)
    }

    fn create(key: ResourceKey, entry_type: EntryType) -> Self {
        let entry = DirectoryEntry::new(entry_type, "", key.name());

        Self::new(key, entry)
    }

    /// Build an entity from scratch by asking the remote.
    ///
    /// Files come back with their stat already loaded. The network
    /// root and servers can't be stat'ed, so they are created without
    /// a remote call.
    pub fn from_remote(key: &ResourceKey, remote: &Remote) -> Result<Self, RemoteError> {
        if key.is_root() {
            return Ok(Self::create(key.clone(), EntryType::NetworkRoot));
        }
        if key.is_server() {
            return Ok(Self::create_server(key.clone()));
        }

        let stat = remote.stat(key)?;
        if stat.is_dir() {
            return Ok(Self::create(key.clone(), EntryType::Directory));
        }
        let entity = Self::create(key.clone(), EntryType::File);
        *entity.stat.lock().unwrap() = Some(stat);

        Ok(entity)
    }

    /// Build the key of a child of `parent` from a listing entry.
    ///
    /// Unsupported entry types and the `.` and `..` entries have no
    /// key. Workgroups and servers are root-level, whatever `parent`
    /// is.
    pub fn child_key(parent: &ResourceKey, entry: &DirectoryEntry) -> Option<ResourceKey> {
        match entry.entry_type() {
            EntryType::Link
            | EntryType::PrinterShare
            | EntryType::CommsShare
            | EntryType::IpcShare => {
                log::info!(
                    "unsupported {:?} entry {:?} in {parent} ({})",
                    entry.entry_type(),
                    entry.name(),
                    entry.comment()
                );
                None
            }
            EntryType::Workgroup | EntryType::Server => ResourceKey::server(entry.name()).ok(),
            EntryType::FileShare | EntryType::Directory | EntryType::File => {
                if entry.name() == "." || entry.name() == ".." {
                    return None;
                }
                parent.join(entry.name()).ok()
            }
            EntryType::NetworkRoot => None,
        }
    }

    pub fn key(&self) -> ResourceKey {
        self.key.read().unwrap().clone()
    }

    pub fn display_name(&self) -> String {
        self.entry.read().unwrap().name().to_string()
    }

    pub fn comment(&self) -> String {
        self.entry.read().unwrap().comment().to_string()
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry.read().unwrap().entry_type()
    }

    /// True for entities that can be listed.
    pub fn is_container(&self) -> bool {
        self.entry_type().is_container()
    }

    /// True if documents can be created inside this entity.
    pub fn can_create(&self) -> bool {
        matches!(
            self.entry_type(),
            EntryType::Directory | EntryType::FileShare
        )
    }

    pub fn stat(&self) -> Option<StatInfo> {
        *self.stat.lock().unwrap()
    }

    /// True for files whose stat isn't loaded. Containers never need
    /// one.
    pub fn needs_stat(&self) -> bool {
        self.entry_type() == EntryType::File && self.stat.lock().unwrap().is_none()
    }

    /// Time of the last refresh.
    pub fn timestamp(&self) -> UnixTime {
        UnixTime::from_millis(self.timestamp.load(Ordering::Acquire))
    }

    fn touch(&self) {
        self.timestamp
            .fetch_max(UnixTime::now().as_millis(), Ordering::AcqRel);
    }

    /// Snapshot of the children, None if they were never loaded.
    pub fn children(&self) -> Option<Vec<Arc<MetadataEntity>>> {
        self.children
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.values().cloned().collect())
    }

    pub fn has_children(&self) -> bool {
        self.children.lock().unwrap().is_some()
    }

    /// List the directory on the remote and replace the children.
    ///
    /// On failure, the children are left alone and the error is kept
    /// for [MetadataEntity::take_child_load_error].
    pub fn load_children(&self, remote: &Remote) -> Result<Vec<Arc<MetadataEntity>>, RemoteError> {
        let key = self.key();
        match list(&key, remote) {
            Ok(children) => {
                let snapshot = children.values().cloned().collect();
                *self.children.lock().unwrap() = Some(children);
                self.touch();
                log::debug!("{key}: loaded children");

                Ok(snapshot)
            }
            Err(err) => {
                log::warn!("{key}: failed to load children: {err}");
                *self.child_load_error.lock().unwrap() = Some(err.clone());

                Err(err)
            }
        }
    }

    /// Stat the resource on the remote.
    ///
    /// On failure, the stat is left alone and the failure is
    /// remembered for [MetadataEntity::has_stat_load_failed].
    ///
    /// Only files have a stat. For anything else, this does nothing.
    pub fn load_stat(&self, remote: &Remote) -> Result<(), RemoteError> {
        let key = self.key();
        if self.entry_type() != EntryType::File {
            log::debug!("{key}: not a file, no stat to load");
            return Ok(());
        }
        match remote.stat(&key) {
            Ok(stat) => {
                *self.stat.lock().unwrap() = Some(stat);
                self.touch();

                Ok(())
            }
            Err(err) => {
                log::warn!("{key}: failed to stat: {err}");
                self.stat_load_failed.store(true, Ordering::Release);

                Err(err)
            }
        }
    }

    /// Forget stat and children so they get loaded again.
    pub fn reset(&self) {
        *self.stat.lock().unwrap() = None;
        *self.children.lock().unwrap() = None;
    }

    /// Change the key and display name of the entity.
    ///
    /// This doesn't move the entity in the cache; see
    /// [crate::MetadataCache::rename].
    pub fn rename(&self, new_key: ResourceKey) {
        let mut key = self.key.write().unwrap();
        self.entry.write().unwrap().set_name(new_key.name());
        *key = new_key;
    }

    /// Return the error of the last failed listing, if any, and
    /// forget it.
    pub fn take_child_load_error(&self) -> Option<RemoteError> {
        self.child_load_error.lock().unwrap().take()
    }

    /// Return true if the last stat failed, and forget it.
    pub fn has_stat_load_failed(&self) -> bool {
        self.stat_load_failed.swap(false, Ordering::AcqRel)
    }

    /// Add or replace a child, if children are loaded.
    pub(crate) fn put_child(&self, child: Arc<MetadataEntity>) {
        if let Some(children) = self.children.lock().unwrap().as_mut() {
            children.insert(child.key(), child);
        }
    }

    pub(crate) fn remove_child(&self, key: &ResourceKey) {
        if let Some(children) = self.children.lock().unwrap().as_mut() {
            children.remove(key);
        }
    }

    /// Replace the children without a remote listing.
    #[cfg(test)]
    pub(crate) fn set_children(&self, children: Vec<Arc<MetadataEntity>>) {
        *self.children.lock().unwrap() =
            Some(children.into_iter().map(|c| (c.key(), c)).collect());
    }
}

fn list(
    key: &ResourceKey,
    remote: &Remote,
) -> Result<HashMap<ResourceKey, Arc<MetadataEntity>>, RemoteError> {
    let mut children = HashMap::new();
    for entry in remote.open_dir(key)? {
        if let Some(child) = MetadataEntity::from_entry(key, entry?) {
            children.insert(child.key(), Arc::new(child));
        }
    }

    Ok(children)
}
