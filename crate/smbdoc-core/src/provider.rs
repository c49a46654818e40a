use crate::cache::{CacheState, MetadataCache};
use crate::config::ProviderConfig;
use crate::error::{ProviderError, RemoteError};
use crate::load::{LoadChildrenTask, LoadDocumentTask, LoadStatTask};
use crate::metadata::MetadataEntity;
use crate::remote::Remote;
use crate::tasks::{Callback, TaskCoordinator, TaskHandle};
use crate::transfer::{ReadFileTask, WriteFileTask};
use smbdoc_types::{DirectoryEntry, EntryType, ResourceKey, UnixTime};
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Directory,
    File,
}

/// What is known about a remote document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub key: ResourceKey,
    pub display_name: String,
    pub kind: DocumentKind,

    /// Size of files, once their stat is loaded.
    pub size: Option<u64>,
    pub last_modified: Option<UnixTime>,
    pub comment: String,

    /// True if documents can be created inside this one.
    pub can_create: bool,
}

impl Document {
    fn from_entity(entity: &MetadataEntity) -> Self {
        let stat = entity.stat();

        Self {
            key: entity.key(),
            display_name: entity.display_name(),
            kind: if entity.is_container() {
                DocumentKind::Directory
            } else {
                DocumentKind::File
            },
            size: stat.map(|s| s.size),
            last_modified: stat.map(|s| s.mtime),
            comment: entity.comment(),
            can_create: entity.can_create(),
        }
    }
}

/// Result of [DocumentProvider::query_children].
#[derive(Debug, Default)]
pub struct Listing {
    /// Last known children, sorted by key. Possibly stale.
    pub documents: Vec<Document>,

    /// True if a load is in flight. A notification for the listed
    /// key is sent once it's done.
    pub loading: bool,

    /// The load in flight, set whenever `loading` is true. It may
    /// have been started by another query for the same key.
    pub task: Option<TaskHandle>,
}

/// Exposes the remote servers, shares, directories and files as
/// documents.
///
/// Queries answer from the cache right away and start background
/// loads for whatever is missing or stale. Once a load is done,
/// the key whose listing changed is sent to [DocumentProvider::subscribe]
/// receivers, so the query can be repeated.
///
/// Methods block on remote calls. Call them from a blocking context,
/// never from inside an async task.
pub struct DocumentProvider {
    remote: Remote,
    cache: Arc<MetadataCache>,
    tasks: TaskCoordinator,
    shares: Mutex<BTreeSet<ResourceKey>>,
    tx: broadcast::Sender<ResourceKey>,
}

impl DocumentProvider {
    /// Create a provider making remote calls through `remote` and
    /// running background loads on `rt`.
    pub fn new(remote: Remote, rt: Handle, config: &ProviderConfig) -> Self {
        let (tx, _) = broadcast::channel(64);

        Self {
            remote,
            cache: Arc::new(MetadataCache::new()),
            tasks: TaskCoordinator::new(rt, config.max_workers),
            shares: Mutex::new(BTreeSet::new()),
            tx,
        }
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Subscribe to change notifications.
    ///
    /// Each notification is the key of a document whose children
    /// changed or finished loading. Changes to the list of mounted
    /// shares are reported as [ResourceKey::root].
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceKey> {
        self.tx.subscribe()
    }

    fn notify(&self, key: &ResourceKey) {
        let _ = self.tx.send(key.clone());
    }

    /// Build a completion callback that notifies `key`.
    fn notifier<T>(&self, key: &ResourceKey) -> Callback<T> {
        let tx = self.tx.clone();
        let key = key.clone();

        Box::new(move |_| {
            let _ = tx.send(key);
        })
    }

    /// Reset the remote client, such as after credentials changed.
    pub fn reset_remote(&self) -> Result<(), ProviderError> {
        self.remote.reset()?;

        Ok(())
    }

    /// Check that a share can be listed, then add it to
    /// [DocumentProvider::roots].
    ///
    /// The share and its children are cached. If listing the share
    /// fails, it isn't mounted. Mounting a share again does nothing.
    pub fn mount_share(&self, key: &ResourceKey) -> Result<(), ProviderError> {
        if !key.is_share() {
            return Err(ProviderError::Unsupported("only shares can be mounted"));
        }
        if self.is_mounted(key) {
            return Ok(());
        }

        let share = Arc::new(MetadataEntity::create_share(key.clone()));
        if let Err(err) = share.load_children(&self.remote) {
            log::warn!("{key}: failed to mount: {err}");
            return Err(err.into());
        }
        self.cache.put(Arc::clone(&share));
        for child in share.children().unwrap_or_default() {
            self.cache.put(child);
        }
        if self.shares.lock().unwrap().insert(key.clone()) {
            log::info!("{key}: mounted");
            self.notify(&ResourceKey::root());
        }

        Ok(())
    }

    /// Remove a share from [DocumentProvider::roots] and forget
    /// about it.
    ///
    /// Returns false if the share wasn't mounted.
    pub fn unmount_share(&self, key: &ResourceKey) -> bool {
        if !self.shares.lock().unwrap().remove(key) {
            return false;
        }
        log::info!("{key}: unmounted");
        self.tasks.cancel(key);
        self.cache.remove(key);
        self.notify(&ResourceKey::root());

        true
    }

    pub fn is_mounted(&self, key: &ResourceKey) -> bool {
        self.shares.lock().unwrap().contains(key)
    }

    /// One document per mounted share.
    pub fn roots(&self) -> Vec<Document> {
        let shares = self.shares.lock().unwrap().clone();
        shares
            .into_iter()
            .map(|key| {
                let entity = match self.cache.get(&key).entity {
                    Some(entity) => entity,
                    None => {
                        let entity = Arc::new(MetadataEntity::create_share(key));
                        self.cache.put(Arc::clone(&entity));
                        entity
                    }
                };

                Document::from_entity(&entity)
            })
            .collect()
    }

    /// Check whether `child` is `parent` or one of its descendants.
    pub fn is_child_document(parent: &ResourceKey, child: &ResourceKey) -> bool {
        child.starts_with(parent)
    }

    /// Describe a document, from the cache if possible.
    ///
    /// On a cache miss, this stats the document on the remote and
    /// caches the result, unless it's a mounted share.
    pub fn query_document(&self, key: &ResourceKey) -> Result<Document, ProviderError> {
        if let Some(entity) = self.cache.get(key).entity {
            return Ok(Document::from_entity(&entity));
        }
        let entity = if self.is_mounted(key) {
            MetadataEntity::create_share(key.clone())
        } else {
            MetadataEntity::from_remote(key, &self.remote)?
        };
        let entity = Arc::new(entity);
        self.cache.put(Arc::clone(&entity));

        Ok(Document::from_entity(&entity))
    }

    /// List the children of a container.
    ///
    /// Returns what is cached, possibly nothing, and starts loading
    /// what's missing or stale. Errors of earlier background loads
    /// for this key are reported once, by the next call.
    pub fn query_children(&self, key: &ResourceKey) -> Result<Listing, ProviderError> {
        if key.is_server() && self.cache.get(key).is_miss() {
            self.cache
                .put(Arc::new(MetadataEntity::create_server(key.clone())));
        }

        let result = self.cache.get(key);
        let mut listing = Listing::default();
        let entity = match result.entity {
            Some(entity) => entity,
            None => {
                if let Some(err) = self.cache.take_error(key) {
                    return Err(err.into());
                }
                let submission = self.tasks.run_task(
                    key,
                    LoadDocumentTask::new(
                        key.clone(),
                        self.remote.clone(),
                        Arc::clone(&self.cache),
                        self.notifier(key),
                    ),
                );
                listing.task = Some(submission.into_handle());
                listing.loading = true;

                return Ok(listing);
            }
        };
        if !entity.is_container() {
            return Err(ProviderError::NotADirectory(key.clone()));
        }
        if let Some(err) = entity.take_child_load_error() {
            return Err(err.into());
        }

        let children = entity.children();
        if children.is_none() || result.state == CacheState::Expired {
            let submission = self.tasks.run_task(
                key,
                LoadChildrenTask::new(
                    Arc::clone(&entity),
                    self.remote.clone(),
                    Arc::clone(&self.cache),
                    self.notifier(key),
                ),
            );
            listing.task = Some(submission.into_handle());
            listing.loading = true;
        }
        if let Some(children) = children {
            let mut needs_stat = vec![];
            for child in &children {
                if child.needs_stat() && !child.has_stat_load_failed() {
                    needs_stat.push(Arc::clone(child));
                }
                listing.documents.push(Document::from_entity(child));
            }
            listing.documents.sort_by(|a, b| a.key.cmp(&b.key));
            if !listing.loading && !needs_stat.is_empty() {
                let submission = self.tasks.run_task(
                    key,
                    LoadStatTask::new(needs_stat, self.remote.clone(), self.notifier(key)),
                );
                listing.task = Some(submission.into_handle());
                listing.loading = true;
            }
        }

        Ok(listing)
    }

    /// Create an empty file or a directory called `name` in
    /// `parent` and return its key.
    pub fn create_document(
        &self,
        parent: &ResourceKey,
        name: &str,
        kind: DocumentKind,
    ) -> Result<ResourceKey, ProviderError> {
        let key = parent.join(name)?;
        let entry_type = match kind {
            DocumentKind::Directory => {
                self.remote.mkdir(&key)?;
                EntryType::Directory
            }
            DocumentKind::File => {
                self.remote.create_file(&key)?;
                EntryType::File
            }
        };
        self.notify(parent);

        match self.cache.get(&key).entity {
            // Whatever was cached is outdated.
            Some(entity) => entity.reset(),
            None => self.cache.put(Arc::new(MetadataEntity::new(
                key.clone(),
                DirectoryEntry::new(entry_type, "", name),
            ))),
        }

        Ok(key)
    }

    /// Rename a document within its directory and return its new key.
    ///
    /// Shares, servers and workgroups can't be renamed.
    pub fn rename_document(
        &self,
        key: &ResourceKey,
        name: &str,
    ) -> Result<ResourceKey, ProviderError> {
        let parent = match key.parent() {
            Some(parent) if parent.segments().next().is_some() => parent,
            _ => {
                return Err(ProviderError::Unsupported(
                    "can't rename a share, a server or a workgroup",
                ));
            }
        };
        let new_key = parent.join(name)?;
        self.remote.rename(key, &new_key)?;
        self.notify(&parent);
        self.cache.rename(key, &new_key);

        Ok(new_key)
    }

    /// Move a document to another directory of the same share and
    /// return its new key.
    pub fn move_document(
        &self,
        key: &ResourceKey,
        target_parent: &ResourceKey,
    ) -> Result<ResourceKey, ProviderError> {
        if key.authority() != target_parent.authority() {
            return Err(ProviderError::Unsupported("can't move across servers"));
        }
        if key.segments().count() < 2
            || target_parent.segments().next().is_none()
            || key.segments().next() != target_parent.segments().next()
        {
            return Err(ProviderError::Unsupported("can't move across shares"));
        }

        let target = target_parent.join(key.name())?;
        self.remote.rename(key, &target)?;
        if let Some(parent) = key.parent() {
            self.notify(&parent);
        }
        self.notify(target_parent);
        self.cache.rename(key, &target);

        Ok(target)
    }

    /// Delete a document, and everything inside if it's a directory.
    ///
    /// Deleting a document that doesn't exist succeeds.
    pub fn delete_document(&self, key: &ResourceKey) -> Result<(), ProviderError> {
        if key.segments().next().is_none() {
            return Err(ProviderError::Unsupported(
                "can't delete a server or a workgroup",
            ));
        }

        // Ask the remote rather than the cache, which may be outdated.
        match MetadataEntity::from_remote(key, &self.remote) {
            Ok(entity) => {
                if entity.is_container() {
                    self.delete_dir(&entity)?;
                } else {
                    self.delete_file(key)?;
                }
            }
            Err(RemoteError::NotFound) => {
                log::warn!("{key}: not found, nothing to delete");
                self.cache.remove(key);
            }
            Err(err) => return Err(err.into()),
        }
        if let Some(parent) = key.parent() {
            self.notify(&parent);
        }

        Ok(())
    }

    fn delete_dir(&self, entity: &MetadataEntity) -> Result<(), RemoteError> {
        for child in entity.load_children(&self.remote)? {
            if child.is_container() {
                self.delete_dir(&child)?;
            } else {
                self.delete_file(&child.key())?;
            }
        }
        let key = entity.key();
        self.remote.rmdir(&key)?;
        self.cache.remove(&key);

        Ok(())
    }

    fn delete_file(&self, key: &ResourceKey) -> Result<(), RemoteError> {
        self.remote.unlink(key)?;
        self.cache.remove(key);

        Ok(())
    }

    /// Stream the content of a remote file into `sink`, in the
    /// background.
    ///
    /// `callback` gets the number of bytes read, or the error.
    pub fn open_read<W>(
        &self,
        key: &ResourceKey,
        sink: W,
        callback: Option<Callback<u64>>,
    ) -> TaskHandle
    where
        W: Write + Send + 'static,
    {
        self.tasks.run_detached(ReadFileTask::new(
            key.clone(),
            self.remote.clone(),
            sink,
            callback,
        ))
    }

    /// Replace the content of a remote file with what `source`
    /// returns, in the background.
    ///
    /// Once done, the cached document is reset and its parent
    /// notified. `callback` gets the number of bytes written, or the
    /// error.
    pub fn open_write<R>(
        &self,
        key: &ResourceKey,
        source: R,
        callback: Option<Callback<u64>>,
    ) -> TaskHandle
    where
        R: Read + Send + 'static,
    {
        self.tasks.run_detached(WriteFileTask::new(
            key.clone(),
            self.remote.clone(),
            source,
            Arc::clone(&self.cache),
            self.tx.clone(),
            callback,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteExecutor;
    use crate::tasks::TaskState;
    use crate::tasks::{Completion, TaskStatus};
    use crate::testing::FakeServer;
    use std::io;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Fixture {
        rt: tokio::runtime::Runtime,
        server: FakeServer,
        _executor: RemoteExecutor,
        provider: DocumentProvider,
        share: ResourceKey,
    }

    impl Fixture {
        fn setup() -> anyhow::Result<Self> {
            let _ = crate::logging::try_init();
            let rt = tokio::runtime::Runtime::new()?;
            let server = FakeServer::new();
            let share = server.add_share("host", "share")?;
            let executor = RemoteExecutor::spawn({
                let server = server.clone();
                move || server.client()
            })?;
            let provider = DocumentProvider::new(
                executor.remote(),
                rt.handle().clone(),
                &ProviderConfig::default(),
            );

            Ok(Self {
                rt,
                server,
                _executor: executor,
                provider,
                share,
            })
        }

        fn key(&self, path: &str) -> anyhow::Result<ResourceKey> {
            Ok(ResourceKey::parse(format!("{}/{path}", self.share))?)
        }

        fn wait(&self, task: &Option<TaskHandle>) -> Option<TaskState> {
            task.as_ref().map(|t| self.rt.block_on(t.finished()))
        }

        /// Wait for a notification about `key`, skipping the others.
        fn wait_for_notification(
            &self,
            rx: &mut broadcast::Receiver<ResourceKey>,
            key: &ResourceKey,
        ) -> anyhow::Result<()> {
            self.rt.block_on(async {
                tokio::time::timeout(Duration::from_secs(5), async {
                    loop {
                        if rx.recv().await? == *key {
                            return Ok::<(), broadcast::error::RecvError>(());
                        }
                    }
                })
                .await
            })??;

            Ok(())
        }
    }

    fn channel<T: Send + 'static>() -> (Option<Callback<T>>, mpsc::Receiver<Completion<T>>) {
        let (tx, rx) = mpsc::channel();
        let callback: Callback<T> = Box::new(move |c| {
            let _ = tx.send(c);
        });

        (Some(callback), rx)
    }

    fn recv<T>(rx: &mpsc::Receiver<Completion<T>>) -> anyhow::Result<Completion<T>> {
        Ok(rx.recv_timeout(Duration::from_secs(5))?)
    }

    #[test]
    fn mount_and_unmount() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let mut rx = fixture.provider.subscribe();
        assert!(fixture.provider.roots().is_empty());

        fixture.provider.mount_share(&fixture.share)?;
        assert_eq!(ResourceKey::root(), rx.try_recv()?);
        let roots = fixture.provider.roots();
        assert_eq!(1, roots.len());
        assert_eq!("share", roots[0].display_name);
        assert_eq!(DocumentKind::Directory, roots[0].kind);
        assert!(roots[0].can_create);

        assert!(fixture.provider.unmount_share(&fixture.share));
        assert!(!fixture.provider.unmount_share(&fixture.share));
        assert!(fixture.provider.roots().is_empty());
        assert!(fixture.provider.cache().get(&fixture.share).is_miss());

        Ok(())
    }

    #[test]
    fn mount_caches_share_and_children() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let file = fixture.key("f.txt")?;
        fixture.server.add_file(&file, b"data")?;
        fixture.server.add_dir(&fixture.key("dir")?)?;

        fixture.provider.mount_share(&fixture.share)?;
        fixture.provider.mount_share(&fixture.share)?;

        assert_eq!(1, fixture.server.list_count(&fixture.share));
        assert!(!fixture.provider.cache().get(&file).is_miss());
        let listing = fixture.provider.query_children(&fixture.share)?;
        assert_eq!(
            vec!["dir", "f.txt"],
            listing
                .documents
                .iter()
                .map(|d| d.display_name.as_str())
                .collect::<Vec<_>>()
        );

        Ok(())
    }

    #[test]
    fn failed_mount_leaves_share_unmounted() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let mut rx = fixture.provider.subscribe();
        fixture.server.fail_auth(true);

        let err = fixture.provider.mount_share(&fixture.share).err();

        assert!(err.is_some_and(|e| e.is_auth_failure()));
        assert!(!fixture.provider.is_mounted(&fixture.share));
        assert!(fixture.provider.roots().is_empty());
        assert!(fixture.provider.cache().get(&fixture.share).is_miss());
        assert!(rx.try_recv().is_err());

        // Works once the credentials are accepted.
        fixture.server.fail_auth(false);
        fixture.provider.mount_share(&fixture.share)?;
        assert!(fixture.provider.is_mounted(&fixture.share));

        Ok(())
    }

    #[test]
    fn requery_on_notification_makes_progress() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let mut rx = fixture.provider.subscribe();

        for i in 0..10 {
            let dir = fixture.key(&format!("dir{i}"))?;
            fixture.server.add_dir(&dir)?;
            fixture.server.add_file(&dir.join("f")?, b"f")?;

            // The directory, its children, then their stat.
            for _ in 0..3 {
                let listing = fixture.provider.query_children(&dir)?;
                assert!(listing.loading);
                assert!(listing.task.is_some());
                fixture.wait_for_notification(&mut rx, &dir)?;
            }

            let listing = fixture.provider.query_children(&dir)?;
            assert!(!listing.loading);
            assert!(listing.task.is_none());
            assert_eq!(
                vec![Some(1)],
                listing.documents.iter().map(|d| d.size).collect::<Vec<_>>()
            );
        }

        Ok(())
    }

    #[test]
    fn coalesced_query_returns_task_in_flight() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        fixture
            .provider
            .cache()
            .put(Arc::new(MetadataEntity::create_share(fixture.share.clone())));
        fixture.server.hold_listings();

        let first = fixture.provider.query_children(&fixture.share)?;
        let second = fixture.provider.query_children(&fixture.share)?;
        fixture.server.wait_for_held_listings(1);

        assert!(second.loading);
        assert_eq!(Some(TaskState::Running), second.task.as_ref().map(|t| t.state()));
        fixture.server.release_listings();
        assert_eq!(Some(TaskState::Succeeded), fixture.wait(&second.task));
        assert!(first.task.is_some_and(|t| t.is_finished()));
        assert_eq!(1, fixture.server.list_count(&fixture.share));

        Ok(())
    }

    #[test]
    fn only_shares_can_be_mounted() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;

        assert!(matches!(
            fixture.provider.mount_share(&ResourceKey::server("host")?),
            Err(ProviderError::Unsupported(_))
        ));
        assert!(matches!(
            fixture.provider.mount_share(&fixture.key("dir")?),
            Err(ProviderError::Unsupported(_))
        ));

        Ok(())
    }

    #[test]
    fn query_document_of_mounted_share_needs_no_remote() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        fixture.provider.mount_share(&fixture.share)?;
        fixture.server.fail_auth(true);

        let doc = fixture.provider.query_document(&fixture.share)?;
        assert_eq!(fixture.share, doc.key);

        Ok(())
    }

    #[test]
    fn query_document_loads_and_caches() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let key = fixture.key("f.txt")?;
        fixture.server.add_file(&key, b"hello")?;

        let doc = fixture.provider.query_document(&key)?;
        assert_eq!(DocumentKind::File, doc.kind);
        assert_eq!(Some(5), doc.size);
        assert!(doc.last_modified.is_some());
        assert!(!doc.can_create);

        fixture.provider.query_document(&key)?;
        assert_eq!(1, fixture.server.stat_count(&key));

        Ok(())
    }

    #[test]
    fn query_document_reports_not_found() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;

        let err = fixture
            .provider
            .query_document(&fixture.key("missing")?)
            .err();
        assert!(err.is_some_and(|e| e.is_not_found()));

        Ok(())
    }

    #[test]
    fn query_children_of_file_fails() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let key = fixture.key("f.txt")?;
        fixture.server.add_file(&key, b"hello")?;
        fixture.provider.query_document(&key)?;

        assert!(matches!(
            fixture.provider.query_children(&key),
            Err(ProviderError::NotADirectory(k)) if k == key
        ));

        Ok(())
    }

    #[test]
    fn query_children_reports_load_error_once() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let missing = fixture.key("missing")?;

        let listing = fixture.provider.query_children(&missing)?;
        assert!(listing.loading);
        assert_eq!(Some(TaskState::Failed), fixture.wait(&listing.task));

        let err = fixture.provider.query_children(&missing).err();
        assert!(err.is_some_and(|e| e.is_not_found()));

        // The error is gone; this starts a new load.
        let listing = fixture.provider.query_children(&missing)?;
        assert!(listing.loading);
        fixture.wait(&listing.task);

        Ok(())
    }

    #[test]
    fn query_children_of_server_lists_shares() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        fixture.server.add_share("host", "other")?;
        let server = ResourceKey::server("host")?;

        let listing = fixture.provider.query_children(&server)?;
        assert!(listing.documents.is_empty());
        assert_eq!(Some(TaskState::Succeeded), fixture.wait(&listing.task));

        let listing = fixture.provider.query_children(&server)?;
        assert!(!listing.loading);
        assert_eq!(
            vec!["other", "share"],
            listing
                .documents
                .iter()
                .map(|d| d.display_name.as_str())
                .collect::<Vec<_>>()
        );

        Ok(())
    }

    #[test]
    fn query_children_surfaces_auth_failure() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        fixture
            .provider
            .cache()
            .put(Arc::new(MetadataEntity::create_share(fixture.share.clone())));
        fixture.server.fail_auth(true);

        let listing = fixture.provider.query_children(&fixture.share)?;
        assert_eq!(Some(TaskState::Failed), fixture.wait(&listing.task));

        let err = fixture.provider.query_children(&fixture.share).err();
        assert!(err.is_some_and(|e| e.is_auth_failure()));

        Ok(())
    }

    #[test]
    fn create_document() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let mut rx = fixture.provider.subscribe();

        let dir = fixture
            .provider
            .create_document(&fixture.share, "dir", DocumentKind::Directory)?;
        assert_eq!(fixture.share, rx.try_recv()?);
        let file = fixture
            .provider
            .create_document(&dir, "f.txt", DocumentKind::File)?;

        assert_eq!(fixture.key("dir/f.txt")?, file);
        assert_eq!(Some(vec![]), fixture.server.content(&file));
        let doc = fixture.provider.query_document(&dir)?;
        assert_eq!(DocumentKind::Directory, doc.kind);
        assert!(doc.can_create);

        assert!(matches!(
            fixture
                .provider
                .create_document(&fixture.share, "..", DocumentKind::File),
            Err(ProviderError::InvalidKey(_))
        ));

        Ok(())
    }

    #[test]
    fn rename_document() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let old = fixture.key("old.txt")?;
        fixture.server.add_file(&old, b"data")?;
        fixture.provider.query_document(&old)?;

        let new = fixture.provider.rename_document(&old, "new.txt")?;

        assert_eq!(fixture.key("new.txt")?, new);
        assert_eq!(None, fixture.server.content(&old));
        assert_eq!(Some(b"data".to_vec()), fixture.server.content(&new));
        assert!(fixture.provider.cache().get(&old).is_miss());
        let doc = fixture.provider.query_document(&new)?;
        assert_eq!("new.txt", doc.display_name);
        assert_eq!(0, fixture.server.stat_count(&new));

        Ok(())
    }

    #[test]
    fn rename_share_is_unsupported() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;

        assert!(matches!(
            fixture.provider.rename_document(&fixture.share, "other"),
            Err(ProviderError::Unsupported(_))
        ));
        assert!(matches!(
            fixture
                .provider
                .rename_document(&ResourceKey::server("host")?, "other"),
            Err(ProviderError::Unsupported(_))
        ));

        Ok(())
    }

    #[test]
    fn move_document() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let file = fixture.key("f.txt")?;
        let dir = fixture.key("dir")?;
        fixture.server.add_file(&file, b"data")?;
        fixture.server.add_dir(&dir)?;

        let moved = fixture.provider.move_document(&file, &dir)?;

        assert_eq!(fixture.key("dir/f.txt")?, moved);
        assert_eq!(Some(b"data".to_vec()), fixture.server.content(&moved));

        Ok(())
    }

    #[test]
    fn move_across_shares_is_unsupported() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let other = fixture.server.add_share("host", "other")?;
        let remote = fixture.server.add_share("remote", "share")?;
        let file = fixture.key("f.txt")?;
        fixture.server.add_file(&file, b"data")?;

        assert!(matches!(
            fixture.provider.move_document(&file, &other),
            Err(ProviderError::Unsupported(_))
        ));
        assert!(matches!(
            fixture.provider.move_document(&file, &remote),
            Err(ProviderError::Unsupported(_))
        ));
        assert!(fixture.server.exists(&file));

        Ok(())
    }

    #[test]
    fn delete_document_recursively() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let dir = fixture.key("dir")?;
        fixture.server.add_dir(&dir)?;
        fixture.server.add_dir(&dir.join("sub")?)?;
        fixture.server.add_file(&dir.join("a")?, b"a")?;
        fixture.server.add_file(&dir.join("sub")?.join("b")?, b"b")?;
        fixture.provider.query_document(&dir)?;

        fixture.provider.delete_document(&dir)?;

        assert!(!fixture.server.exists(&dir));
        assert!(!fixture.server.exists(&dir.join("sub")?.join("b")?));
        assert!(fixture.provider.cache().get(&dir).is_miss());

        Ok(())
    }

    #[test]
    fn delete_missing_document_succeeds() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let key = fixture.key("f.txt")?;
        fixture.server.add_file(&key, b"data")?;
        fixture.provider.query_document(&key)?;
        fixture.server.remove(&key);
        let mut rx = fixture.provider.subscribe();

        fixture.provider.delete_document(&key)?;

        assert!(fixture.provider.cache().get(&key).is_miss());
        assert_eq!(fixture.share, rx.try_recv()?);

        Ok(())
    }

    #[test]
    fn delete_reports_other_errors() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let key = fixture.key("f.txt")?;
        fixture.server.add_file(&key, b"data")?;
        fixture.server.fail(&key);

        assert!(matches!(
            fixture.provider.delete_document(&key),
            Err(ProviderError::Remote(RemoteError::Io(_)))
        ));
        assert!(fixture.server.exists(&key));

        Ok(())
    }

    #[test]
    fn read_file() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let key = fixture.key("f.txt")?;
        fixture.server.add_file(&key, b"hello, world")?;
        let out = Arc::new(Mutex::new(vec![]));
        let (callback, rx) = channel();

        let task = fixture
            .provider
            .open_read(&key, SharedBuf(Arc::clone(&out)), callback);

        assert_eq!(Some(TaskState::Succeeded), fixture.wait(&Some(task)));
        let completion = recv(&rx)?;
        assert_eq!(TaskStatus::Succeeded, completion.status);
        assert_eq!(Some(12), completion.item);
        assert_eq!(b"hello, world".to_vec(), *out.lock().unwrap());

        // Handles are closed asynchronously, before the next call.
        fixture.provider.query_document(&key)?;
        assert_eq!(0, fixture.server.open_handles());

        Ok(())
    }

    #[test]
    fn read_missing_file_fails() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let (callback, rx) = channel();
        let task = fixture
            .provider
            .open_read(&fixture.key("missing")?, io::sink(), callback);

        assert_eq!(Some(TaskState::Failed), fixture.wait(&Some(task)));
        let completion = recv(&rx)?;
        assert_eq!(TaskStatus::Failed, completion.status);
        assert!(matches!(completion.error, Some(RemoteError::NotFound)));
        assert_eq!(None, completion.item);

        Ok(())
    }

    #[test]
    fn write_file_resets_entity() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let key = fixture.key("f.txt")?;
        fixture.server.add_file(&key, b"old")?;
        fixture.provider.query_document(&key)?;
        let mut rx = fixture.provider.subscribe();

        let (callback, completions) = channel();

        let task = fixture
            .provider
            .open_write(&key, io::Cursor::new(b"new content".to_vec()), callback);

        assert_eq!(Some(TaskState::Succeeded), fixture.wait(&Some(task)));
        assert_eq!(Some(11), recv(&completions)?.item);
        assert_eq!(Some(b"new content".to_vec()), fixture.server.content(&key));
        // The parent is notified before the callback is called.
        assert_eq!(fixture.share, rx.try_recv()?);
        let entity = fixture.provider.cache().get(&key).entity;
        assert!(entity.is_some_and(|e| e.needs_stat()));

        Ok(())
    }

    #[test]
    fn is_child_document() -> anyhow::Result<()> {
        let share = ResourceKey::parse("smb://host/share")?;

        assert!(DocumentProvider::is_child_document(
            &share,
            &ResourceKey::parse("smb://host/share/a/b")?
        ));
        assert!(!DocumentProvider::is_child_document(
            &share,
            &ResourceKey::parse("smb://host/shared")?
        ));

        Ok(())
    }

    /// A writer that can be inspected after it was moved away.
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
