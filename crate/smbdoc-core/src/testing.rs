//! An in-memory remote server, for tests.

use crate::error::RemoteError;
use crate::remote::{DirHandle, FileHandle, OpenMode, RemoteClient};
use smbdoc_types::{DirectoryEntry, EntryType, ResourceKey, StatInfo, UnixTime};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::ThreadId;

#[derive(Clone, Debug)]
enum Node {
    Server,
    Share,
    Dir { mtime: UnixTime },
    File { content: Vec<u8>, mtime: UnixTime },
}

impl Node {
    fn entry_type(&self) -> EntryType {
        match self {
            Node::Server => EntryType::Server,
            Node::Share => EntryType::FileShare,
            Node::Dir { .. } => EntryType::Directory,
            Node::File { .. } => EntryType::File,
        }
    }

    fn stat(&self) -> StatInfo {
        match self {
            Node::Server | Node::Share => StatInfo::dir(UnixTime::ZERO),
            Node::Dir { mtime } => StatInfo::dir(*mtime),
            Node::File { content, mtime } => StatInfo::file(content.len() as u64, *mtime),
        }
    }

    fn is_container(&self) -> bool {
        !matches!(self, Node::File { .. })
    }
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<ResourceKey, Node>,

    /// Raw entries returned in listings in addition to the nodes,
    /// such as printer shares.
    extra_entries: HashMap<ResourceKey, Vec<DirectoryEntry>>,

    auth_failure: bool,
    failing: HashSet<ResourceKey>,
    stat_counts: HashMap<ResourceKey, usize>,
    list_counts: HashMap<ResourceKey, usize>,
    threads: HashSet<ThreadId>,
    open_handles: usize,
}

impl State {
    /// Check failure injection and record calling thread.
    fn check(&mut self, key: &ResourceKey) -> Result<(), RemoteError> {
        self.threads.insert(std::thread::current().id());
        if self.auth_failure {
            return Err(RemoteError::AuthFailed);
        }
        if self.failing.contains(key) {
            return Err(RemoteError::io(io::ErrorKind::Other, format!("{key} failed")));
        }

        Ok(())
    }

    fn node(&self, key: &ResourceKey) -> Result<&Node, RemoteError> {
        self.nodes.get(key).ok_or(RemoteError::NotFound)
    }

    fn check_parent_is_container(&self, key: &ResourceKey) -> Result<(), RemoteError> {
        let parent = key.parent().ok_or(RemoteError::NotFound)?;
        if self.node(&parent)?.is_container() {
            Ok(())
        } else {
            Err(RemoteError::io(io::ErrorKind::NotADirectory, "not a directory"))
        }
    }

    fn children(&self, key: &ResourceKey) -> Vec<(ResourceKey, Node)> {
        self.nodes
            .iter()
            .filter(|(k, _)| k.parent().as_ref() == Some(key))
            .map(|(k, n)| (k.clone(), n.clone()))
            .collect()
    }
}

/// Blocks calls while held.
#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

#[derive(Default)]
struct GateState {
    held: bool,
    waiting: usize,
}

/// An in-memory remote server.
///
/// Build the tree with [FakeServer::add_share], [FakeServer::add_dir]
/// and [FakeServer::add_file], then create clients with
/// [FakeServer::client]. All clients share the same tree.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
    listing_gate: Arc<Gate>,
    stat_gate: Arc<Gate>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client of this server.
    pub fn client(&self) -> FakeClient {
        FakeClient {
            server: self.clone(),
        }
    }

    pub fn add_server(&self, host: &str) -> Result<ResourceKey, RemoteError> {
        let key = ResourceKey::server(host).map_err(invalid_key)?;
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(key.clone(), Node::Server);

        Ok(key)
    }

    /// Add a share, and its server if necessary.
    pub fn add_share(&self, host: &str, share: &str) -> Result<ResourceKey, RemoteError> {
        let server = self.add_server(host)?;
        let key = server.join(share).map_err(invalid_key)?;
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(key.clone(), Node::Share);

        Ok(key)
    }

    pub fn add_dir(&self, key: &ResourceKey) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.check_parent_is_container(key)?;
        state.nodes.insert(
            key.clone(),
            Node::Dir {
                mtime: UnixTime::now(),
            },
        );

        Ok(())
    }

    pub fn add_file(&self, key: &ResourceKey, content: &[u8]) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.check_parent_is_container(key)?;
        state.nodes.insert(
            key.clone(),
            Node::File {
                content: content.to_vec(),
                mtime: UnixTime::now(),
            },
        );

        Ok(())
    }

    /// Add a raw entry to the listing of `parent`.
    pub fn add_entry(&self, parent: &ResourceKey, entry: DirectoryEntry) {
        self.state
            .lock()
            .unwrap()
            .extra_entries
            .entry(parent.clone())
            .or_default()
            .push(entry);
    }

    /// Remove a node behind the clients' back.
    pub fn remove(&self, key: &ResourceKey) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .retain(|k, _| !k.starts_with(key));
    }

    pub fn exists(&self, key: &ResourceKey) -> bool {
        self.state.lock().unwrap().nodes.contains_key(key)
    }

    /// Content of a file, if it exists.
    pub fn content(&self, key: &ResourceKey) -> Option<Vec<u8>> {
        match self.state.lock().unwrap().nodes.get(key) {
            Some(Node::File { content, .. }) => Some(content.clone()),
            _ => None,
        }
    }

    /// Make all calls fail with [RemoteError::AuthFailed].
    pub fn fail_auth(&self, fail: bool) {
        self.state.lock().unwrap().auth_failure = fail;
    }

    /// Make all calls on `key` fail with an I/O error.
    pub fn fail(&self, key: &ResourceKey) {
        self.state.lock().unwrap().failing.insert(key.clone());
    }

    /// Undo [FakeServer::fail].
    pub fn heal(&self, key: &ResourceKey) {
        self.state.lock().unwrap().failing.remove(key);
    }

    /// Number of stat calls made on `key`.
    pub fn stat_count(&self, key: &ResourceKey) -> usize {
        self.state
            .lock()
            .unwrap()
            .stat_counts
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Number of listings opened on `key`.
    pub fn list_count(&self, key: &ResourceKey) -> usize {
        self.state
            .lock()
            .unwrap()
            .list_counts
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Number of distinct threads clients were called from.
    pub fn client_thread_count(&self) -> usize {
        self.state.lock().unwrap().threads.len()
    }

    /// Number of directory and file handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state.lock().unwrap().open_handles
    }

    /// Make listings block until [FakeServer::release_listings].
    pub fn hold_listings(&self) {
        self.listing_gate.hold();
    }

    pub fn release_listings(&self) {
        self.listing_gate.release();
    }

    /// Wait until at least `count` listings are blocked by
    /// [FakeServer::hold_listings].
    pub fn wait_for_held_listings(&self, count: usize) {
        self.listing_gate.wait_for(count);
    }

    /// Make stat calls block until [FakeServer::release_stats].
    pub fn hold_stats(&self) {
        self.stat_gate.hold();
    }

    pub fn release_stats(&self) {
        self.stat_gate.release();
    }

    /// Wait until at least `count` stat calls are blocked by
    /// [FakeServer::hold_stats].
    pub fn wait_for_held_stats(&self, count: usize) {
        self.stat_gate.wait_for(count);
    }
}

impl Gate {
    fn hold(&self) {
        self.state.lock().unwrap().held = true;
    }

    fn release(&self) {
        self.state.lock().unwrap().held = false;
        self.cond.notify_all();
    }

    fn wait_for(&self, count: usize) {
        let mut state = self.state.lock().unwrap();
        while state.waiting < count {
            state = self.cond.wait(state).unwrap();
        }
    }

    fn pass(&self) {
        let mut state = self.state.lock().unwrap();
        if state.held {
            state.waiting += 1;
            self.cond.notify_all();
            while state.held {
                state = self.cond.wait(state).unwrap();
            }
            state.waiting -= 1;
        }
    }
}

fn invalid_key(_: smbdoc_types::KeyError) -> RemoteError {
    RemoteError::io(io::ErrorKind::InvalidInput, "invalid key")
}

/// A client of a [FakeServer].
pub struct FakeClient {
    server: FakeServer,
}

impl RemoteClient for FakeClient {
    fn reset(&mut self) {}

    fn open_dir(&mut self, key: &ResourceKey) -> Result<Box<dyn DirHandle>, RemoteError> {
        self.server.listing_gate.pass();
        let mut state = self.server.state.lock().unwrap();
        state.check(key)?;
        *state.list_counts.entry(key.clone()).or_default() += 1;

        let mut entries = vec![];
        if key.is_root() {
            for (child, node) in state.children(key) {
                if let Node::Server = node {
                    entries.push(DirectoryEntry::new(EntryType::Server, "", child.name()));
                }
            }
        } else {
            let node = state.node(key)?;
            if !node.is_container() {
                return Err(RemoteError::io(
                    io::ErrorKind::NotADirectory,
                    "not a directory",
                ));
            }
            if !matches!(node, Node::Server) {
                entries.push(DirectoryEntry::new(EntryType::Directory, "", "."));
                entries.push(DirectoryEntry::new(EntryType::Directory, "", ".."));
            }
            for (child, node) in state.children(key) {
                entries.push(DirectoryEntry::new(node.entry_type(), "", child.name()));
            }
        }
        if let Some(extra) = state.extra_entries.get(key) {
            entries.extend(extra.iter().cloned());
        }
        state.open_handles += 1;

        Ok(Box::new(FakeDir {
            server: self.server.clone(),
            entries: entries.into_iter(),
        }))
    }

    fn stat(&mut self, key: &ResourceKey) -> Result<StatInfo, RemoteError> {
        self.server.stat_gate.pass();
        let mut state = self.server.state.lock().unwrap();
        *state.stat_counts.entry(key.clone()).or_default() += 1;
        state.check(key)?;

        Ok(state.node(key)?.stat())
    }

    fn create_file(&mut self, key: &ResourceKey) -> Result<(), RemoteError> {
        let mut state = self.server.state.lock().unwrap();
        state.check(key)?;
        state.check_parent_is_container(key)?;
        if state.nodes.contains_key(key) {
            return Err(RemoteError::io(io::ErrorKind::AlreadyExists, "exists"));
        }
        state.nodes.insert(
            key.clone(),
            Node::File {
                content: vec![],
                mtime: UnixTime::now(),
            },
        );

        Ok(())
    }

    fn mkdir(&mut self, key: &ResourceKey) -> Result<(), RemoteError> {
        let mut state = self.server.state.lock().unwrap();
        state.check(key)?;
        state.check_parent_is_container(key)?;
        if state.nodes.contains_key(key) {
            return Err(RemoteError::io(io::ErrorKind::AlreadyExists, "exists"));
        }
        state.nodes.insert(
            key.clone(),
            Node::Dir {
                mtime: UnixTime::now(),
            },
        );

        Ok(())
    }

    fn rename(&mut self, key: &ResourceKey, new_key: &ResourceKey) -> Result<(), RemoteError> {
        let mut state = self.server.state.lock().unwrap();
        state.check(key)?;
        state.node(key)?;
        state.check_parent_is_container(new_key)?;
        let moved = state
            .nodes
            .iter()
            .filter(|(k, _)| k.starts_with(key))
            .map(|(k, n)| (k.clone(), n.clone()))
            .collect::<Vec<_>>();
        for (old, node) in moved {
            state.nodes.remove(&old);
            let suffix = &old.as_str()[key.as_str().len()..];
            let renamed = ResourceKey::parse(format!("{new_key}{suffix}")).map_err(invalid_key)?;
            state.nodes.insert(renamed, node);
        }

        Ok(())
    }

    fn unlink(&mut self, key: &ResourceKey) -> Result<(), RemoteError> {
        let mut state = self.server.state.lock().unwrap();
        state.check(key)?;
        if !matches!(state.node(key)?, Node::File { .. }) {
            return Err(RemoteError::io(io::ErrorKind::IsADirectory, "is a directory"));
        }
        state.nodes.remove(key);

        Ok(())
    }

    fn rmdir(&mut self, key: &ResourceKey) -> Result<(), RemoteError> {
        let mut state = self.server.state.lock().unwrap();
        state.check(key)?;
        if !matches!(state.node(key)?, Node::Dir { .. }) {
            return Err(RemoteError::io(
                io::ErrorKind::NotADirectory,
                "not a directory",
            ));
        }
        if !state.children(key).is_empty() {
            return Err(RemoteError::io(io::ErrorKind::Other, "directory not empty"));
        }
        state.nodes.remove(key);

        Ok(())
    }

    fn open_file(
        &mut self,
        key: &ResourceKey,
        mode: OpenMode,
    ) -> Result<Box<dyn FileHandle>, RemoteError> {
        let mut state = self.server.state.lock().unwrap();
        state.check(key)?;
        match mode {
            OpenMode::Read => {
                if !matches!(state.node(key)?, Node::File { .. }) {
                    return Err(RemoteError::io(io::ErrorKind::IsADirectory, "is a directory"));
                }
            }
            OpenMode::Write => {
                state.check_parent_is_container(key)?;
                state.nodes.insert(
                    key.clone(),
                    Node::File {
                        content: vec![],
                        mtime: UnixTime::now(),
                    },
                );
            }
        }
        state.open_handles += 1;

        Ok(Box::new(FakeFile {
            server: self.server.clone(),
            key: key.clone(),
            offset: 0,
        }))
    }
}

struct FakeDir {
    server: FakeServer,
    entries: std::vec::IntoIter<DirectoryEntry>,
}

impl DirHandle for FakeDir {
    fn read_entry(&mut self) -> Result<Option<DirectoryEntry>, RemoteError> {
        Ok(self.entries.next())
    }
}

impl Drop for FakeDir {
    fn drop(&mut self) {
        self.server.state.lock().unwrap().open_handles -= 1;
    }
}

struct FakeFile {
    server: FakeServer,
    key: ResourceKey,
    offset: u64,
}

impl FakeFile {
    fn with_content<R>(
        &self,
        f: impl FnOnce(&mut Vec<u8>, &mut UnixTime) -> R,
    ) -> Result<R, RemoteError> {
        let mut state = self.server.state.lock().unwrap();
        state.check(&self.key)?;
        match state.nodes.get_mut(&self.key) {
            Some(Node::File { content, mtime }) => Ok(f(content, mtime)),
            _ => Err(RemoteError::NotFound),
        }
    }
}

impl FileHandle for FakeFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RemoteError> {
        let offset = self.offset as usize;
        let n = self.with_content(|content, _| {
            let start = offset.min(content.len());
            let n = buf.len().min(content.len() - start);
            buf[..n].copy_from_slice(&content[start..start + n]);
            n
        })?;
        self.offset += n as u64;

        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, RemoteError> {
        let offset = self.offset as usize;
        self.with_content(|content, mtime| {
            if content.len() < offset + buf.len() {
                content.resize(offset + buf.len(), 0);
            }
            content[offset..offset + buf.len()].copy_from_slice(buf);
            *mtime = UnixTime::now();
        })?;
        self.offset += buf.len() as u64;

        Ok(buf.len())
    }

    fn seek(&mut self, offset: u64) -> Result<u64, RemoteError> {
        self.offset = offset;

        Ok(offset)
    }

    fn fstat(&mut self) -> Result<StatInfo, RemoteError> {
        self.with_content(|content, mtime| StatInfo::file(content.len() as u64, *mtime))
    }
}

impl Drop for FakeFile {
    fn drop(&mut self) {
        self.server.state.lock().unwrap().open_handles -= 1;
    }
}
