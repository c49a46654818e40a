use super::{DirHandle, FileHandle, OpenMode, RemoteClient};
use crate::error::RemoteError;
use smbdoc_types::{DirectoryEntry, ResourceKey, StatInfo};
use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce(&mut Session) + Send>;

enum Request {
    Run(Job),
    Shutdown,
}

/// State owned by the executor thread.
///
/// Open directories and files stay on that thread; proxies refer to
/// them by id.
struct Session {
    client: Box<dyn RemoteClient>,
    dirs: HashMap<u64, Box<dyn DirHandle>>,
    files: HashMap<u64, Box<dyn FileHandle>>,
    next_id: u64,
}

impl Session {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;

        self.next_id
    }

    fn dir(&mut self, id: u64) -> Result<&mut Box<dyn DirHandle>, RemoteError> {
        self.dirs.get_mut(&id).ok_or_else(bad_handle)
    }

    fn file(&mut self, id: u64) -> Result<&mut Box<dyn FileHandle>, RemoteError> {
        self.files.get_mut(&id).ok_or_else(bad_handle)
    }
}

fn bad_handle() -> RemoteError {
    RemoteError::io(io::ErrorKind::InvalidInput, "bad remote handle")
}

/// Owns the dedicated thread that runs all calls to a [RemoteClient].
///
/// Dropping the executor stops the thread after the call in progress,
/// if any. Calls made through a [Remote] after that fail with
/// [io::ErrorKind::BrokenPipe].
pub struct RemoteExecutor {
    remote: Remote,
    thread: Option<JoinHandle<()>>,
}

impl RemoteExecutor {
    /// Start the executor thread and build the client on it.
    ///
    /// The client is created on the executor thread, so it never has
    /// to move between threads.
    pub fn spawn<C, F>(factory: F) -> io::Result<RemoteExecutor>
    where
        C: RemoteClient + 'static,
        F: FnOnce() -> C + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Request>();
        let thread = std::thread::Builder::new()
            .name("smbdoc-remote".to_string())
            .spawn(move || {
                let mut session = Session {
                    client: Box::new(factory()),
                    dirs: HashMap::new(),
                    files: HashMap::new(),
                    next_id: 0,
                };
                log::debug!("remote executor started");
                while let Some(request) = rx.blocking_recv() {
                    match request {
                        Request::Run(job) => job(&mut session),
                        Request::Shutdown => break,
                    }
                }
                log::debug!(
                    "remote executor stopped, closing {} dirs and {} files",
                    session.dirs.len(),
                    session.files.len()
                );
            })?;

        Ok(RemoteExecutor {
            remote: Remote { tx },
            thread: Some(thread),
        })
    }

    /// Return a handle for making calls on the executor thread.
    pub fn remote(&self) -> Remote {
        self.remote.clone()
    }
}

impl Drop for RemoteExecutor {
    fn drop(&mut self) {
        let _ = self.remote.tx.send(Request::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("remote executor thread panicked");
            }
        }
    }
}

/// Handle on a [RemoteExecutor].
///
/// Every call is sent to the executor thread and blocks the calling
/// thread until the remote call returns. Calls must not be made from
/// an async context; use `tokio::task::spawn_blocking` there.
#[derive(Clone)]
pub struct Remote {
    tx: mpsc::UnboundedSender<Request>,
}

impl Remote {
    /// Run `f` on the executor thread and wait for its result.
    fn call<R, F>(&self, f: F) -> Result<R, RemoteError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Session) -> Result<R, RemoteError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Run(Box::new(move |session| {
                let _ = reply_tx.send(f(session));
            })))
            .map_err(|_| RemoteError::disconnected())?;

        reply_rx
            .blocking_recv()
            .map_err(|_| RemoteError::disconnected())?
    }

    /// Run `f` on the executor thread without waiting.
    fn send<F>(&self, f: F)
    where
        F: FnOnce(&mut Session) + Send + 'static,
    {
        let _ = self.tx.send(Request::Run(Box::new(f)));
    }

    pub fn reset(&self) -> Result<(), RemoteError> {
        self.call(|s| {
            s.client.reset();
            Ok(())
        })
    }

    /// Open a directory listing.
    pub fn open_dir(&self, key: &ResourceKey) -> Result<RemoteDir, RemoteError> {
        let key = key.clone();
        let id = self.call(move |s| {
            let dir = s.client.open_dir(&key)?;
            let id = s.allocate_id();
            s.dirs.insert(id, dir);

            Ok(id)
        })?;

        Ok(RemoteDir {
            remote: self.clone(),
            id,
            done: false,
        })
    }

    pub fn stat(&self, key: &ResourceKey) -> Result<StatInfo, RemoteError> {
        let key = key.clone();
        self.call(move |s| s.client.stat(&key))
    }

    pub fn create_file(&self, key: &ResourceKey) -> Result<(), RemoteError> {
        let key = key.clone();
        self.call(move |s| s.client.create_file(&key))
    }

    pub fn mkdir(&self, key: &ResourceKey) -> Result<(), RemoteError> {
        let key = key.clone();
        self.call(move |s| s.client.mkdir(&key))
    }

    pub fn rename(&self, key: &ResourceKey, new_key: &ResourceKey) -> Result<(), RemoteError> {
        let key = key.clone();
        let new_key = new_key.clone();
        self.call(move |s| s.client.rename(&key, &new_key))
    }

    pub fn unlink(&self, key: &ResourceKey) -> Result<(), RemoteError> {
        let key = key.clone();
        self.call(move |s| s.client.unlink(&key))
    }

    pub fn rmdir(&self, key: &ResourceKey) -> Result<(), RemoteError> {
        let key = key.clone();
        self.call(move |s| s.client.rmdir(&key))
    }

    pub fn open_file(&self, key: &ResourceKey, mode: OpenMode) -> Result<RemoteFile, RemoteError> {
        let key = key.clone();
        let id = self.call(move |s| {
            let file = s.client.open_file(&key, mode)?;
            let id = s.allocate_id();
            s.files.insert(id, file);

            Ok(id)
        })?;

        Ok(RemoteFile {
            remote: self.clone(),
            id,
            offset: 0,
        })
    }
}

/// A directory listing open on the executor thread.
///
/// Iteration stops after the last entry or after the first error.
pub struct RemoteDir {
    remote: Remote,
    id: u64,
    done: bool,
}

impl Iterator for RemoteDir {
    type Item = Result<DirectoryEntry, RemoteError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let id = self.id;
        match self.remote.call(move |s| s.dir(id)?.read_entry()) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl Drop for RemoteDir {
    fn drop(&mut self) {
        let id = self.id;
        self.remote.send(move |s| {
            s.dirs.remove(&id);
        });
    }
}

/// A file open on the executor thread.
pub struct RemoteFile {
    remote: Remote,
    id: u64,
    offset: u64,
}

impl RemoteFile {
    /// Status of the open file.
    pub fn stat(&self) -> Result<StatInfo, RemoteError> {
        let id = self.id;
        self.remote.call(move |s| s.file(id)?.fstat())
    }
}

impl io::Read for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let id = self.id;
        let len = buf.len();
        let data = self.remote.call(move |s| {
            let mut data = vec![0; len];
            let n = s.file(id)?.read(&mut data)?;
            data.truncate(n);

            Ok(data)
        })?;
        let n = data.len().min(len);
        buf[..n].copy_from_slice(&data[..n]);
        self.offset += n as u64;

        Ok(n)
    }
}

impl io::Write for RemoteFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let id = self.id;
        let data = buf.to_vec();
        let n = self.remote.call(move |s| s.file(id)?.write(&data))?;
        self.offset += n as u64;

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for RemoteFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.stat()?.size.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid seek"))?;
        if target == self.offset {
            return Ok(target);
        }
        let id = self.id;
        self.offset = self.remote.call(move |s| s.file(id)?.seek(target))?;

        Ok(self.offset)
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        let id = self.id;
        self.remote.send(move |s| {
            s.files.remove(&id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServer;
    use smbdoc_types::EntryType;
    use std::io::{Read, Seek, Write};

    struct Fixture {
        server: FakeServer,
        executor: RemoteExecutor,
    }

    impl Fixture {
        fn setup() -> anyhow::Result<Self> {
            let _ = crate::logging::try_init();
            let server = FakeServer::new();
            server.add_share("host", "share")?;
            let executor = RemoteExecutor::spawn({
                let server = server.clone();
                move || server.client()
            })?;

            Ok(Self { server, executor })
        }

        fn key(&self, path: &str) -> anyhow::Result<ResourceKey> {
            Ok(ResourceKey::parse(format!("smb://host/share{path}"))?)
        }
    }

    #[test]
    fn list_directory_through_executor() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        fixture.server.add_file(&fixture.key("/a.txt")?, b"aaa")?;
        fixture.server.add_dir(&fixture.key("/b")?)?;

        let remote = fixture.executor.remote();
        let mut names = remote
            .open_dir(&fixture.key("")?)?
            .map(|e| e.map(|e| (e.name().to_string(), e.entry_type())))
            .collect::<Result<Vec<_>, _>>()?;
        names.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            vec![
                (".".to_string(), EntryType::Directory),
                ("..".to_string(), EntryType::Directory),
                ("a.txt".to_string(), EntryType::File),
                ("b".to_string(), EntryType::Directory),
            ],
            names
        );

        Ok(())
    }

    #[test]
    fn dropping_dir_closes_handle() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let remote = fixture.executor.remote();
        {
            let mut dir = remote.open_dir(&fixture.key("")?)?;
            dir.next();
            assert_eq!(1, fixture.server.open_handles());
        }
        // Closing is asynchronous; any later call is ordered after it.
        remote.stat(&fixture.key("")?)?;
        assert_eq!(0, fixture.server.open_handles());

        Ok(())
    }

    #[test]
    fn stat_reports_typed_errors() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let remote = fixture.executor.remote();
        assert!(matches!(
            remote.stat(&fixture.key("/missing")?),
            Err(RemoteError::NotFound)
        ));

        fixture.server.fail_auth(true);
        assert!(matches!(
            remote.stat(&fixture.key("")?),
            Err(RemoteError::AuthFailed)
        ));

        Ok(())
    }

    #[test]
    fn read_write_seek_file() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let remote = fixture.executor.remote();
        let key = fixture.key("/f.txt")?;

        {
            let mut file = remote.open_file(&key, OpenMode::Write)?;
            file.write_all(b"hello, world")?;
        }
        assert_eq!(Some(b"hello, world".to_vec()), fixture.server.content(&key));

        let mut file = remote.open_file(&key, OpenMode::Read)?;
        assert_eq!(12, file.stat()?.size);
        file.seek(SeekFrom::Start(7))?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        assert_eq!("world", content);

        file.seek(SeekFrom::End(-5))?;
        let mut buf = [0; 2];
        file.read_exact(&mut buf)?;
        assert_eq!(b"wo", &buf);

        Ok(())
    }

    #[test]
    fn calls_fail_after_shutdown() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let remote = fixture.executor.remote();
        let key = fixture.key("")?;
        drop(fixture.executor);

        match remote.stat(&key) {
            Err(RemoteError::Io(err)) => assert_eq!(io::ErrorKind::BrokenPipe, err.kind()),
            other => panic!("unexpected {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn client_runs_on_a_single_thread() -> anyhow::Result<()> {
        let fixture = Fixture::setup()?;
        let key = fixture.key("")?;
        let handles = (0..4)
            .map(|_| {
                let remote = fixture.executor.remote();
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        remote.stat(&key)?;
                    }
                    Ok::<(), RemoteError>(())
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().expect("thread")?;
        }

        assert_eq!(1, fixture.server.client_thread_count());
        assert_eq!(40, fixture.server.stat_count(&key));

        Ok(())
    }
}
