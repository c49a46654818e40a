//! Capability interface of the remote file-sharing client.
//!
//! The native client is blocking and can't be used from more than
//! one thread; [RemoteExecutor] gives access to it from anywhere by
//! funneling all calls through one dedicated thread.

use crate::error::RemoteError;
use smbdoc_types::{DirectoryEntry, ResourceKey, StatInfo};

mod executor;

pub use executor::{Remote, RemoteDir, RemoteExecutor, RemoteFile};

/// How to open a remote file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,

    /// Write, truncating any existing content.
    Write,
}

impl OpenMode {
    /// Parse a mode string, such as "r" or "w".
    pub fn parse(mode: &str) -> Option<OpenMode> {
        match mode {
            "r" => Some(OpenMode::Read),
            "w" | "wt" => Some(OpenMode::Write),
            _ => None,
        }
    }
}

/// An open directory listing.
///
/// Entries are returned one by one until `None`. Listings can't be
/// restarted. Dropping the handle releases it.
pub trait DirHandle {
    fn read_entry(&mut self) -> Result<Option<DirectoryEntry>, RemoteError>;
}

/// An open remote file. Dropping the handle closes it.
pub trait FileHandle {
    /// Read into `buf`, returning the number of bytes read or 0 at
    /// the end of the file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RemoteError>;

    /// Write from `buf`, returning the number of bytes written.
    fn write(&mut self, buf: &[u8]) -> Result<usize, RemoteError>;

    /// Move to an absolute offset and return it.
    fn seek(&mut self, offset: u64) -> Result<u64, RemoteError>;

    fn fstat(&mut self) -> Result<StatInfo, RemoteError>;
}

/// A blocking remote file-sharing client.
///
/// Implementations don't need to be thread-safe; see
/// [RemoteExecutor].
pub trait RemoteClient {
    /// Reset the client state, such as after credentials changed.
    fn reset(&mut self);

    fn open_dir(&mut self, key: &ResourceKey) -> Result<Box<dyn DirHandle>, RemoteError>;

    fn stat(&mut self, key: &ResourceKey) -> Result<StatInfo, RemoteError>;

    fn create_file(&mut self, key: &ResourceKey) -> Result<(), RemoteError>;

    fn mkdir(&mut self, key: &ResourceKey) -> Result<(), RemoteError>;

    fn rename(&mut self, key: &ResourceKey, new_key: &ResourceKey) -> Result<(), RemoteError>;

    fn unlink(&mut self, key: &ResourceKey) -> Result<(), RemoteError>;

    fn rmdir(&mut self, key: &ResourceKey) -> Result<(), RemoteError>;

    fn open_file(
        &mut self,
        key: &ResourceKey,
        mode: OpenMode,
    ) -> Result<Box<dyn FileHandle>, RemoteError>;
}
