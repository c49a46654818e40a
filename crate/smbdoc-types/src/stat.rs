use crate::UnixTime;

/// File type bits of [StatInfo::mode].
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

/// File status, as reported by the remote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct StatInfo {
    pub size: u64,
    pub mtime: UnixTime,

    /// Unix-style mode, including the file type bits.
    pub mode: u32,
}

impl StatInfo {
    /// Status of a regular file.
    pub fn file(size: u64, mtime: UnixTime) -> Self {
        Self {
            size,
            mtime,
            mode: S_IFREG | 0o644,
        }
    }

    /// Status of a directory.
    pub fn dir(mtime: UnixTime) -> Self {
        Self {
            size: 0,
            mtime,
            mode: S_IFDIR | 0o755,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}
