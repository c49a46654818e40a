/// Classification of a remote directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub enum EntryType {
    NetworkRoot,
    Workgroup,
    Server,
    FileShare,
    PrinterShare,
    CommsShare,
    IpcShare,
    Directory,
    File,
    Link,
}

impl EntryType {
    /// Entries that can be listed: the network root, workgroups,
    /// servers, file shares and directories.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            EntryType::NetworkRoot
                | EntryType::Workgroup
                | EntryType::Server
                | EntryType::FileShare
                | EntryType::Directory
        )
    }

    /// Entries that can't be exposed as documents.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            EntryType::Link | EntryType::PrinterShare | EntryType::CommsShare | EntryType::IpcShare
        )
    }
}

/// A raw listing record, as returned by a remote directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    entry_type: EntryType,
    comment: String,
    name: String,
}

impl DirectoryEntry {
    pub fn new(entry_type: EntryType, comment: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entry_type,
            comment: comment.into(),
            name: name.into(),
        }
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Change the display name, such as after a rename.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}
