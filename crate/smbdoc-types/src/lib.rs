mod entry;
mod key;
mod stat;
mod time;

pub use entry::{DirectoryEntry, EntryType};
pub use key::{KeyError, ResourceKey};
pub use stat::StatInfo;
pub use time::UnixTime;
