pub mod cache;
pub mod config;
mod error;
pub mod load;
pub mod logging;
pub mod metadata;
pub mod provider;
pub mod remote;
pub mod tasks;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod transfer;

pub use cache::{CacheResult, CacheState, MetadataCache};
pub use config::ProviderConfig;
pub use error::{ProviderError, RemoteError};
pub use metadata::MetadataEntity;
pub use provider::{Document, DocumentKind, DocumentProvider, Listing};
pub use remote::{Remote, RemoteClient, RemoteExecutor};
pub use tasks::{
    Callback, Completion, Operation, Outcome, TaskCoordinator, TaskHandle, TaskState, TaskStatus,
};
