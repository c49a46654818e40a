use smbdoc_types::{KeyError, ResourceKey};
use std::io;
use std::sync::Arc;

/// Error reported by a remote call.
///
/// This type is cheap to clone, so the same error can be kept for
/// later inspection and reported to a callback.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("not found")]
    NotFound,

    /// Credentials were rejected. Callers should ask for new ones
    /// instead of retrying.
    #[error("authentication failed")]
    AuthFailed,

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl RemoteError {
    /// Build an I/O error from a kind and a message.
    pub fn io(kind: io::ErrorKind, msg: impl Into<String>) -> Self {
        RemoteError::Io(Arc::new(io::Error::new(kind, msg.into())))
    }

    /// Error reported when the remote executor is gone.
    pub(crate) fn disconnected() -> Self {
        RemoteError::io(io::ErrorKind::BrokenPipe, "remote executor stopped")
    }

    /// Return the closest [io::ErrorKind].
    pub fn io_kind(&self) -> io::ErrorKind {
        match self {
            RemoteError::NotFound => io::ErrorKind::NotFound,
            RemoteError::AuthFailed => io::ErrorKind::PermissionDenied,
            RemoteError::Io(err) => err.kind(),
        }
    }
}

impl From<io::Error> for RemoteError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => RemoteError::NotFound,
            _ => RemoteError::Io(Arc::new(err)),
        }
    }
}

impl From<RemoteError> for io::Error {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Io(err) => io::Error::new(err.kind(), err.to_string()),
            other => io::Error::new(other.io_kind(), other.to_string()),
        }
    }
}

/// Error returned by [crate::DocumentProvider] operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("{0} is not a directory")]
    NotADirectory(ResourceKey),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

impl ProviderError {
    /// Return true if the caller should ask for new credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ProviderError::Remote(RemoteError::AuthFailed))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::Remote(RemoteError::NotFound))
    }
}
