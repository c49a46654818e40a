use std::fmt;

const SCHEME: &str = "smb://";

/// Identifies a remote resource: the network root, a workgroup, a
/// server, a share, a directory or a file.
///
/// Keys look like `smb://host/share/dir/file`. The top-level key,
/// [ResourceKey::root], is just `smb://`; it is the parent of every
/// workgroup and server key.
///
/// Keys are compared as strings. They never contain empty segments
/// or `.` and `..` segments.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKey(String);

impl ResourceKey {
    /// The top-level key, `smb://`.
    pub fn root() -> ResourceKey {
        ResourceKey(SCHEME.to_string())
    }

    /// Build a key from a string.
    ///
    /// If parsing works, the key is guaranteed to be acceptable. A
    /// single trailing slash is dropped.
    pub fn parse(str: impl Into<String>) -> Result<ResourceKey, KeyError> {
        let mut str = str.into();
        let rest = str.strip_prefix(SCHEME).ok_or(KeyError::InvalidKey)?;
        if rest.is_empty() {
            return Ok(ResourceKey::root());
        }
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let mut parts = rest.split('/');
        let authority = parts.next().unwrap_or("");
        if authority.is_empty() {
            return Err(KeyError::InvalidKey);
        }
        for segment in parts {
            check_segment(segment)?;
        }
        if str.ends_with('/') {
            str.pop();
        }

        Ok(ResourceKey(str))
    }

    /// Build a root-level key for a server or a workgroup.
    pub fn server(name: &str) -> Result<ResourceKey, KeyError> {
        if name.is_empty() || name.contains('/') {
            return Err(KeyError::InvalidKey);
        }

        Ok(ResourceKey(format!("{SCHEME}{name}")))
    }

    /// Append a single segment to this key and return the result.
    ///
    /// The top-level key has no authority to append to, so joining
    /// onto it fails.
    pub fn join(&self, name: &str) -> Result<ResourceKey, KeyError> {
        if self.is_root() {
            return Err(KeyError::InvalidKey);
        }
        check_segment(name)?;

        let mut full = self.0.clone();
        full.push('/');
        full.push_str(name);
        Ok(ResourceKey(full))
    }

    /// Part of the key after the scheme.
    fn rest(&self) -> &str {
        &self.0[SCHEME.len()..]
    }

    /// Return true for `smb://`.
    pub fn is_root(&self) -> bool {
        self.rest().is_empty()
    }

    /// The host or workgroup name, if any.
    pub fn authority(&self) -> Option<&str> {
        let rest = self.rest();
        if rest.is_empty() {
            return None;
        }

        Some(rest.split('/').next().unwrap_or(rest))
    }

    /// Iterate over the path segments that follow the authority.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        let mut parts = self.rest().split('/');
        if self.is_root() {
            // Empty iterator of the same type.
            parts.next();
        }
        parts.next();

        parts
    }

    /// The last path segment or, for root-level keys, the authority.
    pub fn name(&self) -> &str {
        let rest = self.rest();
        rest.rsplit('/').next().unwrap_or(rest)
    }

    /// The parent of this key.
    ///
    /// Servers and workgroups have [ResourceKey::root] as parent. The
    /// top-level key has no parent.
    pub fn parent(&self) -> Option<ResourceKey> {
        if self.is_root() {
            return None;
        }
        let rest = self.rest();
        match rest.rfind('/') {
            None => Some(ResourceKey::root()),
            Some(slash) => Some(ResourceKey(self.0[0..SCHEME.len() + slash].to_string())),
        }
    }

    /// A key with an authority and no path segments.
    pub fn is_server(&self) -> bool {
        !self.is_root() && !self.rest().contains('/')
    }

    /// A key with exactly one path segment.
    pub fn is_share(&self) -> bool {
        self.segments().count() == 1
    }

    /// The share that contains this key, if this isn't a root-level
    /// key.
    pub fn share(&self) -> Option<ResourceKey> {
        let authority = self.authority()?;
        let share = self.segments().next()?;

        Some(ResourceKey(format!("{SCHEME}{authority}/{share}")))
    }

    /// Return true if the other key is the current key or one of its
    /// ancestors.
    ///
    /// This works on segments, not characters, so `smb://h/foobar`
    /// does not start with `smb://h/foo`.
    pub fn starts_with<T: AsRef<ResourceKey>>(&self, other: T) -> bool {
        let other = other.as_ref();
        if other.is_root() {
            return true;
        }
        if let Some(rest) = self.0.strip_prefix(other.as_str()) {
            return rest.is_empty() || rest.starts_with('/');
        }

        false
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn check_segment(segment: &str) -> Result<(), KeyError> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains('/') {
        return Err(KeyError::InvalidKey);
    }
    Ok(())
}

impl AsRef<ResourceKey> for ResourceKey {
    fn as_ref(&self) -> &ResourceKey {
        self
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ResourceKey::parse(value)
    }
}

impl From<ResourceKey> for String {
    fn from(value: ResourceKey) -> Self {
        value.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors returned by [ResourceKey] functions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid resource key. Keys start with smb:// and must not contain empty, . or .. segments")]
    InvalidKey,
}
