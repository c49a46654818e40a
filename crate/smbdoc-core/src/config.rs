/// Settings of a [crate::DocumentProvider].
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Maximum number of background loads running at the same time.
    /// Additional loads wait for a free slot. 0 means no limit.
    pub max_workers: usize,
}

impl ProviderConfig {
    pub const DEFAULT_MAX_WORKERS: usize = 8;

    pub fn new() -> Self {
        Self {
            max_workers: Self::DEFAULT_MAX_WORKERS,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new()
    }
}
