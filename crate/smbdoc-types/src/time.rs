use std::time::{Duration, SystemTime};

/// Wall-clock time, in milliseconds since the UNIX epoch.
///
/// Millisecond precision is what remote servers report and what
/// cache expiration is measured in.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize,
    Debug,
)]
#[serde(transparent)]
pub struct UnixTime(u64);

impl UnixTime {
    pub const ZERO: UnixTime = UnixTime(0);

    /// Clocks set before the epoch read as [UnixTime::ZERO].
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(UnixTime::from_duration)
            .unwrap_or(UnixTime::ZERO)
    }

    pub fn from_secs(secs: u64) -> Self {
        UnixTime(secs.saturating_mul(1000))
    }

    pub fn from_millis(millis: u64) -> Self {
        UnixTime(millis)
    }

    fn from_duration(d: Duration) -> Self {
        UnixTime(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    /// Time elapsed between `earlier` and this time, zero if
    /// `earlier` is in fact later.
    pub fn duration_since(&self, earlier: &UnixTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / 1000
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn plus(self, d: Duration) -> UnixTime {
        UnixTime(self.0.saturating_add(UnixTime::from_duration(d).0))
    }
}
