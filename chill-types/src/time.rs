//! Wall-clock timestamps.
//!
//! Message publish times arrive as milliseconds since the Unix epoch, so
//! receive times and lag are kept in the same unit.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
#[cfg_attr(feature = "minicbor", cbor(transparent))]
pub struct UnixMillis(#[cfg_attr(feature = "minicbor", n(0))] pub u64);

impl UnixMillis {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// The current wall-clock time. A clock set before 1970 reads as zero.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds from `earlier` to `self`, zero if `earlier` is later.
    ///
    /// Publisher clocks are not synchronized with ours, so a message can
    /// appear to arrive before it was sent.
    pub const fn saturating_since(&self, earlier: UnixMillis) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl From<SystemTime> for UnixMillis {
    fn from(t: SystemTime) -> Self {
        Self(
            t.duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        )
    }
}

impl From<UnixMillis> for SystemTime {
    fn from(t: UnixMillis) -> Self {
        UNIX_EPOCH + Duration::from_millis(t.0)
    }
}
