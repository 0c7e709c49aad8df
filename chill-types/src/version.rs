//! Schema versioning for status snapshots.

use crate::STATUS_SCHEMA_VERSION;

/// Schema version embedded in every status snapshot.
///
/// Status files outlive the process that wrote them, so readers check the
/// major version before trusting the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct SchemaVersion {
    /// Breaking layout changes bump this.
    #[cfg_attr(feature = "minicbor", n(0))]
    pub major: u32,

    /// Additive changes bump this.
    #[cfg_attr(feature = "minicbor", n(1))]
    pub minor: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The version written by this build.
    pub const fn current() -> Self {
        Self::new(STATUS_SCHEMA_VERSION, 0)
    }

    /// A snapshot is readable when its major version matches ours.
    pub fn is_compatible(&self) -> bool {
        self.major == STATUS_SCHEMA_VERSION
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::current()
    }
}
