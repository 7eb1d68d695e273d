use serde::{Deserialize, Serialize};
use std::fmt;

/// A point of reference on the underlying chain, in practice a block number.
///
/// Ordering between block keys is owned by the [Encoder](crate::Encoder), which is why
/// this type does not implement [Ord].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockKey(u64);

impl BlockKey {
    /// Marks an upkeep as blocked with no known release point yet.
    ///
    /// Numerically this is the largest possible block, so under
    /// [Encoder::after](crate::Encoder::after) it succeeds every real block and anything
    /// compared against it is never "after" it. Blocking window tie-breaks however treat
    /// it as *lower* than any concrete value: a concrete transmit block always replaces
    /// an indefinite one. Both orderings are relied upon and must be kept as-is.
    pub const INDEFINITE: BlockKey = BlockKey(u64::MAX);

    pub const fn new(block_n: u64) -> Self {
        Self(block_n)
    }

    pub const fn block_n(&self) -> u64 {
        self.0
    }

    pub const fn is_indefinite(&self) -> bool {
        self.0 == Self::INDEFINITE.0
    }
}

impl From<u64> for BlockKey {
    fn from(block_n: u64) -> Self {
        Self(block_n)
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a recurring upkeep, independently of the block it was checked at.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpkeepIdentifier(String);

impl UpkeepIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UpkeepIdentifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UpkeepIdentifier {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for UpkeepIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque composite of a [BlockKey] and an [UpkeepIdentifier].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpkeepKey(String);

impl UpkeepKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for UpkeepKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UpkeepKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for UpkeepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
