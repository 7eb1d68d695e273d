use crate::key::{BlockKey, UpkeepIdentifier, UpkeepKey};

/// Separates the block and identifier parts of an [UpkeepKey] in the [BasicEncoder]
/// format.
pub const UPKEEP_KEY_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncoderError {
    #[error("Invalid upkeep key format: {0}")]
    InvalidUpkeepKey(String),

    #[error("Invalid block key: {0}")]
    InvalidBlockKey(String),

    #[error("Block key {0} cannot be incremented")]
    Overflow(BlockKey),
}

/// Decomposes upkeep keys and orders block keys.
///
/// Implementations must be pure: the same inputs always produce the same outputs and no
/// call has side effects. An error only ever concerns the item being processed.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait Encoder: Send + Sync {
    /// Splits a key into the block it was checked at and the upkeep it refers to.
    fn split_upkeep_key(&self, key: &UpkeepKey) -> Result<(BlockKey, UpkeepIdentifier), EncoderError>;

    /// Returns true if `a` strictly succeeds `b`.
    fn after(&self, a: &BlockKey, b: &BlockKey) -> Result<bool, EncoderError>;

    /// Returns the block key immediately following `a`.
    fn increment(&self, a: &BlockKey) -> Result<BlockKey, EncoderError>;
}

/// Encoder for keys of the form `<block number>|<upkeep id>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicEncoder;

impl BasicEncoder {
    pub fn make_upkeep_key(&self, block: BlockKey, id: &UpkeepIdentifier) -> UpkeepKey {
        UpkeepKey::from(format!("{block}{UPKEEP_KEY_SEPARATOR}{id}"))
    }
}

impl Encoder for BasicEncoder {
    fn split_upkeep_key(&self, key: &UpkeepKey) -> Result<(BlockKey, UpkeepIdentifier), EncoderError> {
        let (block, id) = key
            .as_str()
            .split_once(UPKEEP_KEY_SEPARATOR)
            .ok_or_else(|| EncoderError::InvalidUpkeepKey(format!("missing separator in {key:?}")))?;

        if id.is_empty() {
            return Err(EncoderError::InvalidUpkeepKey(format!("empty upkeep id in {key:?}")));
        }

        let block_n = block.parse::<u64>().map_err(|e| EncoderError::InvalidBlockKey(format!("{block:?}: {e}")))?;

        Ok((BlockKey::new(block_n), UpkeepIdentifier::from(id)))
    }

    fn after(&self, a: &BlockKey, b: &BlockKey) -> Result<bool, EncoderError> {
        Ok(a.block_n() > b.block_n())
    }

    fn increment(&self, a: &BlockKey) -> Result<BlockKey, EncoderError> {
        a.block_n().checked_add(1).map(BlockKey::new).ok_or(EncoderError::Overflow(*a))
    }
}
