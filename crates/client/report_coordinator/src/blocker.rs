use kp_upkeep::{BlockKey, Encoder, EncoderError};
use serde::{Deserialize, Serialize};

/// Blocking window of an upkeep.
///
/// Work for the upkeep checked at `check_block` is considered claimed until
/// `transmit_block` is reached or passed. A `transmit_block` of [BlockKey::INDEFINITE]
/// means the upkeep is blocked with no known release point yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdBlocker {
    pub check_block: BlockKey,
    pub transmit_block: BlockKey,
}

impl IdBlocker {
    /// A window claimed from `check_block` on, awaiting a transmit log.
    pub fn indefinite(check_block: BlockKey) -> Self {
        Self { check_block, transmit_block: BlockKey::INDEFINITE }
    }

    /// Decides whether `val` carries better information than `self` and should replace
    /// it.
    ///
    /// 1. A later check block always wins.
    /// 2. An earlier check block never does.
    /// 3. On equal check blocks, any transmit block beats [BlockKey::INDEFINITE], nothing
    ///    beats a concrete transmit block except a later one. This is what absorbs the
    ///    same log re-observed at a different transmit block after a reorg.
    ///
    /// The resulting order is total, so applying any set of candidates in any order
    /// converges on the same window.
    ///
    /// Note that rule 3 ranks [BlockKey::INDEFINITE] *below* every concrete block, the
    /// opposite of what [Encoder::after] says about it.
    pub fn should_update(&self, val: &IdBlocker, encoder: &dyn Encoder) -> Result<bool, EncoderError> {
        if encoder.after(&val.check_block, &self.check_block)? {
            return Ok(true);
        }
        if encoder.after(&self.check_block, &val.check_block)? {
            return Ok(false);
        }

        if self.transmit_block.is_indefinite() {
            return Ok(true);
        }
        if val.transmit_block.is_indefinite() {
            return Ok(false);
        }

        encoder.after(&val.transmit_block, &self.transmit_block)
    }
}
