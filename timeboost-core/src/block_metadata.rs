// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

/// Version byte of the timeboosted bitmap layout.
pub const TIMEBOOSTED_VERSION: u8 = 0;

/// Per-block metadata: a version byte followed by a bitmap with one bit per transaction,
/// set when the transaction arrived through the express lane. Bit `i` lives in byte
/// `1 + i / 8` at position `i % 8` (least significant first).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockMetadata(Vec<u8>);

impl BlockMetadata {
    pub fn from_timeboosted(flags: &[bool]) -> Self {
        let mut raw = vec![0_u8; 1 + flags.len().div_ceil(8)];
        raw[0] = TIMEBOOSTED_VERSION;
        for (index, timeboosted) in flags.iter().enumerate() {
            if *timeboosted {
                raw[1 + index / 8] |= 1 << (index % 8);
            }
        }
        Self(raw)
    }

    pub fn from_raw(raw: Vec<u8>) -> Self {
        Self(raw)
    }

    pub fn version(&self) -> Option<u8> {
        self.0.first().copied()
    }

    /// Indices beyond the bitmap are reported as not timeboosted.
    pub fn is_tx_timeboosted(&self, tx_index: usize) -> bool {
        let max_tx_count = self.0.len().saturating_sub(1).saturating_mul(8);
        if tx_index >= max_tx_count {
            return false;
        }
        self.0[1 + tx_index / 8] & (1 << (tx_index % 8)) != 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}
