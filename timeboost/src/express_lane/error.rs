// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_primitives::Address;
use thiserror::Error;

use crate::sequencing_lane::SequencerError;

#[derive(Debug, Error, Clone)]
pub enum ExpressLaneError {
    #[error("submission targets round {got}, current round is {expected}")]
    WrongRound { expected: u64, got: u64 },
    #[error("{0}")]
    Misconfigured(String),
    #[error("{0}")]
    InvalidSignature(String),
    #[error("signer {signer} does not control the express lane")]
    NotController {
        signer: Address,
        controller: Option<Address>,
    },
    #[error("expected sequence {expected}, got {got}")]
    SequenceMismatch { expected: u64, got: u64 },
    #[error(transparent)]
    Sequencing(#[from] SequencerError),
}
