// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod error;
mod handle;
mod lane;
mod types;

pub use error::SequencingLaneError;
pub use handle::{SequencerHandle, TransactionPublisher};
pub use lane::{SequencingLane, SequencingLaneConfig, SequencingLaneStop, validate_raw_tx};
pub use types::{PendingReorg, PendingTx, SequencedReceipt, SequencerError, SequencingLaneInput};
