// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Protocol types for the express-lane timeboost auction.
//!
//! Everything here is pure: round arithmetic, canonical signing bytes and the
//! timeboosted block-metadata bitmap. Services live in the `timeboost` crate.
pub mod bid;
pub mod block_metadata;
pub mod round;
pub mod signing;
pub mod submission;

pub use bid::Bid;
pub use block_metadata::BlockMetadata;
pub use round::{RoundTimingError, RoundTimingInfo, current_round};
pub use signing::SigningError;
pub use submission::ExpressLaneSubmission;
