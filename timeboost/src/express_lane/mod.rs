// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Sequencer-side express lane: controller arbitration, per-round sequence numbers and the
//! time advantage over regular transactions.

mod error;
mod service;
mod watcher;

pub use error::ExpressLaneError;
pub use service::{ExpressLaneConfig, ExpressLaneService, InstallOutcome};
pub use watcher::{ResolutionWatcher, ResolutionWatcherConfig, WatcherStop};
