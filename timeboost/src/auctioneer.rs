// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Round resolution: pick the best bids for a round and submit them on chain.
//!
//! Whether a round is resolved is read from the contract before every submission attempt,
//! so several auctioneers (or a restarted one) converge on a single on-chain resolution.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use alloy_primitives::Address;
use backon::{ExponentialBuilder, Retryable};
use thiserror::Error;
use timeboost_core::{Bid, RoundTimingInfo};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auction_contract::{AuctionContract, AuctionResolution, ContractError};
use crate::bid_queue::{BidQueueError, SharedBidQueue};
use crate::clock::Clock;

#[derive(Debug, Clone, Copy)]
pub struct AuctioneerConfig {
    /// Total submission attempts per round, the first one included.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

#[derive(Debug, Error)]
pub enum AuctioneerError {
    #[error("no bids for round {round}")]
    NoBids { round: u64 },
    #[error("bid queue unavailable: {0}")]
    Queue(#[from] BidQueueError),
    #[error("cannot read auction contract: {0}")]
    Contract(#[from] ContractError),
    #[error("resolution of round {round} reverted: {reason}")]
    Reverted { round: u64, reason: String },
    #[error("round {round} unresolved after {attempts} attempts: {reason}")]
    ResolutionFailed {
        round: u64,
        attempts: usize,
        reason: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct AuctioneerStop {
    shutdown: Arc<AtomicBool>,
}

impl AuctioneerStop {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

enum Attempt {
    AlreadyResolved(AuctionResolution),
    Submitted(AuctionResolution),
}

pub struct Auctioneer {
    config: AuctioneerConfig,
    timing: RoundTimingInfo,
    contract: Arc<dyn AuctionContract>,
    queue: SharedBidQueue,
    clock: Arc<dyn Clock>,
}

/// Keeps the best bid of every bidder, then orders them by [`Bid::rank`]. Returns the
/// winner and the runner-up, if any.
pub fn select_winners(bids: &[Bid]) -> Option<(Bid, Option<Bid>)> {
    let mut best: HashMap<Address, &Bid> = HashMap::new();
    for bid in bids {
        best.entry(bid.bidder)
            .and_modify(|current| {
                if bid.rank(current).is_lt() {
                    *current = bid;
                }
            })
            .or_insert(bid);
    }
    let mut ranked: Vec<&Bid> = best.into_values().collect();
    ranked.sort_by(|a, b| a.rank(b));

    let mut ranked = ranked.into_iter();
    let first = ranked.next()?.clone();
    let second = ranked.next().cloned();
    Some((first, second))
}

impl Auctioneer {
    pub fn new(
        config: AuctioneerConfig,
        timing: RoundTimingInfo,
        contract: Arc<dyn AuctionContract>,
        queue: SharedBidQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            timing,
            contract,
            queue,
            clock,
        }
    }

    /// Resolves `round` exactly once on chain. If the contract already holds a resolution
    /// it is returned without submitting anything.
    pub async fn resolve_round(&self, round: u64) -> Result<AuctionResolution, AuctioneerError> {
        if let Some(existing) = self.contract.resolution(round).await? {
            self.queue.ack_round(round).await?;
            info!(round, winner = %existing.winner, "round already resolved");
            return Ok(existing);
        }

        let bids = self.queue.bids_for_round(round).await?;
        let Some((first, second)) = select_winners(&bids) else {
            return Err(AuctioneerError::NoBids { round });
        };

        let contract = self.contract.as_ref();
        let first_ref = &first;
        let second_ref = second.as_ref();
        let attempts = AtomicUsize::new(0);
        let attempts_ref = &attempts;
        let attempt = move || async move {
            attempts_ref.fetch_add(1, Ordering::Relaxed);
            // A previous attempt may have landed even though its confirmation was lost.
            if let Some(existing) = contract.resolution(round).await? {
                return Ok(Attempt::AlreadyResolved(existing));
            }
            contract
                .resolve_auction(first_ref, second_ref)
                .await
                .map(Attempt::Submitted)
        };

        let outcome = attempt
            .retry(self.backoff())
            .when(|err: &ContractError| {
                !matches!(err, ContractError::MissingWallet | ContractError::Reverted(_))
            })
            .notify(|err: &ContractError, delay: Duration| {
                warn!(round, error = %err, ?delay, "auction resolution attempt failed, will retry");
            })
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(ContractError::Reverted(reason)) => {
                // Another auctioneer may have resolved the round between our check and submit.
                if let Some(existing) = self.contract.resolution(round).await? {
                    info!(round, winner = %existing.winner, %reason, "resolution reverted, round resolved elsewhere");
                    Attempt::AlreadyResolved(existing)
                } else {
                    error!(round, %reason, "auction resolution reverted, round stays unassigned");
                    return Err(AuctioneerError::Reverted { round, reason });
                }
            }
            Err(err) => {
                let attempts = attempts.load(Ordering::Relaxed);
                error!(round, attempts, error = %err, "auction resolution failed, round stays unassigned");
                return Err(AuctioneerError::ResolutionFailed {
                    round,
                    attempts,
                    reason: err.to_string(),
                });
            }
        };

        let resolution = match outcome {
            Attempt::AlreadyResolved(existing) => existing,
            Attempt::Submitted(resolution) => {
                info!(
                    round,
                    winner = %resolution.winner,
                    controller = %resolution.express_lane_controller,
                    price = %resolution.price,
                    bids = bids.len(),
                    "auction resolved"
                );
                resolution
            }
        };
        self.queue.ack_round(round).await?;
        Ok(resolution)
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.config.initial_backoff)
            .with_max_delay(self.config.max_backoff)
            .with_max_times(self.config.max_attempts.saturating_sub(1))
    }

    /// Resolves every upcoming round as soon as its bidding window closes.
    pub fn spawn(self) -> (JoinHandle<()>, AuctioneerStop) {
        let stop = AuctioneerStop::default();
        let task_stop = stop.clone();
        let handle = tokio::spawn(async move {
            let mut last_attempted: Option<u64> = None;
            while !task_stop.is_shutdown_requested() {
                let now = self.clock.now();
                let upcoming = self.timing.current_round(now).saturating_add(1);

                if last_attempted.is_some_and(|round| round >= upcoming) {
                    let wait = self
                        .timing
                        .time_until_next_round(now)
                        .max(Duration::from_millis(10));
                    tokio::time::sleep(wait).await;
                    continue;
                }

                let closes_at = self.timing.auction_closing_time(upcoming);
                if let Ok(wait) = closes_at.duration_since(now)
                    && !wait.is_zero()
                {
                    tokio::time::sleep(wait).await;
                    continue;
                }

                last_attempted = Some(upcoming);
                match self.resolve_round(upcoming).await {
                    Ok(_) => {}
                    Err(AuctioneerError::NoBids { round }) => {
                        info!(round, "no bids, round stays unassigned");
                    }
                    // Logged by resolve_round.
                    Err(AuctioneerError::Reverted { .. } | AuctioneerError::ResolutionFailed { .. }) => {}
                    Err(err) => warn!(round = upcoming, error = %err, "round resolution failed"),
                }
            }
        });
        (handle, stop)
    }
}
