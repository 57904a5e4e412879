// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use alloy_primitives::{Address, Bytes};
use timeboost_core::{ExpressLaneSubmission, RoundTimingInfo};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::sequencing_lane::{SequencedReceipt, SequencerError, TransactionPublisher};

use super::ExpressLaneError;

#[derive(Debug, Clone, Copy)]
pub struct ExpressLaneConfig {
    pub chain_id: u64,
    pub auction_contract_address: Address,
    /// Delay applied to regular transactions while a round has a controller.
    pub advantage: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalled,
    /// The round already ended; nothing was recorded.
    Stale,
    /// A different controller is already recorded for the round; it is kept.
    Conflicting { existing: Address },
}

/// Next expected sequence number for one `(round, controller)` pair.
#[derive(Debug, Default)]
struct SequenceState {
    key: Option<(u64, Address)>,
    next: u64,
}

impl SequenceState {
    fn expected_for(&mut self, round: u64, controller: Address) -> u64 {
        if self.key != Some((round, controller)) {
            self.key = Some((round, controller));
            self.next = 0;
        }
        self.next
    }
}

pub struct ExpressLaneService {
    config: ExpressLaneConfig,
    timing: RoundTimingInfo,
    publisher: Arc<dyn TransactionPublisher>,
    clock: Arc<dyn Clock>,
    controllers: RwLock<BTreeMap<u64, Address>>,
    // Held across the forward so check, forward and advance are one step per controller.
    sequence: Arc<Mutex<SequenceState>>,
}

impl ExpressLaneService {
    pub fn new(
        config: ExpressLaneConfig,
        timing: RoundTimingInfo,
        publisher: Arc<dyn TransactionPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            timing,
            publisher,
            clock,
            controllers: RwLock::new(BTreeMap::new()),
            sequence: Arc::new(Mutex::new(SequenceState::default())),
        }
    }

    pub fn timing(&self) -> &RoundTimingInfo {
        &self.timing
    }

    pub fn current_round(&self) -> u64 {
        self.timing.current_round(self.clock.now())
    }

    pub fn controller_for(&self, round: u64) -> Option<Address> {
        self.controllers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&round)
            .copied()
    }

    /// Records the auction winner for `round`. Waits for any in-flight express-lane
    /// submission so it never observes a half-applied controller change.
    pub async fn install_controller(&self, round: u64, controller: Address) -> InstallOutcome {
        let _sequence = self.sequence.lock().await;
        let current = self.current_round();
        if round < current {
            debug!(round, current, %controller, "ignoring controller for past round");
            return InstallOutcome::Stale;
        }

        let mut controllers = self
            .controllers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match controllers.get(&round).copied() {
            Some(existing) if existing == controller => InstallOutcome::AlreadyInstalled,
            Some(existing) => {
                warn!(round, %existing, %controller, "conflicting express lane controller ignored");
                InstallOutcome::Conflicting { existing }
            }
            None => {
                controllers.insert(round, controller);
                info!(round, %controller, "express lane controller installed");
                InstallOutcome::Installed
            }
        }
    }

    /// Forgets controllers of rounds that already ended. Returns how many were dropped.
    pub fn expire_stale_rounds(&self) -> usize {
        let current = self.current_round();
        let mut controllers = self
            .controllers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = controllers.len();
        controllers.retain(|round, _| *round >= current);
        let expired = before - controllers.len();
        if expired > 0 {
            debug!(current, expired, "expired express lane rounds");
        }
        expired
    }

    pub async fn submit_express_lane_tx(
        &self,
        submission: ExpressLaneSubmission,
    ) -> Result<SequencedReceipt, ExpressLaneError> {
        let signer = self.check_submission(&submission, self.clock.now())?;

        let mut sequence = Arc::clone(&self.sequence).lock_owned().await;
        // Round or controller may have moved while waiting for the lock.
        let controller = self.check_controller(&submission, signer, self.clock.now())?;
        let expected = sequence.expected_for(submission.round, controller);
        if submission.sequence != expected {
            return Err(ExpressLaneError::SequenceMismatch {
                expected,
                got: submission.sequence,
            });
        }

        // Forward and advance run detached from the caller: once the tx reaches the lane the
        // counter must move, even if the request that carried it is dropped.
        let publisher = Arc::clone(&self.publisher);
        let transaction = submission.transaction;
        let forward = tokio::spawn(async move {
            let receipt = publisher.publish_transaction(transaction, true).await?;
            sequence.next = expected.saturating_add(1);
            Ok::<_, SequencerError>(receipt)
        });
        let receipt = forward.await.map_err(|err| {
            SequencerError::internal(format!("express lane forward task failed: {err}"))
        })??;

        debug!(
            round = submission.round,
            sequence = expected,
            tx_hash = %receipt.tx_hash,
            "express lane tx sequenced"
        );
        Ok(receipt)
    }

    /// Regular transactions wait out the advantage window whenever the current round has a
    /// controller.
    pub async fn submit_regular_tx(&self, raw: Bytes) -> Result<SequencedReceipt, ExpressLaneError> {
        if self.controller_for(self.current_round()).is_some() {
            tokio::time::sleep(self.config.advantage).await;
        }
        Ok(self.publisher.publish_transaction(raw, false).await?)
    }

    fn check_submission(
        &self,
        submission: &ExpressLaneSubmission,
        now: SystemTime,
    ) -> Result<Address, ExpressLaneError> {
        let current = self.timing.current_round(now);
        if submission.round != current {
            return Err(ExpressLaneError::WrongRound {
                expected: current,
                got: submission.round,
            });
        }
        if submission.chain_id != self.config.chain_id {
            return Err(ExpressLaneError::Misconfigured(format!(
                "chain id {} does not match {}",
                submission.chain_id, self.config.chain_id
            )));
        }
        if submission.auction_contract_address != self.config.auction_contract_address {
            return Err(ExpressLaneError::Misconfigured(format!(
                "auction contract {} does not match {}",
                submission.auction_contract_address, self.config.auction_contract_address
            )));
        }

        let signer = submission
            .recover_signer()
            .map_err(|err| ExpressLaneError::InvalidSignature(err.to_string()))?;
        self.check_controller(submission, signer, now)?;
        Ok(signer)
    }

    fn check_controller(
        &self,
        submission: &ExpressLaneSubmission,
        signer: Address,
        now: SystemTime,
    ) -> Result<Address, ExpressLaneError> {
        let current = self.timing.current_round(now);
        if submission.round != current {
            return Err(ExpressLaneError::WrongRound {
                expected: current,
                got: submission.round,
            });
        }
        match self.controller_for(submission.round) {
            Some(controller) if controller == signer => Ok(controller),
            controller => Err(ExpressLaneError::NotController { signer, controller }),
        }
    }
}
