// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auction_contract::{AuctionContract, ContractError};

use super::{ExpressLaneService, InstallOutcome};

#[derive(Debug, Clone, Copy)]
pub struct ResolutionWatcherConfig {
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct WatcherStop {
    shutdown: Arc<AtomicBool>,
}

impl WatcherStop {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Follows `AuctionResolved` events and installs each winner as the controller of its
/// round. Also retires controllers once their round ends.
pub struct ResolutionWatcher {
    config: ResolutionWatcherConfig,
    contract: Arc<dyn AuctionContract>,
    service: Arc<ExpressLaneService>,
    next_block: Option<u64>,
    stop: WatcherStop,
}

impl ResolutionWatcher {
    pub fn new(
        config: ResolutionWatcherConfig,
        contract: Arc<dyn AuctionContract>,
        service: Arc<ExpressLaneService>,
    ) -> Self {
        Self {
            config,
            contract,
            service,
            next_block: None,
            stop: WatcherStop::default(),
        }
    }

    /// Installs the rounds the contract already reports as resolved and positions the event
    /// cursor at the current head.
    pub async fn seed(&mut self) -> Result<usize, ContractError> {
        let head = self.contract.latest_block_number().await?;
        let mut installed = 0;
        for resolved in self.contract.resolved_rounds().await? {
            if self
                .service
                .install_controller(resolved.round, resolved.express_lane_controller)
                .await
                == InstallOutcome::Installed
            {
                installed += 1;
            }
        }
        // Re-read the head block on the first poll; duplicates are no-ops.
        self.next_block = Some(head);
        Ok(installed)
    }

    /// Processes events up to the current head. Returns the number of newly installed
    /// controllers.
    pub async fn advance_once(&mut self) -> Result<usize, ContractError> {
        if self.next_block.is_none() {
            return self.seed().await;
        }

        self.service.expire_stale_rounds();
        let head = self.contract.latest_block_number().await?;
        let from = self.next_block.unwrap_or(head);
        if head < from {
            return Ok(0);
        }

        let events = self.contract.auction_resolved_events(from, head).await?;
        let mut installed = 0;
        for event in events {
            let outcome = self
                .service
                .install_controller(event.round, event.express_lane_controller)
                .await;
            if outcome == InstallOutcome::Installed {
                installed += 1;
            }
        }
        self.next_block = Some(head.saturating_add(1));
        Ok(installed)
    }

    pub fn spawn(self) -> (JoinHandle<()>, WatcherStop) {
        let stop = self.stop.clone();
        let handle = tokio::spawn(async move {
            let mut watcher = self;
            info!("resolution watcher started");
            while !watcher.stop.is_shutdown_requested() {
                if let Err(err) = watcher.advance_once().await {
                    warn!(error = %err, "resolution watcher advance failed, will retry");
                }
                tokio::time::sleep(watcher.config.poll_interval).await;
            }
        });
        (handle, stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction_contract::{AuctionResolution, InMemoryAuctionContract};
    use crate::clock::SystemClock;
    use crate::express_lane::ExpressLaneConfig;
    use crate::sequencing_lane::{SequencedReceipt, SequencerError, TransactionPublisher};
    use alloy_primitives::{Address, Bytes, U256};
    use async_trait::async_trait;
    use std::time::{SystemTime, UNIX_EPOCH};
    use timeboost_core::RoundTimingInfo;

    struct NoopPublisher;

    #[async_trait]
    impl TransactionPublisher for NoopPublisher {
        async fn publish_transaction(
            &self,
            _raw: Bytes,
            _timeboosted: bool,
        ) -> Result<SequencedReceipt, SequencerError> {
            Err(SequencerError::internal("not used"))
        }
    }

    fn timing() -> RoundTimingInfo {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        RoundTimingInfo::from_seconds(now.saturating_sub(10), 3_600, 60, 60)
    }

    fn resolution(round: u64, controller: u8) -> AuctionResolution {
        AuctionResolution {
            round,
            winner: Address::repeat_byte(controller),
            express_lane_controller: Address::repeat_byte(controller),
            price: U256::from(1),
            tx_hash: None,
        }
    }

    #[tokio::test]
    async fn watcher_installs_seeded_and_new_resolutions() {
        let timing = timing();
        let contract = Arc::new(InMemoryAuctionContract::new(timing, U256::from(1)));
        let service = Arc::new(ExpressLaneService::new(
            ExpressLaneConfig {
                chain_id: 1,
                auction_contract_address: Address::repeat_byte(0x42),
                advantage: Duration::ZERO,
            },
            timing,
            Arc::new(NoopPublisher),
            Arc::new(SystemClock),
        ));
        contract.record_resolution(resolution(0, 1));

        let mut watcher = ResolutionWatcher::new(
            ResolutionWatcherConfig {
                poll_interval: Duration::from_millis(5),
            },
            contract.clone(),
            service.clone(),
        );
        assert_eq!(watcher.advance_once().await.expect("seed"), 1);
        assert_eq!(service.controller_for(0), Some(Address::repeat_byte(1)));

        contract.record_resolution(resolution(1, 2));
        assert_eq!(watcher.advance_once().await.expect("advance"), 1);
        assert_eq!(service.controller_for(1), Some(Address::repeat_byte(2)));
        assert_eq!(watcher.advance_once().await.expect("idle advance"), 0);
    }
}
