// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use alloy_primitives::{Address, B256, U256, keccak256};
use async_trait::async_trait;
use timeboost_core::{Bid, RoundTimingInfo};

use super::{
    AuctionContract, AuctionResolution, AuctionResolvedEvent, ContractError, ResolvedRound,
};

/// In-process auction contract.
///
/// Mirrors the rules the deployed contract enforces: a round resolves at most once, the
/// winner pays the runner-up amount (or the reserve price for a single bid) out of its
/// deposit, and every resolution emits an `AuctionResolved` event in a new block.
pub struct InMemoryAuctionContract {
    state: Mutex<State>,
}

struct State {
    timing: RoundTimingInfo,
    reserve_price: U256,
    balances: HashMap<Address, U256>,
    resolutions: BTreeMap<u64, AuctionResolution>,
    events: Vec<AuctionResolvedEvent>,
    block_number: u64,
    resolve_calls: u64,
    failures_to_inject: u32,
}

impl InMemoryAuctionContract {
    pub fn new(timing: RoundTimingInfo, reserve_price: U256) -> Self {
        Self {
            state: Mutex::new(State {
                timing,
                reserve_price,
                balances: HashMap::new(),
                resolutions: BTreeMap::new(),
                events: Vec::new(),
                block_number: 0,
                resolve_calls: 0,
                failures_to_inject: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_reserve_price(&self, reserve_price: U256) {
        self.lock().reserve_price = reserve_price;
    }

    pub fn set_balance(&self, account: Address, balance: U256) {
        self.lock().balances.insert(account, balance);
    }

    /// Makes the next `count` resolution attempts fail with a transport error.
    pub fn fail_next_resolutions(&self, count: u32) {
        self.lock().failures_to_inject = count;
    }

    /// Number of `resolve_auction` calls received, failed ones included.
    pub fn resolve_calls(&self) -> u64 {
        self.lock().resolve_calls
    }

    /// Records a resolution as if another auctioneer had already submitted it.
    pub fn record_resolution(&self, resolution: AuctionResolution) {
        let mut state = self.lock();
        emit_resolution(&mut state, resolution, false, U256::ZERO);
    }
}

fn emit_resolution(
    state: &mut State,
    resolution: AuctionResolution,
    is_multi_bid_auction: bool,
    first_price_amount: U256,
) -> AuctionResolution {
    state.block_number = state.block_number.saturating_add(1);
    let tx_hash = keccak256(
        [
            resolution.round.to_be_bytes().as_slice(),
            state.block_number.to_be_bytes().as_slice(),
        ]
        .concat(),
    );
    let resolution = AuctionResolution {
        tx_hash: Some(tx_hash),
        ..resolution
    };
    state.events.push(AuctionResolvedEvent {
        round: resolution.round,
        is_multi_bid_auction,
        first_price_bidder: resolution.winner,
        express_lane_controller: resolution.express_lane_controller,
        first_price_amount,
        price: resolution.price,
        block_number: state.block_number,
        tx_hash: Some(tx_hash),
    });
    state
        .resolutions
        .insert(resolution.round, resolution.clone());
    resolution
}

#[async_trait]
impl AuctionContract for InMemoryAuctionContract {
    async fn round_timing_info(&self) -> Result<RoundTimingInfo, ContractError> {
        Ok(self.lock().timing)
    }

    async fn reserve_price(&self) -> Result<U256, ContractError> {
        Ok(self.lock().reserve_price)
    }

    async fn deposit_balance(&self, bidder: Address) -> Result<U256, ContractError> {
        Ok(self
            .lock()
            .balances
            .get(&bidder)
            .copied()
            .unwrap_or_default())
    }

    async fn resolution(&self, round: u64) -> Result<Option<AuctionResolution>, ContractError> {
        Ok(self.lock().resolutions.get(&round).cloned())
    }

    async fn resolved_rounds(&self) -> Result<Vec<ResolvedRound>, ContractError> {
        Ok(self
            .lock()
            .resolutions
            .values()
            .rev()
            .take(2)
            .map(|value| ResolvedRound {
                round: value.round,
                express_lane_controller: value.express_lane_controller,
            })
            .collect())
    }

    async fn resolve_auction(
        &self,
        first: &Bid,
        second: Option<&Bid>,
    ) -> Result<AuctionResolution, ContractError> {
        let mut state = self.lock();
        state.resolve_calls = state.resolve_calls.saturating_add(1);
        if state.failures_to_inject > 0 {
            state.failures_to_inject -= 1;
            return Err(ContractError::Transport("injected failure".to_string()));
        }

        let round = first.round;
        if state.resolutions.contains_key(&round) {
            return Err(ContractError::Reverted(format!(
                "round {round} already resolved"
            )));
        }
        let winner = first
            .recover_signer()
            .map_err(|err| ContractError::Reverted(err.to_string()))?;
        if let Some(second) = second {
            if second.round != round {
                return Err(ContractError::Reverted(format!(
                    "bids target rounds {round} and {}",
                    second.round
                )));
            }
            if second.amount > first.amount {
                return Err(ContractError::Reverted(
                    "second price bid exceeds first".to_string(),
                ));
            }
        }

        let price = second.map_or(state.reserve_price, |value| value.amount);
        let balance = state.balances.get(&winner).copied().unwrap_or_default();
        if balance < price {
            return Err(ContractError::Reverted(format!(
                "winner balance {balance} below price {price}"
            )));
        }
        state.balances.insert(winner, balance - price);

        Ok(emit_resolution(
            &mut state,
            AuctionResolution {
                round,
                winner,
                express_lane_controller: first.express_lane_controller,
                price,
                tx_hash: None,
            },
            second.is_some(),
            first.amount,
        ))
    }

    async fn deposit(&self, depositor: Address, amount: U256) -> Result<B256, ContractError> {
        let mut state = self.lock();
        let balance = state.balances.entry(depositor).or_default();
        *balance = balance.saturating_add(amount);
        state.block_number = state.block_number.saturating_add(1);
        Ok(keccak256(
            [depositor.as_slice(), &state.block_number.to_be_bytes()].concat(),
        ))
    }

    async fn latest_block_number(&self) -> Result<u64, ContractError> {
        Ok(self.lock().block_number)
    }

    async fn auction_resolved_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<AuctionResolvedEvent>, ContractError> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|event| event.block_number >= from_block && event.block_number <= to_block)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use k256::ecdsa::SigningKey;
    use timeboost_core::signing::address_of;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes((&[seed; 32]).into()).expect("key")
    }

    fn signed_bid(seed: u8, round: u64, amount: u64) -> Bid {
        let key = key(seed);
        let bidder = address_of(&key);
        Bid {
            bidder,
            chain_id: 1,
            auction_contract_address: Address::repeat_byte(0xaa),
            express_lane_controller: bidder,
            round,
            amount: U256::from(amount),
            signature: Bytes::new(),
        }
        .sign(&key)
        .expect("sign bid")
    }

    fn contract() -> InMemoryAuctionContract {
        InMemoryAuctionContract::new(RoundTimingInfo::from_seconds(0, 60, 15, 15), U256::from(1))
    }

    #[tokio::test]
    async fn winner_pays_second_price_once() {
        let contract = contract();
        let first = signed_bid(1, 3, 10);
        let second = signed_bid(2, 3, 7);
        contract.set_balance(first.bidder, U256::from(100));

        let resolution = contract
            .resolve_auction(&first, Some(&second))
            .await
            .expect("resolve");
        assert_eq!(resolution.winner, first.bidder);
        assert_eq!(resolution.price, U256::from(7));
        assert_eq!(
            contract.deposit_balance(first.bidder).await.expect("balance"),
            U256::from(93)
        );

        let again = contract.resolve_auction(&first, Some(&second)).await;
        assert!(matches!(again, Err(ContractError::Reverted(_))));
        assert_eq!(contract.resolve_calls(), 2);

        let events = contract
            .auction_resolved_events(0, contract.latest_block_number().await.expect("block"))
            .await
            .expect("events");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_multi_bid_auction);
    }

    #[tokio::test]
    async fn single_bid_pays_reserve_and_injected_failures_are_counted() {
        let contract = contract();
        let only = signed_bid(3, 5, 10);
        contract.set_balance(only.bidder, U256::from(10));
        contract.fail_next_resolutions(1);

        assert!(matches!(
            contract.resolve_auction(&only, None).await,
            Err(ContractError::Transport(_))
        ));
        let resolution = contract.resolve_auction(&only, None).await.expect("resolve");
        assert_eq!(resolution.price, U256::from(1));
        assert_eq!(
            contract.resolved_rounds().await.expect("rounds"),
            vec![ResolvedRound {
                round: 5,
                express_lane_controller: only.bidder
            }]
        );
    }
}
