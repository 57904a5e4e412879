// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::Duration;

use alloy::network::{EthereumWallet, ReceiptResponse};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionReceipt};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolEvent;
use async_recursion::async_recursion;
use async_trait::async_trait;
use timeboost_core::{Bid, RoundTimingInfo};
use tracing::{debug, warn};

use super::{
    AuctionContract, AuctionResolution, AuctionResolvedEvent, ContractError, ResolvedRound,
};

sol! {
    #[sol(rpc)]
    interface IExpressLaneAuction {
        struct Bid {
            address expressLaneController;
            uint256 amount;
            bytes signature;
        }

        struct ELCRound {
            address expressLaneController;
            uint64 round;
        }

        event AuctionResolved(
            bool indexed isMultiBidAuction,
            uint64 round,
            address indexed firstPriceBidder,
            address indexed firstPriceExpressLaneController,
            uint256 firstPriceAmount,
            uint256 price,
            uint64 roundStartTimestamp,
            uint64 roundEndTimestamp
        );

        function roundTimingInfo()
            external
            view
            returns (
                int64 offsetTimestamp,
                uint64 roundDurationSeconds,
                uint64 auctionClosingSeconds,
                uint64 reserveSubmissionSeconds
            );
        function reservePrice() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function biddingToken() external view returns (address);
        function resolvedRounds() external view returns (ELCRound memory first, ELCRound memory second);
        function resolveSingleBidAuction(Bid calldata firstPriceBid) external;
        function resolveMultiBidAuction(Bid calldata firstPriceBid, Bid calldata secondPriceBid) external;
        function deposit(uint256 amount) external;
    }

    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

#[derive(Debug, Clone)]
pub struct RpcAuctionContractConfig {
    pub rpc_url: String,
    pub contract_address: Address,
    /// How far back `resolution` searches for the `AuctionResolved` event of a round.
    pub event_lookback_blocks: u64,
    /// RPC error substrings that make log queries retry on two half ranges.
    pub long_block_range_error_codes: Vec<String>,
}

pub struct RpcAuctionContract {
    provider: DynProvider,
    contract: IExpressLaneAuction::IExpressLaneAuctionInstance<DynProvider>,
    wallet_address: Option<Address>,
    config: RpcAuctionContractConfig,
}

impl RpcAuctionContract {
    /// Connects over HTTP. Without `signer` the adapter is read-only and every write returns
    /// [`ContractError::MissingWallet`].
    pub fn connect(
        config: RpcAuctionContractConfig,
        signer: Option<PrivateKeySigner>,
    ) -> Result<Self, ContractError> {
        let url = config
            .rpc_url
            .parse()
            .map_err(|err| ContractError::Transport(format!("invalid rpc url: {err}")))?;
        let wallet_address = signer.as_ref().map(|value| value.address());
        let provider = match signer {
            Some(signer) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect_http(url)
                .erased(),
            None => ProviderBuilder::new().connect_http(url).erased(),
        };
        let contract = IExpressLaneAuction::new(config.contract_address, provider.clone());
        Ok(Self {
            provider,
            contract,
            wallet_address,
            config,
        })
    }

    fn require_wallet(&self) -> Result<Address, ContractError> {
        self.wallet_address.ok_or(ContractError::MissingWallet)
    }

    async fn send_and_confirm(
        &self,
        pending: Result<
            alloy::providers::PendingTransactionBuilder<alloy::network::Ethereum>,
            alloy::contract::Error,
        >,
    ) -> Result<TransactionReceipt, ContractError> {
        let receipt = pending?
            .with_timeout(Some(Duration::from_secs(60)))
            .get_receipt()
            .await
            .map_err(|err| ContractError::Transport(err.to_string()))?;
        if !receipt.status() {
            return Err(ContractError::Reverted(format!(
                "transaction {} failed",
                receipt.transaction_hash()
            )));
        }
        Ok(receipt)
    }
}

/// Reads `AuctionResolved` logs in `[start_block, end_block]`, splitting the range in half
/// whenever the node rejects it with one of `long_block_range_error_codes`.
#[async_recursion]
async fn get_auction_resolved_logs(
    provider: &DynProvider,
    contract_address: Address,
    start_block: u64,
    end_block: u64,
    long_block_range_error_codes: &[String],
) -> Result<Vec<Log>, Vec<String>> {
    let filter = Filter::new()
        .address(contract_address)
        .event_signature(IExpressLaneAuction::AuctionResolved::SIGNATURE_HASH)
        .from_block(start_block)
        .to_block(end_block);

    match provider.get_logs(&filter).await {
        Ok(logs) => Ok(logs),
        Err(err) => {
            let message = err.to_string();
            if start_block >= end_block
                || !error_message_matches_retry_codes(&message, long_block_range_error_codes)
            {
                return Err(vec![message]);
            }

            let middle = start_block + (end_block - start_block) / 2;
            let first = get_auction_resolved_logs(
                provider,
                contract_address,
                start_block,
                middle,
                long_block_range_error_codes,
            )
            .await;
            let second = get_auction_resolved_logs(
                provider,
                contract_address,
                middle + 1,
                end_block,
                long_block_range_error_codes,
            )
            .await;

            match (first, second) {
                (Ok(mut a), Ok(b)) => {
                    a.extend(b);
                    Ok(a)
                }
                (Err(mut a), Err(b)) => {
                    a.extend(b);
                    Err(a)
                }
                (Err(e), _) | (_, Err(e)) => Err(e),
            }
        }
    }
}

pub(crate) fn error_message_matches_retry_codes(error_message: &str, codes: &[String]) -> bool {
    codes.iter().any(|code| error_message.contains(code))
}

fn to_contract_bid(bid: &Bid) -> IExpressLaneAuction::Bid {
    IExpressLaneAuction::Bid {
        expressLaneController: bid.express_lane_controller,
        amount: bid.amount,
        signature: bid.signature.clone(),
    }
}

fn decode_auction_resolved(log: &Log) -> Option<AuctionResolvedEvent> {
    let decoded = IExpressLaneAuction::AuctionResolved::decode_log(&log.inner).ok()?;
    let event = decoded.data;
    Some(AuctionResolvedEvent {
        round: event.round,
        is_multi_bid_auction: event.isMultiBidAuction,
        first_price_bidder: event.firstPriceBidder,
        express_lane_controller: event.firstPriceExpressLaneController,
        first_price_amount: event.firstPriceAmount,
        price: event.price,
        block_number: log.block_number.unwrap_or_default(),
        tx_hash: log.transaction_hash,
    })
}

#[async_trait]
impl AuctionContract for RpcAuctionContract {
    async fn round_timing_info(&self) -> Result<RoundTimingInfo, ContractError> {
        let info = self.contract.roundTimingInfo().call().await?;
        let offset = u64::try_from(info.offsetTimestamp).map_err(|_| {
            ContractError::Transport(format!(
                "negative round offset {}",
                info.offsetTimestamp
            ))
        })?;
        let timing = RoundTimingInfo::from_seconds(
            offset,
            info.roundDurationSeconds,
            info.auctionClosingSeconds,
            info.reserveSubmissionSeconds,
        );
        timing.validate()?;
        Ok(timing)
    }

    async fn reserve_price(&self) -> Result<U256, ContractError> {
        Ok(self.contract.reservePrice().call().await?)
    }

    async fn deposit_balance(&self, bidder: Address) -> Result<U256, ContractError> {
        Ok(self.contract.balanceOf(bidder).call().await?)
    }

    async fn resolution(&self, round: u64) -> Result<Option<AuctionResolution>, ContractError> {
        let Some(resolved) = self
            .resolved_rounds()
            .await?
            .into_iter()
            .find(|value| value.round == round)
        else {
            return Ok(None);
        };

        let latest = self.latest_block_number().await?;
        let from = latest.saturating_sub(self.config.event_lookback_blocks);
        let events = self.auction_resolved_events(from, latest).await?;
        if let Some(event) = events.iter().rev().find(|event| event.round == round) {
            return Ok(Some(event.to_resolution()));
        }

        debug!(
            round,
            lookback = self.config.event_lookback_blocks,
            "resolution event outside lookback window"
        );
        Ok(Some(AuctionResolution {
            round,
            winner: resolved.express_lane_controller,
            express_lane_controller: resolved.express_lane_controller,
            price: U256::ZERO,
            tx_hash: None,
        }))
    }

    async fn resolved_rounds(&self) -> Result<Vec<ResolvedRound>, ContractError> {
        let rounds = self.contract.resolvedRounds().call().await?;
        let mut out: Vec<ResolvedRound> = [rounds.first, rounds.second]
            .into_iter()
            .filter(|value| value.expressLaneController != Address::ZERO)
            .map(|value| ResolvedRound {
                round: value.round,
                express_lane_controller: value.expressLaneController,
            })
            .collect();
        out.sort_by(|a, b| b.round.cmp(&a.round));
        Ok(out)
    }

    async fn resolve_auction(
        &self,
        first: &Bid,
        second: Option<&Bid>,
    ) -> Result<AuctionResolution, ContractError> {
        self.require_wallet()?;
        let first_bid = to_contract_bid(first);
        let pending = match second {
            Some(second) => {
                self.contract
                    .resolveMultiBidAuction(first_bid, to_contract_bid(second))
                    .send()
                    .await
            }
            None => self.contract.resolveSingleBidAuction(first_bid).send().await,
        };
        let receipt = self.send_and_confirm(pending).await?;

        let resolved = receipt
            .inner
            .logs()
            .iter()
            .filter_map(decode_auction_resolved)
            .find(|event| event.round == first.round);
        match resolved {
            Some(event) => Ok(event.to_resolution()),
            None => {
                warn!(
                    round = first.round,
                    tx_hash = %receipt.transaction_hash(),
                    "resolution receipt carries no AuctionResolved event"
                );
                Ok(AuctionResolution {
                    round: first.round,
                    winner: first.bidder,
                    express_lane_controller: first.express_lane_controller,
                    price: second.map_or(U256::ZERO, |value| value.amount),
                    tx_hash: Some(receipt.transaction_hash()),
                })
            }
        }
    }

    async fn deposit(&self, depositor: Address, amount: U256) -> Result<B256, ContractError> {
        let wallet = self.require_wallet()?;
        if wallet != depositor {
            return Err(ContractError::WalletMismatch {
                wallet,
                requested: depositor,
            });
        }

        let token = self.contract.biddingToken().call().await?;
        let erc20 = IERC20::new(token, self.provider.clone());
        let approve = erc20
            .approve(self.config.contract_address, amount)
            .send()
            .await;
        self.send_and_confirm(approve).await?;

        let deposit = self.contract.deposit(amount).send().await;
        let receipt = self.send_and_confirm(deposit).await?;
        Ok(receipt.transaction_hash())
    }

    async fn latest_block_number(&self) -> Result<u64, ContractError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|err| ContractError::Transport(err.to_string()))
    }

    async fn auction_resolved_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<AuctionResolvedEvent>, ContractError> {
        if from_block > to_block {
            return Ok(Vec::new());
        }
        get_auction_resolved_logs(
            &self.provider,
            self.config.contract_address,
            from_block,
            to_block,
            &self.config.long_block_range_error_codes,
        )
        .await
        .map(|logs| logs.iter().filter_map(decode_auction_resolved).collect())
        .map_err(|errors| {
            ContractError::Transport(
                errors
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, LogData};

    #[test]
    fn retry_codes_match_substrings() {
        let codes = vec!["-32005".to_string(), "query returned more than".to_string()];
        assert!(error_message_matches_retry_codes(
            "server returned an error response: error code -32005: limit exceeded",
            &codes
        ));
        assert!(!error_message_matches_retry_codes("connection refused", &codes));
        assert!(!error_message_matches_retry_codes("-32005", &[]));
    }

    #[test]
    fn auction_resolved_log_decodes_into_event() {
        let event = IExpressLaneAuction::AuctionResolved {
            isMultiBidAuction: true,
            round: 12,
            firstPriceBidder: Address::repeat_byte(1),
            firstPriceExpressLaneController: Address::repeat_byte(2),
            firstPriceAmount: U256::from(10),
            price: U256::from(7),
            roundStartTimestamp: 100,
            roundEndTimestamp: 160,
        };
        let data: LogData = event.encode_log_data();
        let log = Log {
            inner: alloy_primitives::Log {
                address: Address::repeat_byte(0xaa),
                data,
            },
            block_number: Some(44),
            ..Default::default()
        };

        let decoded = decode_auction_resolved(&log).expect("decodes");
        assert_eq!(decoded.round, 12);
        assert_eq!(decoded.express_lane_controller, Address::repeat_byte(2));
        assert_eq!(decoded.price, U256::from(7));
        assert_eq!(decoded.block_number, 44);
        assert!(decoded.is_multi_bid_auction);

        let bid = Bid {
            bidder: Address::repeat_byte(1),
            chain_id: 1,
            auction_contract_address: Address::repeat_byte(0xaa),
            express_lane_controller: Address::repeat_byte(2),
            round: 12,
            amount: U256::from(10),
            signature: Bytes::from_static(&[1, 2, 3]),
        };
        let converted = to_contract_bid(&bid);
        assert_eq!(converted.expressLaneController, Address::repeat_byte(2));
        assert_eq!(converted.signature, bid.signature);
    }
}
