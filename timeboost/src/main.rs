// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, U256};
use clap::{Parser, Subcommand};
use timeboost_core::RoundTimingInfo;
use tracing_subscriber::EnvFilter;

use timeboost::api::{BidApiState, SequencerApiState};
use timeboost::auction_contract::{AuctionContract, RpcAuctionContract, RpcAuctionContractConfig};
use timeboost::auctioneer::{Auctioneer, AuctioneerConfig};
use timeboost::bid_queue::{BidQueue, SharedBidQueue};
use timeboost::bid_validator::{BidValidator, BidValidatorConfig};
use timeboost::block_metadata::{
    BlockMetadataApi, BlockMetadataApiConfig, BlockMetadataRebuilder, BlockMetadataRebuilderConfig,
    reorg_sequencer,
};
use timeboost::clock::{Clock, SystemClock};
use timeboost::express_lane::{
    ExpressLaneConfig, ExpressLaneService, ResolutionWatcher, ResolutionWatcherConfig,
};
use timeboost::sequencing_lane::{
    SequencerHandle, SequencingLane, SequencingLaneConfig, SequencingLaneError,
};
use timeboost::storage::{FIRST_BLOCK_NUMBER, Storage};

const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_BID_HTTP_ADDR: &str = "127.0.0.1:3001";
const DEFAULT_DB_PATH: &str = "timeboost.db";
const DEFAULT_BID_QUEUE_PATH: &str = "timeboost-bids.db";
const DEFAULT_BID_QUEUE_CAPACITY: usize = 10_000;
const DEFAULT_QUEUE_CAP: usize = 1024;
const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 100;
const DEFAULT_CHAIN_ID: u64 = 412_346;
const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
const DEFAULT_ADVANTAGE_MS: u64 = 200;
const DEFAULT_WATCHER_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_EVENT_LOOKBACK_BLOCKS: u64 = 10_000;
const DEFAULT_AUCTIONEER_MAX_ATTEMPTS: usize = 5;
const DEFAULT_AUCTIONEER_INITIAL_BACKOFF_MS: u64 = 250;
const DEFAULT_AUCTIONEER_MAX_BACKOFF_MS: u64 = 4000;
const DEFAULT_BLOCKS_LIMIT: u64 = 100;
const DEFAULT_BLOCK_METADATA_CACHE_SIZE: usize = 10_000;
const DEFAULT_REBUILDER_SYNC_INTERVAL_MS: u64 = 60_000;
const DEFAULT_REBUILDER_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_TXS_PER_BLOCK: usize = 64;
const DEFAULT_LANE_IDLE_POLL_INTERVAL: Duration = Duration::from_millis(2);
const DEFAULT_MAX_BODY_BYTES: usize = 128 * 1024;
const DEFAULT_SQLITE_SYNCHRONOUS: &str = "NORMAL";

#[derive(Debug, Parser)]
#[command(name = "timeboost", about = "Express-lane timeboost services")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Role {
    /// Express lane arbitration in front of the sequencing lane.
    Sequencer,
    /// Accepts bids over HTTP and queues the valid ones.
    BidValidator,
    /// Resolves each round's auction on chain.
    Auctioneer,
}

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    match cli.role {
        Role::Sequencer => run_sequencer(config).await,
        Role::BidValidator => run_bid_validator(config).await,
        Role::Auctioneer => run_auctioneer(config).await,
    }
}

async fn run_sequencer(config: Config) -> Result<(), BoxError> {
    let contract: Arc<dyn AuctionContract> =
        Arc::new(RpcAuctionContract::connect(config.contract_config(), None)?);
    let timing = load_timing(contract.as_ref()).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let lane_storage = Storage::open(&config.db_path, &config.sqlite_synchronous)?;
    let (tx, rx) = tokio::sync::mpsc::channel(config.queue_capacity);
    let lane = SequencingLane::new(
        rx,
        lane_storage,
        SequencingLaneConfig {
            chain_id: config.chain_id,
            max_txs_per_block: config.max_txs_per_block,
            idle_poll_interval: DEFAULT_LANE_IDLE_POLL_INTERVAL,
            track_block_metadata_from: config.track_block_metadata_from,
        },
    );
    let (mut lane_handle, lane_stop) = lane.spawn();
    let sequencer = SequencerHandle::new(tx, Duration::from_millis(config.queue_timeout_ms));
    let publisher = Arc::new(sequencer.clone());

    let express_lane = Arc::new(ExpressLaneService::new(
        ExpressLaneConfig {
            chain_id: config.chain_id,
            auction_contract_address: config.auction_contract_address,
            advantage: config.advantage,
        },
        timing,
        publisher,
        Arc::clone(&clock),
    ));

    let mut watcher = ResolutionWatcher::new(
        ResolutionWatcherConfig {
            poll_interval: config.watcher_poll_interval,
        },
        Arc::clone(&contract),
        Arc::clone(&express_lane),
    );
    let seeded = watcher.seed().await?;
    tracing::info!(seeded, "express lane controllers seeded");
    let (_watcher_handle, watcher_stop) = watcher.spawn();

    let rebuilder_stop = if let Some(source_url) = config.rebuilder_source_url.clone() {
        let rebuilder = BlockMetadataRebuilder::new(
            BlockMetadataRebuilderConfig {
                source_url,
                sync_interval: config.rebuilder_sync_interval,
                api_blocks_limit: config.blocks_limit,
                request_timeout: Duration::from_millis(DEFAULT_REBUILDER_REQUEST_TIMEOUT_MS),
            },
            Storage::open(&config.db_path, &config.sqlite_synchronous)?,
        )?;
        let (_rebuilder_thread, stop) = rebuilder.run_blocking();
        Some(stop)
    } else {
        None
    };

    let block_metadata = Arc::new(BlockMetadataApi::new(
        BlockMetadataApiConfig {
            blocks_limit: config.blocks_limit,
            cache_size: config.block_metadata_cache_size,
        },
        Storage::open(&config.db_path, &config.sqlite_synchronous)?,
    ));
    if let Some(block_number) = config.reorg_to_block {
        let dropped = reorg_sequencer(&sequencer, &block_metadata, block_number).await?;
        tracing::warn!(block_number, dropped, "rolled back sequenced chain at startup");
    }
    let reader = Arc::new(Mutex::new(Storage::open(
        &config.db_path,
        &config.sqlite_synchronous,
    )?));

    let state = Arc::new(SequencerApiState {
        express_lane,
        block_metadata,
        reader,
    });
    let app = timeboost::api::sequencer_router(state, config.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;

    tracing::info!(
        address = %config.http_addr,
        round_duration = ?timing.round_duration,
        advantage = ?config.advantage,
        "sequencer listening"
    );
    tokio::select! {
        server_result = axum::serve(listener, app) => {
            watcher_stop.request_shutdown();
            if let Some(stop) = &rebuilder_stop {
                stop.request_shutdown();
            }
            lane_stop.request_shutdown();
            match lane_handle.await {
                Ok(SequencingLaneError::ShutdownRequested) => {}
                Ok(err) => return Err(format!("sequencing lane exited during shutdown: {err}").into()),
                Err(join_err) => {
                    return Err(format!("sequencing lane join error during shutdown: {join_err}").into())
                }
            }
            server_result?;
        }
        lane_result = &mut lane_handle => {
            watcher_stop.request_shutdown();
            if let Some(stop) = &rebuilder_stop {
                stop.request_shutdown();
            }
            match lane_result {
                Ok(err) => return Err(format!("sequencing lane exited: {err}").into()),
                Err(join_err) => return Err(format!("sequencing lane join error: {join_err}").into()),
            }
        }
    }

    Ok(())
}

async fn run_bid_validator(config: Config) -> Result<(), BoxError> {
    let contract: Arc<dyn AuctionContract> =
        Arc::new(RpcAuctionContract::connect(config.contract_config(), None)?);
    let timing = load_timing(contract.as_ref()).await?;
    let queue = SharedBidQueue::new(BidQueue::open(
        &config.bid_queue_path,
        config.bid_queue_capacity,
    )?);

    let validator = Arc::new(BidValidator::new(
        BidValidatorConfig {
            chain_id: config.chain_id,
            auction_contract_address: config.auction_contract_address,
            min_reserve_price: config.min_reserve_price,
        },
        timing,
        contract,
        queue,
        Arc::new(SystemClock),
    ));
    let app = timeboost::api::bid_router(Arc::new(BidApiState { validator }), config.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(&config.bid_http_addr).await?;

    tracing::info!(address = %config.bid_http_addr, "bid validator listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_auctioneer(config: Config) -> Result<(), BoxError> {
    let key = config
        .auctioneer_private_key
        .as_deref()
        .ok_or("TIMEBOOST_AUCTIONEER_PRIVATE_KEY is required")?;
    let signer: PrivateKeySigner = key
        .parse()
        .map_err(|err| format!("invalid auctioneer private key: {err}"))?;
    let contract: Arc<dyn AuctionContract> = Arc::new(RpcAuctionContract::connect(
        config.contract_config(),
        Some(signer),
    )?);
    let timing = load_timing(contract.as_ref()).await?;
    let queue = SharedBidQueue::new(BidQueue::open(
        &config.bid_queue_path,
        config.bid_queue_capacity,
    )?);
    // Bids left by a previous run are redelivered to the first resolution.
    tracing::info!(queued = queue.depth().await?, "bid queue opened");

    let auctioneer = Auctioneer::new(
        AuctioneerConfig {
            max_attempts: config.auctioneer_max_attempts,
            initial_backoff: config.auctioneer_initial_backoff,
            max_backoff: config.auctioneer_max_backoff,
        },
        timing,
        contract,
        queue,
        Arc::new(SystemClock),
    );
    let (handle, stop) = auctioneer.spawn();
    tracing::info!(
        max_attempts = config.auctioneer_max_attempts,
        "auctioneer started"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            stop.request_shutdown();
            tracing::info!("auctioneer shutting down");
        }
        join_result = handle => {
            join_result.map_err(|err| format!("auctioneer join error: {err}"))?;
        }
    }
    Ok(())
}

async fn load_timing(contract: &dyn AuctionContract) -> Result<RoundTimingInfo, BoxError> {
    let timing = contract.round_timing_info().await?;
    timing.validate()?;
    Ok(timing)
}

struct Config {
    http_addr: String,
    bid_http_addr: String,
    db_path: String,
    sqlite_synchronous: String,
    bid_queue_path: String,
    bid_queue_capacity: usize,
    queue_capacity: usize,
    queue_timeout_ms: u64,
    chain_id: u64,
    rpc_url: String,
    auction_contract_address: Address,
    event_lookback_blocks: u64,
    advantage: Duration,
    watcher_poll_interval: Duration,
    min_reserve_price: U256,
    auctioneer_private_key: Option<String>,
    auctioneer_max_attempts: usize,
    auctioneer_initial_backoff: Duration,
    auctioneer_max_backoff: Duration,
    blocks_limit: u64,
    block_metadata_cache_size: usize,
    rebuilder_source_url: Option<String>,
    rebuilder_sync_interval: Duration,
    track_block_metadata_from: u64,
    reorg_to_block: Option<u64>,
    max_txs_per_block: usize,
    max_body_bytes: usize,
}

impl Config {
    fn from_env() -> Result<Self, String> {
        let auction_contract_address = std::env::var("TIMEBOOST_AUCTION_CONTRACT_ADDRESS")
            .map_err(|_| "TIMEBOOST_AUCTION_CONTRACT_ADDRESS is required".to_string())
            .and_then(|value| parse_address(&value))?;
        let min_reserve_price = match std::env::var("TIMEBOOST_MIN_RESERVE_PRICE") {
            Ok(value) => value
                .parse::<U256>()
                .map_err(|err| format!("invalid TIMEBOOST_MIN_RESERVE_PRICE: {err}"))?,
            Err(_) => U256::ZERO,
        };
        let reorg_to_block = match std::env::var("TIMEBOOST_REORG_TO_BLOCK") {
            Ok(value) => Some(
                value
                    .parse::<u64>()
                    .map_err(|err| format!("invalid TIMEBOOST_REORG_TO_BLOCK: {err}"))?,
            ),
            Err(_) => None,
        };
        Ok(Self {
            http_addr: env_string("TIMEBOOST_HTTP_ADDR", DEFAULT_HTTP_ADDR),
            bid_http_addr: env_string("TIMEBOOST_BID_HTTP_ADDR", DEFAULT_BID_HTTP_ADDR),
            db_path: env_string("TIMEBOOST_DB_PATH", DEFAULT_DB_PATH),
            sqlite_synchronous: env_string(
                "TIMEBOOST_SQLITE_SYNCHRONOUS",
                DEFAULT_SQLITE_SYNCHRONOUS,
            ),
            bid_queue_path: env_string("TIMEBOOST_BID_QUEUE_PATH", DEFAULT_BID_QUEUE_PATH),
            bid_queue_capacity: env_usize(
                "TIMEBOOST_BID_QUEUE_CAPACITY",
                DEFAULT_BID_QUEUE_CAPACITY,
            )
            .max(1),
            queue_capacity: env_usize("TIMEBOOST_QUEUE_CAP", DEFAULT_QUEUE_CAP).max(1),
            queue_timeout_ms: env_u64("TIMEBOOST_QUEUE_TIMEOUT_MS", DEFAULT_QUEUE_TIMEOUT_MS),
            chain_id: env_u64("TIMEBOOST_CHAIN_ID", DEFAULT_CHAIN_ID),
            rpc_url: env_string("TIMEBOOST_RPC_URL", DEFAULT_RPC_URL),
            auction_contract_address,
            event_lookback_blocks: env_u64(
                "TIMEBOOST_EVENT_LOOKBACK_BLOCKS",
                DEFAULT_EVENT_LOOKBACK_BLOCKS,
            ),
            advantage: Duration::from_millis(env_u64(
                "TIMEBOOST_EXPRESS_LANE_ADVANTAGE_MS",
                DEFAULT_ADVANTAGE_MS,
            )),
            watcher_poll_interval: Duration::from_millis(
                env_u64(
                    "TIMEBOOST_WATCHER_POLL_INTERVAL_MS",
                    DEFAULT_WATCHER_POLL_INTERVAL_MS,
                )
                .max(1),
            ),
            min_reserve_price,
            auctioneer_private_key: std::env::var("TIMEBOOST_AUCTIONEER_PRIVATE_KEY").ok(),
            auctioneer_max_attempts: env_usize(
                "TIMEBOOST_AUCTIONEER_MAX_ATTEMPTS",
                DEFAULT_AUCTIONEER_MAX_ATTEMPTS,
            )
            .max(1),
            auctioneer_initial_backoff: Duration::from_millis(env_u64(
                "TIMEBOOST_AUCTIONEER_INITIAL_BACKOFF_MS",
                DEFAULT_AUCTIONEER_INITIAL_BACKOFF_MS,
            )),
            auctioneer_max_backoff: Duration::from_millis(env_u64(
                "TIMEBOOST_AUCTIONEER_MAX_BACKOFF_MS",
                DEFAULT_AUCTIONEER_MAX_BACKOFF_MS,
            )),
            blocks_limit: env_u64("TIMEBOOST_BLOCK_METADATA_BLOCKS_LIMIT", DEFAULT_BLOCKS_LIMIT),
            block_metadata_cache_size: env_usize(
                "TIMEBOOST_BLOCK_METADATA_CACHE_SIZE",
                DEFAULT_BLOCK_METADATA_CACHE_SIZE,
            ),
            rebuilder_source_url: std::env::var("TIMEBOOST_BLOCK_METADATA_SOURCE_URL").ok(),
            rebuilder_sync_interval: Duration::from_millis(
                env_u64(
                    "TIMEBOOST_BLOCK_METADATA_SYNC_INTERVAL_MS",
                    DEFAULT_REBUILDER_SYNC_INTERVAL_MS,
                )
                .max(1),
            ),
            track_block_metadata_from: env_u64(
                "TIMEBOOST_TRACK_BLOCK_METADATA_FROM",
                FIRST_BLOCK_NUMBER,
            ),
            reorg_to_block,
            max_txs_per_block: env_usize(
                "TIMEBOOST_MAX_TXS_PER_BLOCK",
                DEFAULT_MAX_TXS_PER_BLOCK,
            )
            .max(1),
            max_body_bytes: env_usize("TIMEBOOST_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
        })
    }

    fn contract_config(&self) -> RpcAuctionContractConfig {
        RpcAuctionContractConfig {
            rpc_url: self.rpc_url.clone(),
            contract_address: self.auction_contract_address,
            event_lookback_blocks: self.event_lookback_blocks,
            long_block_range_error_codes: vec!["rate limit".into(), "too many".into()],
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_address(value: &str) -> Result<Address, String> {
    if !value.starts_with("0x") {
        return Err("address must be 0x-prefixed hex".to_string());
    }
    value
        .parse()
        .map_err(|err| format!("invalid address: {err}"))
}
