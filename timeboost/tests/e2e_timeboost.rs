// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256, Bytes, TxKind, U256};
use futures_util::future::join_all;
use k256::ecdsa::SigningKey;
use serde::Deserialize;
use tempfile::TempDir;
use timeboost::api::{BidApiState, SequencerApiState, bid_router, sequencer_router};
use timeboost::auction_contract::{AuctionContract, InMemoryAuctionContract};
use timeboost::auctioneer::{Auctioneer, AuctioneerConfig};
use timeboost::bid_queue::{BidQueue, SharedBidQueue};
use timeboost::bid_validator::{BidValidator, BidValidatorConfig};
use timeboost::block_metadata::{
    BlockMetadataApi, BlockMetadataApiConfig, BlockMetadataRebuilder, BlockMetadataRebuilderConfig,
};
use timeboost::client::{
    BidderClient, BidderClientConfig, ClientError, ExpressLaneClient, ExpressLaneClientConfig,
};
use timeboost::clock::{Clock, ManualClock};
use timeboost::express_lane::{
    ExpressLaneConfig, ExpressLaneService, ResolutionWatcher, ResolutionWatcherConfig,
};
use timeboost::sequencing_lane::{
    SequencerHandle, SequencingLane, SequencingLaneConfig, SequencingLaneError,
    SequencingLaneStop, TransactionPublisher,
};
use timeboost::storage::Storage;
use timeboost_core::signing::address_of;
use timeboost_core::{BlockMetadata, ExpressLaneSubmission, RoundTimingInfo};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

const CHAIN_ID: u64 = 412_346;
const OFFSET: u64 = 1_700_000_000;
const ROUND_SECONDS: u64 = 60;
const ADVANTAGE: Duration = Duration::from_millis(300);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxResponse {
    ok: bool,
    block_number: u64,
    tx_index: u32,
    timeboosted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxLocationResponse {
    ok: bool,
    block_number: u64,
    timeboosted: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    ok: bool,
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataEntry {
    block_number: u64,
    raw_metadata: String,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    ok: bool,
    blocks: Vec<MetadataEntry>,
}

#[derive(Debug, Deserialize)]
struct BidResponse {
    duplicate: bool,
}

#[derive(Debug, Deserialize)]
struct RoundResponse {
    round: u64,
    controller: Option<Address>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_auction_winner_gets_express_lane() {
    let env = TestEnv::new("auction-flow");
    let Some(mut runtime) = start_runtime(&env).await else {
        return;
    };
    let alice = key(0xa1);
    let bob = key(0xb2);
    let carol = 0x33_u8;
    let dave = 0x66_u8;

    let bidder = BidderClient::connect(
        BidderClientConfig {
            validator_url: format!("http://{}", runtime.bid_addr),
            chain_id: CHAIN_ID,
            auction_contract_address: auction_address(),
        },
        alice.clone(),
        runtime.contract.clone() as Arc<dyn AuctionContract>,
        timing(),
        runtime.clock.clone() as Arc<dyn Clock>,
    )
    .await
    .expect("connect bidder");
    assert_eq!(bidder.balance().await, U256::ZERO);
    bidder.deposit(U256::from(100)).await.expect("deposit");
    assert_eq!(bidder.balance().await, U256::from(100));
    runtime.contract.set_balance(address_of(&bob), U256::from(100));

    let over = bidder.bid(U256::from(101), None).await;
    assert!(
        matches!(over, Err(ClientError::InsufficientBalance { .. })),
        "bid above the deposit must be refused locally: {over:?}"
    );
    let alice_bid = bidder.bid(U256::from(10), None).await.expect("alice bid");
    assert_eq!(alice_bid.round, 1);

    let bob_bid = timeboost_core::Bid {
        bidder: address_of(&bob),
        chain_id: CHAIN_ID,
        auction_contract_address: auction_address(),
        express_lane_controller: address_of(&bob),
        round: 1,
        amount: U256::from(7),
        signature: Bytes::new(),
    }
    .sign(&bob)
    .expect("sign bob bid");
    let (status, body) = send_request(
        runtime.bid_addr,
        "POST",
        "/bid",
        serde_json::to_string(&bob_bid).expect("encode bid"),
    )
    .await;
    assert_eq!(status, 200, "bob bid body={body}");

    // Bidding window closes 15s before the round ends.
    runtime.clock.set(at(50));
    let late = bidder.bid(U256::from(20), None).await;
    assert!(
        matches!(&late, Err(ClientError::Rejected { status: 409, code, .. }) if code == "BIDDING_CLOSED"),
        "late bid must be refused: {late:?}"
    );

    let resolution = runtime
        .auctioneer
        .resolve_round(1)
        .await
        .expect("resolve round 1");
    assert_eq!(resolution.winner, address_of(&alice));
    assert_eq!(resolution.express_lane_controller, address_of(&alice));
    assert_eq!(resolution.price, U256::from(7));
    assert_eq!(
        runtime.contract.deposit_balance(address_of(&alice)).await.expect("balance"),
        U256::from(93)
    );
    assert_eq!(bidder.balance().await, U256::from(100));
    assert_eq!(bidder.refresh_balance().await.expect("refresh"), U256::from(93));

    let installed = runtime.watcher.advance_once().await.expect("watch events");
    assert_eq!(installed, 1);

    runtime.clock.set(at(ROUND_SECONDS + 1));
    let (status, body) = send_request(runtime.seq_addr, "GET", "/express_lane/round", String::new()).await;
    assert_eq!(status, 200, "round body={body}");
    let round: RoundResponse = serde_json::from_str(&body).expect("parse round");
    assert_eq!(round.round, 1);
    assert_eq!(round.controller, Some(address_of(&alice)));

    let express = ExpressLaneClient::new(
        ExpressLaneClientConfig {
            sequencer_url: format!("http://{}", runtime.seq_addr),
            chain_id: CHAIN_ID,
            auction_contract_address: auction_address(),
        },
        alice.clone(),
        timing(),
        runtime.clock.clone() as Arc<dyn Clock>,
    );
    // A regular tx arriving together with the controller's txs is held back.
    let seq_addr = runtime.seq_addr;
    let regular_task = tokio::spawn(async move {
        let started = Instant::now();
        let response = send_request(
            seq_addr,
            "POST",
            "/tx",
            serde_json::json!({ "transaction": signed_tx(dave, 0) }).to_string(),
        )
        .await;
        (started.elapsed(), response)
    });

    let receipt = express
        .send_transaction(signed_tx(carol, 0))
        .await
        .expect("express lane tx");
    assert!(receipt.timeboosted);
    assert_eq!(receipt.block_number, 1);
    assert_eq!(receipt.tx_index, 0);

    let second = express
        .send_transaction(signed_tx(carol, 1))
        .await
        .expect("second express lane tx");
    assert_eq!(second.block_number, 2);

    let (elapsed, (status, body)) = regular_task.await.expect("join regular tx task");
    assert_eq!(status, 200, "regular tx body={body}");
    assert!(elapsed >= ADVANTAGE);
    let regular: TxResponse = serde_json::from_str(&body).expect("parse tx response");
    assert!(regular.ok);
    assert!(!regular.timeboosted);
    assert_eq!(regular.block_number, 3);
    assert_eq!(regular.tx_index, 0);

    let (status, body) = send_request(
        runtime.seq_addr,
        "GET",
        &format!("/tx/{}", receipt.tx_hash),
        String::new(),
    )
    .await;
    assert_eq!(status, 200, "location body={body}");
    let location: TxLocationResponse = serde_json::from_str(&body).expect("parse location");
    assert!(location.ok);
    assert_eq!(location.block_number, 1);
    assert!(location.timeboosted);

    let (status, body) =
        send_request(runtime.seq_addr, "GET", "/block_metadata?from=1&to=3", String::new()).await;
    assert_eq!(status, 200, "metadata body={body}");
    let metadata: MetadataResponse = serde_json::from_str(&body).expect("parse metadata");
    assert!(metadata.ok);
    let raw: Vec<(u64, &str)> = metadata
        .blocks
        .iter()
        .map(|entry| (entry.block_number, entry.raw_metadata.as_str()))
        .collect();
    assert_eq!(raw, vec![(1, "0x0001"), (2, "0x0001"), (3, "0x0000")]);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_express_lane_rejects_out_of_order_and_strangers() {
    let env = TestEnv::new("express-lane-rejects");
    let Some(mut runtime) = start_runtime(&env).await else {
        return;
    };
    let alice = key(0xa1);
    let bob = key(0xb2);

    runtime.contract.set_balance(address_of(&alice), U256::from(50));
    let bid = timeboost_core::Bid {
        bidder: address_of(&alice),
        chain_id: CHAIN_ID,
        auction_contract_address: auction_address(),
        express_lane_controller: address_of(&alice),
        round: 1,
        amount: U256::from(5),
        signature: Bytes::new(),
    }
    .sign(&alice)
    .expect("sign bid");
    // Redelivered copies of one bid are accepted but queued once.
    let encoded = serde_json::to_string(&bid).expect("encode bid");
    let responses = join_all(
        (0..4).map(|_| send_request(runtime.bid_addr, "POST", "/bid", encoded.clone())),
    )
    .await;
    let mut fresh = 0;
    for (status, body) in responses {
        assert_eq!(status, 200, "bid body={body}");
        let accepted: BidResponse = serde_json::from_str(&body).expect("parse bid response");
        if !accepted.duplicate {
            fresh += 1;
        }
    }
    assert_eq!(fresh, 1);

    runtime.clock.set(at(50));
    let resolution = runtime.auctioneer.resolve_round(1).await.expect("resolve");
    // Single bid pays the reserve price.
    assert_eq!(resolution.price, U256::from(1));
    runtime.watcher.advance_once().await.expect("watch events");
    runtime.clock.set(at(ROUND_SECONDS + 5));

    let out_of_order = submission(&alice, 3, signed_tx(0x44, 0));
    let (status, body) = send_request(runtime.seq_addr, "POST", "/express_lane/tx", out_of_order).await;
    assert_eq!(status, 400, "body={body}");
    assert_eq!(error_code(&body), "SEQUENCE_MISMATCH");

    let stranger = submission(&bob, 0, signed_tx(0x45, 0));
    let (status, body) = send_request(runtime.seq_addr, "POST", "/express_lane/tx", stranger).await;
    assert_eq!(status, 403, "body={body}");
    assert_eq!(error_code(&body), "NOT_CONTROLLER");

    // The same transaction still goes through the regular path, after the advantage.
    let started = Instant::now();
    let (status, body) = send_request(
        runtime.seq_addr,
        "POST",
        "/tx",
        serde_json::json!({ "transaction": signed_tx(0x45, 0) }).to_string(),
    )
    .await;
    assert_eq!(status, 200, "body={body}");
    assert!(started.elapsed() >= ADVANTAGE);

    // A tx the sequencer refuses leaves the sequence number unused.
    let bad_nonce = submission(&alice, 0, signed_tx(0x44, 9));
    let (status, body) = send_request(runtime.seq_addr, "POST", "/express_lane/tx", bad_nonce).await;
    assert_eq!(status, 422, "body={body}");
    assert_eq!(error_code(&body), "EXECUTION_REJECTED");

    let in_order = submission(&alice, 0, signed_tx(0x44, 0));
    let (status, body) = send_request(runtime.seq_addr, "POST", "/express_lane/tx", in_order).await;
    assert_eq!(status, 200, "body={body}");

    let replayed = submission(&alice, 0, signed_tx(0x44, 1));
    let (status, body) = send_request(runtime.seq_addr, "POST", "/express_lane/tx", replayed).await;
    assert_eq!(status, 400, "body={body}");
    assert_eq!(error_code(&body), "SEQUENCE_MISMATCH");

    let (status, body) =
        send_request(runtime.seq_addr, "GET", "/block_metadata?from=1&to=500", String::new()).await;
    assert_eq!(status, 400, "body={body}");
    assert_eq!(error_code(&body), "BLOCKS_LIMIT_EXCEEDED");

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_regular_txs_are_not_delayed_without_controller() {
    let env = TestEnv::new("no-controller");
    let Some(mut runtime) = start_runtime(&env).await else {
        return;
    };
    // Round 1 never had an auction.
    runtime.clock.set(at(ROUND_SECONDS + 5));

    let started = Instant::now();
    let (status, body) = send_request(
        runtime.seq_addr,
        "POST",
        "/tx",
        serde_json::json!({ "transaction": signed_tx(0x55, 0) }).to_string(),
    )
    .await;
    assert_eq!(status, 200, "body={body}");
    assert!(started.elapsed() < ADVANTAGE);

    let express = submission(&key(0xa1), 0, signed_tx(0x55, 1));
    let (status, body) = send_request(runtime.seq_addr, "POST", "/express_lane/tx", express).await;
    assert_eq!(status, 403, "body={body}");
    let rejected = error_response(&body);
    assert!(!rejected.ok);
    assert_eq!(rejected.code, "NOT_CONTROLLER");

    let (status, _) = send_request(runtime.seq_addr, "POST", "/tx", "{not json".to_string()).await;
    assert_eq!(status, 400);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn e2e_rebuilder_backfills_blocks_stored_without_metadata() {
    let env = TestEnv::new("rebuilder");
    let Some(mut runtime) = start_runtime(&env).await else {
        return;
    };
    let txs = [signed_tx(0x61, 0), signed_tx(0x62, 0)];
    for tx in &txs {
        let (status, body) = send_request(
            runtime.seq_addr,
            "POST",
            "/tx",
            serde_json::json!({ "transaction": tx }).to_string(),
        )
        .await;
        assert_eq!(status, 200, "body={body}");
    }

    // A mirror that sequenced the same txs before it tracked metadata, then lowered the
    // threshold: its restart marks both blocks missing.
    run_mirror_lane(&env.mirror_db_path, u64::MAX, &txs).await;
    run_mirror_lane(&env.mirror_db_path, 1, &[]).await;
    let mut mirror = Storage::open(&env.mirror_db_path, "NORMAL").expect("open mirror");
    assert_eq!(mirror.missing_block_metadata(10).expect("missing"), vec![1, 2]);

    let mut rebuilder = BlockMetadataRebuilder::new(
        BlockMetadataRebuilderConfig {
            source_url: format!("http://{}", runtime.seq_addr),
            sync_interval: Duration::from_millis(10),
            api_blocks_limit: 100,
            request_timeout: Duration::from_secs(2),
        },
        Storage::open(&env.mirror_db_path, "NORMAL").expect("open rebuilder storage"),
    )
    .expect("rebuilder");
    assert_eq!(rebuilder.update().await.expect("rebuild"), 2);
    assert_eq!(rebuilder.update().await.expect("nothing left"), 0);

    assert!(mirror.missing_block_metadata(10).expect("missing").is_empty());
    assert_eq!(
        mirror.block_metadata_range(1, 2).expect("metadata"),
        vec![
            (1, BlockMetadata::from_raw(vec![0, 0])),
            (2, BlockMetadata::from_raw(vec![0, 0])),
        ]
    );

    runtime.shutdown().await;
}

async fn run_mirror_lane(db_path: &str, track_block_metadata_from: u64, txs: &[Bytes]) {
    let (tx, rx) = mpsc::channel(16);
    let lane = SequencingLane::new(
        rx,
        Storage::open(db_path, "NORMAL").expect("open mirror storage"),
        SequencingLaneConfig {
            chain_id: CHAIN_ID,
            max_txs_per_block: 16,
            idle_poll_interval: Duration::from_millis(2),
            track_block_metadata_from,
        },
    );
    let (handle, stop) = lane.spawn();
    let sequencer = SequencerHandle::new(tx, Duration::from_millis(100));
    for raw in txs {
        sequencer
            .publish_transaction(raw.clone(), false)
            .await
            .expect("mirror sequenced");
    }
    stop.request_shutdown();
    let result = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("wait for mirror lane")
        .expect("join mirror lane");
    assert!(matches!(result, SequencingLaneError::ShutdownRequested));
}

struct TestEnv {
    _dir: TempDir,
    db_path: String,
    queue_path: String,
    mirror_db_path: String,
}

impl TestEnv {
    fn new(name: &str) -> Self {
        let dir = tempfile::Builder::new()
            .prefix(format!("timeboost-e2e-{name}-").as_str())
            .tempdir()
            .expect("create temporary test directory");
        let db_path = dir.path().join("sequencer.sqlite");
        let queue_path = dir.path().join("bids.sqlite");
        let mirror_db_path = dir.path().join("mirror.sqlite");
        Self {
            db_path: db_path.to_string_lossy().into_owned(),
            queue_path: queue_path.to_string_lossy().into_owned(),
            mirror_db_path: mirror_db_path.to_string_lossy().into_owned(),
            _dir: dir,
        }
    }
}

struct Runtime {
    seq_addr: std::net::SocketAddr,
    bid_addr: std::net::SocketAddr,
    clock: Arc<ManualClock>,
    contract: Arc<InMemoryAuctionContract>,
    auctioneer: Auctioneer,
    watcher: ResolutionWatcher,
    shutdown_txs: Vec<oneshot::Sender<()>>,
    server_tasks: Vec<tokio::task::JoinHandle<()>>,
    lane_stop: SequencingLaneStop,
    lane_handle: Option<tokio::task::JoinHandle<SequencingLaneError>>,
}

impl Runtime {
    async fn shutdown(&mut self) {
        for tx in self.shutdown_txs.drain(..) {
            let _ = tx.send(());
        }
        for task in self.server_tasks.drain(..) {
            tokio::time::timeout(Duration::from_secs(3), task)
                .await
                .expect("wait for server task")
                .expect("join server task");
        }
        self.lane_stop.request_shutdown();
        if let Some(task) = self.lane_handle.take() {
            let lane_result = tokio::time::timeout(Duration::from_secs(3), task)
                .await
                .expect("wait for sequencing lane")
                .expect("join sequencing lane task");
            assert!(
                matches!(lane_result, SequencingLaneError::ShutdownRequested),
                "expected shutdown result, got {lane_result}"
            );
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for tx in self.shutdown_txs.drain(..) {
            let _ = tx.send(());
        }
        self.lane_stop.request_shutdown();
        for task in self.server_tasks.drain(..) {
            task.abort();
        }
        if let Some(task) = self.lane_handle.take() {
            task.abort();
        }
    }
}

async fn start_runtime(env: &TestEnv) -> Option<Runtime> {
    let Some(seq_listener) = bind_listener().await else {
        return None;
    };
    let Some(bid_listener) = bind_listener().await else {
        return None;
    };
    let seq_addr = seq_listener.local_addr().expect("read listener addr");
    let bid_addr = bid_listener.local_addr().expect("read listener addr");

    let clock = Arc::new(ManualClock::new(at(10)));
    let contract = Arc::new(InMemoryAuctionContract::new(timing(), U256::from(1)));
    let dyn_contract: Arc<dyn AuctionContract> = contract.clone();
    let dyn_clock: Arc<dyn Clock> = clock.clone();

    let storage = Storage::open(&env.db_path, "NORMAL").expect("open storage");
    let (tx, rx) = mpsc::channel(128);
    let lane = SequencingLane::new(
        rx,
        storage,
        SequencingLaneConfig {
            chain_id: CHAIN_ID,
            max_txs_per_block: 16,
            idle_poll_interval: Duration::from_millis(2),
            track_block_metadata_from: 1,
        },
    );
    let (lane_handle, lane_stop) = lane.spawn();

    let express_lane = Arc::new(ExpressLaneService::new(
        ExpressLaneConfig {
            chain_id: CHAIN_ID,
            auction_contract_address: auction_address(),
            advantage: ADVANTAGE,
        },
        timing(),
        Arc::new(SequencerHandle::new(tx, Duration::from_millis(100))),
        Arc::clone(&dyn_clock),
    ));
    let mut watcher = ResolutionWatcher::new(
        ResolutionWatcherConfig {
            poll_interval: Duration::from_millis(10),
        },
        Arc::clone(&dyn_contract),
        Arc::clone(&express_lane),
    );
    watcher.seed().await.expect("seed watcher");

    let block_metadata = Arc::new(BlockMetadataApi::new(
        BlockMetadataApiConfig {
            blocks_limit: 100,
            cache_size: 16,
        },
        Storage::open(&env.db_path, "NORMAL").expect("open metadata storage"),
    ));
    let reader = Arc::new(Mutex::new(
        Storage::open(&env.db_path, "NORMAL").expect("open reader storage"),
    ));
    let seq_app = sequencer_router(
        Arc::new(SequencerApiState {
            express_lane,
            block_metadata,
            reader,
        }),
        128 * 1024,
    );

    let queue = SharedBidQueue::new(BidQueue::open(&env.queue_path, 100).expect("open bid queue"));
    let validator = Arc::new(BidValidator::new(
        BidValidatorConfig {
            chain_id: CHAIN_ID,
            auction_contract_address: auction_address(),
            min_reserve_price: U256::ZERO,
        },
        timing(),
        Arc::clone(&dyn_contract),
        queue.clone(),
        Arc::clone(&dyn_clock),
    ));
    let bid_app = bid_router(Arc::new(BidApiState { validator }), 128 * 1024);

    let auctioneer = Auctioneer::new(
        AuctioneerConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        },
        timing(),
        dyn_contract,
        queue,
        dyn_clock,
    );

    let mut shutdown_txs = Vec::new();
    let mut server_tasks = Vec::new();
    for (listener, app) in [(seq_listener, seq_app), (bid_listener, bid_app)] {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        server_tasks.push(tokio::spawn(async move {
            server.await.expect("run test server");
        }));
        shutdown_txs.push(shutdown_tx);
    }

    Some(Runtime {
        seq_addr,
        bid_addr,
        clock,
        contract,
        auctioneer,
        watcher,
        shutdown_txs,
        server_tasks,
        lane_stop,
        lane_handle: Some(lane_handle),
    })
}

async fn bind_listener() -> Option<tokio::net::TcpListener> {
    match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(value) => Some(value),
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            eprintln!("skipping e2e integration test: cannot bind test listener in this environment");
            None
        }
        Err(err) => panic!("bind test listener: {err}"),
    }
}

fn timing() -> RoundTimingInfo {
    RoundTimingInfo::from_seconds(OFFSET, ROUND_SECONDS, 15, 15)
}

fn at(seconds_after_offset: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(OFFSET + seconds_after_offset)
}

fn auction_address() -> Address {
    Address::repeat_byte(0xac)
}

fn key(seed: u8) -> SigningKey {
    SigningKey::from_bytes((&[seed; 32]).into()).expect("signing key")
}

fn signed_tx(seed: u8, nonce: u64) -> Bytes {
    let mut tx = TxEip1559 {
        chain_id: CHAIN_ID,
        nonce,
        gas_limit: 21_000,
        max_fee_per_gas: 1_000_000_000,
        max_priority_fee_per_gas: 1,
        to: TxKind::Call(Address::repeat_byte(0x77)),
        value: U256::from(1),
        access_list: Default::default(),
        input: Bytes::new(),
    };
    let signer = PrivateKeySigner::from_bytes(&B256::repeat_byte(seed)).expect("signer");
    let signature = signer
        .sign_transaction_sync(&mut tx)
        .expect("sign transaction");
    TxEnvelope::from(tx.into_signed(signature))
        .encoded_2718()
        .into()
}

fn submission(controller: &SigningKey, sequence: u64, transaction: Bytes) -> String {
    let submission = ExpressLaneSubmission {
        chain_id: CHAIN_ID,
        round: 1,
        auction_contract_address: auction_address(),
        transaction,
        sequence,
        signature: Bytes::new(),
    }
    .sign(controller)
    .expect("sign submission");
    serde_json::to_string(&submission).expect("encode submission")
}

fn error_response(body: &str) -> ErrorResponse {
    serde_json::from_str(body).expect("parse error body")
}

fn error_code(body: &str) -> String {
    error_response(body).code
}

async fn send_request(
    addr: std::net::SocketAddr,
    method: &str,
    path: &str,
    body: String,
) -> (u16, String) {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect http socket");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write http request");
    stream.flush().await.expect("flush http request");

    let mut response = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let read_result = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("timed out while reading http response")
            .expect("read http response");
        if read_result == 0 {
            break;
        }
        response.extend_from_slice(&chunk[..read_result]);

        if let Some((header_end, content_length)) = response_content_len(response.as_slice())
            && response.len() >= header_end.saturating_add(content_length)
        {
            break;
        }
    }
    parse_http_response(response.as_slice())
}

fn parse_http_response(raw: &[u8]) -> (u16, String) {
    let text = String::from_utf8(raw.to_vec()).expect("http response utf8");
    let mut sections = text.splitn(2, "\r\n\r\n");
    let headers = sections.next().unwrap_or_default();
    let body = sections.next().unwrap_or_default().to_string();

    let status_line = headers.lines().next().expect("http status line");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .expect("status code")
        .parse::<u16>()
        .expect("parse status code");
    (status, body)
}

fn response_content_len(raw: &[u8]) -> Option<(usize, usize)> {
    let header_end = raw.windows(4).position(|window| window == b"\r\n\r\n")? + 4;
    let headers = std::str::from_utf8(&raw[..header_end]).ok()?;
    let mut content_length = None;
    for line in headers.lines() {
        if let Some((name, value)) = line.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse::<usize>().ok();
            break;
        }
    }
    content_length.map(|len| (header_end, len))
}
