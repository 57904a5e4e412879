// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod error;

use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, B256, Bytes};
use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Json, Path, Query, State};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use timeboost_core::{Bid, ExpressLaneSubmission};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bid_queue::EnqueueOutcome;
use crate::bid_validator::BidValidator;
use crate::block_metadata::{BlockMetadataApi, BlockMetadataResponse};
use crate::express_lane::ExpressLaneService;
use crate::sequencing_lane::SequencedReceipt;
use crate::storage::Storage;

pub use error::ApiError;

#[derive(Clone)]
pub struct SequencerApiState {
    pub express_lane: Arc<ExpressLaneService>,
    pub block_metadata: Arc<BlockMetadataApi>,
    pub reader: Arc<Mutex<Storage>>,
}

#[derive(Clone)]
pub struct BidApiState {
    pub validator: Arc<BidValidator>,
}

#[derive(Debug, Deserialize)]
struct RegularTxRequest {
    transaction: Bytes,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TxResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub receipt: SequencedReceipt,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxLocationResponse {
    pub ok: bool,
    pub tx_hash: B256,
    pub block_number: u64,
    pub tx_index: u32,
    pub timeboosted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResponse {
    pub ok: bool,
    pub round: u64,
    pub controller: Option<Address>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidResponse {
    pub ok: bool,
    pub round: u64,
    pub bidder: Address,
    pub duplicate: bool,
}

#[derive(Debug, Deserialize)]
struct BlockRangeQuery {
    from: u64,
    to: u64,
}

pub fn sequencer_router(state: Arc<SequencerApiState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/express_lane/tx", post(submit_express_lane_tx))
        .route("/express_lane/round", get(current_round))
        .route("/tx", post(submit_regular_tx))
        .route("/tx/{hash}", get(transaction_location))
        .route("/block_metadata", get(block_metadata))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

pub fn bid_router(state: Arc<BidApiState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/bid", post(submit_bid))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn submit_express_lane_tx(
    State(state): State<Arc<SequencerApiState>>,
    req: Result<Json<ExpressLaneSubmission>, JsonRejection>,
) -> Result<Json<TxResponse>, ApiError> {
    let Json(submission) =
        req.map_err(|err| ApiError::bad_request(format!("invalid JSON: {err}")))?;
    if submission.transaction.is_empty() {
        return Err(ApiError::bad_request("transaction must not be empty"));
    }
    let round = submission.round;
    let sequence = submission.sequence;

    let receipt = state.express_lane.submit_express_lane_tx(submission).await?;
    info!(
        round,
        sequence,
        tx_hash = %receipt.tx_hash,
        block_number = receipt.block_number,
        "express lane tx committed"
    );
    Ok(Json(TxResponse { ok: true, receipt }))
}

async fn submit_regular_tx(
    State(state): State<Arc<SequencerApiState>>,
    req: Result<Json<RegularTxRequest>, JsonRejection>,
) -> Result<Json<TxResponse>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::bad_request(format!("invalid JSON: {err}")))?;
    if req.transaction.is_empty() {
        return Err(ApiError::bad_request("transaction must not be empty"));
    }

    let receipt = state.express_lane.submit_regular_tx(req.transaction).await?;
    info!(
        tx_hash = %receipt.tx_hash,
        sender = %receipt.sender,
        block_number = receipt.block_number,
        "tx committed"
    );
    Ok(Json(TxResponse { ok: true, receipt }))
}

async fn current_round(State(state): State<Arc<SequencerApiState>>) -> Json<RoundResponse> {
    let round = state.express_lane.current_round();
    Json(RoundResponse {
        ok: true,
        round,
        controller: state.express_lane.controller_for(round),
    })
}

async fn transaction_location(
    State(state): State<Arc<SequencerApiState>>,
    Path(hash): Path<String>,
) -> Result<Json<TxLocationResponse>, ApiError> {
    let tx_hash: B256 = hash
        .parse()
        .map_err(|err| ApiError::bad_request(format!("invalid tx hash: {err}")))?;
    let reader = Arc::clone(&state.reader);
    let location = tokio::task::spawn_blocking(move || {
        let mut storage = reader.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        storage.transaction_location(&tx_hash)
    })
    .await
    .map_err(|err| ApiError::internal_error(format!("lookup task failed: {err}")))?
    .map_err(|err| ApiError::internal_error(format!("db error: {err}")))?
    .ok_or_else(|| ApiError::not_found(format!("transaction {tx_hash} not found")))?;

    Ok(Json(TxLocationResponse {
        ok: true,
        tx_hash,
        block_number: location.block_number,
        tx_index: location.tx_index,
        timeboosted: location.timeboosted,
    }))
}

async fn block_metadata(
    State(state): State<Arc<SequencerApiState>>,
    query: Result<Query<BlockRangeQuery>, QueryRejection>,
) -> Result<Json<BlockMetadataResponse>, ApiError> {
    let Query(range) =
        query.map_err(|err| ApiError::bad_request(format!("invalid query: {err}")))?;
    let api = Arc::clone(&state.block_metadata);
    let blocks = tokio::task::spawn_blocking(move || api.get_raw_block_metadata(range.from, range.to))
        .await
        .map_err(|err| ApiError::internal_error(format!("metadata task failed: {err}")))??;
    Ok(Json(BlockMetadataResponse { ok: true, blocks }))
}

async fn submit_bid(
    State(state): State<Arc<BidApiState>>,
    req: Result<Json<Bid>, JsonRejection>,
) -> Result<Json<BidResponse>, ApiError> {
    let Json(bid) = req.map_err(|err| ApiError::bad_request(format!("invalid JSON: {err}")))?;
    let round = bid.round;
    let bidder = bid.bidder;

    let outcome = state.validator.validate_and_enqueue(bid).await?;
    Ok(Json(BidResponse {
        ok: true,
        round,
        bidder,
        duplicate: outcome == EnqueueOutcome::Duplicate,
    }))
}
