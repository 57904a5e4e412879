// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::bid_validator::BidValidationError;
use crate::block_metadata::BlockMetadataError;
use crate::express_lane::ExpressLaneError;
use crate::sequencing_lane::SequencerError;

#[derive(Debug, Error, Clone)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    InvalidSignature(String),
    #[error("{0}")]
    Misconfigured(String),
    #[error("{0}")]
    WrongRound(String),
    #[error("{0}")]
    NotController(String),
    #[error("{0}")]
    SequenceMismatch(String),
    #[error("{0}")]
    BiddingClosed(String),
    #[error("{0}")]
    InsufficientFunds(String),
    #[error("{0}")]
    BelowReservePrice(String),
    #[error("{0}")]
    BlocksLimitExceeded(String),
    #[error("{0}")]
    ExecutionRejected(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InternalError(String),
    #[error("{0}")]
    Overloaded(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    QueueUnavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    ok: bool,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_)
            | Self::InvalidSignature(_)
            | Self::Misconfigured(_)
            | Self::WrongRound(_)
            | Self::SequenceMismatch(_)
            | Self::BlocksLimitExceeded(_) => StatusCode::BAD_REQUEST,
            Self::NotController(_) => StatusCode::FORBIDDEN,
            Self::BiddingClosed(_) => StatusCode::CONFLICT,
            Self::InsufficientFunds(_)
            | Self::BelowReservePrice(_)
            | Self::ExecutionRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Overloaded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable(_) | Self::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::Misconfigured(_) => "MISCONFIGURED",
            Self::WrongRound(_) => "WRONG_ROUND",
            Self::NotController(_) => "NOT_CONTROLLER",
            Self::SequenceMismatch(_) => "SEQUENCE_MISMATCH",
            Self::BiddingClosed(_) => "BIDDING_CLOSED",
            Self::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            Self::BelowReservePrice(_) => "BELOW_RESERVE_PRICE",
            Self::BlocksLimitExceeded(_) => "BLOCKS_LIMIT_EXCEEDED",
            Self::ExecutionRejected(_) => "EXECUTION_REJECTED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::Overloaded(_) => "OVERLOADED",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::QueueUnavailable(_) => "QUEUE_UNAVAILABLE",
        }
    }
}

impl From<SequencerError> for ApiError {
    fn from(value: SequencerError) -> Self {
        match value {
            SequencerError::Invalid(message) => Self::ExecutionRejected(message),
            SequencerError::Internal(message) => Self::InternalError(message),
            SequencerError::Overloaded(message) => Self::Overloaded(message),
        }
    }
}

impl From<ExpressLaneError> for ApiError {
    fn from(value: ExpressLaneError) -> Self {
        let message = value.to_string();
        match value {
            ExpressLaneError::WrongRound { .. } => Self::WrongRound(message),
            ExpressLaneError::Misconfigured(_) => Self::Misconfigured(message),
            ExpressLaneError::InvalidSignature(_) => Self::InvalidSignature(message),
            ExpressLaneError::NotController { .. } => Self::NotController(message),
            ExpressLaneError::SequenceMismatch { .. } => Self::SequenceMismatch(message),
            ExpressLaneError::Sequencing(err) => Self::from(err),
        }
    }
}

impl From<BidValidationError> for ApiError {
    fn from(value: BidValidationError) -> Self {
        let message = value.to_string();
        match value {
            BidValidationError::InvalidSignature(_) => Self::InvalidSignature(message),
            BidValidationError::Misconfigured(_) => Self::Misconfigured(message),
            BidValidationError::WrongRound { .. } => Self::WrongRound(message),
            BidValidationError::BiddingClosed { .. } => Self::BiddingClosed(message),
            BidValidationError::InsufficientFunds { .. } => Self::InsufficientFunds(message),
            BidValidationError::BelowReservePrice { .. } => Self::BelowReservePrice(message),
            BidValidationError::Contract(_) => Self::Unavailable(message),
            BidValidationError::QueueUnavailable(_) => Self::QueueUnavailable(message),
        }
    }
}

impl From<BlockMetadataError> for ApiError {
    fn from(value: BlockMetadataError) -> Self {
        let message = value.to_string();
        match value {
            BlockMetadataError::InvalidRange { .. } => Self::BadRequest(message),
            BlockMetadataError::BlocksLimitExceeded { .. } => Self::BlocksLimitExceeded(message),
            BlockMetadataError::Storage(_) => Self::InternalError(message),
            BlockMetadataError::Sequencer(err) => Self::from(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            ok: false,
            code: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
