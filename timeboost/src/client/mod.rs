// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! HTTP clients for auction participants: bidders and express-lane controllers.

mod bidder;
mod express_lane;

use alloy_primitives::U256;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use timeboost_core::SigningError;

use crate::auction_contract::ContractError;

pub use bidder::{BidderClient, BidderClientConfig};
pub use express_lane::{ExpressLaneClient, ExpressLaneClientConfig};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("rejected with {status} {code}: {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
    #[error("bid of {amount} exceeds deposit balance {balance}")]
    InsufficientBalance { amount: U256, balance: U256 },
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Contract(#[from] ContractError),
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

async fn post_json<B, R>(http: &reqwest::Client, url: &str, body: &B) -> Result<R, ClientError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let response = http
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|err| ClientError::Http(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.code, body.message),
            Err(_) => ("UNKNOWN".to_string(), text),
        };
        return Err(ClientError::Rejected {
            status: status.as_u16(),
            code,
            message,
        });
    }
    response
        .json()
        .await
        .map_err(|err| ClientError::Http(err.to_string()))
}
