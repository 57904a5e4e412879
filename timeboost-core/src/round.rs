// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Round timing parameters as published by the auction contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTimingInfo {
    /// Unix timestamp (seconds) at which round 0 starts.
    pub offset_timestamp: u64,
    pub round_duration: Duration,
    /// Trailing part of a round during which bids for the next round are refused.
    pub auction_closing: Duration,
    /// Window before auction closing in which the reserve price may be updated.
    pub reserve_submission: Duration,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoundTimingError {
    #[error("round duration must be positive")]
    ZeroRoundDuration,
    #[error(
        "auction closing ({closing:?}) plus reserve submission ({reserve:?}) exceeds round duration ({round:?})"
    )]
    WindowsExceedRound {
        closing: Duration,
        reserve: Duration,
        round: Duration,
    },
}

impl RoundTimingInfo {
    pub fn from_seconds(
        offset_timestamp: u64,
        round_duration_seconds: u64,
        auction_closing_seconds: u64,
        reserve_submission_seconds: u64,
    ) -> Self {
        Self {
            offset_timestamp,
            round_duration: Duration::from_secs(round_duration_seconds),
            auction_closing: Duration::from_secs(auction_closing_seconds),
            reserve_submission: Duration::from_secs(reserve_submission_seconds),
        }
    }

    pub fn validate(&self) -> Result<(), RoundTimingError> {
        if self.round_duration.is_zero() {
            return Err(RoundTimingError::ZeroRoundDuration);
        }
        if self.auction_closing.saturating_add(self.reserve_submission) > self.round_duration {
            return Err(RoundTimingError::WindowsExceedRound {
                closing: self.auction_closing,
                reserve: self.reserve_submission,
                round: self.round_duration,
            });
        }
        Ok(())
    }

    pub fn offset(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.offset_timestamp)
    }

    /// Round index at `now`. Times before the offset map to round 0.
    pub fn current_round(&self, now: SystemTime) -> u64 {
        current_round(now, self.offset(), self.round_duration)
    }

    pub fn round_start(&self, round: u64) -> SystemTime {
        let nanos = self
            .round_duration
            .as_nanos()
            .saturating_mul(u128::from(round));
        self.offset() + duration_from_nanos(nanos)
    }

    pub fn time_into_round(&self, now: SystemTime) -> Duration {
        let round = self.current_round(now);
        now.duration_since(self.round_start(round))
            .unwrap_or_default()
    }

    pub fn time_until_next_round(&self, now: SystemTime) -> Duration {
        let next = self.round_start(self.current_round(now).saturating_add(1));
        next.duration_since(now).unwrap_or_default()
    }

    /// True during the trailing `auction_closing` window of the current round, and
    /// before the first round starts.
    pub fn is_auction_round_closed(&self, now: SystemTime) -> bool {
        if now < self.offset() {
            return true;
        }
        self.time_into_round(now) >= self.round_duration.saturating_sub(self.auction_closing)
    }

    pub fn is_reserve_submission_window(&self, now: SystemTime) -> bool {
        if now < self.offset() {
            return false;
        }
        let into = self.time_into_round(now);
        let closes_at = self.round_duration.saturating_sub(self.auction_closing);
        let opens_at = closes_at.saturating_sub(self.reserve_submission);
        into >= opens_at && into < closes_at
    }

    /// Instant at which bidding for `round` stops, i.e. the start of the auction-closing
    /// window of the round before it.
    pub fn auction_closing_time(&self, round: u64) -> SystemTime {
        let start = self.round_start(round);
        start
            .checked_sub(self.auction_closing)
            .unwrap_or(start)
    }
}

/// `floor((now - offset) / round_duration)`, or 0 when `now` precedes `offset`.
///
/// Integer nanosecond arithmetic keeps boundaries exact across processes.
pub fn current_round(now: SystemTime, offset: SystemTime, round_duration: Duration) -> u64 {
    let Ok(elapsed) = now.duration_since(offset) else {
        return 0;
    };
    let duration = round_duration.as_nanos();
    if duration == 0 {
        return 0;
    }
    u64::try_from(elapsed.as_nanos() / duration).unwrap_or(u64::MAX)
}

fn duration_from_nanos(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    let sub = (nanos % 1_000_000_000) as u32;
    Duration::new(secs, sub)
}
