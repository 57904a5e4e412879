// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SequencingLaneError {
    #[error("sequencing lane input channel closed")]
    ChannelClosed,
    #[error("sequencing lane shutdown requested")]
    ShutdownRequested,
    #[error("cannot load sender nonces")]
    LoadNonces {
        #[source]
        source: rusqlite::Error,
    },
    #[error("cannot mark blocks without metadata")]
    MarkMissingMetadata {
        #[source]
        source: rusqlite::Error,
    },
    #[error("append block failed")]
    AppendBlock {
        #[source]
        source: rusqlite::Error,
    },
}
