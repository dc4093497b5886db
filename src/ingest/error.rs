// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Tail error: {0}")]
    Tail(#[from] crate::tail::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::Error),

    #[error("Invalid JSON log line for {target_id}: {source}")]
    Decode {
        target_id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// True when the worker stopped because its log file disappeared.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Tail(e) if e.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
