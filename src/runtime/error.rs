// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid container config {path}: {source}")]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No such container: {0}")]
    NotFound(String),

    #[error("Invalid container id: {0:?}")]
    InvalidId(String),

    #[error("Event feed error: {0}")]
    Events(String),
}

pub type Result<T> = std::result::Result<T, Error>;
