// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid offset file {path}: {reason}")]
    InvalidOffsetFile { path: PathBuf, reason: String },
}

impl Error {
    /// True when the tailed file (not the offset file) is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::FileNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
