// SPDX-License-Identifier: Apache-2.0

//! Per-container ingestion: tail, decode, transform, store, commit.

pub mod error;
pub mod ingestor;
pub mod record;
pub mod transform;

pub use error::{Error, Result};
pub use ingestor::{IngestConfig, IngestStats, Ingestor, RunMode};
pub use record::LogRecord;
pub use transform::{Identity, Transform};
