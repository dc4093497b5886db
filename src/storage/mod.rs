// SPDX-License-Identifier: Apache-2.0

//! Destinations for batches of log records.
//!
//! A sink stores a batch as one unit: either every record of the batch is
//! durable when `append_batch` returns `Ok`, or none is.

pub mod error;
pub mod memory;
pub mod sqlite;

pub use error::{Error, Result};
pub use memory::MemorySink;
pub use sqlite::{SqliteSink, SqliteSinkFactory};

use crate::ingest::LogRecord;

/// Batch-atomic record storage
pub trait LogSink: Send {
    fn append_batch(&mut self, records: &[LogRecord]) -> Result<()>;
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn append_batch(&mut self, records: &[LogRecord]) -> Result<()> {
        (**self).append_batch(records)
    }
}

/// Opens an independent sink for each worker, so workers never share a handle.
pub trait SinkFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn LogSink>>;
}
