// SPDX-License-Identifier: Apache-2.0

//! Batched ingestion loop for a single target.
//!
//! Each pass reads up to `batch_size` lines from the tailer, decodes them as
//! JSON, runs them through the transform and hands the surviving records to the
//! sink. The tailer position is committed only after the sink accepted the
//! batch, so a crash between the two replays the batch on restart (at least
//! once delivery) instead of losing it.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::ingest::error::{Error, Result};
use crate::ingest::record::LogRecord;
use crate::ingest::transform::Transform;
use crate::storage::LogSink;
use crate::tail::Tailer;
use crate::target::Target;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Poll forever, sleeping between empty passes
    #[default]
    Continuous,
    /// Stop at the first pass that produces no records
    Once,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub mode: RunMode,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            mode: RunMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Batches written to storage
    pub batches: u64,
    /// Records written to storage
    pub records: u64,
    /// Lines read from the tailer, including ones the transform dropped
    pub lines: u64,
}

pub struct Ingestor<S> {
    target: Target,
    tailer: Tailer,
    sink: S,
    transform: Arc<dyn Transform>,
    config: IngestConfig,
    stats: IngestStats,
}

impl<S: LogSink> Ingestor<S> {
    pub fn new(
        target: Target,
        tailer: Tailer,
        sink: S,
        transform: Arc<dyn Transform>,
        config: IngestConfig,
    ) -> Self {
        Self {
            target,
            tailer,
            sink,
            transform,
            // a zero batch size would never make progress
            config: IngestConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            stats: IngestStats::default(),
        }
    }

    /// Run until the mode says stop or an error ends the worker.
    pub fn run(&mut self) -> Result<IngestStats> {
        info!(container = %self.target, path = ?self.tailer.path(), "Starting ingestion");

        loop {
            let records = match self.next_batch() {
                Ok(records) => records,
                Err(e) if e.is_not_found() && self.config.mode == RunMode::Once => {
                    info!(container = %self.target, "Log file is gone, stopping");
                    return Ok(self.stats);
                }
                Err(e) => return Err(e),
            };

            if records.is_empty() {
                match self.config.mode {
                    RunMode::Once => {
                        debug!(container = %self.target, "No new records");
                        return Ok(self.stats);
                    }
                    RunMode::Continuous => {
                        thread::sleep(self.config.poll_interval);
                        continue;
                    }
                }
            }

            self.flush(&records)?;
        }
    }

    fn next_batch(&mut self) -> Result<Vec<LogRecord>> {
        let mut records = Vec::new();
        let mut lines = 0;

        while lines < self.config.batch_size {
            let line = match self.tailer.read_line() {
                Ok(Some(line)) => line,
                Ok(None) => break,
                // keep what was drained before the file vanished; the next
                // pass will hit the same error with nothing pending
                Err(e) if e.is_not_found() && lines > 0 => break,
                Err(e) => return Err(e.into()),
            };
            lines += 1;

            let value: Value = serde_json::from_str(&line).map_err(|source| Error::Decode {
                target_id: self.target.id.clone(),
                source,
            })?;

            if let Some(payload) = self.transform.apply(&self.target.name, value) {
                records.push(LogRecord::new(&self.target, payload));
            }
        }

        self.stats.lines += lines as u64;
        Ok(records)
    }

    fn flush(&mut self, records: &[LogRecord]) -> Result<()> {
        self.sink.append_batch(records)?;
        self.tailer.commit()?;

        self.stats.batches += 1;
        self.stats.records += records.len() as u64;
        debug!(
            container = %self.target,
            records = records.len(),
            offset = self.tailer.position().offset,
            "Committed batch"
        );
        Ok(())
    }
}
