// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex, MutexGuard};

use crate::ingest::LogRecord;
use crate::storage::error::{Error, Result};
use crate::storage::{LogSink, SinkFactory};

#[derive(Default)]
struct MemoryState {
    batches: Vec<Vec<LogRecord>>,
    failures_pending: usize,
}

/// In-memory sink. Clones share the same storage, so a test can keep one
/// handle while a worker writes through another.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `append_batch` fail without storing anything.
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_pending = count;
    }

    pub fn batches(&self) -> Vec<Vec<LogRecord>> {
        self.lock().batches.clone()
    }

    pub fn batch_count(&self) -> usize {
        self.lock().batches.len()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().batches.iter().flatten().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LogSink for MemorySink {
    fn append_batch(&mut self, records: &[LogRecord]) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(Error::Unavailable("injected failure".to_string()));
        }

        state.batches.push(records.to_vec());
        Ok(())
    }
}

impl SinkFactory for MemorySink {
    fn open(&self) -> Result<Box<dyn LogSink>> {
        Ok(Box::new(self.clone()))
    }
}
