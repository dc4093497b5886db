// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use crate::supervisor::launcher::WorkerHandle;
use crate::target::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    /// Exited since the previous poll
    Exited,
    /// Exit already reported by an earlier poll
    Gone,
}

struct Entry {
    target: Target,
    handle: Box<dyn WorkerHandle>,
    exit_seen: bool,
}

/// Target id to worker. An id stays registered after its worker exits so the
/// target is never adopted twice.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Entry>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.workers.contains_key(id)
    }

    /// Register a worker. Never replaces an existing entry; returns false instead.
    pub fn insert(&mut self, target: Target, handle: Box<dyn WorkerHandle>) -> bool {
        if self.contains(&target.id) {
            return false;
        }
        self.workers.insert(
            target.id.clone(),
            Entry {
                target,
                handle,
                exit_seen: false,
            },
        );
        true
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn running(&self) -> usize {
        self.workers
            .values()
            .filter(|e| e.handle.is_running())
            .count()
    }

    /// Check every worker, marking newly observed exits.
    pub fn poll(&mut self) -> Vec<(Target, Liveness)> {
        let mut states: Vec<_> = self
            .workers
            .values_mut()
            .map(|entry| {
                let liveness = if entry.handle.is_running() {
                    Liveness::Running
                } else if entry.exit_seen {
                    Liveness::Gone
                } else {
                    entry.exit_seen = true;
                    Liveness::Exited
                };
                (entry.target.clone(), liveness)
            })
            .collect();
        states.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        states
    }
}
