// SPDX-License-Identifier: Apache-2.0

//! Tails container log files and stores their JSON records in SQLite,
//! resuming from a persisted position across restarts and file rotation.

pub mod bounded_channel;
pub mod ingest;
pub mod init;
pub mod runtime;
pub mod storage;
pub mod supervisor;
pub mod tail;
pub mod target;
