// SPDX-License-Identifier: Apache-2.0

//! Tailing of container log files.
//!
//! Features:
//! - Inode-based detection of rotation and recreation
//! - Offset persistence next to each log file for resume after restarts
//! - Explicit commit so positions only become durable after delivery

pub mod error;
pub mod file_id;
pub mod offset_file;
pub mod tailer;

pub use error::{Error, Result};
pub use offset_file::{DEFAULT_SUFFIX, OffsetFile, TailPosition};
pub use tailer::Tailer;
