// SPDX-License-Identifier: Apache-2.0

//! Bounded channel between blocking producers and async consumers.
//!
//! Thin wrapper over `flume` so the event feed thread can hand discoveries to
//! the supervisor loop without either side knowing about the other's runtime.

use std::time::Duration;

use flume::{Receiver, Sender};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SendError {
    #[error("channel disconnected")]
    Disconnected,

    #[error("timed out waiting for channel capacity")]
    Timeout,
}

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

impl<T> BoundedSender<T> {
    /// Blocking send that gives up after `timeout` if the channel stays full.
    pub fn send_timeout(&self, item: T, timeout: Duration) -> Result<(), SendError> {
        self.tx.send_timeout(item, timeout).map_err(|e| match e {
            flume::SendTimeoutError::Timeout(_) => SendError::Timeout,
            flume::SendTimeoutError::Disconnected(_) => SendError::Disconnected,
        })
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Next item, or `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    (BoundedSender { tx }, BoundedReceiver { rx })
}
