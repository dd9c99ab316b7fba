use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::error::{LivecodeError, Result};

/// "Run this job" message carried from the dispatcher to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMessage {
    pub job_id: Uuid,
    pub language: String,
    pub source: String,
}

/// Publishing side of the task transport.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    async fn publish(&self, message: RunMessage) -> Result<()>;
}

/// In-process transport backed by a bounded tokio channel.
///
/// Each message is received by exactly one worker. Cloning the sender half is
/// cheap; the receiver half is shared by all workers behind a mutex.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<RunMessage>,
}

/// Consuming side of [`ChannelTransport`].
#[derive(Debug, Clone)]
pub struct TransportReceiver {
    rx: Arc<Mutex<mpsc::Receiver<RunMessage>>>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, TransportReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self { tx },
            TransportReceiver {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }

    /// Messages currently waiting for a worker.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

#[async_trait]
impl TaskTransport for ChannelTransport {
    /// Never waits for room: a full channel is reported at once so the
    /// dispatcher can answer its caller immediately.
    async fn publish(&self, message: RunMessage) -> Result<()> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => LivecodeError::TransportFull {
                capacity: self.tx.max_capacity(),
            },
            TrySendError::Closed(_) => LivecodeError::TransportClosed,
        })
    }
}

impl TransportReceiver {
    /// Wait for the next message. Returns `None` once every sender is gone and
    /// the channel is drained.
    pub async fn recv(&self) -> Option<RunMessage> {
        self.rx.lock().await.recv().await
    }
}
