//! Progress events for long-running scrape jobs
//!
//! Producers push structured events into a channel; consumers render them.
//! Sending never blocks the job: if the receiver is gone or the buffer is
//! full the event is dropped.

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Session,
    Fetching,
    Extracting,
    Reconciling,
    Discovery,
    Committing,
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub message: String,
    pub step: u32,
    pub total: u32,
}

/// Sending half handed to pipelines. `ProgressSink::disabled()` swallows events.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Creates a sink and the stream its events arrive on
    pub fn channel(buffer: usize) -> (Self, impl Stream<Item = ProgressEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx: Some(tx) }, ReceiverStream::new(rx))
    }

    pub fn emit(&self, stage: ProgressStage, message: impl Into<String>, step: u32, total: u32) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(ProgressEvent {
                stage,
                message: message.into(),
                step,
                total,
            });
        }
    }
}
