//! Result delivery
//!
//! Sinks are called by the agent loop exactly once per job, right after the
//! job reaches its terminal stage. They must not block.

use launchpad_core::domain::job::JobRecord;
use tokio::sync::mpsc;
use tracing::debug;

/// Receives terminal job records
pub trait ResultSink: Send + Sync {
    fn deliver(&self, record: &JobRecord);
}

/// Forwards terminal records over a channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<JobRecord>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResultSink for ChannelSink {
    fn deliver(&self, record: &JobRecord) {
        if self.tx.send(record.clone()).is_err() {
            debug!("Result receiver dropped, discarding result for job {}", record.id);
        }
    }
}
