//! Non-blocking fan-out of snapshots to an arbitrary number of consumers.
//! A full consumer channel drops the snapshot for that consumer only; the
//! next tick supersedes it (spec §5: "consumers must be idempotent").

use tokio::sync::mpsc;
use tracing::warn;

use super::snapshot::Snapshot;

/// Channel capacity per consumer (spec §5 design minimum).
pub const SNAPSHOT_CHANNEL_CAPACITY: usize = 10;

#[derive(Default)]
pub struct Fanout {
    senders: Vec<mpsc::Sender<Snapshot>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new consumer and return its receiving half.
    pub fn subscribe(&mut self) -> mpsc::Receiver<Snapshot> {
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        self.senders.push(tx);
        rx
    }

    /// Deliver a clone of `snapshot` to every consumer, dropping (and
    /// logging) any whose channel is currently full.
    pub fn publish(&self, snapshot: &Snapshot) {
        for sender in &self.senders {
            if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(snapshot.clone()) {
                warn!("snapshot consumer channel full, dropping snapshot for it");
            }
        }
    }
}
