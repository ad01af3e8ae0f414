//! Drives the derived publishers off the snapshot fan-out: one evaluation
//! per snapshot, forwarded onto the outbound channel.

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ArbitrationTopicsConfig, PublishersConfig};
use crate::outbound::OutboundMessage;
use crate::stats::Snapshot;
use crate::time::Clock;

use super::engine::PublishersEngine;

pub async fn run(
    mut engine: PublishersEngine,
    mut snapshots: mpsc::Receiver<Snapshot>,
    outbound: mpsc::Sender<OutboundMessage>,
    publishers: PublishersConfig,
    arbitration_topics: ArbitrationTopicsConfig,
    clock: impl Clock,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("derived publishers shutting down");
                return Ok(());
            }
            maybe_snapshot = snapshots.recv() => {
                let Some(snapshot) = maybe_snapshot else {
                    warn!("snapshot channel closed, stopping derived publishers");
                    return Ok(());
                };
                let messages = engine.evaluate(&snapshot, clock.now(), &publishers, &arbitration_topics);
                for message in messages {
                    if outbound.try_send(message).is_err() {
                        warn!("outbound channel full or closed, dropping derived-publisher message");
                    }
                }
            }
        }
    }
}
