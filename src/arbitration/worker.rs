//! Drives the arbitration engine off the snapshot fan-out, converting its
//! actuator commands into outbound service calls.

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::outbound::{switch_service_call, OutboundMessage};
use crate::stats::Snapshot;
use crate::time::Clock;

use super::engine::ArbitrationEngine;

pub async fn run(
    mut engine: ArbitrationEngine,
    mut snapshots: mpsc::Receiver<Snapshot>,
    outbound: mpsc::Sender<OutboundMessage>,
    clock: impl Clock,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("arbitration engine shutting down");
                return Ok(());
            }
            maybe_snapshot = snapshots.recv() => {
                let Some(snapshot) = maybe_snapshot else {
                    warn!("snapshot channel closed, stopping arbitration engine");
                    return Ok(());
                };
                let commands = engine.evaluate(&snapshot, clock.time_of_day(), clock.today());
                for command in commands {
                    let message = switch_service_call(&command.entity_id, command.turn_on);
                    if outbound.try_send(message).is_err() {
                        warn!("outbound channel full or closed, dropping actuator command");
                    }
                }
            }
        }
    }
}
