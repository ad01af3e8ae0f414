//! Ties the statistics engine to the async world: an ingress channel, the
//! 1Hz snapshot tick, and the 30s cleanup tick.

use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::time::Clock;

use super::engine::StatisticsEngine;
use super::fanout::Fanout;

/// Raw ingress capacity (spec §5 design minimum).
pub const INGRESS_CHANNEL_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct IngressMessage {
    pub topic: String,
    pub raw: String,
}

pub async fn run(
    mut engine: StatisticsEngine,
    mut ingress: mpsc::Receiver<IngressMessage>,
    fanout: Fanout,
    clock: impl Clock,
    cancel: CancellationToken,
) -> Result<()> {
    let mut snapshot_tick = interval(Duration::from_secs(1));
    let mut cleanup_tick = interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("statistics engine shutting down");
                return Ok(());
            }
            maybe_msg = ingress.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        let now = clock.now();
                        if let Err(err) = engine.ingest(&msg.topic, &msg.raw, now) {
                            error!(topic = %msg.topic, %err, "fatal topic type conflict");
                            return Err(anyhow!(err));
                        }
                    }
                    None => {
                        warn!("ingress channel closed, stopping statistics engine");
                        return Ok(());
                    }
                }
            }
            _ = snapshot_tick.tick() => {
                let now = clock.now();
                engine.maybe_initialize_self_published(now);
                engine.log_readiness_if_due(now);
                if let Some(snapshot) = engine.snapshot(now) {
                    fanout.publish(&snapshot);
                }
            }
            _ = cleanup_tick.tick() => {
                engine.cleanup(clock.now());
            }
        }
    }
}
