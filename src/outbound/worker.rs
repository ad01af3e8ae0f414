//! Drains the outbound queue to the broker, filtering on the enabled flag
//! read fresh from each snapshot.

use anyhow::Result;
use rumqttc::QoS;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::stats::Snapshot;
use crate::transport::BrokerClient;

use super::message::OutboundMessage;
use super::queue::OutboundQueue;

pub const OUTBOUND_CHANNEL_CAPACITY: usize = 100;

fn qos_for(message: &OutboundMessage) -> QoS {
    match message {
        OutboundMessage::Discovery { .. } => QoS::ExactlyOnce,
        OutboundMessage::State { .. } => QoS::AtLeastOnce,
        OutboundMessage::ServiceCall { .. } => QoS::AtLeastOnce,
    }
}

/// Runs until cancelled. Messages are buffered in the queue regardless of
/// transport readiness and only drained once `ready` reports the broker
/// connected at least once (spec §4.5), separately from the `enabled` flag
/// gating non-discovery messages.
pub async fn run(
    mut inbound: mpsc::Receiver<OutboundMessage>,
    mut snapshots: mpsc::Receiver<Snapshot>,
    mut ready: watch::Receiver<bool>,
    client: BrokerClient,
    service_call_topic: String,
    enabled_topic: String,
    force_enable: bool,
    cancel: CancellationToken,
) -> Result<()> {
    let mut queue = OutboundQueue::new(enabled_topic, force_enable);
    let mut latest = Snapshot::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            Some(snapshot) = snapshots.recv() => {
                latest = snapshot;
            }
            Some(message) = inbound.recv() => {
                queue.enqueue(message, &latest);
            }
            result = ready.changed() => {
                if result.is_err() {
                    warn!("broker readiness channel closed, stopping outbound worker");
                    return Ok(());
                }
            }
            else => return Ok(()),
        }

        if !*ready.borrow() {
            continue;
        }

        for message in queue.drain().collect::<Vec<_>>() {
            let topic = message.topic(&service_call_topic);
            let retain = message.retained();
            let qos = qos_for(&message);
            let body = message.body();
            if let Err(err) = client.publish(&topic, qos, retain, body).await {
                warn!(%topic, error = %err, "failed to publish outbound message");
            }
        }
    }
}
