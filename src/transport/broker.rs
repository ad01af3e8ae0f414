//! Thin wrapper around the MQTT broker connection: owns the `rumqttc`
//! client/event-loop pair and turns incoming publishes into
//! `stats::IngressMessage`s on a bounded channel.

use std::time::Duration;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BrokerConfig, Credentials};
use crate::error::TransportError;
use crate::stats::IngressMessage;
use crate::topics::{classify, is_invalid_payload, TopicShape};

/// Handle to the live broker connection. Cloned freely; `rumqttc::AsyncClient`
/// is itself a cheap, shareable handle around the outbound command channel.
#[derive(Clone)]
pub struct BrokerClient {
    client: AsyncClient,
}

impl BrokerClient {
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(TransportError::Client)
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, qos)
            .await
            .map_err(TransportError::Client)
    }
}

/// Build the client/event-loop pair, plus a readiness watch channel: `false`
/// until the first `ConnAck`, then held `true` for the life of the
/// connection (spec §4.5 "buffer...until the transport publishes a ready
/// client handle"). The outbound worker gates draining on the receiver.
/// Does not block on the first connection; the handshake happens as a side
/// effect of the first `eventloop.poll()`.
pub fn connect(
    config: &BrokerConfig,
    credentials: &Credentials,
) -> (BrokerClient, EventLoop, watch::Sender<bool>, watch::Receiver<bool>) {
    let client_id = format!("{}-{}", config.client_id_prefix, credentials.client_id_suffix);
    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keepalive_secs as u64));
    if !credentials.username.is_empty() {
        options.set_credentials(credentials.username.clone(), credentials.password.clone());
    }

    let (client, eventloop) = AsyncClient::new(options, 100);
    let (ready_tx, ready_rx) = watch::channel(false);
    (BrokerClient { client }, eventloop, ready_tx, ready_rx)
}

/// Drives the event loop until cancelled, forwarding incoming publishes to
/// `ingress` and flipping `ready` once connected. Reconnection is handled
/// internally by `rumqttc`; a connection error just logs and lets the next
/// `poll()` retry.
pub async fn run(
    mut eventloop: EventLoop,
    ingress: mpsc::Sender<IngressMessage>,
    subscriptions: Vec<String>,
    client: BrokerClient,
    ready: watch::Sender<bool>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("broker event loop shutting down");
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to broker, resubscribing");
                        for topic in &subscriptions {
                            if let Err(err) = client.subscribe(topic, QoS::AtLeastOnce).await {
                                warn!(%topic, error = %err, "failed to subscribe");
                            }
                        }
                        let _ = ready.send(true);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let raw = String::from_utf8_lossy(&publish.payload).to_string();
                        debug!(topic = %publish.topic, %raw, "inbound publish");
                        if matches!(classify(&publish.topic), Some(TopicShape::Discovery)) {
                            // Retained `/config` payloads are our own discovery
                            // announcements echoed back by the broker, never telemetry.
                            continue;
                        }
                        if is_invalid_payload(&raw) {
                            continue;
                        }
                        let message = IngressMessage { topic: publish.topic, raw };
                        if ingress.try_send(message).is_err() {
                            warn!("ingress channel full or closed, dropping inbound publish");
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "broker connection error, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
