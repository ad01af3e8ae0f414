mod arbitration;
mod config;
mod discovery;
mod error;
mod governor;
mod outbound;
mod publishers;
mod stats;
mod supervisor;
mod telemetry;
mod time;
mod topics;
mod transport;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use arbitration::{ArbitrationEngine, BatteryGroup};
use config::{AppConfig, Cli};
use outbound::OutboundMessage;
use publishers::PublishersEngine;
use stats::{Fanout, IngressMessage, Snapshot, StatisticsEngine};
use time::{Clock, SharedClock, SystemClock};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli).context("loading configuration")?;
    info!(broker = %config.broker.host, "configuration loaded");

    let cancel = CancellationToken::new();
    tokio::spawn(telemetry::shutdown_signal(cancel.clone()));

    let clock = SharedClock(Arc::new(SystemClock));

    let (broker_client, eventloop, ready_tx, ready_rx) =
        transport::connect(&config.broker, &config.credentials);
    let subscriptions = vec![format!("{}/#", config.topics.prefix)];

    let (ingress_tx, ingress_rx) = mpsc::channel::<IngressMessage>(stats::INGRESS_CHANNEL_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(outbound::OUTBOUND_CHANNEL_CAPACITY);

    let mut fanout = Fanout::new();
    let arbitration_snapshots = fanout.subscribe();
    let publishers_snapshots = fanout.subscribe();
    let outbound_snapshots = fanout.subscribe();

    // Discovery/config messages flow regardless of the enabled flag (see
    // OutboundQueue::enqueue) and are buffered until the broker connection
    // is ready (see the outbound worker's `ready` gate), so they're queued
    // once here at startup.
    let discovery_messages = discovery::inverter_switch_messages(&config.topics, &config.battery_groups)
        .into_iter()
        .chain(discovery::derived_publisher_messages(&config.topics, &config.battery_groups, &config.publishers));
    for message in discovery_messages {
        if outbound_tx.send(message).await.is_err() {
            warn!("outbound channel closed before discovery messages could be queued");
        }
    }

    spawn_broker(&cancel, broker_client.clone(), eventloop, ready_tx, ingress_tx, subscriptions);
    spawn_statistics(&config, &cancel, clock.clone(), ingress_rx, fanout);
    spawn_arbitration(&config, &cancel, clock.clone(), arbitration_snapshots, outbound_tx.clone());
    spawn_publishers(&config, &cancel, clock.clone(), publishers_snapshots, outbound_tx.clone());
    spawn_outbound(&config, &cancel, cli.force_enable, broker_client, ready_rx, outbound_rx, outbound_snapshots);

    cancel.cancelled().await;
    info!("shutdown complete");
    Ok(())
}

fn spawn_broker(
    cancel: &CancellationToken,
    client: transport::BrokerClient,
    eventloop: rumqttc::EventLoop,
    ready_tx: watch::Sender<bool>,
    ingress_tx: mpsc::Sender<IngressMessage>,
    subscriptions: Vec<String>,
) {
    let cancel = cancel.clone();
    let mut resources = Some((eventloop, ready_tx));
    tokio::spawn(supervisor::supervise("broker", cancel.clone(), move || {
        let client = client.clone();
        let ingress_tx = ingress_tx.clone();
        let subscriptions = subscriptions.clone();
        let cancel = cancel.clone();
        let resources = resources.take();
        async move {
            match resources {
                Some((eventloop, ready_tx)) => {
                    transport::run(eventloop, ingress_tx, subscriptions, client, ready_tx, cancel).await
                }
                None => Err(anyhow!("broker event loop already consumed; cannot restart in-process")),
            }
        }
    }));
}

fn spawn_statistics(
    config: &AppConfig,
    cancel: &CancellationToken,
    clock: SharedClock,
    ingress_rx: mpsc::Receiver<IngressMessage>,
    fanout: Fanout,
) {
    let engine = StatisticsEngine::new(&config.expected_topics, &config.percentiles, Vec::new(), clock.now());
    let cancel = cancel.clone();
    let mut resources = Some((engine, ingress_rx, fanout));
    tokio::spawn(supervisor::supervise("statistics", cancel.clone(), move || {
        let clock = clock.clone();
        let cancel = cancel.clone();
        let resources = resources.take();
        async move {
            match resources {
                Some((engine, ingress_rx, fanout)) => stats::run(engine, ingress_rx, fanout, clock, cancel).await,
                None => Err(anyhow!("statistics engine resources already consumed; cannot restart in-process")),
            }
        }
    }));
}

fn spawn_arbitration(
    config: &AppConfig,
    cancel: &CancellationToken,
    clock: SharedClock,
    snapshots: mpsc::Receiver<Snapshot>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
) {
    let groups: Vec<BatteryGroup> = config.battery_groups.iter().map(BatteryGroup::from_config).collect();
    let engine = ArbitrationEngine::new(groups, config.arbitration_topics.clone(), config.governors.clone());
    let cancel = cancel.clone();
    let mut resources = Some((engine, snapshots));
    tokio::spawn(supervisor::supervise("arbitration", cancel.clone(), move || {
        let clock = clock.clone();
        let cancel = cancel.clone();
        let outbound_tx = outbound_tx.clone();
        let resources = resources.take();
        async move {
            match resources {
                Some((engine, snapshots)) => arbitration::run(engine, snapshots, outbound_tx, clock, cancel).await,
                None => Err(anyhow!("arbitration engine resources already consumed; cannot restart in-process")),
            }
        }
    }));
}

fn spawn_publishers(
    config: &AppConfig,
    cancel: &CancellationToken,
    clock: SharedClock,
    snapshots: mpsc::Receiver<Snapshot>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
) {
    let engine = PublishersEngine::new(&config.battery_groups);
    let publishers_config = config.publishers.clone();
    let arbitration_topics = config.arbitration_topics.clone();
    let cancel = cancel.clone();
    let mut resources = Some((engine, snapshots));
    tokio::spawn(supervisor::supervise("publishers", cancel.clone(), move || {
        let clock = clock.clone();
        let cancel = cancel.clone();
        let outbound_tx = outbound_tx.clone();
        let publishers_config = publishers_config.clone();
        let arbitration_topics = arbitration_topics.clone();
        let resources = resources.take();
        async move {
            match resources {
                Some((engine, snapshots)) => {
                    publishers::run(engine, snapshots, outbound_tx, publishers_config, arbitration_topics, clock, cancel).await
                }
                None => Err(anyhow!("publishers engine resources already consumed; cannot restart in-process")),
            }
        }
    }));
}

fn spawn_outbound(
    config: &AppConfig,
    cancel: &CancellationToken,
    force_enable: bool,
    client: transport::BrokerClient,
    ready_rx: watch::Receiver<bool>,
    outbound_rx: mpsc::Receiver<OutboundMessage>,
    snapshots: mpsc::Receiver<Snapshot>,
) {
    let service_call_topic = config.topics.service_call_topic.clone();
    let enabled_topic = config.topics.enabled_topic.clone();
    let cancel = cancel.clone();
    let mut resources = Some((outbound_rx, snapshots));
    tokio::spawn(supervisor::supervise("outbound", cancel.clone(), move || {
        let client = client.clone();
        let ready_rx = ready_rx.clone();
        let cancel = cancel.clone();
        let service_call_topic = service_call_topic.clone();
        let enabled_topic = enabled_topic.clone();
        let resources = resources.take();
        async move {
            match resources {
                Some((outbound_rx, snapshots)) => {
                    outbound::run(
                        outbound_rx,
                        snapshots,
                        ready_rx,
                        client,
                        service_call_topic,
                        enabled_topic,
                        force_enable,
                        cancel,
                    )
                    .await
                }
                None => Err(anyhow!("outbound queue resources already consumed; cannot restart in-process")),
            }
        }
    }));
}
