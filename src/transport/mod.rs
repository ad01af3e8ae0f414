//! The broker transport: owns the MQTT connection and turns it into the
//! ingress channel the statistics engine consumes and the publish handle
//! the outbound worker drains into.

mod broker;

pub use broker::{connect, run, BrokerClient};
