//! Local, recoverable error types for each component.
//!
//! Structural faults (type conflicts, transport loss the client can't
//! recover from) surface as `anyhow::Error` at the worker boundary and are
//! caught by the supervisor (see `supervisor`); these enums are for errors a
//! caller within the same component can reasonably match on.

use thiserror::Error;

/// Errors raised while ingesting or querying the statistics engine.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("topic '{topic}' was first observed as {first_kind} but later received a {new_kind} value ('{raw}')")]
    TopicTypeConflict {
        topic: String,
        first_kind: &'static str,
        new_kind: &'static str,
        raw: String,
    },

    #[error("topic '{0}' is not in the percentile registry")]
    UnregisteredTopic(String),
}

/// Errors surfaced by the broker transport wrapper.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker connection not yet established")]
    NotConnected,

    #[error("outbound queue is full, dropping message for topic '{0}'")]
    QueueFull(String),

    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}
