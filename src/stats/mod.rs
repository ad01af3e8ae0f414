//! The statistics engine: ingestion, per-topic buffers, time-weighted
//! percentiles, and the fan-out that turns one snapshot into many.

mod engine;
mod fanout;
mod reading;
mod snapshot;
mod worker;

pub use engine::StatisticsEngine;
pub use fanout::{Fanout, SNAPSHOT_CHANNEL_CAPACITY};
pub use reading::{Reading, ReadingBuffer, Topic, TopicValue};
pub use snapshot::{PercentileKey, Snapshot};
pub use worker::{run, IngressMessage, INGRESS_CHANNEL_CAPACITY};
