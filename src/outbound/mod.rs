//! The outbound message pipeline: discovery/state/service-call messages,
//! the enabled-flag filter and FIFO queue, and the worker that drains them
//! to the broker.

mod message;
mod queue;
mod worker;

pub use message::{switch_service_call, OutboundMessage};
pub use queue::{OutboundQueue, CAPACITY};
pub use worker::{run, OUTBOUND_CHANNEL_CAPACITY};
