//! Daemon runtime: one event loop feeding a [`Reconciler`](resync_engine::Reconciler)
//! from the local-operation stream, the external batch stream and its own
//! finished sub-operations, plus a `notify` bridge producing batches.

mod error;
pub mod runtime;
pub mod watch;

pub use error::DaemonError;
pub use runtime::{
    effective_config, init_tracing, observer_channel, runtime, watch, watch_blocking, LoopEvent,
    LoopStats, Service, ServiceHandle,
};
pub use watch::{batch_events, classify_event, classify_event_with, WatchBridge};
