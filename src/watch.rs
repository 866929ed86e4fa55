//! Watch runtime: events, change coalescing, and the daemon.

mod coalescer;
mod events;
mod runtime;

pub use coalescer::{ChangeCoalescer, DirState, FlushBatch, WatcherDisposition};
pub use events::{ChangeEvent, WatchConfig};
pub use runtime::MirrorDaemon;
