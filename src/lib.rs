//! Dirmirror: a live in-memory mirror of a directory subtree.
//!
//! The mirror keeps a cache of every directory under a root, recomputes
//! aggregate sizes as things change, and pushes per-directory listings to
//! remote observers over WebSocket. Observers can also mutate the tree.

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod subscription;
pub mod tree;
pub mod types;
pub mod watch;

pub use engine::{Command, MirrorEngine, MirrorHandle, MirrorState, MirrorStats};
pub use error::{ApiError, ErrorClass, StorageError};
