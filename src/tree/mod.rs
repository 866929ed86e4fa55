//! Tree Cache
//!
//! The in-memory mirror of the watched directory: virtual paths, cached
//! nodes, filesystem walks and aggregate sizes.

pub mod aggregate;
pub mod cache;
pub mod node;
pub mod path;
pub mod walker;

pub use aggregate::SizeAggregator;
pub use cache::{RebuildOutcome, TreeCache};
pub use node::{DirectoryNode, EntryKind, FileEntry, Listing, ListingEntry};
pub use path::{is_sane, PathCodec, VirtualPath};
pub use walker::{FileScan, IgnoreRules, SubtreeScan, Walker, WalkerConfig};
