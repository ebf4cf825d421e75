//! Blob store abstraction for stratadb log files.

pub mod blob;
pub mod paths;

pub use blob::{BlobOp, BlobStore, LocalBlobStore, MemoryBlobStore};
pub use paths::{delta_log_path, insert_log_path, stats_log_path};
