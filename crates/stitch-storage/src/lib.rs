//! Object storage for the stitch packaging pipeline.
//!
//! [`ObjectStore`] is the seam the pipeline fetches and publishes through.
//! [`S3Store`] talks to S3 or any S3-compatible endpoint; [`LocalStore`]
//! maps buckets to directories.

pub mod client;
pub mod error;
pub mod local;
pub mod store;

pub use client::{S3Config, S3Store, DEFAULT_REGION};
pub use error::{Direction, StorageError, StorageResult};
pub use local::LocalStore;
pub use store::ObjectStore;
