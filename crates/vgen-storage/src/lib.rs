//! Object storage for generated media.
//!
//! This crate provides:
//! - The `ObjectStore` seam used by the migrator and submitter
//! - `R2Client`: Cloudflare R2 over the S3 API, with streamed
//!   download-then-upload copies from provider URLs
//! - Deterministic key derivation per (user, task, role)

pub mod client;
pub mod error;
pub mod keys;
pub mod object_store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use keys::{input_key, media_key, thumbnail_key, video_key, MediaRole};
pub use object_store::ObjectStore;
