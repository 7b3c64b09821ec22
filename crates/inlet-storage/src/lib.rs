//! Inlet Storage - Database and blob storage abstraction
//!
//! Repository traits for domains, inbound configuration, recipient rules,
//! inbound emails and the ingest job queue, with PostgreSQL and in-memory
//! implementations, plus the blob store contract and its backends.

pub mod blob;
pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use blob::{create_blob_store, BlobStore, LocalBlobStore};
pub use db::DatabasePool;
pub use memory::{MemoryBlobStore, MemoryStore};
pub use models::*;
pub use repository::*;
