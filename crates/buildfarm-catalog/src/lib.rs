//! Catalog storage for the buildfarm scheduler.
//!
//! The production catalog is an external service; this crate provides an
//! in-memory implementation of the catalog trait that loads from and
//! checkpoints to a JSON snapshot file. It backs the CLI and the scheduler
//! tests.

pub mod error;
pub mod memory;
pub mod snapshot;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryCatalog;
pub use snapshot::CatalogSnapshot;
