//! # narr Common Library
//!
//! Shared code for the narration pipeline crates:
//! - Job model types (chunks, validation results, retry history, state record)
//! - Transactional on-disk state store
//! - Configuration loading and root folder resolution
//! - Error type shared across crates

pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod time;

pub use error::{Error, Result};
pub use model::{Chunk, ChunkDescriptor, ChunkId, ChunkStatus, StateRecord};
pub use store::{AuditEntry, CommitReceipt, LoadedState, StateStore, Transaction};
