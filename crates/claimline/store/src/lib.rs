//! Claimline claim store.
//!
//! Claim records persist as an explicit Index → Chunk structure over a generic
//! key-value [`StorageBackend`]. Each full-set rewrite writes fresh chunk keys,
//! then the Index that lists them, then removes the previous generation, so a
//! crash at any point leaves a loadable Index.
//!
//! Backends:
//! - [`MemoryBackend`]: deterministic, test-friendly, optional per-item quota
//! - [`FileBackend`]: one JSON file per key under a directory

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod backend;
mod config;
mod error;
mod file;
mod layout;
mod store;

pub use backend::{MemoryBackend, StorageBackend};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use file::FileBackend;
pub use layout::{Chunk, ChunkIndex};
pub use store::ClaimStore;
