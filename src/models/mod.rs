//! Domain models for the safe browsing client.
//!
//! Data structures shared across the codec, the list state engine and the
//! protocol driver.

mod chunk;
mod config;

// Re-export all public types
pub use chunk::{Chunk, ChunkKind, ChunkNum, HostHash, LookupHash};
pub use config::Config;
