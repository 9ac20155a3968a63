//! Safe Browsing v2 client library.
//!
//! Maintains local copies of provider threat lists by applying incremental
//! add/sub chunk updates to a persistent per-list journal, and answers
//! which list, if any, a URL appears on. Partial (hash-prefix) matches are
//! upgraded to confirmed full-hash matches through an on-demand provider
//! request. Works offline against persisted data and keeps serving lookups
//! while an update is applied.
//!
//! # Architecture
//!
//! - `models`: data structures (Config, Chunk)
//! - `codec`: wire formats (chunks, gethash responses, chunk ranges)
//! - `index`: radix trie backing the per-list hash sets
//! - `list`: per-list state engine and journal transactions
//! - `services`: provider protocol operations (downloads, gethash)
//! - `pipeline`: URL lookup pipeline and retry backoff
//! - `client`: the public handle and background reload task
//! - `utils`: URL canonicalization, HTTP transport
//! - `error`: unified error handling

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod list;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod utils;

// Re-export commonly used items
pub use client::SafeBrowsing;
pub use error::{AppError, Result};
pub use models::Config;
pub use utils::http::{Transport, TransportResponse};
