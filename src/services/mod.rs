//! Provider protocol operations.
//!
//! - `update`: list-of-lists, downloads directives, redirect chunk streams
//! - `gethash`: prefix-to-full-hash confirmation requests

pub mod gethash;
pub mod update;
