//! Wire format codecs.
//!
//! - `chunk`: binary add/sub chunk frames (also the journal encoding)
//! - `fullhash`: gethash response envelope
//! - `ranges`: compact chunk-number range expressions

pub mod chunk;
pub mod fullhash;
pub mod ranges;

pub use chunk::{encode_chunk, ChunkReader};
pub use fullhash::{parse_full_hash_response, FullHashRecord, FullHashResponse, FULL_HASH_LEN};
pub use ranges::{build_chunk_ranges, parse_chunk_range};
