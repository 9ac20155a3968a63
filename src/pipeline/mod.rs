//! High-level operations: the URL query pipeline and the retry schedule
//! shared by the update loop and the full-hash engine.

pub mod backoff;
pub mod lookup;
