//! Storage cluster access: the byte plane of the gateway.
//!
//! Object payloads live in pooled cluster storage addressed by
//! (pool, object id); everything else about an object is metadata.

pub mod backend;
pub mod http;
pub mod memory;
