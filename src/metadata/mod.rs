//! Metadata persistence for buckets, objects, and multipart sessions.

pub mod memory;
pub mod sqlite;
pub mod store;
