//! Shared foundational types used across the kiln build cache.
//!
//! This crate provides the hashing primitives (fast key hashes and streamed
//! file content digests) and the file timestamp sentinel shared by the cache
//! engine, its configuration layer, and the command-line tool.

#![warn(missing_docs)]

pub mod hash;
pub mod time;

pub use hash::{ContentHash, FileDigest, HashState};
pub use time::{now_millis, FileTimestamp};
