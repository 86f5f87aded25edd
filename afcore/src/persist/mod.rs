//! Versioned, checksummed on-disk cache of reference formulas.
//!
//! A cache file holds a [`header::CacheHeader`], one block per routine and a
//! trailing index mapping routine entry addresses to block offsets. See
//! [`codec`] for the byte layout of the blocks.
//!
//! Every failure caused by the content of a cache is recoverable: the cache,
//! or the affected routine, is treated as absent and recomputed.

pub mod codec;
pub mod header;
pub mod reader;
pub mod session;
pub mod writer;

pub use reader::CacheReader;
pub use session::{CacheSession, cache_path_for};
pub use writer::CacheWriter;
