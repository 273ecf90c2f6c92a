//! In-memory document collection backend for Hypernova.
//!
//! `hypernova-memory` implements the `Collection` trait over plain vectors
//! of JSON documents. It exists for tests and small embedded use: the
//! filter/sort/projection subset it understands is exactly what the
//! resolver emits.

pub mod collection;
pub mod filter;

pub use collection::MemoryCollection;
pub use filter::matches;
