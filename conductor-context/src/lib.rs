//! conductor-context - the Vector Store (V), §4.2.
//!
//! An in-process, circuit-breaker-guarded cosine-similarity index. The
//! Context Retriever (which lives in the `conductor` crate, since it also
//! needs the Memory Store) composes this with keyword search to produce
//! hybrid results; this crate has no knowledge of that composition.

pub mod cli;
pub mod config;
mod circuit;
mod embed;
mod error;
mod vector;

pub use circuit::CircuitBreaker;
pub use embed::{EmbeddingProvider, HashEmbedder, cosine_similarity};
pub use error::{Result, VectorError};
pub use vector::{VectorHit, VectorRecord, VectorStore};
