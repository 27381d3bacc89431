//! Shared types, traits, configuration and chunking for the context pipeline.

#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod chunker;
pub mod config;
pub mod deadline;
pub mod error;
pub mod traits;
pub mod types;
pub mod walk;

pub use chunker::{ChunkSplitter, MIN_CHUNK_WORDS};
pub use error::{Error, Result};
pub use traits::{CompressionModel, Embedder, Retriever, VectorStore};
pub use types::*;
