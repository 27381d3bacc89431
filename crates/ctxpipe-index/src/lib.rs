//! Corpus indexing and retrieval over a flat inner-product vector store.
//!
//! Layout of an index directory:
//! - `meta.json`: chunk records, file digests, embedder id, current vector file
//! - `vectors-<generation>.bin`: ids and vectors, see [`store`]

#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

mod corpus;
pub mod meta;
mod retriever;
pub mod store;

pub use corpus::{CorpusIndex, IndexOptions};
pub use retriever::SharedIndex;
pub use store::FlatIpStore;
