//! Query-time context assembly: retrieve, combine, compress to a token budget.

#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

mod assembler;
mod pipeline;

pub use assembler::{combine, ContextAssembler, ContextRequest, CHUNK_SEPARATOR};
pub use pipeline::{ContextPipeline, IndexSummary};
