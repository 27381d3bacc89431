//! Domain types shared by the indexing, retrieval and compression stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

pub type ChunkId = u64;

/// A bounded segment of a source document.
///
/// - `text`: whitespace-normalized words of the window, joined by single spaces
/// - `source`: absolute path of the file the chunk came from
/// - `start_offset`: index of the window's first word within the source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source: String,
    pub start_offset: usize,
}

/// A chunk as stored by the corpus index.
///
/// `id` is shared with the chunk's vector row. `digest` is the content digest
/// of the file version that produced the chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: ChunkId,
    pub digest: String,
    #[serde(flatten)]
    pub chunk: Chunk,
}

/// Per-file change-detection record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub digest: String,
    pub chunks: usize,
    pub indexed_at: i64,
}

/// A retrieved chunk with its inner-product similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: ChunkId,
    pub score: f32,
    #[serde(flatten)]
    pub chunk: Chunk,
}

/// What a compression-model collaborator returns for a single call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCompression {
    pub compressed_text: String,
    pub origin_tokens: usize,
    pub compressed_tokens: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionOutcome {
    pub compressed_text: String,
    pub origin_tokens: usize,
    pub compressed_tokens: usize,
    /// `compressed_tokens / origin_tokens`, or 1.0 when nothing was counted.
    pub ratio: f32,
}

impl CompressionOutcome {
    pub fn from_counts(
        compressed_text: String,
        origin_tokens: usize,
        compressed_tokens: usize,
    ) -> Self {
        let ratio =
            if origin_tokens == 0 { 1.0 } else { compressed_tokens as f32 / origin_tokens as f32 };
        Self { compressed_text, origin_tokens, compressed_tokens, ratio }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStats {
    pub origin_tokens: usize,
    pub compressed_tokens: usize,
    pub ratio: f32,
    pub savings_pct: f32,
}

impl ContextStats {
    pub fn empty() -> Self {
        Self { origin_tokens: 0, compressed_tokens: 0, ratio: 1.0, savings_pct: 0.0 }
    }

    pub fn uncompressed(tokens: usize) -> Self {
        Self { origin_tokens: tokens, compressed_tokens: tokens, ratio: 1.0, savings_pct: 0.0 }
    }

    pub fn from_outcome(outcome: &CompressionOutcome) -> Self {
        Self {
            origin_tokens: outcome.origin_tokens,
            compressed_tokens: outcome.compressed_tokens,
            ratio: outcome.ratio,
            savings_pct: (1.0 - outcome.ratio) * 100.0,
        }
    }
}

/// The unit of work handed back to a prompt builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextResult {
    pub context: String,
    pub sources: BTreeSet<String>,
    pub stats: ContextStats,
}

impl ContextResult {
    pub fn empty() -> Self {
        Self { context: String::new(), sources: BTreeSet::new(), stats: ContextStats::empty() }
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a best-effort directory pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryReport {
    pub chunks_added: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub skipped: Vec<SkippedFile>,
}

impl DirectoryReport {
    pub fn skip(&mut self, path: impl Into<PathBuf>, reason: impl Into<String>) {
        self.skipped.push(SkippedFile { path: path.into(), reason: reason.into() });
    }
}
