use std::collections::BTreeSet;

use ctxpipe_compress::AdaptiveCompressor;
use ctxpipe_core::config::{ContextSettings, Settings};
use ctxpipe_core::{ContextResult, ContextStats, Error, Result, Retriever, SearchResult};
use tracing::{debug, info, warn};

/// Placed between retrieved chunks in the combined context.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, PartialEq)]
pub struct ContextRequest {
    pub k: usize,
    pub min_score: f32,
    pub max_tokens: usize,
    /// `None` follows the assembler's default policy.
    pub compress: Option<bool>,
}

impl ContextRequest {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            k: settings.retrieval.k,
            min_score: settings.retrieval.min_score,
            max_tokens: settings.context.max_tokens,
            compress: None,
        }
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }
}

pub struct ContextAssembler<R: Retriever> {
    retriever: R,
    compressor: Option<AdaptiveCompressor>,
    compress_by_default: bool,
    budget: ContextSettings,
}

impl<R: Retriever> ContextAssembler<R> {
    /// Compression-by-default is only honored when a compressor is present.
    pub fn new(
        retriever: R,
        compressor: Option<AdaptiveCompressor>,
        compress_by_default: bool,
        budget: ContextSettings,
    ) -> Self {
        let compress_by_default = if compress_by_default && compressor.is_none() {
            warn!(
                "compression requested but no compressor is available; context stays uncompressed"
            );
            false
        } else {
            compress_by_default
        };
        Self { retriever, compressor, compress_by_default, budget }
    }

    pub fn compresses_by_default(&self) -> bool {
        self.compress_by_default
    }

    pub fn has_compressor(&self) -> bool {
        self.compressor.is_some()
    }

    pub fn retriever(&self) -> &R {
        &self.retriever
    }

    /// `min(max_target_ratio, max_tokens / estimated_tokens)`, or the fallback
    /// ratio when the estimate is zero.
    pub fn target_ratio(&self, text: &str, max_tokens: usize) -> f32 {
        let estimated = text.chars().count() as f32 / self.budget.chars_per_token.max(1) as f32;
        if estimated == 0.0 {
            return self.budget.fallback_ratio;
        }
        (max_tokens as f32 / estimated).min(self.budget.max_target_ratio)
    }

    /// Retrieves, combines and optionally compresses context for `query`.
    ///
    /// An empty retrieval is answered before the compression decision, so a
    /// missing compressor never turns "no context" into an error.
    pub fn get_context(&self, query: &str, request: &ContextRequest) -> Result<ContextResult> {
        let results = match self.retriever.search(query, request.k, request.min_score) {
            Ok(results) => results,
            Err(e) if e.is_timeout() => {
                warn!(error = %e, "query embedding timed out; returning empty context");
                return Ok(ContextResult::empty());
            }
            Err(e) => return Err(e),
        };
        if results.is_empty() {
            debug!(query, "no chunks above the score threshold");
            return Ok(ContextResult::empty());
        }

        let compress = request.compress.unwrap_or(self.compress_by_default);
        let (combined, sources) = combine(&results);
        if !compress {
            return Ok(uncompressed(combined, sources));
        }
        let Some(compressor) = &self.compressor else {
            return Err(Error::ModelUnavailable(
                "compression was requested but no compression model is loaded".into(),
            ));
        };

        let ratio = self.target_ratio(&combined, request.max_tokens);
        match compressor.compress(&combined, ratio) {
            Ok(outcome) => {
                let stats = ContextStats::from_outcome(&outcome);
                info!(
                    chunks = results.len(),
                    target_ratio = ratio,
                    origin_tokens = stats.origin_tokens,
                    compressed_tokens = stats.compressed_tokens,
                    "assembled compressed context"
                );
                Ok(ContextResult { context: outcome.compressed_text, sources, stats })
            }
            Err(e) if e.is_timeout() => {
                warn!(error = %e, "compression timed out; returning uncompressed context");
                Ok(uncompressed(combined, sources))
            }
            Err(e) => Err(e),
        }
    }
}

/// Source-tagged chunk texts joined by [`CHUNK_SEPARATOR`], plus the distinct sources.
pub fn combine(results: &[SearchResult]) -> (String, BTreeSet<String>) {
    let combined = results
        .iter()
        .map(|r| format!("[{}]\n{}", r.chunk.source, r.chunk.text))
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR);
    let sources = results.iter().map(|r| r.chunk.source.clone()).collect();
    (combined, sources)
}

fn uncompressed(combined: String, sources: BTreeSet<String>) -> ContextResult {
    let words = combined.split_whitespace().count();
    ContextResult { context: combined, sources, stats: ContextStats::uncompressed(words) }
}
