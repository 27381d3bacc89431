use std::path::{Path, PathBuf};
use std::sync::Arc;

use ctxpipe_compress::AdaptiveCompressor;
use ctxpipe_core::config::Settings;
use ctxpipe_core::walk::CorpusWalker;
use ctxpipe_core::{ContextResult, Embedder, Error, Result, SearchResult, SkippedFile};
use ctxpipe_embed::get_default_embedder;
use ctxpipe_index::{CorpusIndex, IndexOptions, SharedIndex};
use serde::Serialize;
use tracing::{info, warn};

use crate::assembler::{ContextAssembler, ContextRequest};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub chunks_added: usize,
    pub total_chunks: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub skipped: Vec<SkippedFile>,
}

/// One workspace, one persisted index, one assembler.
pub struct ContextPipeline {
    settings: Settings,
    root: PathBuf,
    index_dir: PathBuf,
    index: SharedIndex,
    assembler: ContextAssembler<SharedIndex>,
}

impl ContextPipeline {
    /// Loads models and the saved index for `settings`.
    ///
    /// A compression model that cannot be loaded only disables compression by default.
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let embedder = get_default_embedder(&settings.embedding)
            .map_err(|e| Error::ModelUnavailable(format!("embedding model: {e:#}")))?;
        let compressor = if settings.compression.enabled {
            match AdaptiveCompressor::from_settings(&settings.compression) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(
                        error = %e,
                        "compression model unavailable; context will not be compressed"
                    );
                    None
                }
            }
        } else {
            None
        };
        Self::with_components(settings, embedder, compressor)
    }

    pub fn with_components(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        compressor: Option<AdaptiveCompressor>,
    ) -> Result<Self> {
        let splitter = settings.splitter()?;
        let root = settings.workspace_root();
        let index_dir = settings.index_dir();
        let options = IndexOptions {
            replace_changed_files: settings.index.replace_changed_files,
            embed_timeout: settings.embedding.timeout(),
        };
        let index = SharedIndex::new(CorpusIndex::load(&index_dir, splitter, embedder, options)?);
        let compress_by_default = settings.compression.enabled;
        let assembler = ContextAssembler::new(
            index.clone(),
            compressor,
            compress_by_default,
            settings.context.clone(),
        );
        info!(
            root = %root.display(),
            index_dir = %index_dir.display(),
            compression = assembler.compresses_by_default(),
            "context pipeline ready"
        );
        Ok(Self { settings, root, index_dir, index, assembler })
    }

    /// Indexes every matching file under the workspace root, then saves the index.
    pub fn index_workspace(&self, force: bool) -> Result<IndexSummary> {
        let mut walker = CorpusWalker::new(&self.settings.workspace.extensions);
        if let Some(name) = self.index_dir.file_name().and_then(|n| n.to_str()) {
            walker = walker.skip_dir(name);
        }
        let mut index = self.index.write()?;
        let report = index.index_walk(&self.root, &walker, force)?;
        index.save(&self.index_dir)?;
        Ok(IndexSummary {
            chunks_added: report.chunks_added,
            total_chunks: index.total_chunks(),
            files_indexed: report.files_indexed,
            files_unchanged: report.files_unchanged,
            skipped: report.skipped,
        })
    }

    /// Drops chunks left behind by changed files and saves; returns how many went.
    pub fn compact(&self) -> Result<usize> {
        let mut index = self.index.write()?;
        let removed = index.compact();
        if removed > 0 {
            index.save(&self.index_dir)?;
        }
        Ok(removed)
    }

    pub fn get_context(&self, query: &str) -> Result<ContextResult> {
        self.assembler.get_context(query, &self.default_request())
    }

    pub fn get_context_with(&self, query: &str, request: &ContextRequest) -> Result<ContextResult> {
        self.assembler.get_context(query, request)
    }

    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.index.read()?.search(query, k, self.settings.retrieval.min_score)
    }

    pub fn default_request(&self) -> ContextRequest {
        ContextRequest::from_settings(&self.settings)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.index.read()?.is_empty())
    }

    pub fn total_chunks(&self) -> Result<usize> {
        Ok(self.index.read()?.total_chunks())
    }

    pub fn stale_chunks(&self) -> Result<usize> {
        Ok(self.index.read()?.stale_chunks())
    }

    pub fn compresses_by_default(&self) -> bool {
        self.assembler.compresses_by_default()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }
}
