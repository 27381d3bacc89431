//! Incremental corpus index: chunk metadata, file digests and vectors.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ctxpipe_core::deadline::run_with_timeout;
use ctxpipe_core::walk::CorpusWalker;
use ctxpipe_core::{
    Chunk, ChunkId, ChunkSplitter, DirectoryReport, Embedder, Error, FileRecord, IndexedChunk,
    Result, SearchResult, VectorStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::meta::{vectors_file_name, IndexMeta, META_VERSION};
use crate::store::FlatIpStore;

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Drop a file's previous chunks when it is reindexed.
    pub replace_changed_files: bool,
    pub embed_timeout: Option<Duration>,
}

enum FileOutcome {
    Unchanged,
    Empty,
    Indexed(usize),
}

pub struct CorpusIndex {
    splitter: ChunkSplitter,
    embedder: Arc<dyn Embedder>,
    options: IndexOptions,
    store: FlatIpStore,
    chunks: BTreeMap<ChunkId, IndexedChunk>,
    files: BTreeMap<String, FileRecord>,
    next_id: ChunkId,
    generation: u64,
}

impl CorpusIndex {
    pub fn new(
        splitter: ChunkSplitter,
        embedder: Arc<dyn Embedder>,
        options: IndexOptions,
    ) -> Self {
        let store = FlatIpStore::new(embedder.dim());
        Self {
            splitter,
            embedder,
            options,
            store,
            chunks: BTreeMap::new(),
            files: BTreeMap::new(),
            next_id: 0,
            generation: 0,
        }
    }

    /// Restores a saved index. A directory without metadata yields an empty index.
    pub fn load(
        dir: &Path,
        splitter: ChunkSplitter,
        embedder: Arc<dyn Embedder>,
        options: IndexOptions,
    ) -> Result<Self> {
        let Some(meta) = IndexMeta::read(dir)? else {
            info!(dir = %dir.display(), "no saved index, starting empty");
            return Ok(Self::new(splitter, embedder, options));
        };
        if meta.embedder_id != embedder.embedder_id() || meta.dim != embedder.dim() {
            return Err(Error::ModelMismatch {
                stored: meta.embedder_id,
                current: embedder.embedder_id().to_string(),
            });
        }
        let store = FlatIpStore::load(&dir.join(&meta.vectors_file))?;
        if store.dim() != meta.dim {
            return Err(Error::Misaligned(format!(
                "vector file has dimension {}, metadata says {}",
                store.dim(),
                meta.dim
            )));
        }
        let meta_ids: Vec<ChunkId> = meta.chunks.iter().map(|c| c.id).collect();
        if store.ids() != meta_ids.as_slice() {
            return Err(Error::Misaligned(format!(
                "{} vectors vs {} chunk records in {}",
                store.count(),
                meta.chunks.len(),
                dir.display()
            )));
        }
        if meta_ids.iter().any(|id| *id >= meta.next_id) {
            return Err(Error::Misaligned("chunk id beyond next_id".into()));
        }
        let chunks = meta.chunks.into_iter().map(|c| (c.id, c)).collect();
        info!(
            dir = %dir.display(),
            chunks = store.count(),
            files = meta.files.len(),
            "loaded index"
        );
        Ok(Self {
            splitter,
            embedder,
            options,
            store,
            chunks,
            files: meta.files,
            next_id: meta.next_id,
            generation: meta.generation,
        })
    }

    /// Writes a new vector generation, then commits it by replacing the metadata.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let generation = self.generation + 1;
        let vectors_file = vectors_file_name(generation);
        self.store.save(&dir.join(&vectors_file))?;
        let meta = IndexMeta {
            version: META_VERSION,
            embedder_id: self.embedder.embedder_id().to_string(),
            dim: self.embedder.dim(),
            generation,
            vectors_file: vectors_file.clone(),
            next_id: self.next_id,
            saved_at: chrono::Utc::now().timestamp(),
            chunks: self.chunks.values().cloned().collect(),
            files: self.files.clone(),
        };
        meta.write_atomic(dir)?;
        self.generation = generation;
        remove_old_generations(dir, &vectors_file);
        debug!(dir = %dir.display(), generation, chunks = self.store.count(), "saved index");
        Ok(())
    }

    pub fn index_file(&mut self, path: &Path, force: bool) -> Result<usize> {
        match self.index_file_inner(path, force)? {
            FileOutcome::Indexed(n) => Ok(n),
            FileOutcome::Unchanged | FileOutcome::Empty => Ok(0),
        }
    }

    fn index_file_inner(&mut self, path: &Path, force: bool) -> Result<FileOutcome> {
        let path = std::fs::canonicalize(path).map_err(|e| Error::io(path, e))?;
        let bytes = std::fs::read(&path).map_err(|e| Error::io(&path, e))?;
        let digest = blake3::hash(&bytes).to_hex().to_string();
        let source = path.to_string_lossy().to_string();
        if !force && self.files.get(&source).is_some_and(|r| r.digest == digest) {
            debug!(file = %source, "unchanged, skipping");
            return Ok(FileOutcome::Unchanged);
        }

        let text = String::from_utf8_lossy(&bytes);
        let chunks = self.splitter.split(&text, &source);
        if chunks.is_empty() {
            debug!(file = %source, "no chunks of at least the minimum length");
            return Ok(FileOutcome::Empty);
        }

        let vectors = self.embed(chunks.iter().map(|c| c.text.clone()).collect())?;
        if vectors.len() != chunks.len() {
            return Err(Error::Embedding(anyhow::anyhow!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let n = chunks.len();
        let ids: Vec<ChunkId> = (self.next_id..self.next_id + n as u64).collect();
        self.store.add(&ids, &vectors)?;
        let previous: Vec<ChunkId> = if self.options.replace_changed_files {
            self.chunks.values().filter(|c| c.chunk.source == source).map(|c| c.id).collect()
        } else {
            Vec::new()
        };
        for (id, chunk) in ids.iter().zip(chunks) {
            self.chunks.insert(*id, IndexedChunk { id: *id, digest: digest.clone(), chunk });
        }
        self.next_id += n as u64;
        let record = FileRecord { digest, chunks: n, indexed_at: chrono::Utc::now().timestamp() };
        self.files.insert(source.clone(), record);
        if !previous.is_empty() {
            self.remove_ids(&previous.into_iter().collect());
        }
        info!(file = %source, chunks = n, "indexed file");
        Ok(FileOutcome::Indexed(n))
    }

    pub fn index_directory<S: AsRef<str>>(
        &mut self,
        root: &Path,
        extensions: &[S],
        force: bool,
    ) -> Result<DirectoryReport> {
        let walker = CorpusWalker::new(extensions.iter().map(|e| e.as_ref()));
        self.index_walk(root, &walker, force)
    }

    /// Best-effort pass over every file `walker` selects under `root`.
    pub fn index_walk(
        &mut self,
        root: &Path,
        walker: &CorpusWalker,
        force: bool,
    ) -> Result<DirectoryReport> {
        if !root.is_dir() {
            return Err(Error::NotFound(format!("corpus directory {}", root.display())));
        }
        let outcome = walker.walk(root);
        let mut report = DirectoryReport { skipped: outcome.errors, ..Default::default() };

        let pb = ProgressBar::new(outcome.files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        for file in &outcome.files {
            let name = file.file_name().map(|n| n.to_string_lossy().to_string());
            pb.set_message(name.unwrap_or_default());
            match self.index_file_inner(file, force) {
                Ok(FileOutcome::Indexed(n)) => {
                    report.chunks_added += n;
                    report.files_indexed += 1;
                }
                Ok(FileOutcome::Unchanged) => report.files_unchanged += 1,
                Ok(FileOutcome::Empty) => {}
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "skipping file");
                    report.skip(file.clone(), e.to_string());
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();
        info!(
            root = %root.display(),
            chunks_added = report.chunks_added,
            files_indexed = report.files_indexed,
            files_unchanged = report.files_unchanged,
            skipped = report.skipped.len(),
            "directory pass complete"
        );
        Ok(report)
    }

    pub fn search(&self, query: &str, k: usize, min_score: f32) -> Result<Vec<SearchResult>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = self.embed(vec![query.to_string()])?;
        let Some(q) = vectors.pop() else {
            return Err(Error::Embedding(anyhow::anyhow!(
                "embedder returned no vector for the query"
            )));
        };
        let mut results = Vec::new();
        for (id, score) in self.store.search(&q, k)? {
            if !(score >= min_score) {
                continue;
            }
            let chunk = self
                .chunks
                .get(&id)
                .ok_or_else(|| Error::Misaligned(format!("vector {id} has no chunk record")))?;
            results.push(SearchResult { id, score, chunk: chunk.chunk.clone() });
        }
        Ok(results)
    }

    /// Chunks whose digest no longer matches the current record for their file.
    pub fn stale_chunks(&self) -> usize {
        self.chunks.values().filter(|c| self.is_stale(c)).count()
    }

    /// Removes stale chunks from both the store and the metadata.
    pub fn compact(&mut self) -> usize {
        let stale: HashSet<ChunkId> =
            self.chunks.values().filter(|c| self.is_stale(c)).map(|c| c.id).collect();
        if stale.is_empty() {
            return 0;
        }
        let removed = self.remove_ids(&stale);
        info!(removed, remaining = self.store.count(), "compacted index");
        removed
    }

    fn is_stale(&self, chunk: &IndexedChunk) -> bool {
        let current = self.files.get(&chunk.chunk.source).map(|r| r.digest.as_str());
        current != Some(chunk.digest.as_str())
    }

    fn remove_ids(&mut self, ids: &HashSet<ChunkId>) -> usize {
        let removed = self.store.retain(&|id| !ids.contains(&id));
        self.chunks.retain(|id, _| !ids.contains(id));
        removed
    }

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let embedder = Arc::clone(&self.embedder);
        let expected = embedder.dim();
        let vectors = run_with_timeout("embed", self.options.embed_timeout, move || {
            embedder.embed_batch(&texts)
        })?
        .map_err(Error::Embedding)?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(Error::Embedding(anyhow::anyhow!(
                "expected dimension {expected}, got {}",
                bad.len()
            )));
        }
        Ok(vectors)
    }

    pub fn total_chunks(&self) -> usize {
        self.store.count()
    }

    pub fn is_empty(&self) -> bool {
        self.store.count() == 0
    }

    pub fn files(&self) -> &BTreeMap<String, FileRecord> {
        &self.files
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(&id).map(|c| &c.chunk)
    }

    /// Indexed chunks in insertion order.
    pub fn chunks(&self) -> impl Iterator<Item = &IndexedChunk> {
        self.chunks.values()
    }

    pub fn embedder_id(&self) -> &str {
        self.embedder.embedder_id()
    }
}

fn remove_old_generations(dir: &Path, current: &str) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("vectors-") && name.ends_with(".bin") && name != current {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(file = %name, error = %e, "could not remove old vector generation");
            }
        }
    }
}
