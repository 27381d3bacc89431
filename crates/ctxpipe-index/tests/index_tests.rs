use std::path::Path;
use std::sync::Arc;

use ctxpipe_core::{ChunkSplitter, Embedder, Error, Retriever, VectorStore};
use ctxpipe_embed::FakeEmbedder;
use ctxpipe_index::{CorpusIndex, FlatIpStore, IndexOptions, SharedIndex};

fn embedder() -> Arc<dyn Embedder> {
    Arc::new(FakeEmbedder::new(256))
}

/// Embeds like [`FakeEmbedder`] but fails on any batch mentioning "corrupt".
struct Flaky(FakeEmbedder);

impl Embedder for Flaky {
    fn embedder_id(&self) -> &str {
        self.0.embedder_id()
    }

    fn dim(&self) -> usize {
        self.0.dim()
    }

    fn max_len(&self) -> usize {
        self.0.max_len()
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("corrupt")) {
            anyhow::bail!("model rejected input");
        }
        self.0.embed_batch(texts)
    }
}

fn new_index(options: IndexOptions) -> CorpusIndex {
    CorpusIndex::new(ChunkSplitter::new(40, 5).unwrap(), embedder(), options)
}

fn prose(topic: &str, words: usize) -> String {
    (0..words).map(|i| format!("{topic}{}", i % 7)).collect::<Vec<_>>().join(" ")
}

fn write(path: &Path, text: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, text).unwrap();
}

#[test]
fn unchanged_file_is_not_reembedded() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("notes.md");
    write(&file, &prose("river", 60));
    let mut index = new_index(IndexOptions::default());
    let first = index.index_file(&file, false).unwrap();
    assert!(first > 0);
    assert_eq!(index.index_file(&file, false).unwrap(), 0);
    assert_eq!(index.total_chunks(), first);
    // force re-embeds even when unchanged
    assert_eq!(index.index_file(&file, true).unwrap(), first);
}

#[test]
fn changed_file_appends_and_compact_drops_stale_chunks() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("notes.md");
    write(&file, &prose("river", 60));
    let mut index = new_index(IndexOptions::default());
    let first = index.index_file(&file, false).unwrap();

    write(&file, &prose("mountain", 80));
    let second = index.index_file(&file, false).unwrap();
    assert!(second > 0);
    assert_eq!(index.total_chunks(), first + second, "old chunks remain after a change");
    assert_eq!(index.stale_chunks(), first);

    assert_eq!(index.compact(), first);
    assert_eq!(index.total_chunks(), second);
    assert_eq!(index.stale_chunks(), 0);
    assert!(index.chunks().all(|c| c.chunk.text.starts_with("mountain")));
}

#[test]
fn replace_mode_drops_previous_chunks_on_reindex() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("notes.md");
    write(&file, &prose("river", 60));
    let mut index =
        new_index(IndexOptions { replace_changed_files: true, ..Default::default() });
    index.index_file(&file, false).unwrap();
    write(&file, &prose("mountain", 30));
    let second = index.index_file(&file, false).unwrap();
    assert_eq!(index.total_chunks(), second);
    assert_eq!(index.stale_chunks(), 0);
}

#[test]
fn short_file_records_no_digest() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("short.txt");
    write(&file, "only a handful of words here");
    let mut index = new_index(IndexOptions::default());
    assert_eq!(index.index_file(&file, false).unwrap(), 0);
    assert!(index.files().is_empty());
    write(&file, &prose("later", 25));
    assert_eq!(index.index_file(&file, false).unwrap(), 1);
}

#[test]
fn invalid_utf8_is_decoded_lossily() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("latin1.txt");
    let mut bytes = prose("word", 30).into_bytes();
    bytes.extend_from_slice(&[b' ', 0xff, 0xfe, b' ']);
    std::fs::write(&file, bytes).unwrap();
    let mut index = new_index(IndexOptions::default());
    assert_eq!(index.index_file(&file, false).unwrap(), 1);
}

#[test]
fn directory_pass_reports_and_skips() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write(&root.join("a.md"), &prose("alpha", 50));
    write(&root.join("sub/b.txt"), &prose("beta", 50));
    write(&root.join("tiny.md"), "too short");
    write(&root.join("ignored.rs"), &prose("gamma", 50));
    write(&root.join(".hidden.md"), &prose("delta", 50));
    write(&root.join("node_modules/dep.md"), &prose("eps", 50));
    write(&root.join(".context-index/stale.md"), &prose("zeta", 50));

    let mut index = new_index(IndexOptions::default());
    let report = index.index_directory(root, &["md", ".txt"], false).unwrap();
    assert_eq!(report.files_indexed, 2);
    assert_eq!(report.files_unchanged, 0);
    assert!(report.skipped.is_empty());
    assert_eq!(report.chunks_added, index.total_chunks());
    let sources: Vec<&String> = index.files().keys().collect();
    assert!(sources.iter().all(|s| s.ends_with("a.md") || s.ends_with("b.txt")));

    let again = index.index_directory(root, &["md", "txt"], false).unwrap();
    assert_eq!(again.chunks_added, 0);
    assert_eq!(again.files_unchanged, 2);
}

#[test]
fn failing_file_does_not_abort_the_pass() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    write(&root.join("a.md"), &prose("alpha", 50));
    write(&root.join("b.md"), &prose("corrupt", 50));
    write(&root.join("c.md"), &prose("gamma", 50));

    let flaky: Arc<dyn Embedder> = Arc::new(Flaky(FakeEmbedder::new(256)));
    let splitter = ChunkSplitter::new(40, 5).unwrap();
    let mut index = CorpusIndex::new(splitter, flaky, IndexOptions::default());
    let report = index.index_directory(root, &["md"], false).unwrap();

    assert_eq!(report.files_indexed, 2);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("b.md"));
    assert!(report.skipped[0].reason.contains("model rejected input"));
    assert_eq!(report.chunks_added, index.total_chunks());
    let sources: Vec<&String> = index.files().keys().collect();
    assert_eq!(sources.len(), 2);
    assert!(sources.iter().any(|s| s.ends_with("a.md")));
    assert!(sources.iter().any(|s| s.ends_with("c.md")));
    assert!(index.chunks().all(|c| !c.chunk.source.ends_with("b.md")));
}

#[test]
fn missing_root_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = new_index(IndexOptions::default());
    let err = index.index_directory(&tmp.path().join("nope"), &["md"], false).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn search_caps_k_filters_and_orders() {
    let tmp = tempfile::tempdir().unwrap();
    write(&tmp.path().join("garden.md"), &prose("tomato", 45));
    write(&tmp.path().join("boats.md"), &prose("sail", 45));
    let mut index = new_index(IndexOptions::default());
    index.index_directory(tmp.path(), &["md"], false).unwrap();
    let total = index.total_chunks();

    let query = prose("tomato", 40);
    let all = index.search(&query, 100, -1.0).unwrap();
    assert_eq!(all.len(), total);
    assert!(all.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(all[0].chunk.source.ends_with("garden.md"));

    let filtered = index.search(&query, 100, 0.5).unwrap();
    assert_eq!(filtered.len(), 1);
    assert!(filtered.iter().all(|r| r.score >= 0.5));
    assert!(filtered.iter().all(|r| r.chunk.source.ends_with("garden.md")));

    assert!(index.search("tomato", 0, 0.0).unwrap().is_empty());
}

#[test]
fn empty_index_search_is_empty() {
    let index = new_index(IndexOptions::default());
    assert!(index.search("anything", 5, 0.0).unwrap().is_empty());
    let shared = SharedIndex::new(index);
    assert!(Retriever::search(&shared, "anything", 5, 0.0).unwrap().is_empty());
}

#[test]
fn save_load_round_trip_and_generations() {
    let tmp = tempfile::tempdir().unwrap();
    let corpus = tmp.path().join("corpus");
    let dir = tmp.path().join("index");
    write(&corpus.join("a.md"), &prose("alpha", 90));

    let mut index = new_index(IndexOptions::default());
    index.index_directory(&corpus, &["md"], false).unwrap();
    index.save(&dir).unwrap();
    index.save(&dir).unwrap();
    let bins: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with(".bin"))
        .collect();
    assert_eq!(bins.len(), 1, "old generations are removed after commit");

    let splitter = ChunkSplitter::new(40, 5).unwrap();
    let mut loaded =
        CorpusIndex::load(&dir, splitter, embedder(), IndexOptions::default()).unwrap();
    assert_eq!(loaded.total_chunks(), index.total_chunks());
    assert_eq!(loaded.files(), index.files());
    let a = index.search("alpha1", 3, 0.0).unwrap();
    let b = loaded.search("alpha1", 3, 0.0).unwrap();
    let ids = |hits: &[ctxpipe_core::SearchResult]| hits.iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids(&a), ids(&b));
    // digest cache survives the reload
    assert_eq!(loaded.index_file(&corpus.join("a.md"), false).unwrap(), 0);
}

#[test]
fn missing_directory_loads_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("absent");
    let index =
        CorpusIndex::load(&dir, ChunkSplitter::default(), embedder(), IndexOptions::default())
            .unwrap();
    assert!(index.is_empty());
}

#[test]
fn different_embedder_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut index = new_index(IndexOptions::default());
    index.save(tmp.path()).unwrap();
    let other: Arc<dyn Embedder> = Arc::new(FakeEmbedder::new(32));
    let options = IndexOptions::default();
    let err =
        CorpusIndex::load(tmp.path(), ChunkSplitter::default(), other, options).err().unwrap();
    assert!(matches!(err, Error::ModelMismatch { .. }));
}

#[test]
fn vector_file_out_of_step_is_misaligned() {
    let tmp = tempfile::tempdir().unwrap();
    write(&tmp.path().join("corpus/a.md"), &prose("alpha", 50));
    let dir = tmp.path().join("index");
    let mut index = new_index(IndexOptions::default());
    index.index_directory(&tmp.path().join("corpus"), &["md"], false).unwrap();
    index.save(&dir).unwrap();

    let bin = std::fs::read_dir(&dir)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|e| e == "bin"))
        .unwrap();
    let mut store = FlatIpStore::load(&bin).unwrap();
    store.retain(&|_| false);
    store.save(&bin).unwrap();

    let splitter = ChunkSplitter::new(40, 5).unwrap();
    let err = CorpusIndex::load(&dir, splitter, embedder(), IndexOptions::default()).err().unwrap();
    assert!(matches!(err, Error::Misaligned(_)));
}
