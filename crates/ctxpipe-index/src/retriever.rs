use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ctxpipe_core::{Error, Result, Retriever, SearchResult};

use crate::corpus::CorpusIndex;

impl Retriever for CorpusIndex {
    fn search(&self, query: &str, k: usize, min_score: f32) -> Result<Vec<SearchResult>> {
        CorpusIndex::search(self, query, k, min_score)
    }
}

/// Shared handle to one index: searches take the read lock, indexing the write lock.
#[derive(Clone)]
pub struct SharedIndex(Arc<RwLock<CorpusIndex>>);

impl SharedIndex {
    pub fn new(index: CorpusIndex) -> Self {
        Self(Arc::new(RwLock::new(index)))
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, CorpusIndex>> {
        self.0.read().map_err(|_| Error::Operation("index lock poisoned".into()))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, CorpusIndex>> {
        self.0.write().map_err(|_| Error::Operation("index lock poisoned".into()))
    }
}

impl Retriever for SharedIndex {
    fn search(&self, query: &str, k: usize, min_score: f32) -> Result<Vec<SearchResult>> {
        self.read()?.search(query, k, min_score)
    }
}
