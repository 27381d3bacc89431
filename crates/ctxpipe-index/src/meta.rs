//! Index metadata document and its atomic write.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use ctxpipe_core::{ChunkId, Error, FileRecord, IndexedChunk, Result};
use serde::{Deserialize, Serialize};

pub const META_FILE: &str = "meta.json";
pub const META_VERSION: u32 = 1;

pub fn vectors_file_name(generation: u64) -> String {
    format!("vectors-{generation:08}.bin")
}

/// Everything but the vectors. The metadata names the vector file it belongs
/// to, so replacing this file is the single commit point of a save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub version: u32,
    pub embedder_id: String,
    pub dim: usize,
    pub generation: u64,
    pub vectors_file: String,
    pub next_id: ChunkId,
    pub saved_at: i64,
    pub chunks: Vec<IndexedChunk>,
    pub files: BTreeMap<String, FileRecord>,
}

impl IndexMeta {
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(META_FILE);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(path, e)),
        };
        let meta: Self = serde_json::from_slice(&raw)?;
        if meta.version != META_VERSION {
            return Err(Error::Misaligned(format!(
                "unsupported metadata version {} in {}",
                meta.version,
                path.display()
            )));
        }
        Ok(Some(meta))
    }

    /// Writes to a temp file in `dir`, syncs, then renames over `meta.json`.
    pub fn write_atomic(&self, dir: &Path) -> Result<()> {
        let path = dir.join(META_FILE);
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.flush().map_err(|e| Error::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| Error::io(&path, e.error))?;
        Ok(())
    }
}
