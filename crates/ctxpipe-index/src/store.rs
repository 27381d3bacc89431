//! Exact inner-product vector store with explicit row ids.
//!
//! On-disk format (little endian): magic `CTXVEC01`, `dim: u32`, `count: u64`,
//! then `count` rows of `id: u64` followed by `dim` `f32` values. A file whose
//! length disagrees with its header is rejected before anything is allocated.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ctxpipe_core::{ChunkId, Error, Result, VectorStore};

const MAGIC: &[u8; 8] = b"CTXVEC01";
const HEADER_LEN: u64 = 20;

#[derive(Debug, Clone)]
pub struct FlatIpStore {
    dim: usize,
    ids: Vec<ChunkId>,
    data: Vec<f32>,
}

impl FlatIpStore {
    pub fn new(dim: usize) -> Self {
        Self { dim, ids: Vec::new(), data: Vec::new() }
    }

    pub fn ids(&self) -> &[ChunkId] {
        &self.ids
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut w = BufWriter::new(file);
        let write = |w: &mut BufWriter<File>, bytes: &[u8]| {
            w.write_all(bytes).map_err(|e| Error::io(path, e))
        };
        write(&mut w, MAGIC)?;
        write(&mut w, &(self.dim as u32).to_le_bytes())?;
        write(&mut w, &(self.ids.len() as u64).to_le_bytes())?;
        for (i, id) in self.ids.iter().enumerate() {
            write(&mut w, &id.to_le_bytes())?;
            for x in self.row(i) {
                write(&mut w, &x.to_le_bytes())?;
            }
        }
        let file = w.into_inner().map_err(|e| Error::io(path, e.into_error()))?;
        file.sync_all().map_err(|e| Error::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let file_len = file.metadata().map_err(|e| Error::io(path, e))?.len();
        let mut r = BufReader::new(file);
        let mut read = |buf: &mut [u8]| r.read_exact(buf).map_err(|e| Error::io(path, e));
        let mut magic = [0u8; 8];
        read(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::Misaligned(format!("{} is not a vector file", path.display())));
        }
        let mut b4 = [0u8; 4];
        let mut b8 = [0u8; 8];
        read(&mut b4)?;
        let dim = u32::from_le_bytes(b4) as usize;
        read(&mut b8)?;
        let count = u64::from_le_bytes(b8);
        let row_len = 8 + 4 * dim as u64;
        let expected = count.checked_mul(row_len).and_then(|rows| rows.checked_add(HEADER_LEN));
        if expected != Some(file_len) {
            return Err(Error::Misaligned(format!(
                "{} is {file_len} bytes but its header declares {count} rows of dimension {dim}",
                path.display()
            )));
        }
        let count = count as usize;
        let mut store = Self::new(dim);
        store.ids.reserve(count);
        store.data.reserve(count * dim);
        for _ in 0..count {
            read(&mut b8)?;
            store.ids.push(u64::from_le_bytes(b8));
            for _ in 0..dim {
                read(&mut b4)?;
                store.data.push(f32::from_le_bytes(b4));
            }
        }
        Ok(store)
    }
}

impl VectorStore for FlatIpStore {
    fn dim(&self) -> usize {
        self.dim
    }

    fn count(&self) -> usize {
        self.ids.len()
    }

    fn add(&mut self, ids: &[ChunkId], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(Error::Misaligned(format!(
                "{} ids for {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(Error::Embedding(anyhow::anyhow!(
                "expected dimension {}, got {}",
                self.dim,
                bad.len()
            )));
        }
        let existing: HashSet<ChunkId> = self.ids.iter().copied().collect();
        let mut incoming = HashSet::with_capacity(ids.len());
        if let Some(dup) =
            ids.iter().find(|&&id| existing.contains(&id) || !incoming.insert(id))
        {
            return Err(Error::Misaligned(format!("duplicate chunk id {dup}")));
        }
        self.ids.extend_from_slice(ids);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(ChunkId, f32)>> {
        if query.len() != self.dim {
            return Err(Error::Embedding(anyhow::anyhow!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dim
            )));
        }
        let k = k.min(self.count());
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(ChunkId, f32)> = (0..self.count())
            .map(|i| (self.ids[i], self.row(i).iter().zip(query).map(|(a, b)| a * b).sum::<f32>()))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    fn retain(&mut self, keep: &dyn Fn(ChunkId) -> bool) -> usize {
        let before = self.ids.len();
        let mut ids = Vec::with_capacity(before);
        let mut data = Vec::with_capacity(self.data.len());
        for i in 0..before {
            if keep(self.ids[i]) {
                ids.push(self.ids[i]);
                data.extend_from_slice(self.row(i));
            }
        }
        self.ids = ids;
        self.data = data;
        before - self.ids.len()
    }
}
