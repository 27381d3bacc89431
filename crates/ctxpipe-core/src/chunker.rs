use crate::error::{Error, Result};
use crate::types::Chunk;

/// Windows with fewer words than this are never emitted.
pub const MIN_CHUNK_WORDS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl ChunkSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be > 0".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }

    /// Splits `text` into word windows of `chunk_size` starting every `stride` words.
    ///
    /// Every start position is visited, so the tail of a document can appear in
    /// more than one window; windows under [`MIN_CHUNK_WORDS`] are dropped.
    pub fn split(&self, text: &str, source: &str) -> Vec<Chunk> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut chunks = Vec::new();
        for start in (0..words.len()).step_by(self.stride()) {
            let end = (start + self.chunk_size).min(words.len());
            let window = &words[start..end];
            if window.len() < MIN_CHUNK_WORDS {
                continue;
            }
            chunks.push(Chunk {
                text: window.join(" "),
                source: source.to_string(),
                start_offset: start,
            });
        }
        chunks
    }
}

impl Default for ChunkSplitter {
    fn default() -> Self {
        Self { chunk_size: 512, chunk_overlap: 50 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(matches!(ChunkSplitter::new(50, 50), Err(Error::InvalidConfig(_))));
        assert!(matches!(ChunkSplitter::new(50, 80), Err(Error::InvalidConfig(_))));
        assert!(matches!(ChunkSplitter::new(0, 0), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn short_text_yields_nothing() {
        let splitter = ChunkSplitter::default();
        assert!(splitter.split(&words(19), "a.md").is_empty());
        assert!(splitter.split("", "a.md").is_empty());
        assert!(splitter.split("   \n\t  ", "a.md").is_empty());
    }

    #[test]
    fn exactly_minimum_words_is_kept() {
        let chunks = ChunkSplitter::default().split(&words(20), "a.md");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_offset, 0);
    }

    #[test]
    fn windows_overlap_by_configured_words() {
        let splitter = ChunkSplitter::new(100, 10).unwrap();
        let chunks = splitter.split(&words(250), "doc.txt");
        let starts: Vec<usize> = chunks.iter().map(|c| c.start_offset).collect();
        // 0..100, 90..190, 180..250; the window at 270 does not exist
        assert_eq!(starts, vec![0, 90, 180]);
        assert!(chunks[0].text.ends_with("w99"));
        assert!(chunks[1].text.starts_with("w90 "));
        assert_eq!(chunks[2].text.split_whitespace().count(), 70);
    }

    #[test]
    fn undersized_tail_is_dropped() {
        let splitter = ChunkSplitter::new(100, 10).unwrap();
        // starts: 0, 90 (20 words kept), next would be 180 -> none
        let chunks = splitter.split(&words(110), "doc.txt");
        assert_eq!(chunks.len(), 2);
        let chunks = splitter.split(&words(105), "doc.txt");
        // window at 90 has 15 words
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn whitespace_is_normalized() {
        let text = format!("{}\n\n\t{}", words(10), words(15));
        let chunks = ChunkSplitter::default().split(&text, "x");
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].text.contains('\n'));
        assert!(!chunks[0].text.contains("  "));
    }

    #[test]
    fn no_chunk_below_floor_for_many_configs() {
        let text = words(523);
        for size in [1usize, 5, 19, 20, 21, 37, 64, 200, 600] {
            for overlap in [0usize, 1, 4, 18, 19, 36, 150] {
                let Ok(splitter) = ChunkSplitter::new(size, overlap) else { continue };
                for chunk in splitter.split(&text, "s") {
                    let count = chunk.text.split_whitespace().count();
                    assert!(count >= MIN_CHUNK_WORDS, "size={size} overlap={overlap}");
                }
            }
        }
    }
}
