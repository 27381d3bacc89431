use ctxpipe_core::{CompressionModel, ModelCompression};

use crate::select::{keep_mask, keeps_newlines, Words};

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
    "in", "is", "it", "its", "of", "on", "or", "so", "that", "the", "this", "to", "was",
    "were", "will", "with",
];

/// Offline stand-in for the learned compressor.
///
/// Scores words by length with stop words pushed to the bottom, and counts one
/// token per word.
#[derive(Debug, Default, Clone)]
pub struct SalienceModel;

impl SalienceModel {
    pub fn new() -> Self {
        Self
    }

    fn score(word: &str) -> f32 {
        let core: String =
            word.chars().filter(|c| c.is_alphanumeric()).flat_map(char::to_lowercase).collect();
        if core.is_empty() {
            return 0.0;
        }
        if STOP_WORDS.contains(&core.as_str()) {
            return 0.05;
        }
        let digits = core.chars().any(|c| c.is_ascii_digit());
        (core.chars().count().min(12) as f32 / 12.0) + if digits { 0.25 } else { 0.0 }
    }
}

impl CompressionModel for SalienceModel {
    fn model_id(&self) -> &str {
        "salience"
    }

    fn compress(
        &self,
        text: &str,
        rate: f32,
        force_tokens: &[String],
    ) -> anyhow::Result<ModelCompression> {
        let words = Words::split(text);
        let scores: Vec<f32> = words.items.iter().map(|w| Self::score(w)).collect();
        let keep = keep_mask(&scores, rate, &words.forced(force_tokens));
        let compressed_text = words.assemble(&keep, keeps_newlines(force_tokens));
        let compressed_tokens = keep.iter().filter(|k| **k).count();
        Ok(ModelCompression { compressed_text, origin_tokens: words.len(), compressed_tokens })
    }
}
