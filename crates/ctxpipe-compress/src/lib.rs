//! Token-budget compression of retrieved context.
//!
//! [`AdaptiveCompressor`] wraps a [`CompressionModel`] and handles inputs longer
//! than the model accepts by compressing fixed-size character windows.
//!
//! The configured force tokens are passed to every window, not only the
//! first, so sentence terminators and line breaks survive in each window.

#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

use std::sync::Arc;
use std::time::Duration;

use ctxpipe_core::config::{expand_path, CompressionSettings};
use ctxpipe_core::deadline::run_with_timeout;
use ctxpipe_core::{CompressionModel, CompressionOutcome, Error, Result};
use tracing::{debug, warn};

mod lingua;
mod salience;
pub mod select;

pub use lingua::LinguaCompressor;
pub use salience::SalienceModel;

#[derive(Clone)]
pub struct AdaptiveCompressor {
    model: Arc<dyn CompressionModel>,
    max_chars: usize,
    force_tokens: Vec<String>,
    timeout: Option<Duration>,
}

impl AdaptiveCompressor {
    pub fn new(
        model: Arc<dyn CompressionModel>,
        max_chars: usize,
        force_tokens: Vec<String>,
    ) -> Self {
        Self { model, max_chars: max_chars.max(1), force_tokens, timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Loads the configured model; a missing model is [`Error::ModelUnavailable`].
    pub fn from_settings(settings: &CompressionSettings) -> Result<Self> {
        let model = load_compression_model(settings)?;
        Ok(Self::new(model, settings.max_chars, settings.force_tokens.clone())
            .with_timeout(settings.timeout()))
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Compresses `text` toward `target_ratio` of its tokens.
    ///
    /// The reported ratio is always `compressed_tokens / origin_tokens`.
    pub fn compress(&self, text: &str, target_ratio: f32) -> Result<CompressionOutcome> {
        let model = Arc::clone(&self.model);
        let force_tokens = self.force_tokens.clone();
        let max_chars = self.max_chars;
        let text = text.to_string();
        run_with_timeout("compress", self.timeout, move || {
            compress_windows(model.as_ref(), &text, target_ratio, max_chars, &force_tokens)
        })?
        .map_err(Error::Compression)
    }
}

fn compress_windows(
    model: &dyn CompressionModel,
    text: &str,
    rate: f32,
    max_chars: usize,
    force_tokens: &[String],
) -> anyhow::Result<CompressionOutcome> {
    let chars = text.chars().count();
    if chars <= max_chars {
        let out = model.compress(text, rate, force_tokens)?;
        return Ok(CompressionOutcome::from_counts(
            out.compressed_text,
            out.origin_tokens,
            out.compressed_tokens,
        ));
    }

    let windows = char_windows(text, max_chars);
    debug!(chars, windows = windows.len(), "compressing in windows");
    let mut parts = Vec::with_capacity(windows.len());
    let (mut origin, mut compressed) = (0usize, 0usize);
    for window in windows {
        if window.trim().is_empty() {
            continue;
        }
        let out = model.compress(window, rate, force_tokens)?;
        origin += out.origin_tokens;
        compressed += out.compressed_tokens;
        parts.push(out.compressed_text);
    }
    Ok(CompressionOutcome::from_counts(parts.join(" "), origin, compressed))
}

/// Consecutive slices of `max_chars` characters; cuts ignore word boundaries.
fn char_windows(text: &str, max_chars: usize) -> Vec<&str> {
    let mut windows = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (i, _) in text.char_indices() {
        if count == max_chars {
            windows.push(&text[start..i]);
            start = i;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        windows.push(&text[start..]);
    }
    windows
}

pub fn use_fake_compression(settings: &CompressionSettings) -> bool {
    settings.use_fake
        || std::env::var("APP_USE_FAKE_COMPRESSION")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
}

pub fn load_compression_model(
    settings: &CompressionSettings,
) -> Result<Arc<dyn CompressionModel>> {
    if use_fake_compression(settings) {
        warn!("using SalienceModel; compression is heuristic");
        return Ok(Arc::new(SalienceModel::new()));
    }
    let dir = expand_path(&settings.model_dir);
    Ok(Arc::new(LinguaCompressor::load(&dir, ctxpipe_embed::select_device())?))
}
