//! Sentence embeddings for chunk and query text.
//!
//! [`SentenceEmbedder`] runs a BERT sentence encoder (all-MiniLM-L6-v2 by
//! default) with candle and returns masked-mean pooled, L2-normalized vectors.
//! [`FakeEmbedder`] is a deterministic stand-in selected with
//! `embedding.use_fake` or `APP_USE_FAKE_EMBEDDINGS=1`.

#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use ctxpipe_core::config::{expand_path, EmbeddingSettings};
use ctxpipe_core::Embedder;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info, warn};

mod device;
mod fake;
mod pool;
mod tokenize;

pub use device::select_device;
pub use fake::FakeEmbedder;
pub use pool::masked_mean_l2;
pub use tokenize::{tokenize_batch, EncodedBatch};

pub struct SentenceEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
    batch_size: usize,
    id: String,
}

impl SentenceEmbedder {
    pub fn load(
        model_dir: &Path,
        max_len: usize,
        batch_size: usize,
        device: Device,
    ) -> Result<Self> {
        info!(model_dir = %model_dir.display(), "loading sentence encoder");
        let config_path = model_dir.join("config.json");
        let raw_config = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config: BertConfig = serde_json::from_str(&raw_config)?;
        let max_len = max_len.min(config.max_position_embeddings).max(2);

        let tokenizer_path = model_dir.join("tokenizer.json");
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e)
        })?;
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams { max_length: max_len, ..Default::default() }))
            .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;

        let vb = load_weights(model_dir, &device)?;
        let model = BertModel::load(vb, &config)?;
        let name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "bert".into());
        let dim = config.hidden_size;
        info!(dim, max_len, "sentence encoder ready");
        Ok(Self {
            model,
            tokenizer,
            device,
            dim,
            max_len,
            batch_size: batch_size.max(1),
            id: format!("bert:{name}:d{dim}"),
        })
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batch = tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let hidden = self.model.forward(
            &batch.input_ids,
            &batch.token_type_ids,
            Some(&batch.attention_mask),
        )?;
        let pooled = masked_mean_l2(&hidden, &batch.attention_mask)?;
        Ok(pooled.to_device(&Device::Cpu)?.to_vec2::<f32>()?)
    }
}

impl Embedder for SentenceEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }
    fn dim(&self) -> usize {
        self.dim
    }
    fn max_len(&self) -> usize {
        self.max_len
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            out.extend(self.embed_chunk(chunk)?);
        }
        let elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(texts = texts.len(), elapsed_ms, "embedded batch");
        Ok(out)
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        // SAFETY: the weights file is not modified while mapped.
        return Ok(unsafe {
            VarBuilder::from_mmaped_safetensors(&[safetensors], DType::F32, device)?
        });
    }
    let pth = model_dir.join("pytorch_model.bin");
    if pth.exists() {
        let weights = candle_core::pickle::read_all(&pth)?;
        let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
        return Ok(VarBuilder::from_tensors(weights_map, DType::F32, device));
    }
    Err(anyhow!("no model.safetensors or pytorch_model.bin in {}", model_dir.display()))
}

pub fn use_fake_embeddings(settings: &EmbeddingSettings) -> bool {
    settings.use_fake
        || std::env::var("APP_USE_FAKE_EMBEDDINGS")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
}

pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    if use_fake_embeddings(settings) {
        warn!(dim = settings.fake_dim, "using FakeEmbedder; scores are lexical, not semantic");
        return Ok(Arc::new(FakeEmbedder::new(settings.fake_dim)));
    }
    let model_dir = resolve_model_dir(settings)?;
    let embedder =
        SentenceEmbedder::load(&model_dir, settings.max_len, settings.batch_size, select_device())?;
    Ok(Arc::new(embedder))
}

fn resolve_model_dir(settings: &EmbeddingSettings) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("APP_MODEL_DIR") {
        let p = PathBuf::from(&dir);
        if p.exists() {
            info!("using APP_MODEL_DIR: {}", p.display());
            return Ok(p);
        }
    }
    let configured = expand_path(&settings.model_dir);
    if configured.exists() {
        return Ok(configured);
    }
    Err(anyhow!(
        "Could not locate sentence encoder directory {} (set embedding.model_dir or APP_MODEL_DIR)",
        configured.display()
    ))
}
