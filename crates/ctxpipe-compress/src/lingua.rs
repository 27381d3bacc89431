//! Token-classification compressor in the LLMLingua-2 style.
//!
//! A BERT encoder with a two-way classifier head scores every subword token;
//! label 1 means "keep". Word scores are the mean keep probability of their
//! subwords.

use std::path::Path;

use anyhow::{anyhow, Context};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use ctxpipe_core::{CompressionModel, Error, ModelCompression};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::select::{keep_mask, keeps_newlines, Words};

const WEIGHT_FILES: &[&str] = &["model.safetensors", "pytorch_model.bin"];

pub struct LinguaCompressor {
    encoder: BertModel,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
    cls_id: u32,
    sep_id: u32,
    id: String,
}

impl LinguaCompressor {
    /// Fails with [`Error::ModelUnavailable`] unless config, tokenizer and weights are present.
    pub fn check_available(model_dir: &Path) -> ctxpipe_core::Result<()> {
        let unavailable =
            |what: &str| Error::ModelUnavailable(format!("no {what} in {}", model_dir.display()));
        if !model_dir.is_dir() {
            return Err(Error::ModelUnavailable(format!(
                "compression model directory {} does not exist",
                model_dir.display()
            )));
        }
        for file in ["config.json", "tokenizer.json"] {
            if !model_dir.join(file).is_file() {
                return Err(unavailable(file));
            }
        }
        if !WEIGHT_FILES.iter().any(|f| model_dir.join(f).is_file()) {
            return Err(unavailable("model weights"));
        }
        Ok(())
    }

    pub fn load(model_dir: &Path, device: Device) -> ctxpipe_core::Result<Self> {
        Self::check_available(model_dir)?;
        Self::load_unchecked(model_dir, device)
            .map_err(|e| Error::ModelUnavailable(format!("{e:#}")))
    }

    fn load_unchecked(model_dir: &Path, device: Device) -> anyhow::Result<Self> {
        info!(model_dir = %model_dir.display(), "loading compression model");
        let raw_config = std::fs::read_to_string(model_dir.join("config.json"))?;
        let config: BertConfig =
            serde_json::from_str(&raw_config).context("parsing config.json")?;
        let mut tokenizer = Tokenizer::from_file(model_dir.join("tokenizer.json"))
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(None)
            .map_err(|e| anyhow!("Failed to disable truncation: {}", e))?;
        let cls_id = tokenizer
            .token_to_id("[CLS]")
            .ok_or_else(|| anyhow!("tokenizer has no [CLS] token"))?;
        let sep_id = tokenizer
            .token_to_id("[SEP]")
            .ok_or_else(|| anyhow!("tokenizer has no [SEP] token"))?;

        let vb = weights(model_dir, &device)?;
        let encoder = BertModel::load(vb.clone(), &config)?;
        let classifier = candle_nn::linear(config.hidden_size, 2, vb.pp("classifier"))?;
        let name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "lingua".into());
        let max_len = config.max_position_embeddings.min(512);
        Ok(Self {
            encoder,
            classifier,
            tokenizer,
            device,
            max_len,
            cls_id,
            sep_id,
            id: format!("lingua:{name}"),
        })
    }

    fn count_tokens(&self, text: &str) -> anyhow::Result<usize> {
        if text.trim().is_empty() {
            return Ok(0);
        }
        let enc =
            self.tokenizer.encode(text, false).map_err(|e| anyhow!("tokenize failed: {}", e))?;
        Ok(enc.get_ids().len())
    }

    /// Mean keep probability per word; words are scored in windows that fit the encoder.
    fn word_scores(&self, words: &[&str]) -> anyhow::Result<Vec<f32>> {
        let enc = self
            .tokenizer
            .encode(words.to_vec(), false)
            .map_err(|e| anyhow!("tokenize failed: {}", e))?;
        let ids = enc.get_ids();
        let word_ids = enc.get_word_ids();
        let budget = self.max_len.saturating_sub(2).max(1);

        let mut sums = vec![0f32; words.len()];
        let mut counts = vec![0usize; words.len()];
        let mut start = 0;
        while start < ids.len() {
            let mut end = (start + budget).min(ids.len());
            // back off to a word boundary unless a single word fills the window
            if end < ids.len() {
                let mut cut = end;
                while cut > start && word_ids[cut].is_some() && word_ids[cut] == word_ids[cut - 1] {
                    cut -= 1;
                }
                if cut > start {
                    end = cut;
                }
            }
            let probs = self.keep_probs(&ids[start..end])?;
            for (offset, p) in probs.into_iter().enumerate() {
                let word = word_ids[start + offset].map(|w| w as usize);
                if let Some(w) = word.filter(|w| *w < words.len()) {
                    sums[w] += p;
                    counts[w] += 1;
                }
            }
            start = end;
        }
        Ok(sums
            .iter()
            .zip(&counts)
            .map(|(s, c)| if *c == 0 { 0.0 } else { s / *c as f32 })
            .collect())
    }

    fn keep_probs(&self, window: &[u32]) -> anyhow::Result<Vec<f32>> {
        let mut ids = Vec::with_capacity(window.len() + 2);
        ids.push(self.cls_id);
        ids.extend_from_slice(window);
        ids.push(self.sep_id);
        let input_ids = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;
        let attention_mask = input_ids.ones_like()?;
        let hidden = self.encoder.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let logits = self.classifier.forward(&hidden)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        let keep = probs
            .i((0, .., 1))?
            .to_dtype(DType::F32)?
            .to_device(&Device::Cpu)?
            .to_vec1::<f32>()?;
        // drop [CLS] and [SEP]
        Ok(keep[1..keep.len() - 1].to_vec())
    }
}

impl CompressionModel for LinguaCompressor {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn compress(
        &self,
        text: &str,
        rate: f32,
        force_tokens: &[String],
    ) -> anyhow::Result<ModelCompression> {
        let words = Words::split(text);
        let origin_tokens = self.count_tokens(text)?;
        if words.is_empty() {
            return Ok(ModelCompression {
                compressed_text: String::new(),
                origin_tokens,
                compressed_tokens: 0,
            });
        }
        let scores = self.word_scores(&words.items)?;
        let keep = keep_mask(&scores, rate, &words.forced(force_tokens));
        let compressed_text = words.assemble(&keep, keeps_newlines(force_tokens));
        let compressed_tokens = self.count_tokens(&compressed_text)?;
        debug!(words = words.len(), origin_tokens, compressed_tokens, "compressed window");
        Ok(ModelCompression { compressed_text, origin_tokens, compressed_tokens })
    }
}

fn weights(model_dir: &Path, device: &Device) -> anyhow::Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.is_file() {
        // SAFETY: the weights file is not modified while mapped.
        return Ok(unsafe {
            VarBuilder::from_mmaped_safetensors(&[safetensors], DType::F32, device)?
        });
    }
    let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
    Ok(VarBuilder::from_tensors(weights.into_iter().collect(), DType::F32, device))
}
