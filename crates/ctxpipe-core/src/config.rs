//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml`
//! and `APP_*` env vars (`__` separates nested keys, e.g.
//! `APP_RETRIEVAL__MIN_SCORE=0.4`). Provides helpers to expand `~` and `${VAR}`
//! and to resolve relative paths against a known base directory.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunker::ChunkSplitter;
use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?.validate()?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{}': {}", key, e)))
    }

    pub fn settings(&self) -> Result<Settings> {
        self.figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workspace: WorkspaceSettings,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub compression: CompressionSettings,
    pub retrieval: RetrievalSettings,
    pub context: ContextSettings,
    pub index: IndexSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.splitter()?;
        if self.workspace.extensions.iter().all(|e| e.trim().trim_start_matches('.').is_empty()) {
            return Err(Error::InvalidConfig(
                "workspace.extensions must name at least one extension".into(),
            ));
        }
        if self.context.chars_per_token == 0 {
            return Err(Error::InvalidConfig("context.chars_per_token must be > 0".into()));
        }
        if !(self.context.max_target_ratio > 0.0 && self.context.max_target_ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "context.max_target_ratio must be in (0, 1], got {}",
                self.context.max_target_ratio
            )));
        }
        if self.compression.max_chars == 0 {
            return Err(Error::InvalidConfig("compression.max_chars must be > 0".into()));
        }
        Ok(())
    }

    pub fn splitter(&self) -> Result<ChunkSplitter> {
        ChunkSplitter::new(self.chunking.chunk_size, self.chunking.chunk_overlap)
    }

    pub fn workspace_root(&self) -> PathBuf {
        expand_path(&self.workspace.root)
    }

    pub fn index_dir(&self) -> PathBuf {
        let root = self.workspace_root();
        match &self.workspace.index_dir {
            Some(dir) => resolve_with_base(&root, dir),
            None => root.join(DEFAULT_INDEX_DIR),
        }
    }
}

pub const DEFAULT_INDEX_DIR: &str = ".context-index";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSettings {
    pub root: String,
    pub index_dir: Option<String>,
    pub extensions: Vec<String>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root: "~/.openclaw/workspace".to_string(),
            index_dir: None,
            extensions: vec!["md".into(), "txt".into(), "py".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { chunk_size: 512, chunk_overlap: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model_dir: String,
    pub max_len: usize,
    pub batch_size: usize,
    pub use_fake: bool,
    pub fake_dim: usize,
    pub timeout_secs: Option<u64>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model_dir: "~/.cache/ctxpipe/models/all-MiniLM-L6-v2".to_string(),
            max_len: 256,
            batch_size: 32,
            use_fake: false,
            fake_dim: 384,
            timeout_secs: None,
        }
    }
}

impl EmbeddingSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub enabled: bool,
    pub model_dir: String,
    pub max_chars: usize,
    pub force_tokens: Vec<String>,
    pub use_fake: bool,
    pub timeout_secs: Option<u64>,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model_dir: "~/.cache/ctxpipe/models/llmlingua-2-bert-base-multilingual-cased-meetingbank"
                .to_string(),
            max_chars: 1500,
            force_tokens: vec!["\n".into(), ".".into(), "!".into(), "?".into()],
            use_fake: false,
            timeout_secs: None,
        }
    }
}

impl CompressionSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub k: usize,
    pub min_score: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { k: 5, min_score: 0.3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub max_tokens: usize,
    pub chars_per_token: usize,
    pub max_target_ratio: f32,
    pub fallback_ratio: f32,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self { max_tokens: 2000, chars_per_token: 4, max_target_ratio: 0.9, fallback_ratio: 0.5 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub replace_changed_files: bool,
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
