//! Corpus file discovery for directory indexing.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::types::SkippedFile;

/// Directories never descended into, relative to the walk root.
pub const SKIP_DIRS: &[&str] =
    &["node_modules", "__pycache__", ".venv", "venv", ".git", ".context-index"];

#[derive(Debug, Clone)]
pub struct CorpusWalker {
    extensions: BTreeSet<String>,
    skip_dirs: BTreeSet<String>,
}

/// Regular files selected for indexing, plus entries the walk could not read.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub files: Vec<PathBuf>,
    pub errors: Vec<SkippedFile>,
}

impl CorpusWalker {
    /// `extensions` accepts both `md` and `.md` spellings; matching is case-insensitive.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        let skip_dirs = SKIP_DIRS.iter().map(|d| (*d).to_string()).collect();
        Self { extensions, skip_dirs }
    }

    /// Also skip a directory with this name, e.g. a custom index directory.
    pub fn skip_dir(mut self, name: impl Into<String>) -> Self {
        self.skip_dirs.insert(name.into());
        self
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(OsStr::to_str) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        path.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
    }

    pub fn walk(&self, root: &Path) -> WalkOutcome {
        let mut outcome = WalkOutcome::default();
        let entries = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_skipped_dir(e));
        for entry in entries {
            match entry {
                Ok(e) if e.file_type().is_file() && self.accepts(e.path()) => {
                    outcome.files.push(e.into_path())
                }
                Ok(_) => {}
                Err(err) => {
                    let path =
                        err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    warn!(path = %path.display(), error = %err, "skipping unreadable entry");
                    outcome.errors.push(SkippedFile { path, reason: err.to_string() });
                }
            }
        }
        outcome
    }

    fn is_skipped_dir(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry.file_name().to_str().is_some_and(|n| self.skip_dirs.contains(n))
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}
