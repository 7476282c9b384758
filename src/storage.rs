//
// storage.rs
// dicom-deid
//
// Upload area for the web layer: content-addressed names, derived outputs per method, traversal guard.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

use crate::anonymize::Method;

/// A file persisted inside the store.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).context("Failed to create upload directory")?;
        Ok(Self { root })
    }

    /// Stores uploaded bytes as `<stem>-<hash12>.dcm`.
    pub fn save(&self, original_name: Option<&str>, bytes: &[u8]) -> Result<StoredFile> {
        let stem = original_name
            .map(clean_stem)
            .unwrap_or_else(|| "upload".to_string());
        let hash = hex::encode(Sha256::digest(bytes));
        let name = format!("{}-{}.dcm", stem, &hash[..12]);
        let path = self.root.join(&name);
        fs::write(&path, bytes).context("Failed to persist uploaded file")?;
        Ok(StoredFile { name, path })
    }

    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let canonical_root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        let canonical = self
            .root
            .join(name)
            .canonicalize()
            .context("Requested file not found")?;
        if !canonical.starts_with(&canonical_root) {
            bail!("Attempt to access file outside storage root");
        }
        Ok(canonical)
    }

    /// Output location for `source` anonymized with `method`.
    pub fn derived(&self, source: &str, method: Method) -> StoredFile {
        let name = format!("{}-{}.dcm", clean_stem(source), method);
        let path = self.root.join(&name);
        StoredFile { name, path }
    }
}

fn clean_stem(name: &str) -> String {
    let stem: String = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if stem.is_empty() {
        "upload".to_string()
    } else {
        stem
    }
}
