//! Per-image embedding cache.
//!
//! One JSON record per cached embedding, keyed by a path derived from
//! the source image's storage location. The key is a pure function of
//! the path string, not of the image content: two different images
//! saved under the same filename collide deterministically. Records
//! are never invalidated automatically; stale entries persist until
//! deleted by hand.
//!
//! Caching is a performance optimization only. Every failure on this
//! path (missing file, corrupt JSON, unwritable directory) degrades to
//! a cache miss or a dropped write, logged at warn, and never fails
//! the surrounding computation.

use crate::embedding::{Embedding, EMBEDDING_DIM};
use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    embedding: Vec<f32>,
    shape: Vec<usize>,
    dtype: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    uploads_root: PathBuf,
    enabled: bool,
}

impl EmbeddingCache {
    pub fn new(uploads_root: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            uploads_root: uploads_root.into(),
            enabled,
        }
    }

    /// A cache that never hits and never writes.
    pub fn disabled() -> Self {
        Self::new("uploads", false)
    }

    /// Derive the record path for a source image path.
    ///
    /// - bare filename (an upload) -> `<uploads_root>/embeddings/<stem>.json`
    /// - a `dataset` segment followed by identity folder + filename
    ///   -> `<dataset root>/embeddings/<identity>/<stem>.json`
    /// - anything else -> `<same dir>/embeddings/<stem>.json`
    pub fn record_path(&self, image_path: &Path) -> PathBuf {
        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let record = format!("{stem}.json");

        let parts: Vec<&OsStr> = image_path.iter().collect();
        if parts.len() == 1 {
            return self.uploads_root.join("embeddings").join(record);
        }

        if let Some(pos) = parts.iter().position(|p| *p == "dataset") {
            let trailing = &parts[pos + 1..];
            if trailing.len() >= 2 {
                let dataset_root: PathBuf = parts[..=pos].iter().copied().collect();
                return dataset_root
                    .join("embeddings")
                    .join(trailing[0])
                    .join(record);
            }
        }

        image_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join("embeddings")
            .join(record)
    }

    /// Look up a previously cached embedding. Any problem reading or
    /// decoding the record is a miss, never an error.
    pub fn get(&self, image_path: &Path) -> Option<Embedding> {
        if !self.enabled {
            return None;
        }
        let path = self.record_path(image_path);
        if !path.exists() {
            return None;
        }
        match read_record(&path) {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!("cache read failed ({}): {e:#}", path.display());
                None
            }
        }
    }

    /// Persist an embedding. Write failures are logged and swallowed.
    pub fn put(&self, image_path: &Path, embedding: &Embedding) {
        if !self.enabled {
            return;
        }
        let path = self.record_path(image_path);
        if let Err(e) = write_record(&path, embedding) {
            warn!("cache write failed ({}): {e:#}", path.display());
        }
    }
}

/// Strict record reader, shared with the CLI which treats a bad query
/// file as a hard error rather than a miss.
pub fn read_record(path: &Path) -> Result<Embedding> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let record: CacheRecord =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    if record.embedding.len() != EMBEDDING_DIM {
        anyhow::bail!(
            "record holds {} values, expected {EMBEDDING_DIM}",
            record.embedding.len()
        );
    }
    Ok(Embedding::from_vec(record.embedding)?)
}

fn write_record(path: &Path, embedding: &Embedding) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let record = CacheRecord {
        embedding: embedding.as_array().to_vec(),
        shape: vec![EMBEDDING_DIM],
        dtype: "float32".to_string(),
    };
    let data = serde_json::to_string_pretty(&record)?;
    std::fs::write(path, data)?;
    Ok(())
}
