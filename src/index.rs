//! Catalog of reference identity embeddings.
//!
//! The catalog lives in two on-disk artifacts produced by the offline
//! index build: `embeddings.bin` (postcard-encoded `Array2<f32>` of
//! shape `(N, 512)`) and `metadata.json` (a JSON array of `N` records,
//! index-aligned with the matrix rows). Both are read exactly once,
//! then held read-only for the life of the process.
//!
//! Scoring is a brute-force dense pass over every row. Catalogs here
//! are hundreds of identities, not millions, so an approximate index
//! would buy nothing.

use crate::embedding::{Embedding, EMBEDDING_DIM, NORM_EPSILON};
use crate::error::Error;
use log::info;
use ndarray::Array2;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const EMBEDDINGS_FILE: &str = "embeddings.bin";
pub const METADATA_FILE: &str = "metadata.json";

/// Per-identity metadata, index-aligned with the matrix rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMeta {
    pub name: String,
    #[serde(default)]
    pub image_rel: Option<String>,
}

#[derive(Debug)]
struct CatalogState {
    /// One unit-normalized row per identity.
    matrix: Array2<f32>,
    meta: Vec<IdentityMeta>,
}

/// Lazily loaded, process-wide read-only similarity index.
///
/// `Send + Sync`; the first load is guarded by a `OnceCell` so
/// concurrent callers racing through [`VectorIndex::ensure_loaded`]
/// perform the file I/O exactly once.
#[derive(Debug)]
pub struct VectorIndex {
    emb_path: PathBuf,
    meta_path: PathBuf,
    state: OnceCell<CatalogState>,
}

impl VectorIndex {
    pub fn open(data_dir: &Path) -> Self {
        Self {
            emb_path: data_dir.join(EMBEDDINGS_FILE),
            meta_path: data_dir.join(METADATA_FILE),
            state: OnceCell::new(),
        }
    }

    /// Idempotent one-time load. Missing artifacts initialize an empty
    /// catalog, which is a valid queryable state; artifacts that are
    /// present but inconsistent are a fatal configuration error.
    pub fn ensure_loaded(&self) -> Result<(), Error> {
        self.catalog().map(|_| ())
    }

    fn catalog(&self) -> Result<&CatalogState, Error> {
        self.state.get_or_try_init(|| self.load())
    }

    fn load(&self) -> Result<CatalogState, Error> {
        if !self.emb_path.exists() || !self.meta_path.exists() {
            info!("catalog artifacts missing, starting with an empty catalog");
            return Ok(CatalogState {
                matrix: Array2::zeros((0, EMBEDDING_DIM)),
                meta: Vec::new(),
            });
        }

        let raw = std::fs::read(&self.emb_path).map_err(|source| Error::CatalogRead {
            path: self.emb_path.clone(),
            source,
        })?;
        let mut matrix: Array2<f32> =
            postcard::from_bytes(&raw).map_err(|source| Error::MatrixDecode {
                path: self.emb_path.clone(),
                source,
            })?;
        if matrix.ncols() != EMBEDDING_DIM {
            return Err(Error::MatrixDimension {
                expected: EMBEDDING_DIM,
                found: matrix.ncols(),
            });
        }

        // The build script should already emit unit rows; re-normalize
        // anyway so scores stay true cosines.
        for mut row in matrix.outer_iter_mut() {
            let norm = row.dot(&row).sqrt() + NORM_EPSILON;
            row.mapv_inplace(|x| x / norm);
        }

        let raw = std::fs::read_to_string(&self.meta_path).map_err(|source| {
            Error::CatalogRead {
                path: self.meta_path.clone(),
                source,
            }
        })?;
        let meta: Vec<IdentityMeta> =
            serde_json::from_str(&raw).map_err(|source| Error::MetadataDecode {
                path: self.meta_path.clone(),
                source,
            })?;
        if meta.len() != matrix.nrows() {
            return Err(Error::RowCountMismatch {
                rows: matrix.nrows(),
                entries: meta.len(),
            });
        }

        info!("catalog loaded: {} identities", meta.len());
        Ok(CatalogState { matrix, meta })
    }

    /// Top-k catalog rows by cosine similarity to `query`, descending.
    /// Returns `min(k, len)` entries; an empty catalog yields an empty
    /// vec, never an error. Tie order between exactly equal scores is
    /// deterministic for this implementation but otherwise unspecified.
    pub fn topk(&self, query: &Embedding, k: usize) -> Result<Vec<(usize, f32)>, Error> {
        let cat = self.catalog()?;
        if cat.matrix.nrows() == 0 || k == 0 {
            return Ok(Vec::new());
        }
        let q = query.unit();
        // Rows are unit vectors, so one dot-product pass gives every cosine.
        let scores = cat.matrix.dot(&q);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_unstable_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        order.truncate(k);
        Ok(order.into_iter().map(|i| (i, scores[i])).collect())
    }

    /// Similarity of `query` to the first catalog entry whose name
    /// matches, case-insensitively and whitespace-trimmed. This is a
    /// lookup in catalog order, not a search: `None` means the name is
    /// not in the catalog (or the catalog is empty).
    pub fn find_by_name(
        &self,
        query: &Embedding,
        name: &str,
    ) -> Result<Option<(usize, f32)>, Error> {
        let cat = self.catalog()?;
        if cat.matrix.nrows() == 0 {
            return Ok(None);
        }
        let needle = name.trim().to_lowercase();
        let q = query.unit();
        for (idx, meta) in cat.meta.iter().enumerate() {
            if meta.name.trim().to_lowercase() == needle {
                let score = cat.matrix.row(idx).dot(&q);
                return Ok(Some((idx, score)));
            }
        }
        Ok(None)
    }

    /// Metadata for a row index previously returned by this index.
    /// Panics on an out-of-range index; callers only pass indices the
    /// index itself produced.
    pub fn info(&self, idx: usize) -> Result<&IdentityMeta, Error> {
        Ok(&self.catalog()?.meta[idx])
    }

    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.catalog()?.meta.len())
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    /// Whether the one-time load has already run.
    pub fn is_loaded(&self) -> bool {
        self.state.get().is_some()
    }
}
