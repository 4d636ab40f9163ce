//! Scoring facade over the shared [`VectorIndex`].
//!
//! The engine holds no state of its own beyond the index handle: given
//! the same catalog snapshot and query it always produces the same
//! answer. Query resolution (bytes -> embedding) is the one place the
//! optional cache is consulted, with its never-fail-the-caller
//! discipline.

use crate::cache::EmbeddingCache;
use crate::embedding::{Embedding, FaceEmbedder, FaceOutcome};
use crate::error::Error;
use crate::index::VectorIndex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// One catalog identity scored against a query.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogMatch {
    pub index: usize,
    pub name: String,
    pub score: f32,
    pub image_rel: Option<String>,
}

/// Score of a query against one designated reference identity.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceMatch {
    pub index: usize,
    pub name: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    index: Arc<VectorIndex>,
}

impl SimilarityEngine {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Top-k catalog matches for a query embedding, metadata joined on.
    pub fn top_matches(&self, query: &Embedding, k: usize) -> Result<Vec<CatalogMatch>, Error> {
        let mut out = Vec::new();
        for (idx, score) in self.index.topk(query, k)? {
            let info = self.index.info(idx)?;
            out.push(CatalogMatch {
                index: idx,
                name: info.name.clone(),
                score,
                image_rel: info.image_rel.clone(),
            });
        }
        Ok(out)
    }

    /// Similarity of a query embedding to one named identity, or `None`
    /// when the name is not in the catalog.
    pub fn score_against(
        &self,
        query: &Embedding,
        name: &str,
    ) -> Result<Option<ReferenceMatch>, Error> {
        match self.index.find_by_name(query, name)? {
            Some((idx, score)) => {
                let info = self.index.info(idx)?;
                Ok(Some(ReferenceMatch {
                    index: idx,
                    name: info.name.clone(),
                    score,
                }))
            }
            None => Ok(None),
        }
    }

    /// Resolve a query image to an embedding: cache lookup first, then
    /// the external model, then a best-effort cache write. `source` is
    /// the image's storage path and drives the cache key; pass `None`
    /// to skip caching for this query.
    pub fn resolve_query(
        &self,
        embedder: &dyn FaceEmbedder,
        cache: &EmbeddingCache,
        image_bytes: &[u8],
        source: Option<&Path>,
    ) -> anyhow::Result<FaceOutcome> {
        if let Some(path) = source {
            if let Some(hit) = cache.get(path) {
                return Ok(FaceOutcome::Detected(hit));
            }
        }
        let outcome = embedder.embed(image_bytes)?;
        if let (FaceOutcome::Detected(embedding), Some(path)) = (&outcome, source) {
            cache.put(path, embedding);
        }
        Ok(outcome)
    }
}
