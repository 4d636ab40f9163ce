//! Batch ranking pipeline.
//!
//! Processes up to [`MAX_BATCH_FILES`] query images against the
//! catalog in one call. Two modes:
//!
//! - list mode: each image independently gets its top-K catalog
//!   matches, output in input order;
//! - reference mode: each image is scored against one designated
//!   catalog identity, and the images themselves are re-ranked by that
//!   score, descending, truncated to a limit.
//!
//! Per-image problems (wrong content type, oversized payload, no face,
//! model failure) are captured in that image's outcome and never abort
//! siblings. Only batch-level problems (empty input, too many files,
//! a broken catalog) fail the whole call, atomically.

use crate::cache::EmbeddingCache;
use crate::embedding::{Embedding, FaceEmbedder, FaceOutcome};
use crate::engine::{CatalogMatch, SimilarityEngine};
use crate::error::Error;
use serde::Serialize;
use std::path::Path;

pub const MAX_BATCH_FILES: usize = 20;
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// One uploaded query image, as handed over by the transport layer.
#[derive(Debug, Clone)]
pub struct QueryImage {
    pub filename: String,
    /// Declared MIME type; anything that is not `image/*` is rejected
    /// per image without decoding the payload.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Batch mode. The original service overloaded one `top_k` flag for
/// both numbers; they are distinct parameters here because they mean
/// different things.
#[derive(Debug, Clone)]
pub enum RankMode {
    /// Per-image top-K catalog matches; `matches_per_image` counts
    /// catalog identities surfaced for each image.
    List { matches_per_image: usize },
    /// Score every image against `name` and rank the images by that
    /// score; `ranking_limit` counts query images surfaced in the
    /// final ranking.
    Reference { name: String, ranking_limit: usize },
}

/// Why one image produced no result. Isolated to that image's entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum ImageFailure {
    #[error("not an image")]
    NotAnImage,
    #[error("file too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("no face detected")]
    NoFaceFound,
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),
    /// The catalog has zero rows. Distinct from an empty match list or
    /// a missing reference name; callers should prompt for an index
    /// build rather than report "no matches".
    #[error("catalog is empty; build the index first")]
    CatalogUnavailable,
    #[error("reference identity {name:?} not found in catalog")]
    ReferenceNotFound { name: String },
}

/// Exactly one of success or failure per image, never both.
#[derive(Debug, Clone, Serialize)]
pub enum ImageOutcome {
    Matches(Vec<CatalogMatch>),
    ReferenceScore { reference: String, score: f32 },
    Failed(ImageFailure),
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub filename: String,
    pub outcome: ImageOutcome,
}

/// One entry of the reference-mode ranking.
#[derive(Debug, Clone, Serialize)]
pub struct RankedImage {
    pub filename: String,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub enum BatchOutput {
    /// List mode: one item per input image, in input order.
    Listed(Vec<BatchItem>),
    /// Reference mode: full per-image detail plus the truncated,
    /// score-ordered ranking. The ranking is the authoritative order;
    /// join detail onto it by filename.
    Ranked {
        items: Vec<BatchItem>,
        ranking: Vec<RankedImage>,
        reference: String,
    },
}

#[derive(Debug, Clone)]
pub struct BatchRanker {
    engine: SimilarityEngine,
    cache: EmbeddingCache,
    max_batch_files: usize,
    max_image_bytes: usize,
}

impl BatchRanker {
    pub fn new(engine: SimilarityEngine, cache: EmbeddingCache) -> Self {
        Self {
            engine,
            cache,
            max_batch_files: MAX_BATCH_FILES,
            max_image_bytes: MAX_IMAGE_BYTES,
        }
    }

    pub fn with_limits(mut self, max_batch_files: usize, max_image_bytes: usize) -> Self {
        self.max_batch_files = max_batch_files;
        self.max_image_bytes = max_image_bytes;
        self
    }

    /// Process a batch. Batch-level checks run before any image is
    /// touched, so an oversized batch produces no partial output.
    pub fn rank(
        &self,
        embedder: &dyn FaceEmbedder,
        images: &[QueryImage],
        mode: &RankMode,
    ) -> Result<BatchOutput, Error> {
        if images.is_empty() {
            return Err(Error::EmptyBatch);
        }
        if images.len() > self.max_batch_files {
            return Err(Error::BatchTooLarge {
                count: images.len(),
                limit: self.max_batch_files,
            });
        }
        // A broken catalog is a configuration error for the whole
        // batch, surfaced before any embedding work.
        self.engine.index().ensure_loaded()?;

        match mode {
            RankMode::List { matches_per_image } => {
                self.rank_list(embedder, images, *matches_per_image)
            }
            RankMode::Reference {
                name,
                ranking_limit,
            } => self.rank_by_reference(embedder, images, name, *ranking_limit),
        }
    }

    fn rank_list(
        &self,
        embedder: &dyn FaceEmbedder,
        images: &[QueryImage],
        matches_per_image: usize,
    ) -> Result<BatchOutput, Error> {
        let catalog_empty = self.engine.index().is_empty()?;
        let mut items = Vec::with_capacity(images.len());
        for image in images {
            let outcome = match self.resolve_image(embedder, image) {
                Err(failure) => ImageOutcome::Failed(failure),
                Ok(_) if catalog_empty => ImageOutcome::Failed(ImageFailure::CatalogUnavailable),
                Ok(embedding) => {
                    ImageOutcome::Matches(self.engine.top_matches(&embedding, matches_per_image)?)
                }
            };
            items.push(BatchItem {
                filename: image.filename.clone(),
                outcome,
            });
        }
        Ok(BatchOutput::Listed(items))
    }

    fn rank_by_reference(
        &self,
        embedder: &dyn FaceEmbedder,
        images: &[QueryImage],
        name: &str,
        ranking_limit: usize,
    ) -> Result<BatchOutput, Error> {
        let catalog_empty = self.engine.index().is_empty()?;
        let mut items = Vec::with_capacity(images.len());
        let mut ranking = Vec::new();
        for image in images {
            let outcome = match self.resolve_image(embedder, image) {
                Err(failure) => ImageOutcome::Failed(failure),
                Ok(_) if catalog_empty => ImageOutcome::Failed(ImageFailure::CatalogUnavailable),
                Ok(embedding) => match self.engine.score_against(&embedding, name)? {
                    None => ImageOutcome::Failed(ImageFailure::ReferenceNotFound {
                        name: name.to_string(),
                    }),
                    Some(reference) => {
                        ranking.push(RankedImage {
                            filename: image.filename.clone(),
                            score: reference.score,
                        });
                        ImageOutcome::ReferenceScore {
                            reference: reference.name,
                            score: reference.score,
                        }
                    }
                },
            };
            items.push(BatchItem {
                filename: image.filename.clone(),
                outcome,
            });
        }

        // Stable sort: the ranking is a function of the scores alone,
        // ties keep input order.
        ranking.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranking.truncate(ranking_limit);

        Ok(BatchOutput::Ranked {
            items,
            ranking,
            reference: name.to_string(),
        })
    }

    /// Per-image guards and embedding resolution. Every failure here is
    /// isolated to the image's own outcome.
    fn resolve_image(
        &self,
        embedder: &dyn FaceEmbedder,
        image: &QueryImage,
    ) -> Result<Embedding, ImageFailure> {
        match image.content_type.as_deref() {
            Some(ct) if ct.starts_with("image/") => {}
            _ => return Err(ImageFailure::NotAnImage),
        }
        if image.bytes.len() > self.max_image_bytes {
            return Err(ImageFailure::TooLarge {
                size: image.bytes.len(),
                max: self.max_image_bytes,
            });
        }
        let source = if image.filename.is_empty() {
            None
        } else {
            Some(Path::new(&image.filename))
        };
        match self
            .engine
            .resolve_query(embedder, &self.cache, &image.bytes, source)
        {
            Ok(FaceOutcome::Detected(embedding)) => Ok(embedding),
            Ok(FaceOutcome::NoFaceFound) => Err(ImageFailure::NoFaceFound),
            Err(e) => Err(ImageFailure::EmbeddingFailed(format!("{e:#}"))),
        }
    }
}
