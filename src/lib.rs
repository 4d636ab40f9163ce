pub mod batch;
pub mod cache;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;

// Re-export the types the transport layer works with
pub use batch::{
    BatchItem, BatchOutput, BatchRanker, ImageFailure, ImageOutcome, QueryImage, RankMode,
    RankedImage, MAX_BATCH_FILES, MAX_IMAGE_BYTES,
};
pub use cache::EmbeddingCache;
pub use embedding::{Embedding, FaceEmbedder, FaceOutcome, EMBEDDING_DIM};
pub use engine::{CatalogMatch, ReferenceMatch, SimilarityEngine};
pub use error::Error;
pub use index::{IdentityMeta, VectorIndex};
