use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors surfaced to the caller. Per-image problems inside a
/// batch are not represented here; they live in
/// [`crate::batch::ImageFailure`] so one bad image never aborts its
/// siblings.
#[derive(Debug, Error)]
pub enum Error {
    /// Catalog artifacts are present but inconsistent with each other.
    #[error("metadata and embedding row counts do not match: {rows} matrix rows, {entries} metadata entries")]
    RowCountMismatch { rows: usize, entries: usize },

    #[error("catalog matrix has {found} columns, expected {expected}")]
    MatrixDimension { expected: usize, found: usize },

    #[error("embedding has {found} values, expected {expected}")]
    EmbeddingDimension { expected: usize, found: usize },

    #[error("reading {path}: {source}")]
    CatalogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decoding embedding matrix {path}: {source}")]
    MatrixDecode {
        path: PathBuf,
        #[source]
        source: postcard::Error,
    },

    #[error("decoding metadata {path}: {source}")]
    MetadataDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no images in batch")]
    EmptyBatch,

    #[error("batch of {count} images exceeds the limit of {limit}")]
    BatchTooLarge { count: usize, limit: usize },
}
