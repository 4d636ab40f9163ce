use crate::error::Error;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Output dimension of the face recognition model.
pub const EMBEDDING_DIM: usize = 512;

/// Added to every L2 denominator so a degenerate all-zero vector
/// normalizes to zero instead of dividing by zero.
pub const NORM_EPSILON: f32 = 1e-12;

/// Face embedding produced by the external recognition model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    vector: Array1<f32>,
}

impl Embedding {
    /// Build an embedding from raw model output. Rejects any length
    /// other than [`EMBEDDING_DIM`].
    pub fn from_vec(values: Vec<f32>) -> Result<Self, Error> {
        if values.len() != EMBEDDING_DIM {
            return Err(Error::EmbeddingDimension {
                expected: EMBEDDING_DIM,
                found: values.len(),
            });
        }
        Ok(Self {
            vector: Array1::from_vec(values),
        })
    }

    pub fn as_array(&self) -> &Array1<f32> {
        &self.vector
    }

    /// Unit-normalized copy of the vector. Idempotent within
    /// floating-point tolerance on an already-normalized input.
    pub fn unit(&self) -> Array1<f32> {
        let mut v = self.vector.clone();
        l2_normalize(&mut v);
        v
    }
}

/// L2-normalize in place, epsilon-guarded against zero vectors.
pub fn l2_normalize(v: &mut Array1<f32>) {
    let norm = v.dot(v).sqrt() + NORM_EPSILON;
    v.mapv_inplace(|x| x / norm);
}

/// Result of running face detection + encoding on one image.
/// "No face in the picture" is a normal outcome, not an error; the
/// error channel of [`FaceEmbedder::embed`] is reserved for genuine
/// failures (unreadable input, model I/O).
#[derive(Debug, Clone)]
pub enum FaceOutcome {
    Detected(Embedding),
    NoFaceFound,
}

/// External face detection/embedding model.
///
/// The model is expensive to initialize and should be constructed once
/// per process, ideally at startup.
pub trait FaceEmbedder {
    fn embed(&self, image_bytes: &[u8]) -> anyhow::Result<FaceOutcome>;
}
