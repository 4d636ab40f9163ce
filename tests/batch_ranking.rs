use std::fs;
use std::path::Path;
use std::sync::Arc;

use facematch::{
    index::{EMBEDDINGS_FILE, METADATA_FILE},
    BatchOutput, BatchRanker, Embedding, EmbeddingCache, Error, FaceEmbedder, FaceOutcome,
    IdentityMeta, ImageFailure, ImageOutcome, QueryImage, RankMode, SimilarityEngine, VectorIndex,
    EMBEDDING_DIM,
};
use ndarray::Array2;
use tempfile::TempDir;

/// Deterministic stand-in for the external model. The first payload
/// byte scripts the outcome: 0..=100 embeds to a unit vector whose
/// similarity to the "Alice" axis is byte/100, 255 reports no face,
/// and an empty payload is a genuine model failure.
struct ScriptedEmbedder;

impl FaceEmbedder for ScriptedEmbedder {
    fn embed(&self, image_bytes: &[u8]) -> anyhow::Result<FaceOutcome> {
        match image_bytes.first() {
            None => anyhow::bail!("unreadable image"),
            Some(255) => Ok(FaceOutcome::NoFaceFound),
            Some(&b) => {
                let s = f32::from(b) / 100.0;
                let mut v = vec![0.0f32; EMBEDDING_DIM];
                v[0] = s;
                v[1] = (1.0 - s * s).max(0.0).sqrt();
                Ok(FaceOutcome::Detected(Embedding::from_vec(v)?))
            }
        }
    }
}

/// A model that always fails; used to prove the cache path is taken.
struct BrokenEmbedder;

impl FaceEmbedder for BrokenEmbedder {
    fn embed(&self, _image_bytes: &[u8]) -> anyhow::Result<FaceOutcome> {
        anyhow::bail!("model unavailable")
    }
}

fn basis(idx: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[idx] = 1.0;
    v
}

fn write_catalog(dir: &Path, rows: &[Vec<f32>], names: &[&str]) {
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    let matrix = Array2::from_shape_vec((rows.len(), EMBEDDING_DIM), flat).unwrap();
    fs::write(
        dir.join(EMBEDDINGS_FILE),
        postcard::to_allocvec(&matrix).unwrap(),
    )
    .unwrap();
    let meta: Vec<IdentityMeta> = names
        .iter()
        .map(|n| IdentityMeta {
            name: n.to_string(),
            image_rel: None,
        })
        .collect();
    fs::write(
        dir.join(METADATA_FILE),
        serde_json::to_string(&meta).unwrap(),
    )
    .unwrap();
}

/// Catalog with Alice, Bob and Carol on orthogonal axes, plus a
/// disabled cache so nothing is written outside the tempdir.
fn ranker() -> (TempDir, BatchRanker) {
    let dir = tempfile::tempdir().unwrap();
    write_catalog(
        dir.path(),
        &[basis(0), basis(1), basis(2)],
        &["Alice", "Bob", "Carol"],
    );
    let engine = SimilarityEngine::new(Arc::new(VectorIndex::open(dir.path())));
    let ranker = BatchRanker::new(engine, EmbeddingCache::disabled());
    (dir, ranker)
}

fn image(filename: &str, first_byte: u8) -> QueryImage {
    QueryImage {
        filename: filename.to_string(),
        content_type: Some("image/jpeg".to_string()),
        bytes: vec![first_byte],
    }
}

fn reference(name: &str, limit: usize) -> RankMode {
    RankMode::Reference {
        name: name.to_string(),
        ranking_limit: limit,
    }
}

#[test]
fn reference_ranking_orders_and_truncates() {
    let (_dir, ranker) = ranker();
    let images = [image("a.jpg", 90), image("b.jpg", 30), image("c.jpg", 60)];

    let output = ranker
        .rank(&ScriptedEmbedder, &images, &reference("Alice", 2))
        .unwrap();

    match output {
        BatchOutput::Ranked {
            items,
            ranking,
            reference,
        } => {
            assert_eq!(reference, "Alice");
            // Full detail for all three, ranking truncated to two.
            assert_eq!(items.len(), 3);
            assert_eq!(ranking.len(), 2);
            assert_eq!(ranking[0].filename, "a.jpg");
            assert_eq!(ranking[1].filename, "c.jpg");
            assert!((ranking[0].score - 0.9).abs() < 1e-3);
            assert!((ranking[1].score - 0.6).abs() < 1e-3);
        }
        other => panic!("expected ranked output, got {other:?}"),
    }
}

#[test]
fn one_bad_image_never_aborts_the_batch() {
    let (_dir, ranker) = ranker();
    let images = [
        image("good1.jpg", 80),
        image("blank.jpg", 255),
        image("good2.jpg", 40),
    ];

    let output = ranker
        .rank(
            &ScriptedEmbedder,
            &images,
            &RankMode::List {
                matches_per_image: 2,
            },
        )
        .unwrap();

    let items = match output {
        BatchOutput::Listed(items) => items,
        other => panic!("expected listed output, got {other:?}"),
    };
    assert_eq!(items.len(), 3);
    // Input order is preserved in list mode.
    assert_eq!(items[0].filename, "good1.jpg");
    assert_eq!(items[1].filename, "blank.jpg");
    assert_eq!(items[2].filename, "good2.jpg");
    assert!(matches!(
        items[1].outcome,
        ImageOutcome::Failed(ImageFailure::NoFaceFound)
    ));
    for item in [&items[0], &items[2]] {
        match &item.outcome {
            ImageOutcome::Matches(matches) => {
                assert_eq!(matches.len(), 2);
                assert!(matches[0].score >= matches[1].score);
                assert_eq!(matches[0].name, "Alice");
            }
            other => panic!("expected matches, got {other:?}"),
        }
    }
}

#[test]
fn batch_ceiling_is_atomic() {
    let (_dir, ranker) = ranker();

    let over: Vec<QueryImage> = (0..21).map(|i| image(&format!("{i}.jpg"), 50)).collect();
    assert!(matches!(
        ranker
            .rank(&ScriptedEmbedder, &over, &reference("Alice", 5))
            .unwrap_err(),
        Error::BatchTooLarge {
            count: 21,
            limit: 20
        }
    ));

    let full: Vec<QueryImage> = (0..20).map(|i| image(&format!("{i}.jpg"), 50)).collect();
    match ranker
        .rank(&ScriptedEmbedder, &full, &reference("Alice", 5))
        .unwrap()
    {
        BatchOutput::Ranked { items, ranking, .. } => {
            assert_eq!(items.len(), 20);
            assert_eq!(ranking.len(), 5);
        }
        other => panic!("expected ranked output, got {other:?}"),
    }
}

#[test]
fn empty_batch_is_rejected() {
    let (_dir, ranker) = ranker();
    assert!(matches!(
        ranker
            .rank(&ScriptedEmbedder, &[], &reference("Alice", 3))
            .unwrap_err(),
        Error::EmptyBatch
    ));
}

#[test]
fn per_image_guards_are_isolated() {
    let (_dir, ranker) = ranker();
    let ranker = ranker.with_limits(20, 64);
    let images = [
        QueryImage {
            filename: "notes.txt".to_string(),
            content_type: Some("text/plain".to_string()),
            bytes: vec![50],
        },
        QueryImage {
            filename: "huge.jpg".to_string(),
            content_type: Some("image/jpeg".to_string()),
            bytes: vec![50; 65],
        },
        QueryImage {
            filename: "untyped.jpg".to_string(),
            content_type: None,
            bytes: vec![50],
        },
        QueryImage {
            filename: "broken.jpg".to_string(),
            content_type: Some("image/jpeg".to_string()),
            bytes: Vec::new(),
        },
        image("fine.jpg", 70),
    ];

    let output = ranker
        .rank(&ScriptedEmbedder, &images, &reference("Alice", 10))
        .unwrap();
    match output {
        BatchOutput::Ranked { items, ranking, .. } => {
            assert!(matches!(
                items[0].outcome,
                ImageOutcome::Failed(ImageFailure::NotAnImage)
            ));
            assert!(matches!(
                items[1].outcome,
                ImageOutcome::Failed(ImageFailure::TooLarge { size: 65, max: 64 })
            ));
            assert!(matches!(
                items[2].outcome,
                ImageOutcome::Failed(ImageFailure::NotAnImage)
            ));
            assert!(matches!(
                items[3].outcome,
                ImageOutcome::Failed(ImageFailure::EmbeddingFailed(_))
            ));
            assert!(matches!(
                items[4].outcome,
                ImageOutcome::ReferenceScore { .. }
            ));
            assert_eq!(ranking.len(), 1);
            assert_eq!(ranking[0].filename, "fine.jpg");
        }
        other => panic!("expected ranked output, got {other:?}"),
    }
}

#[test]
fn unknown_reference_is_a_per_image_failure() {
    let (_dir, ranker) = ranker();
    let images = [image("a.jpg", 90)];
    match ranker
        .rank(&ScriptedEmbedder, &images, &reference("Mallory", 3))
        .unwrap()
    {
        BatchOutput::Ranked { items, ranking, .. } => {
            assert!(matches!(
                &items[0].outcome,
                ImageOutcome::Failed(ImageFailure::ReferenceNotFound { name }) if name == "Mallory"
            ));
            assert!(ranking.is_empty());
        }
        other => panic!("expected ranked output, got {other:?}"),
    }
}

#[test]
fn empty_catalog_is_distinguishable_per_image() {
    // No artifacts on disk: valid empty catalog.
    let dir = tempfile::tempdir().unwrap();
    let engine = SimilarityEngine::new(Arc::new(VectorIndex::open(dir.path())));
    let ranker = BatchRanker::new(engine, EmbeddingCache::disabled());
    let images = [image("a.jpg", 90)];

    for mode in [
        RankMode::List {
            matches_per_image: 3,
        },
        reference("Alice", 3),
    ] {
        let items = match ranker.rank(&ScriptedEmbedder, &images, &mode).unwrap() {
            BatchOutput::Listed(items) => items,
            BatchOutput::Ranked { items, ranking, .. } => {
                assert!(ranking.is_empty());
                items
            }
        };
        assert!(matches!(
            items[0].outcome,
            ImageOutcome::Failed(ImageFailure::CatalogUnavailable)
        ));
    }
}

#[test]
fn row_count_mismatch_fails_the_whole_batch() {
    let dir = tempfile::tempdir().unwrap();
    write_catalog(dir.path(), &[basis(0), basis(1)], &["Alice"]);
    let engine = SimilarityEngine::new(Arc::new(VectorIndex::open(dir.path())));
    let ranker = BatchRanker::new(engine, EmbeddingCache::disabled());
    let images = [image("a.jpg", 90)];

    assert!(matches!(
        ranker
            .rank(&ScriptedEmbedder, &images, &reference("Alice", 3))
            .unwrap_err(),
        Error::RowCountMismatch { .. }
    ));
}

#[test]
fn cache_serves_repeat_queries_and_misses_fall_back() {
    let catalog_dir = tempfile::tempdir().unwrap();
    write_catalog(catalog_dir.path(), &[basis(0)], &["Alice"]);
    let uploads = tempfile::tempdir().unwrap();
    let cache = EmbeddingCache::new(uploads.path(), true);
    let engine = SimilarityEngine::new(Arc::new(VectorIndex::open(catalog_dir.path())));
    let ranker = BatchRanker::new(engine, cache.clone());
    let images = [image("query.jpg", 90)];

    // First pass computes the embedding and writes the record.
    ranker
        .rank(&ScriptedEmbedder, &images, &reference("Alice", 1))
        .unwrap();
    let record = cache.record_path(Path::new("query.jpg"));
    assert!(record.exists());

    // Second pass never reaches the (now broken) model.
    match ranker
        .rank(&BrokenEmbedder, &images, &reference("Alice", 1))
        .unwrap()
    {
        BatchOutput::Ranked { ranking, .. } => {
            assert_eq!(ranking.len(), 1);
            assert!((ranking[0].score - 0.9).abs() < 1e-3);
        }
        other => panic!("expected ranked output, got {other:?}"),
    }

    // Corrupting the record turns the lookup back into a cold
    // computation, which here surfaces the model failure per image.
    fs::write(&record, "{corrupt").unwrap();
    match ranker
        .rank(&BrokenEmbedder, &images, &reference("Alice", 1))
        .unwrap()
    {
        BatchOutput::Ranked { items, ranking, .. } => {
            assert!(matches!(
                items[0].outcome,
                ImageOutcome::Failed(ImageFailure::EmbeddingFailed(_))
            ));
            assert!(ranking.is_empty());
        }
        other => panic!("expected ranked output, got {other:?}"),
    }

    // And with the scripted model back, the cold path recomputes fine.
    match ranker
        .rank(&ScriptedEmbedder, &images, &reference("Alice", 1))
        .unwrap()
    {
        BatchOutput::Ranked { ranking, .. } => {
            assert_eq!(ranking.len(), 1);
            assert!((ranking[0].score - 0.9).abs() < 1e-3);
        }
        other => panic!("expected ranked output, got {other:?}"),
    }
}
