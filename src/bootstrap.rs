//! One-time startup construction of the retrieval structures.

use std::path::Path;

use tracing::info;

use crate::chunks::{ChunkRecord, ChunkStore};
use crate::idmap::IdentifierMap;
use crate::index::{IndexError, VectorIndex};

/// Immutable retrieval state owned for the process lifetime.
///
/// Constructed exactly once by [`prepare`] (or directly in tests), then moved
/// behind the HTTP state and shared read-only; no locking is needed on the
/// query path because nothing mutates after construction.
#[derive(Debug)]
pub struct RetrievalContext {
    index: VectorIndex,
    id_map: IdentifierMap,
    store: ChunkStore,
}

impl RetrievalContext {
    /// Bundles already-built structures into a context.
    pub fn new(index: VectorIndex, id_map: IdentifierMap, store: ChunkStore) -> Self {
        Self {
            index,
            id_map,
            store,
        }
    }

    /// The similarity index.
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// The row-to-id map aligned with the index.
    pub fn id_map(&self) -> &IdentifierMap {
        &self.id_map
    }

    /// The in-memory chunk cache.
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }
}

/// Loads the persisted index when present, otherwise builds and persists it.
///
/// The identifier map is always rebuilt from the live record order, and a
/// loaded artifact must carry the same dimensionality and identifier-manifest
/// digest or startup fails. Blocking and single-threaded; nothing serves
/// until it returns.
pub fn prepare(
    records: Vec<ChunkRecord>,
    index_path: &Path,
    dimension: usize,
) -> Result<RetrievalContext, IndexError> {
    let id_map = IdentifierMap::build(&records);
    let digest = id_map.digest();

    let index = if index_path.exists() {
        let index = VectorIndex::load(index_path, dimension)?;
        index.verify_manifest(digest)?;
        info!(
            rows = index.row_count(),
            path = %index_path.display(),
            "loaded persisted vector index"
        );
        index
    } else {
        let embeddings = records.iter().map(|record| record.embedding.as_slice());
        let index = VectorIndex::build(embeddings, dimension, digest)?;
        index.persist(index_path)?;
        info!(
            rows = index.row_count(),
            path = %index_path.display(),
            "built and persisted vector index"
        );
        index
    };

    let store = ChunkStore::new(&records);
    Ok(RetrievalContext::new(index, id_map, store))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            text: format!("text {id}"),
            embedding,
        }
    }

    fn corpus() -> Vec<ChunkRecord> {
        vec![
            record("a", vec![1.0, 0.0]),
            record("b", vec![0.0, 1.0]),
            record("c", vec![-1.0, 0.0]),
        ]
    }

    #[test]
    fn cold_start_builds_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");

        let context = prepare(corpus(), &path, 2).expect("prepare");
        assert!(path.exists());
        assert_eq!(context.index().row_count(), 3);
        assert_eq!(context.id_map().len(), 3);
        assert_eq!(context.store().len(), 3);
    }

    #[test]
    fn warm_start_loads_and_matches_cold_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");

        let cold = prepare(corpus(), &path, 2).expect("cold");
        let warm = prepare(corpus(), &path, 2).expect("warm");

        let query = [0.7f32, 0.7];
        let cold_hits = cold.index().search(&query, 3).expect("search");
        let warm_hits = warm.index().search(&query, 3).expect("search");
        assert_eq!(cold_hits.len(), warm_hits.len());
        for (a, b) in cold_hits.iter().zip(&warm_hits) {
            assert_eq!(a.row, b.row);
            assert!((a.score - b.score).abs() < 1e-6);
        }
    }

    #[test]
    fn reshaped_corpus_fails_the_manifest_check() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");
        prepare(corpus(), &path, 2).expect("cold");

        let mut grown = corpus();
        grown.push(record("d", vec![0.5, 0.5]));
        let err = prepare(grown, &path, 2).unwrap_err();
        assert!(matches!(err, IndexError::Manifest { .. }));
    }

    #[test]
    fn reordered_corpus_fails_the_manifest_check() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");
        prepare(corpus(), &path, 2).expect("cold");

        let mut reordered = corpus();
        reordered.reverse();
        let err = prepare(reordered, &path, 2).unwrap_err();
        assert!(matches!(err, IndexError::Manifest { .. }));
    }

    #[test]
    fn mismatched_record_dimension_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");
        let mut records = corpus();
        records[1].embedding = vec![0.0, 1.0, 0.0];

        let err = prepare(records, &path, 2).unwrap_err();
        assert!(matches!(err, IndexError::Dimension { row: Some(1), .. }));
        assert!(!path.exists());
    }

    #[test]
    fn empty_corpus_is_a_valid_bootstrap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");

        let context = prepare(Vec::new(), &path, 2).expect("prepare");
        assert_eq!(context.index().row_count(), 0);
        assert!(context.store().is_empty());
    }
}
