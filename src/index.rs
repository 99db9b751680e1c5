//! Exact inner-product similarity index over L2-normalized embeddings.
//!
//! Flat storage: every vector is scored against the query, results are exact,
//! and insertion order doubles as row order.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Leading bytes identifying a persisted index artifact.
const MAGIC: [u8; 4] = *b"rsvi";
/// On-disk layout tag; bump whenever the artifact shape changes.
const FORMAT_VERSION: u32 = 1;

/// Errors raised while building, persisting, loading or searching the index.
#[derive(Debug)]
pub enum IndexError {
    /// A vector's length disagrees with the configured dimensionality.
    Dimension {
        /// Offending row, or `None` when the query vector is at fault.
        row: Option<usize>,
        /// Dimensionality the index was configured with.
        expected: usize,
        /// Length actually observed.
        got: usize,
    },
    /// The persisted artifact is unreadable or fails header validation.
    Corrupt(String),
    /// The artifact's identifier manifest disagrees with the live corpus.
    Manifest {
        /// Digest stored in the artifact at build time.
        stored: u32,
        /// Digest computed from the live corpus read.
        computed: u32,
    },
    /// Underlying filesystem failure.
    Io(io::Error),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dimension {
                row: Some(row),
                expected,
                got,
            } => write!(
                f,
                "embedding at row {row} has {got} components, expected {expected}"
            ),
            Self::Dimension {
                row: None,
                expected,
                got,
            } => write!(
                f,
                "query vector has {got} components, expected {expected}"
            ),
            Self::Corrupt(detail) => write!(f, "persisted index is corrupt: {detail}"),
            Self::Manifest { stored, computed } => write!(
                f,
                "persisted index manifest {stored:#010x} does not match live corpus {computed:#010x}"
            ),
            Self::Io(err) => write!(f, "index storage error: {err}"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

/// One search hit: index row plus cosine similarity score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    /// Row of the matching stored vector.
    pub row: usize,
    /// Inner product of the unit-normalized query and stored vectors.
    pub score: f32,
}

/// Flat index holding unit-normalized vectors in insertion order.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    vectors: Vec<f32>,
    manifest_digest: u32,
}

impl VectorIndex {
    /// Builds an index from per-chunk embeddings, normalizing each vector.
    ///
    /// `manifest_digest` is the identifier-map digest of the same record
    /// sequence; it travels with the persisted artifact.
    pub fn build<'a, I>(
        embeddings: I,
        dimension: usize,
        manifest_digest: u32,
    ) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let mut vectors = Vec::new();
        for (row, embedding) in embeddings.into_iter().enumerate() {
            if embedding.len() != dimension {
                return Err(IndexError::Dimension {
                    row: Some(row),
                    expected: dimension,
                    got: embedding.len(),
                });
            }
            vectors.extend(normalized(embedding));
        }
        Ok(Self {
            dimension,
            vectors,
            manifest_digest,
        })
    }

    /// Dimensionality every stored and query vector must have.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn row_count(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    /// Identifier-map digest captured when the index was built.
    pub fn manifest_digest(&self) -> u32 {
        self.manifest_digest
    }

    /// Fails unless `computed` matches the digest stored with the index.
    pub fn verify_manifest(&self, computed: u32) -> Result<(), IndexError> {
        if self.manifest_digest != computed {
            return Err(IndexError::Manifest {
                stored: self.manifest_digest,
                computed,
            });
        }
        Ok(())
    }

    /// Scores every row against `query` and returns up to `k` hits, best
    /// first, ties broken by lower row index.
    ///
    /// Asking for more rows than exist returns everything available; fewer
    /// than `k` hits is a valid outcome.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::Dimension {
                row: None,
                expected: self.dimension,
                got: query.len(),
            });
        }
        let query = normalized(query);
        let mut hits: Vec<SearchHit> = self
            .vectors
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(row, stored)| SearchHit {
                row,
                score: dot(stored, &query),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.row.cmp(&b.row))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Writes the index to `path`, overwriting any existing artifact.
    pub fn persist(&self, path: &Path) -> Result<(), IndexError> {
        let file = File::create(path).map_err(IndexError::Io)?;
        let artifact = ArtifactRef {
            magic: MAGIC,
            version: FORMAT_VERSION,
            dimension: self.dimension as u64,
            rows: self.row_count() as u64,
            manifest_digest: self.manifest_digest,
            vectors: &self.vectors,
        };
        bincode::serialize_into(BufWriter::new(file), &artifact)
            .map_err(|err| IndexError::Io(io::Error::new(io::ErrorKind::Other, err)))
    }

    /// Reads a previously persisted artifact and validates its header.
    pub fn load(path: &Path, expected_dimension: usize) -> Result<Self, IndexError> {
        let file = File::open(path).map_err(IndexError::Io)?;
        let artifact: Artifact = bincode::deserialize_from(BufReader::new(file))
            .map_err(|err| IndexError::Corrupt(format!("failed to decode artifact: {err}")))?;
        if artifact.magic != MAGIC {
            return Err(IndexError::Corrupt(
                "file does not start with the index magic".to_string(),
            ));
        }
        if artifact.version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported index format version {}",
                artifact.version
            )));
        }
        let dimension = artifact.dimension as usize;
        if dimension != expected_dimension {
            return Err(IndexError::Dimension {
                row: None,
                expected: expected_dimension,
                got: dimension,
            });
        }
        let expected_len = (artifact.rows as usize).saturating_mul(dimension);
        if artifact.vectors.len() != expected_len {
            return Err(IndexError::Corrupt(format!(
                "vector payload holds {} values, header promises {}",
                artifact.vectors.len(),
                expected_len
            )));
        }
        Ok(Self {
            dimension,
            vectors: artifact.vectors,
            manifest_digest: artifact.manifest_digest,
        })
    }
}

#[derive(Serialize)]
struct ArtifactRef<'a> {
    magic: [u8; 4],
    version: u32,
    dimension: u64,
    rows: u64,
    manifest_digest: u32,
    vectors: &'a [f32],
}

#[derive(Deserialize)]
struct Artifact {
    magic: [u8; 4],
    version: u32,
    dimension: u64,
    rows: u64,
    manifest_digest: u32,
    vectors: Vec<f32>,
}

/// Unit-L2-normalized copy of `vector`; zero vectors pass through unchanged.
fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|v| v / norm).collect()
    } else {
        vector.to_vec()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn build(vectors: &[Vec<f32>], dimension: usize) -> VectorIndex {
        VectorIndex::build(vectors.iter().map(Vec::as_slice), dimension, 0).expect("build")
    }

    #[test]
    fn self_query_returns_own_row_with_unit_score() {
        let index = build(&[vec![3.0, 4.0], vec![-1.0, 2.0], vec![0.5, -0.5]], 2);

        let hits = index.search(&[3.0, 4.0], 1).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].row, 0);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn results_descend_with_row_tiebreak() {
        // rows 1 and 3 are identical, so they score equally against anything
        let index = build(
            &[
                vec![0.0, 1.0],
                vec![1.0, 1.0],
                vec![1.0, 0.0],
                vec![1.0, 1.0],
            ],
            2,
        );

        let hits = index.search(&[1.0, 1.0], 4).expect("search");
        assert!(hits
            .windows(2)
            .all(|pair| pair[0].score >= pair[1].score));
        assert_eq!(hits[0].row, 1);
        assert_eq!(hits[1].row, 3);
    }

    #[test]
    fn axis_corpus_scenario() {
        let index = build(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]], 2);

        let hits = index.search(&[1.0, 0.0], 2).expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].row, 0);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].row, 1);
        assert!(hits[1].score.abs() < 1e-6);
    }

    #[test]
    fn oversized_k_returns_all_rows_unpadded() {
        let index = build(&[vec![1.0, 0.0], vec![0.0, 1.0]], 2);

        let hits = index.search(&[1.0, 0.0], 10).expect("search");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn empty_index_yields_no_hits() {
        let index = build(&[], 2);

        assert_eq!(index.row_count(), 0);
        assert!(index.search(&[1.0, 0.0], 3).expect("search").is_empty());
    }

    #[test]
    fn build_rejects_mismatched_dimension() {
        let vectors = vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]];
        let err = VectorIndex::build(vectors.iter().map(Vec::as_slice), 2, 0).unwrap_err();

        assert!(matches!(
            err,
            IndexError::Dimension {
                row: Some(1),
                expected: 2,
                got: 3,
            }
        ));
    }

    #[test]
    fn search_rejects_mismatched_query_dimension() {
        let index = build(&[vec![1.0, 0.0]], 2);

        let err = index.search(&[1.0, 0.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, IndexError::Dimension { row: None, .. }));
    }

    #[test]
    fn persist_load_round_trip_preserves_search_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");
        let index = build(&[vec![0.2, 0.9], vec![-0.4, 0.1], vec![0.7, 0.7]], 2);
        index.persist(&path).expect("persist");

        let loaded = VectorIndex::load(&path, 2).expect("load");
        let before = index.search(&[0.3, 0.8], 3).expect("search");
        let after = loaded.search(&[0.3, 0.8], 3).expect("search");

        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.row, b.row);
            assert!((a.score - b.score).abs() < 1e-6);
        }
    }

    #[test]
    fn load_rejects_garbage_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("junk.bin");
        let mut file = File::create(&path).expect("create");
        file.write_all(b"this is not an index artifact").expect("write");

        let err = VectorIndex::load(&path, 2).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt(_)));
    }

    #[test]
    fn load_rejects_unexpected_dimension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.bin");
        build(&[vec![1.0, 0.0]], 2).persist(&path).expect("persist");

        let err = VectorIndex::load(&path, 3).unwrap_err();
        assert!(matches!(err, IndexError::Dimension { row: None, .. }));
    }

    #[test]
    fn manifest_verification_detects_drift() {
        let index = VectorIndex::build(
            [[1.0f32, 0.0].as_slice()],
            2,
            0xdead_beef,
        )
        .expect("build");

        assert!(index.verify_manifest(0xdead_beef).is_ok());
        assert!(matches!(
            index.verify_manifest(0x1234_5678),
            Err(IndexError::Manifest { .. })
        ));
    }
}
