//! Positional mapping from index rows to stable chunk identifiers.

use std::fmt;

use crc32fast::Hasher as Crc32;

use crate::chunks::ChunkRecord;

/// Error raised when a search hit references a row outside the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The requested row does not exist in the map.
    RowOutOfRange {
        /// Row the caller asked for.
        row: usize,
        /// Number of rows the map actually holds.
        rows: usize,
    },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RowOutOfRange { row, rows } => {
                write!(f, "row {row} is outside the identifier map of {rows} rows")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Ordered chunk ids, one per index row, immutable after construction.
///
/// Built from the same record sequence as the vector index; row `i` of the
/// index corresponds to `ids[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierMap {
    ids: Vec<String>,
}

impl IdentifierMap {
    /// Extracts ids from the bulk-read records, preserving their order.
    pub fn build(records: &[ChunkRecord]) -> Self {
        Self {
            ids: records.iter().map(|record| record.id.clone()).collect(),
        }
    }

    /// Resolves an index row to its chunk id.
    pub fn resolve(&self, row: usize) -> Result<&str, ResolveError> {
        self.ids
            .get(row)
            .map(String::as_str)
            .ok_or(ResolveError::RowOutOfRange {
                row,
                rows: self.ids.len(),
            })
    }

    /// Number of mapped rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when no rows are mapped.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// CRC32 digest over the ordered id list.
    ///
    /// Stored inside the persisted index artifact and re-checked on load; a
    /// reordered or reshaped corpus fails startup instead of mis-mapping rows.
    pub fn digest(&self) -> u32 {
        let mut hasher = Crc32::new();
        for id in &self.ids {
            hasher.update(id.as_bytes());
            // id boundary marker
            hasher.update(&[0]);
        }
        hasher.finalize()
    }
}
