//! Chunk records and the in-memory corpus cache shared by retrieval stages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One retrievable unit of text with its precomputed embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Stable identifier assigned by the document source.
    pub id: String,
    /// Chunk body text spliced into generation prompts.
    pub text: String,
    /// Embedding vector computed at ingestion time, never recomputed here.
    pub embedding: Vec<f32>,
}

/// Read-only id lookup over the startup bulk read.
///
/// Point lookups during hit resolution go through this cache so the search
/// path never touches the network.
#[derive(Debug, Default)]
pub struct ChunkStore {
    by_id: HashMap<String, ChunkRecord>,
}

impl ChunkStore {
    /// Indexes the bulk-read records by id.
    pub fn new(records: &[ChunkRecord]) -> Self {
        let by_id = records
            .iter()
            .map(|record| (record.id.clone(), record.clone()))
            .collect();
        Self { by_id }
    }

    /// Point lookup by chunk id.
    pub fn get(&self, id: &str) -> Option<&ChunkRecord> {
        self.by_id.get(id)
    }

    /// Number of cached chunks.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when the corpus is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
