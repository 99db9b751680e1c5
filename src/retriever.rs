//! Top-k retrieval: embed the query, search the index, resolve hits to text.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use anyhow::{Context, Result};
use lru::LruCache;
use tracing::warn;

use crate::bootstrap::RetrievalContext;
use crate::embedder::QueryEmbedder;

/// Read-only retrieval pipeline shared across concurrent requests.
///
/// Everything but the embedding call is CPU-bound; the optional LRU cache
/// keeps repeated questions from re-hitting the embedding endpoint.
pub struct Retriever<E> {
    context: RetrievalContext,
    embedder: E,
    default_top_k: usize,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl<E: QueryEmbedder> Retriever<E> {
    /// Assembles a retriever over bootstrap-owned structures.
    ///
    /// `cache_size` of zero disables the query-embedding cache.
    pub fn new(
        context: RetrievalContext,
        embedder: E,
        default_top_k: usize,
        cache_size: usize,
    ) -> Self {
        let cache =
            NonZeroUsize::new(cache_size).map(|capacity| Mutex::new(LruCache::new(capacity)));
        Self {
            context,
            embedder,
            default_top_k: default_top_k.max(1),
            cache,
        }
    }

    /// Top-k requested when the caller does not override it.
    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Returns the text of the `k` chunks nearest to `query_text`, most
    /// similar first.
    ///
    /// Hits whose id no longer resolves to a stored chunk are skipped rather
    /// than failing the call, so one stale entry cannot abort an answer. An
    /// empty result is valid and means the prompt goes out context-free.
    pub fn retrieve_top_k(&self, query_text: &str, k: Option<usize>) -> Result<Vec<String>> {
        let k = k.unwrap_or(self.default_top_k);
        if self.context.index().row_count() == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embed(query_text)?;
        let hits = self.context.index().search(&embedding, k)?;
        let mut texts = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = match self.context.id_map().resolve(hit.row) {
                Ok(id) => id,
                Err(err) => {
                    warn!(row = hit.row, "dropping unresolvable search hit: {err}");
                    continue;
                }
            };
            match self.context.store().get(id) {
                Some(chunk) => texts.push(chunk.text.clone()),
                None => warn!(id, "chunk missing from store, skipping drifted hit"),
            }
        }
        Ok(texts)
    }

    fn embed(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Ok(mut guard) = cache.lock() {
                if let Some(hit) = guard.get(query) {
                    return Ok(hit.clone());
                }
            }
        }
        let embedding = self
            .embedder
            .encode(query)
            .context("query embedding failed")?;
        if let Some(cache) = &self.cache {
            if let Ok(mut guard) = cache.lock() {
                guard.put(query.to_string(), embedding.clone());
            }
        }
        Ok(embedding)
    }
}
