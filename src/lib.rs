#![warn(missing_docs)]
//! Core library entry points for the ragserve question answering service.

pub mod bootstrap;
pub mod chunks;
pub mod embedder;
pub mod generator;
pub mod idmap;
pub mod index;
pub mod retriever;
pub mod sanitize;
pub mod source;

pub use bootstrap::{prepare, RetrievalContext};
pub use chunks::{ChunkRecord, ChunkStore};
pub use embedder::{OpenAiEmbedder, QueryEmbedder};
pub use generator::{GenerationClient, GenerationError, FALLBACK_ANSWER};
pub use idmap::{IdentifierMap, ResolveError};
pub use index::{IndexError, SearchHit, VectorIndex};
pub use retriever::Retriever;
pub use sanitize::sanitize_query;
pub use source::TableName;
