//! All backend logic independent of how the app is run.
//!
//! Source documents live in a folder the operator chooses. Normativa stores only config and
//! the index in its own app data directory (see [app_data]).
//!
//! Ingestion ([index::IndexBuilder]) turns documents into a vector index plus a positional
//! metadata sidecar. Querying ([retriever::Retriever], [context::assemble]) reads them back
//! and builds the grounded context that [assistant::Assistant] hands to a chat provider.

pub mod app_data;
pub mod artifacts;
pub mod assistant;
pub mod chunks;
pub mod config;
pub mod context;
pub mod documents;
pub mod embed;
pub mod eval;
pub mod index;
pub mod metadata;
pub mod ollama;
pub mod prompt;
pub mod providers;
pub mod retriever;
pub mod sources;
pub mod store;

pub use app_data::app_data_dir;
pub use artifacts::IndexPaths;
pub use assistant::{Answer, AskError, Assistant};
pub use chunks::{chunk_document, chunk_documents, Chunk, Chunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use config::{load_config, load_config_from, save_config, Config, ConfigError};
pub use context::{assemble, unique_titles, GroundedContext};
pub use documents::{scan_documents, Document, PlainTextExtractor, ScanError, TextExtractor};
pub use embed::{EmbedError, Embedder, HashingEmbedder};
pub use index::{IndexBuilder, IngestError, IngestOptions, IngestReport};
pub use metadata::{MetadataRecord, MetadataStore};
pub use providers::{ChatProvider, ProviderError, ProviderKind, ProviderRegistry};
pub use retriever::{RetrieveError, Retriever, SearchResult};
pub use sources::SourceTable;
pub use store::VectorIndex;

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "normativa-core ready"
}
