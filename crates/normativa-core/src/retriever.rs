//! Query-time retrieval over a loaded index pair.
//!
//! A [Retriever] is built once at startup and never mutated afterwards, so it can be shared
//! between threads behind an `Arc`. Picking up a new ingestion run means loading a new
//! retriever and swapping it in.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::artifacts::{file_checksum, ArtifactError, IndexPaths};
use crate::embed::{EmbedError, Embedder};
use crate::metadata::{MetadataError, MetadataStore};
use crate::store::{IndexError, VectorIndex};

/// One ranked hit, ready to be shown or fed to a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub text: String,
    /// Cosine similarity with the query.
    pub score: f32,
}

pub struct Retriever {
    embedder: Box<dyn Embedder>,
    index: VectorIndex,
    metadata: MetadataStore,
}

impl Retriever {
    /// Wrap an in-memory index pair. Fails if the two disagree on row count.
    pub fn new(
        embedder: Box<dyn Embedder>,
        index: VectorIndex,
        metadata: MetadataStore,
    ) -> Result<Self, RetrieveError> {
        if index.len() != metadata.len() {
            return Err(RetrieveError::Inconsistent {
                index_rows: index.len(),
                metadata_rows: metadata.len(),
            });
        }
        Ok(Self {
            embedder,
            index,
            metadata,
        })
    }

    /// Load the index pair written by ingestion.
    pub fn load(paths: &IndexPaths, embedder: Box<dyn Embedder>) -> Result<Self, RetrieveError> {
        let index_path = paths.vector_index();
        let meta_path = paths.metadata();
        for path in [&index_path, &meta_path] {
            if !path.is_file() {
                return Err(RetrieveError::MissingArtifact(path.clone()));
            }
        }
        let index = VectorIndex::load(&index_path)?;
        let checksum = file_checksum(&meta_path)?;
        if index.pair_tag() != checksum {
            return Err(RetrieveError::Unpaired {
                index: index.pair_tag(),
                metadata: checksum,
            });
        }
        let metadata = MetadataStore::load(&meta_path)?;
        info!(
            rows = index.len(),
            dimension = ?index.dimension(),
            model = embedder.model_id(),
            "loaded vector index"
        );
        Self::new(embedder, index, metadata)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Top `k` chunks for `query`, best first. An empty index gives an empty result.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>, RetrieveError> {
        if self.index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let q = self.embedder.encode_one(query)?;
        let hits = self.index.search(&q, k)?;
        debug!(k, hits = hits.len(), "vector search");
        hits.into_iter()
            .map(|hit| {
                let record = self.metadata.get(hit.row)?;
                Ok(SearchResult {
                    title: record.title.clone(),
                    text: record.text.clone(),
                    score: hit.score,
                })
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error("missing index artifact {}; run `normativa ingest` first", .0.display())]
    MissingArtifact(PathBuf),
    #[error("index has {index_rows} rows but metadata has {metadata_rows}; run `normativa ingest` again")]
    Inconsistent {
        index_rows: usize,
        metadata_rows: usize,
    },
    #[error("index was published with sidecar {index:016x} but found {metadata:016x}; run `normativa ingest` again")]
    Unpaired { index: u64, metadata: u64 },
    #[error("{0}")]
    Index(#[from] IndexError),
    #[error("{0}")]
    Artifact(#[from] ArtifactError),
    #[error("{0}")]
    Metadata(#[from] MetadataError),
    #[error("{0}")]
    Embed(#[from] EmbedError),
}
