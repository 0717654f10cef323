//! Ingestion pipeline: scan → chunk → chunk log → embed → vector index + metadata sidecar.
//!
//! Chunks are streamed into the append-only chunk log first. The index pair is then rebuilt
//! from the whole log, so a crashed run is repaired by running ingestion again. The index
//! and sidecar are staged next to their final paths and only renamed into place once both
//! are fully written.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::artifacts::{
    file_checksum, publish, staging_path, ArtifactError, ChunkLog, ChunkTable, IndexPaths, MatrixWriter,
};
use crate::chunks::{chunk_document, Chunk, Chunker};
use crate::documents::{scan_documents, Document, PlainTextExtractor, ScanError, TextExtractor};
use crate::embed::{encode_batched, EmbedError, Embedder};
use crate::metadata::{MetadataError, MetadataRecord, MetadataStore};
use crate::sources::SourceTable;
use crate::store::{IndexError, VectorIndex};

/// Texts sent to the embedder per call.
pub const DEFAULT_EMBED_BATCH: usize = 256;
/// Chunks buffered before each append to the chunk log.
pub const DEFAULT_LOG_BATCH: usize = 500;

/// Where an ingestion run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    Idle,
    Loading,
    Chunking,
    Embedding,
    IndexWriting,
    Done,
}

impl fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IngestPhase::Idle => "idle",
            IngestPhase::Loading => "loading",
            IngestPhase::Chunking => "chunking",
            IngestPhase::Embedding => "embedding",
            IngestPhase::IndexWriting => "index-writing",
            IngestPhase::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub chunker: Chunker,
    pub embed_batch: usize,
    pub log_batch: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunker: Chunker::default(),
            embed_batch: DEFAULT_EMBED_BATCH,
            log_batch: DEFAULT_LOG_BATCH,
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub rows: usize,
    pub dimension: Option<usize>,
    pub index_dir: PathBuf,
}

/// Drives one ingestion run. Not reentrant: a builder runs once and ends in
/// [IngestPhase::Done] or in the phase that failed.
pub struct IndexBuilder<'a> {
    embedder: &'a dyn Embedder,
    extractor: &'a dyn TextExtractor,
    options: IngestOptions,
    phase: IngestPhase,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(embedder: &'a dyn Embedder) -> Self {
        Self {
            embedder,
            extractor: &PlainTextExtractor,
            options: IngestOptions::default(),
            phase: IngestPhase::Idle,
        }
    }

    pub fn with_extractor(mut self, extractor: &'a dyn TextExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn phase(&self) -> IngestPhase {
        self.phase
    }

    fn enter(&mut self, phase: IngestPhase) {
        info!(%phase, "ingestion phase");
        self.phase = phase;
    }

    /// Full run over every document under `docs_dir`.
    pub fn run(
        &mut self,
        docs_dir: &Path,
        sources: &SourceTable,
        paths: &IndexPaths,
    ) -> Result<IngestReport, IngestError> {
        self.enter(IngestPhase::Loading);
        let docs = scan_documents(docs_dir, self.extractor, sources)?;
        self.ingest_documents(&docs, paths)
    }

    /// Run from already loaded documents.
    pub fn ingest_documents(
        &mut self,
        docs: &[Document],
        paths: &IndexPaths,
    ) -> Result<IngestReport, IngestError> {
        if self.phase == IngestPhase::Idle {
            self.enter(IngestPhase::Loading);
        }
        paths.create_root()?;

        self.enter(IngestPhase::Chunking);
        let log = ChunkLog::new(paths.chunk_log());
        let chunks = self.write_chunk_log(docs, &log)?;

        self.enter(IngestPhase::Embedding);
        let (mut index, metadata) = self.embed_log(&log, paths)?;

        self.enter(IngestPhase::IndexWriting);
        write_index_pair(&mut index, &metadata, paths)?;

        self.enter(IngestPhase::Done);
        let report = IngestReport {
            documents: docs.len(),
            chunks,
            rows: index.len(),
            dimension: index.dimension(),
            index_dir: paths.root().to_path_buf(),
        };
        info!(
            documents = report.documents,
            chunks = report.chunks,
            rows = report.rows,
            model = self.embedder.model_id(),
            "ingestion complete"
        );
        Ok(report)
    }

    /// Chunk every document into a fresh log, appending in bounded batches.
    fn write_chunk_log(&self, docs: &[Document], log: &ChunkLog) -> Result<usize, IngestError> {
        log.reset()?;
        let mut pending: Vec<Chunk> = Vec::with_capacity(self.options.log_batch);
        let mut total = 0;
        for doc in docs {
            let chunks = chunk_document(doc, &self.options.chunker);
            info!(doc = %doc.id, chunks = chunks.len(), "chunked document");
            total += chunks.len();
            for chunk in chunks {
                pending.push(chunk);
                if pending.len() >= self.options.log_batch.max(1) {
                    log.append(&pending)?;
                    pending.clear();
                }
            }
        }
        log.append(&pending)?;
        Ok(total)
    }

    /// Rebuild the index pair from the entire chunk log, by way of the columnar table.
    fn embed_log(
        &self,
        log: &ChunkLog,
        paths: &IndexPaths,
    ) -> Result<(VectorIndex, MetadataStore), IngestError> {
        let table_dir = paths.chunk_table_dir();
        ChunkTable::from_chunks(log.read_all()?).write(&table_dir)?;
        let table = ChunkTable::read(&table_dir)?;
        info!(rows = table.len(), "embedding chunk table");

        let mut matrix = MatrixWriter::create(&paths.embeddings())?;
        let pair = index_table(self.embedder, &table, self.options.embed_batch, |rows| {
            matrix.write_rows(rows).map_err(IngestError::from)
        })?;
        matrix.finish()?;
        Ok(pair)
    }
}

/// Embed `chunks` in batches and build the index pair. Each batch is appended to the index
/// and the metadata store together, so row `i` of both always describes chunk `i`.
pub fn index_chunks(
    embedder: &dyn Embedder,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<(VectorIndex, MetadataStore), IngestError> {
    index_table(
        embedder,
        &ChunkTable::from_chunks(chunks.to_vec()),
        batch_size,
        |_| Ok(()),
    )
}

fn index_table<F>(
    embedder: &dyn Embedder,
    table: &ChunkTable,
    batch_size: usize,
    mut on_batch: F,
) -> Result<(VectorIndex, MetadataStore), IngestError>
where
    F: FnMut(&[Vec<f32>]) -> Result<(), IngestError>,
{
    let mut index = VectorIndex::new();
    let mut metadata = MetadataStore::new();
    encode_batched(embedder, &table.text, batch_size, |range, vectors| {
        let records = range
            .clone()
            .map(|i| table.chunk(i).map(MetadataRecord::from))
            .collect::<Option<Vec<_>>>()
            .ok_or(IngestError::TableShape)?;
        index.add(&vectors)?;
        metadata.append(records);
        on_batch(&vectors)?;
        debug!(rows = index.len(), "indexed batch");
        Ok::<(), IngestError>(())
    })?;
    Ok((index, metadata))
}

/// Stage both files, then move them into place. The index carries the checksum of its
/// sidecar, and the sidecar is published first: a run interrupted between the two renames
/// leaves an index whose tag no longer matches, which [crate::retriever::Retriever::load]
/// refuses.
fn write_index_pair(
    index: &mut VectorIndex,
    metadata: &MetadataStore,
    paths: &IndexPaths,
) -> Result<(), IngestError> {
    let index_path = paths.vector_index();
    let meta_path = paths.metadata();
    let staged_meta = staging_path(&meta_path);
    metadata.save(&staged_meta)?;
    index.set_pair_tag(file_checksum(&staged_meta)?);
    index.save(&staging_path(&index_path))?;
    publish(&meta_path)?;
    publish(&index_path)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
    #[error("{0}")]
    Embed(#[from] EmbedError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("chunk table text and metadata columns differ in length")]
    TableShape,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use super::*;
    use crate::embed::HashingEmbedder;

    fn chunk(doc: &str, id: usize, text: &str) -> Chunk {
        Chunk {
            doc_id: doc.into(),
            title: format!("Título {doc}"),
            url: String::new(),
            validity: String::new(),
            chunk_id: id,
            text: text.into(),
        }
    }

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.into(),
            path: PathBuf::from(format!("{id}.txt")),
            title: format!("Título {id}"),
            url: String::new(),
            validity: String::new(),
            text: text.into(),
        }
    }

    #[test]
    fn rows_and_records_stay_aligned_across_batches() {
        let embedder = HashingEmbedder::new(32);
        let chunks: Vec<Chunk> = (0..7).map(|i| chunk(&format!("d{i}"), 0, &format!("texto número {i}"))).collect();
        let (index, metadata) = index_chunks(&embedder, &chunks, 3).unwrap();
        assert_eq!(index.len(), 7);
        assert_eq!(metadata.len(), 7);
        for (i, c) in chunks.iter().enumerate() {
            let record = metadata.get(i).unwrap();
            assert_eq!(record.text, c.text);
            assert_eq!(record.doc_id, c.doc_id);
            let expected = embedder.encode_one(&c.text).unwrap();
            assert_eq!(index.row(i).unwrap(), expected.as_slice());
        }
    }

    /// Switches dimension after a few calls.
    struct DriftingEmbedder {
        calls: AtomicUsize,
    }

    impl Embedder for DriftingEmbedder {
        fn model_id(&self) -> &str {
            "drifting"
        }

        fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let dim = if call == 0 { 2 } else { 3 };
            Ok(texts.iter().map(|_| vec![1.0; dim]).collect())
        }
    }

    #[test]
    fn dimension_change_aborts_ingestion() {
        let dir = TempDir::new().unwrap();
        let paths = IndexPaths::new(dir.path());
        let embedder = DriftingEmbedder {
            calls: AtomicUsize::new(0),
        };
        let options = IngestOptions {
            embed_batch: 1,
            ..IngestOptions::default()
        };
        let mut builder = IndexBuilder::new(&embedder).with_options(options);
        let err = builder
            .ingest_documents(&[doc("a", "uno"), doc("b", "dos")], &paths)
            .unwrap_err();
        assert!(matches!(err, IngestError::Index(IndexError::DimensionMismatch { .. })));
        assert_eq!(builder.phase(), IngestPhase::Embedding);
        assert!(!paths.vector_index().exists());
        assert!(!paths.metadata().exists());
    }

    #[test]
    fn empty_corpus_builds_an_empty_index() {
        let dir = TempDir::new().unwrap();
        let paths = IndexPaths::new(dir.path().join("index"));
        let embedder = HashingEmbedder::new(16);
        let mut builder = IndexBuilder::new(&embedder);
        let report = builder.ingest_documents(&[], &paths).unwrap();
        assert_eq!(builder.phase(), IngestPhase::Done);
        assert_eq!(report.rows, 0);
        assert_eq!(report.dimension, None);
        assert!(VectorIndex::load(&paths.vector_index()).unwrap().is_empty());
        assert!(MetadataStore::load(&paths.metadata()).unwrap().is_empty());
    }

    #[test]
    fn run_writes_every_artifact() {
        let dir = TempDir::new().unwrap();
        let docs_dir = dir.path().join("docs");
        std::fs::create_dir(&docs_dir).unwrap();
        std::fs::write(docs_dir.join("calendario.txt"), "a".repeat(25)).unwrap();
        let paths = IndexPaths::new(dir.path().join("index"));

        let embedder = HashingEmbedder::new(16);
        let options = IngestOptions {
            chunker: Chunker::new(10, 2).unwrap(),
            embed_batch: 2,
            log_batch: 1,
        };
        let report = IndexBuilder::new(&embedder)
            .with_options(options)
            .run(&docs_dir, &SourceTable::default(), &paths)
            .unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.rows, 3);
        assert_eq!(report.dimension, Some(16));

        let log = ChunkLog::new(paths.chunk_log()).read_all().unwrap();
        let ids: Vec<usize> = log.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(ChunkTable::read(&paths.chunk_table_dir()).unwrap().len(), 3);
        let matrix = crate::artifacts::EmbeddingMatrix::read(&paths.embeddings()).unwrap();
        assert_eq!((matrix.rows, matrix.dimension), (3, 16));
        let index = VectorIndex::load(&paths.vector_index()).unwrap();
        assert_eq!(matrix.row(1), index.row(1));
        assert!(!staging_path(&paths.vector_index()).exists());
    }

    #[test]
    fn rerun_replaces_the_chunk_log() {
        let dir = TempDir::new().unwrap();
        let paths = IndexPaths::new(dir.path());
        let embedder = HashingEmbedder::new(16);
        let docs = [doc("a", "uno"), doc("b", "dos")];
        IndexBuilder::new(&embedder).ingest_documents(&docs, &paths).unwrap();
        let first_meta = MetadataStore::load(&paths.metadata()).unwrap();
        let first_index = VectorIndex::load(&paths.vector_index()).unwrap();

        let second = IndexBuilder::new(&embedder).ingest_documents(&docs, &paths).unwrap();
        assert_eq!(second.rows, 2);
        assert_eq!(ChunkLog::new(paths.chunk_log()).read_all().unwrap().len(), 2);
        assert_eq!(MetadataStore::load(&paths.metadata()).unwrap(), first_meta);
        assert_eq!(VectorIndex::load(&paths.vector_index()).unwrap(), first_index);
    }

    #[test]
    fn index_is_tagged_with_its_sidecar() {
        let dir = TempDir::new().unwrap();
        let paths = IndexPaths::new(dir.path());
        let embedder = HashingEmbedder::new(16);
        IndexBuilder::new(&embedder)
            .ingest_documents(&[doc("a", "uno")], &paths)
            .unwrap();
        let index = VectorIndex::load(&paths.vector_index()).unwrap();
        assert_eq!(index.pair_tag(), file_checksum(&paths.metadata()).unwrap());
        assert!(!staging_path(&paths.metadata()).exists());
    }

    #[test]
    fn sidecar_from_another_run_is_refused() {
        use crate::retriever::{RetrieveError, Retriever};

        let dir = TempDir::new().unwrap();
        let old = IndexPaths::new(dir.path().join("old"));
        let new = IndexPaths::new(dir.path().join("new"));
        let embedder = HashingEmbedder::new(16);
        IndexBuilder::new(&embedder)
            .ingest_documents(&[doc("a", "uno"), doc("b", "dos")], &old)
            .unwrap();
        IndexBuilder::new(&embedder)
            .ingest_documents(&[doc("c", "tres"), doc("d", "cuatro")], &new)
            .unwrap();
        // Same row count, but the sidecar was published by a run whose index never landed.
        std::fs::copy(new.metadata(), old.metadata()).unwrap();
        let err = Retriever::load(&old, Box::new(HashingEmbedder::new(16))).err().unwrap();
        assert!(matches!(err, RetrieveError::Unpaired { .. }));
    }
}
