//! Positional metadata for index rows. Record `i` describes the chunk whose vector is row `i`
//! of the paired [crate::store::VectorIndex].

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chunks::Chunk;

/// What the retriever needs to present a hit: title for attribution, text for context,
/// provenance for tracing it back to the chunk log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub chunk_id: usize,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub validity: String,
}

impl From<Chunk> for MetadataRecord {
    fn from(c: Chunk) -> Self {
        Self {
            title: c.title,
            text: c.text,
            doc_id: c.doc_id,
            chunk_id: c.chunk_id,
            url: c.url,
            validity: c.validity,
        }
    }
}

/// Append-only list of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    records: Vec<MetadataRecord>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch. Must mirror the batch passed to the paired index `add`.
    pub fn append(&mut self, batch: Vec<MetadataRecord>) {
        self.records.extend(batch);
    }

    pub fn get(&self, row: usize) -> Result<&MetadataRecord, MetadataError> {
        self.records.get(row).ok_or(MetadataError::OutOfRange {
            row,
            len: self.records.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetadataRecord> {
        self.records.iter()
    }

    /// One JSON record per line, in row order.
    pub fn save(&self, path: &Path) -> Result<(), MetadataError> {
        let io_err = |e| MetadataError::Io(path.to_path_buf(), e);
        let mut w = BufWriter::new(File::create(path).map_err(io_err)?);
        for record in &self.records {
            serde_json::to_writer(&mut w, record)
                .map_err(|e| MetadataError::Encode(path.to_path_buf(), e))?;
            w.write_all(b"\n").map_err(io_err)?;
        }
        w.flush().map_err(io_err)
    }

    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let file = File::open(path).map_err(|e| MetadataError::Io(path.to_path_buf(), e))?;
        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| MetadataError::Io(path.to_path_buf(), e))?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| MetadataError::Record {
                path: path.to_path_buf(),
                line: i + 1,
                source: e,
            })?;
            records.push(record);
        }
        Ok(Self { records })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata row {row} out of range (store has {len} rows)")]
    OutOfRange { row: usize, len: usize },
    #[error("metadata file {}: {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
    #[error("failed to encode metadata for {}: {}", .0.display(), .1)]
    Encode(PathBuf, serde_json::Error),
    #[error("{}:{line}: invalid metadata record: {source}", path.display())]
    Record {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
}
