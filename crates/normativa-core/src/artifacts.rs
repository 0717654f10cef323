//! On-disk artifacts of an ingestion run, all under one index directory.
//!
//! | file | contents |
//! |---|---|
//! | `chunks.jsonl` | chunk log, one [Chunk] per line, append-only |
//! | `chunk_table/meta.json` | chunk metadata as parallel columns |
//! | `chunk_table/text.json` | chunk text column |
//! | `embeddings.f32` | embedding matrix, row-aligned with the chunk log |
//! | `index.vec` | [crate::store::VectorIndex] |
//! | `meta.jsonl` | [crate::metadata::MetadataStore] sidecar, row `i` ↔ index row `i` |

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chunks::Chunk;
use crate::embed::{fnv1a_extend, FNV_OFFSET};

const MATRIX_MAGIC: &[u8; 4] = b"NEMB";

/// Locations of every artifact inside an index directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    root: PathBuf,
}

impl IndexPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_log(&self) -> PathBuf {
        self.root.join("chunks.jsonl")
    }

    pub fn chunk_table_dir(&self) -> PathBuf {
        self.root.join("chunk_table")
    }

    pub fn embeddings(&self) -> PathBuf {
        self.root.join("embeddings.f32")
    }

    pub fn vector_index(&self) -> PathBuf {
        self.root.join("index.vec")
    }

    pub fn metadata(&self) -> PathBuf {
        self.root.join("meta.jsonl")
    }

    pub fn create_root(&self) -> Result<(), ArtifactError> {
        std::fs::create_dir_all(&self.root).map_err(|e| ArtifactError::io(&self.root, e))
    }
}

/// Append-only newline-delimited log of chunks.
///
/// The log is only ever removed whole ([ChunkLog::reset]) or appended to, never rewritten
/// in place. A run interrupted mid-append leaves at worst a torn last line, which
/// [ChunkLog::read_all] reports as an error so the run is simply repeated.
#[derive(Debug, Clone)]
pub struct ChunkLog {
    path: PathBuf,
}

impl ChunkLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the log so a fresh run starts empty.
    pub fn reset(&self) -> Result<(), ArtifactError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArtifactError::io(&self.path, e)),
        }
    }

    /// Append a batch of chunks and flush them to disk.
    pub fn append(&self, batch: &[Chunk]) -> Result<(), ArtifactError> {
        if batch.is_empty() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ArtifactError::io(&self.path, e))?;
        let mut w = BufWriter::new(file);
        for chunk in batch {
            serde_json::to_writer(&mut w, chunk).map_err(|e| ArtifactError::encode(&self.path, e))?;
            w.write_all(b"\n").map_err(|e| ArtifactError::io(&self.path, e))?;
        }
        w.flush().map_err(|e| ArtifactError::io(&self.path, e))?;
        w.get_ref().sync_data().map_err(|e| ArtifactError::io(&self.path, e))
    }

    /// Read every chunk in log order. A missing log reads as empty.
    pub fn read_all(&self) -> Result<Vec<Chunk>, ArtifactError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ArtifactError::io(&self.path, e)),
        };
        let mut chunks = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| ArtifactError::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk = serde_json::from_str(&line).map_err(|e| ArtifactError::Record {
                path: self.path.clone(),
                line: i + 1,
                source: e,
            })?;
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

/// Metadata columns of the chunk table. Every column has one entry per chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkColumns {
    pub doc_id: Vec<String>,
    pub title: Vec<String>,
    pub url: Vec<String>,
    pub validity: Vec<String>,
    pub chunk_id: Vec<usize>,
}

impl ChunkColumns {
    pub fn len(&self) -> usize {
        self.doc_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_id.is_empty()
    }

    fn is_rectangular(&self) -> bool {
        let n = self.len();
        [self.title.len(), self.url.len(), self.validity.len(), self.chunk_id.len()]
            .iter()
            .all(|&l| l == n)
    }
}

/// Columnar copy of the chunk log. Metadata and text are stored in separate files so the
/// embedding pass can load the text column on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkTable {
    pub columns: ChunkColumns,
    pub text: Vec<String>,
}

impl ChunkTable {
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        let mut table = Self::default();
        for c in chunks {
            table.columns.doc_id.push(c.doc_id);
            table.columns.title.push(c.title);
            table.columns.url.push(c.url);
            table.columns.validity.push(c.validity);
            table.columns.chunk_id.push(c.chunk_id);
            table.text.push(c.text);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Reassemble row `i` as a chunk.
    pub fn chunk(&self, i: usize) -> Option<Chunk> {
        Some(Chunk {
            doc_id: self.columns.doc_id.get(i)?.clone(),
            title: self.columns.title.get(i)?.clone(),
            url: self.columns.url.get(i)?.clone(),
            validity: self.columns.validity.get(i)?.clone(),
            chunk_id: *self.columns.chunk_id.get(i)?,
            text: self.text.get(i)?.clone(),
        })
    }

    pub fn write(&self, dir: &Path) -> Result<(), ArtifactError> {
        std::fs::create_dir_all(dir).map_err(|e| ArtifactError::io(dir, e))?;
        write_json(&dir.join("meta.json"), &self.columns)?;
        write_json(&dir.join("text.json"), &self.text)
    }

    pub fn read_columns(dir: &Path) -> Result<ChunkColumns, ArtifactError> {
        let path = dir.join("meta.json");
        let columns: ChunkColumns = read_json(&path)?;
        if !columns.is_rectangular() {
            return Err(ArtifactError::Corrupt {
                path,
                reason: "metadata columns have different lengths".into(),
            });
        }
        Ok(columns)
    }

    pub fn read_text(dir: &Path) -> Result<Vec<String>, ArtifactError> {
        read_json(&dir.join("text.json"))
    }

    pub fn read(dir: &Path) -> Result<Self, ArtifactError> {
        let columns = Self::read_columns(dir)?;
        let text = Self::read_text(dir)?;
        if text.len() != columns.len() {
            return Err(ArtifactError::Corrupt {
                path: dir.to_path_buf(),
                reason: format!("{} text rows for {} metadata rows", text.len(), columns.len()),
            });
        }
        Ok(Self { columns, text })
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let mut w = BufWriter::new(File::create(path).map_err(|e| ArtifactError::io(path, e))?);
    serde_json::to_writer(&mut w, value).map_err(|e| ArtifactError::encode(path, e))?;
    w.flush().map_err(|e| ArtifactError::io(path, e))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ArtifactError> {
    let file = File::open(path).map_err(|e| ArtifactError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| ArtifactError::Record {
        path: path.to_path_buf(),
        line: e.line(),
        source: e,
    })
}

/// Streams rows of the embedding matrix to disk: magic, row count, dimension, then
/// row-major f32 values, little-endian. The header is patched in [MatrixWriter::finish].
pub struct MatrixWriter {
    path: PathBuf,
    out: BufWriter<File>,
    rows: u32,
    dimension: Option<u32>,
}

impl MatrixWriter {
    pub fn create(path: &Path) -> Result<Self, ArtifactError> {
        let file = File::create(path).map_err(|e| ArtifactError::io(path, e))?;
        let mut out = BufWriter::new(file);
        out.write_all(MATRIX_MAGIC)
            .and_then(|_| out.write_all(&[0u8; 8]))
            .map_err(|e| ArtifactError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
            rows: 0,
            dimension: None,
        })
    }

    pub fn write_rows(&mut self, rows: &[Vec<f32>]) -> Result<(), ArtifactError> {
        for row in rows {
            let dim = u32::try_from(row.len()).map_err(|_| ArtifactError::Corrupt {
                path: self.path.clone(),
                reason: format!("row dimension {} does not fit the matrix header", row.len()),
            })?;
            match self.dimension {
                None => self.dimension = Some(dim),
                Some(d) if d != dim => {
                    return Err(ArtifactError::Corrupt {
                        path: self.path.clone(),
                        reason: format!("row of dimension {dim} in a matrix of dimension {d}"),
                    })
                }
                Some(_) => {}
            }
            for x in row {
                self.out
                    .write_all(&x.to_le_bytes())
                    .map_err(|e| ArtifactError::io(&self.path, e))?;
            }
            self.rows = self.rows.checked_add(1).ok_or_else(|| ArtifactError::Corrupt {
                path: self.path.clone(),
                reason: "row count does not fit the matrix header".into(),
            })?;
        }
        Ok(())
    }

    /// Write the header and flush. Returns `(rows, dimension)`.
    pub fn finish(self) -> Result<(u32, u32), ArtifactError> {
        let Self {
            path,
            out,
            rows,
            dimension,
        } = self;
        let dim = dimension.unwrap_or(0);
        let mut file = out.into_inner().map_err(|e| ArtifactError::io(&path, e.into_error()))?;
        file.seek(SeekFrom::Start(MATRIX_MAGIC.len() as u64))
            .and_then(|_| file.write_all(&rows.to_le_bytes()))
            .and_then(|_| file.write_all(&dim.to_le_bytes()))
            .and_then(|_| file.sync_data())
            .map_err(|e| ArtifactError::io(&path, e))?;
        Ok((rows, dim))
    }
}

/// A fully loaded embedding matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    pub rows: usize,
    pub dimension: usize,
    pub data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        if i >= self.rows {
            return None;
        }
        self.data.get(i * self.dimension..(i + 1) * self.dimension)
    }

    pub fn read(path: &Path) -> Result<Self, ArtifactError> {
        let file = File::open(path).map_err(|e| ArtifactError::io(path, e))?;
        let mut r = BufReader::new(file);
        let mut header = [0u8; 12];
        r.read_exact(&mut header).map_err(|e| ArtifactError::io(path, e))?;
        if &header[..4] != MATRIX_MAGIC {
            return Err(ArtifactError::Corrupt {
                path: path.to_path_buf(),
                reason: "bad magic".into(),
            });
        }
        let rows = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let dimension = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let expected = rows
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| ArtifactError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("{rows}x{dimension} matrix overflows"),
            })?;
        let mut bytes = Vec::new();
        r.by_ref()
            .take((expected as u64).saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|e| ArtifactError::io(path, e))?;
        if bytes.len() != expected {
            return Err(ArtifactError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("expected {rows}x{dimension} values, found {} bytes", bytes.len()),
            });
        }
        let data = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self {
            rows,
            dimension,
            data,
        })
    }
}

/// FNV-1a checksum of the file at `path`. Pairs the vector index with the sidecar it was
/// published with.
pub fn file_checksum(path: &Path) -> Result<u64, ArtifactError> {
    let mut r = BufReader::new(File::open(path).map_err(|e| ArtifactError::io(path, e))?);
    let mut hash = FNV_OFFSET;
    loop {
        let buf = r.fill_buf().map_err(|e| ArtifactError::io(path, e))?;
        if buf.is_empty() {
            return Ok(hash);
        }
        hash = fnv1a_extend(hash, buf);
        let n = buf.len();
        r.consume(n);
    }
}

/// Path used to stage `path` before it is renamed into place.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Move a staged file over its final path.
pub fn publish(path: &Path) -> Result<(), ArtifactError> {
    std::fs::rename(staging_path(path), path).map_err(|e| ArtifactError::io(path, e))
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{}:{line}: invalid record: {source}", path.display())]
    Record {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    #[error("{}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl ArtifactError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn encode(path: &Path, source: serde_json::Error) -> Self {
        Self::Encode {
            path: path.to_path_buf(),
            source,
        }
    }
}
