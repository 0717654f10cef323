//! Exact inner-product index over unit vectors.
//!
//! Rows are stored flat and contiguously; row `i` is the `i`-th vector ever added. Search is
//! brute force, which is fine for a corpus of a few hundred thousand chunks.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::embed::dot;

const MAGIC: &[u8; 4] = b"NVEC";
const FORMAT_VERSION: u16 = 2;

/// A search hit: index row and its inner-product score with the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub row: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    /// Fixed by the first insertion.
    dimension: Option<usize>,
    data: Vec<f32>,
    /// Checksum of the metadata sidecar this index was published with.
    pair_tag: u64,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        match self.dimension {
            Some(d) => self.data.len() / d,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pair_tag(&self) -> u64 {
        self.pair_tag
    }

    pub fn set_pair_tag(&mut self, tag: u64) {
        self.pair_tag = tag;
    }

    pub fn row(&self, row: usize) -> Option<&[f32]> {
        let d = self.dimension?;
        self.data.get(row * d..(row + 1) * d)
    }

    /// Append a batch of vectors. The whole batch is rejected if any vector's dimension
    /// differs from the index dimension (or from the batch's first vector when the index
    /// has none yet).
    pub fn add(&mut self, batch: &[Vec<f32>]) -> Result<(), IndexError> {
        let Some(first) = batch.first() else {
            return Ok(());
        };
        let expected = self.dimension.unwrap_or(first.len());
        if expected == 0 {
            return Err(IndexError::EmptyVector);
        }
        if let Some(bad) = batch.iter().find(|v| v.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                expected,
                got: bad.len(),
            });
        }
        self.dimension = Some(expected);
        self.data.reserve(batch.len() * expected);
        for v in batch {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// Top `k` rows by descending inner product with `query`; ties go to the lower row.
    /// Returns fewer than `k` hits when the index is smaller, and none when it is empty.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>, IndexError> {
        let Some(d) = self.dimension else {
            return Ok(Vec::new());
        };
        if k == 0 || self.data.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != d {
            return Err(IndexError::DimensionMismatch {
                expected: d,
                got: query.len(),
            });
        }
        let mut hits: Vec<Hit> = self
            .data
            .chunks_exact(d)
            .enumerate()
            .map(|(row, v)| Hit {
                row,
                score: dot(query, v),
            })
            .collect();
        if k < hits.len() {
            hits.select_nth_unstable_by(k - 1, rank);
            hits.truncate(k);
        }
        hits.sort_by(rank);
        Ok(hits)
    }

    /// Serialize: magic, format version, dimension, row count, pair tag, then row-major f32
    /// values, all little-endian.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let dim = header_u32(self.dimension.unwrap_or(0), "dimension")?;
        let rows = header_u32(self.len(), "row count")?;
        w.write_all(MAGIC)?;
        w.write_all(&FORMAT_VERSION.to_le_bytes())?;
        w.write_all(&dim.to_le_bytes())?;
        w.write_all(&rows.to_le_bytes())?;
        w.write_all(&self.pair_tag.to_le_bytes())?;
        for x in &self.data {
            w.write_all(&x.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, IndexError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(IndexError::Corrupt("bad magic".into()));
        }
        let mut u16_buf = [0u8; 2];
        r.read_exact(&mut u16_buf)?;
        let version = u16::from_le_bytes(u16_buf);
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!("unsupported format version {version}")));
        }
        let dim = read_u32(r)? as usize;
        let rows = read_u32(r)? as usize;
        let mut tag_buf = [0u8; 8];
        r.read_exact(&mut tag_buf)?;
        let pair_tag = u64::from_le_bytes(tag_buf);
        if dim == 0 {
            if rows != 0 {
                return Err(IndexError::Corrupt(format!("{rows} rows with zero dimension")));
            }
            return Ok(Self {
                pair_tag,
                ..Self::new()
            });
        }
        let expected = rows
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupt(format!("{rows}x{dim} rows overflow")))?;
        // Grows with the data actually present, so a lying header cannot force a huge allocation.
        let mut bytes = Vec::new();
        r.by_ref().take(expected as u64).read_to_end(&mut bytes)?;
        if bytes.len() != expected {
            return Err(IndexError::Corrupt(format!(
                "expected {expected} bytes of vectors, found {}",
                bytes.len()
            )));
        }
        let data = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self {
            dimension: Some(dim),
            data,
            pair_tag,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let io_err = |e| IndexError::File(path.to_path_buf(), e);
        let mut w = BufWriter::new(File::create(path).map_err(io_err)?);
        self.write_to(&mut w).map_err(io_err)?;
        w.flush().map_err(io_err)
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path).map_err(|e| IndexError::File(path.to_path_buf(), e))?;
        Self::read_from(&mut BufReader::new(file))
    }
}

fn rank(a: &Hit, b: &Hit) -> Ordering {
    b.score.total_cmp(&a.score).then(a.row.cmp(&b.row))
}

fn header_u32(n: usize, what: &str) -> std::io::Result<u32> {
    u32::try_from(n).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{what} {n} does not fit the index header"),
        )
    })
}

fn read_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: index has {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("cannot index zero-length vectors")]
    EmptyVector,
    #[error("corrupt vector index: {0}")]
    Corrupt(String),
    #[error("vector index I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("vector index file {}: {}", .0.display(), .1)]
    File(PathBuf, std::io::Error),
}
