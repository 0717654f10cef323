//! Embedding backends. Every backend returns one unit-length row per input text.

use std::ops::Range;

use crate::ollama::OllamaError;

/// Maps texts to fixed-dimension, L2-normalized vectors.
///
/// Implementations must be deterministic for a fixed model and input, and must return
/// exactly one row per input, in input order.
pub trait Embedder: Send + Sync {
    /// Identifies the model; vectors from different models are not comparable.
    fn model_id(&self) -> &str;

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed one text (a single-row batch).
    fn encode_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut rows = self.encode(&[text.to_string()])?;
        if rows.len() != 1 {
            return Err(EmbedError::RowCount {
                expected: 1,
                got: rows.len(),
            });
        }
        Ok(rows.swap_remove(0))
    }
}

/// Embeds `texts` in batches of at most `batch_size` and hands each batch to `sink` along
/// with its position in `texts`. Only one batch of vectors is alive at a time.
/// Returns the number of texts embedded.
pub fn encode_batched<F, E>(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    mut sink: F,
) -> Result<usize, E>
where
    F: FnMut(Range<usize>, Vec<Vec<f32>>) -> Result<(), E>,
    E: From<EmbedError>,
{
    let batch_size = batch_size.max(1);
    for (i, batch) in texts.chunks(batch_size).enumerate() {
        let start = i * batch_size;
        let rows = embedder.encode(batch)?;
        if rows.len() != batch.len() {
            return Err(EmbedError::RowCount {
                expected: batch.len(),
                got: rows.len(),
            }
            .into());
        }
        sink(start..start + batch.len(), rows)?;
    }
    Ok(texts.len())
}

/// Scales `v` to unit length in place. Zero vectors are left as they are.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 0.0 || !norm.is_finite() {
        return;
    }
    v.iter_mut().for_each(|x| *x /= norm);
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Offline embedder using the hashing trick over lowercase word tokens.
///
/// Each token is hashed (FNV-1a) into one of `dimension` buckets with a sign taken from the
/// top hash bit. Texts sharing words land close together; there is no notion of synonyms.
/// Text without any alphanumeric token maps to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

pub const DEFAULT_HASHING_DIMENSION: usize = 384;

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hashing-fnv1a-{dimension}"),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

pub(crate) const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Continue an FNV-1a hash over `bytes`.
pub(crate) fn fnv1a_extend(hash: u64, bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(hash, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    fnv1a_extend(FNV_OFFSET, bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding backend returned {got} vector(s) for {expected} text(s)")]
    RowCount { expected: usize, got: usize },
    #[error("embedding error: {0}")]
    Ollama(#[from] OllamaError),
}
