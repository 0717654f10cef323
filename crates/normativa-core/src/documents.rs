//! Discovering source documents and turning their text into blocks for chunking.
//!
//! Container formats are hidden behind [TextExtractor]. The built-in [PlainTextExtractor]
//! reads `.txt` and `.md`; a form feed (`\x0c`) in the text marks a page break, which is
//! what most PDF-to-text tools emit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::sources::SourceTable;

/// Lines grouped into one text block when a page is long.
pub const LINES_PER_BLOCK: usize = 400;

const SOFT_HYPHEN: char = '\u{ad}';
const PAGE_BREAK: char = '\u{c}';

/// A source document with its metadata resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Stable across runs. See [scan_documents] for how scanned documents are named.
    pub id: String,
    pub path: PathBuf,
    pub title: String,
    pub url: String,
    pub validity: String,
    /// Extracted text, before block splitting.
    pub text: String,
}

impl Document {
    /// Build a document from extracted text, with the file stem as id and metadata joined
    /// from `sources` by filename.
    pub fn from_text(path: &Path, text: String, sources: &SourceTable) -> Self {
        let id = stem(path);
        Self::with_id(id, path, None, text, sources)
    }

    /// `relative` is the path below the scanned root; a `sources` entry under that key wins
    /// over one under the bare filename.
    fn with_id(id: String, path: &Path, relative: Option<&str>, text: String, sources: &SourceTable) -> Self {
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entry = relative
            .and_then(|r| sources.get(r))
            .or_else(|| sources.get(&file_name));
        let pick = |value: Option<&String>| value.filter(|v| !v.trim().is_empty()).cloned();

        Self {
            title: pick(entry.and_then(|e| e.title.as_ref())).unwrap_or_else(|| title_from_stem(&stem(path))),
            url: pick(entry.and_then(|e| e.url.as_ref())).unwrap_or_default(),
            validity: pick(entry.and_then(|e| e.validity.as_ref())).unwrap_or_default(),
            id,
            path: path.to_path_buf(),
            text,
        }
    }

    /// Text blocks of this document, in order. See [text_blocks].
    pub fn blocks(&self) -> Vec<String> {
        text_blocks(&self.text)
    }
}

/// Extracts plain text from a document container.
pub trait TextExtractor: Send + Sync {
    /// Whether this extractor understands the file at `path`.
    fn handles(&self, path: &Path) -> bool;

    fn extract(&self, path: &Path) -> Result<String, ScanError>;
}

/// Reads `.txt` and `.md` files. Invalid UTF-8 sequences are replaced, not rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn handles(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"))
    }

    fn extract(&self, path: &Path) -> Result<String, ScanError> {
        let bytes = std::fs::read(path).map_err(|e| ScanError::Read(path.to_path_buf(), e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Scans `root` for documents the extractor handles and loads them, sorted by path.
/// Files the extractor does not handle are skipped with a warning; so are documents
/// whose text is empty.
///
/// A document's id is its path below `root`, `/`-separated, without extension
/// (`2025/calendario`). Files that would share an id keep their extension
/// (`reglamento.md`, `reglamento.txt`), so ids are unique within a scan.
pub fn scan_documents(
    root: &Path,
    extractor: &dyn TextExtractor,
    sources: &SourceTable,
) -> Result<Vec<Document>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }
    let mut paths = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.map_err(|e| ScanError::Walk(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if extractor.handles(entry.path()) {
            paths.push(entry.into_path());
        } else {
            warn!(path = %entry.path().display(), "no text extractor for file, skipping");
        }
    }
    paths.sort();

    let relative: Vec<String> = paths.iter().map(|p| relative_key(root, p)).collect();
    let bare: Vec<String> = relative.iter().map(|r| without_extension(r)).collect();
    let mut taken: HashMap<&str, usize> = HashMap::new();
    for id in &bare {
        *taken.entry(id.as_str()).or_default() += 1;
    }

    let mut docs = Vec::with_capacity(paths.len());
    for ((path, rel), id) in paths.iter().zip(&relative).zip(&bare) {
        let text = extractor.extract(path)?;
        if text_blocks(&text).is_empty() {
            warn!(path = %path.display(), "document has no text, skipping");
            continue;
        }
        let id = if taken.get(id.as_str()).copied().unwrap_or(0) > 1 {
            warn!(path = %path.display(), id = %rel, "another document has the same name, keeping the extension in its id");
            rel.clone()
        } else {
            id.clone()
        };
        docs.push(Document::with_id(id, path, Some(rel), text, sources));
    }
    info!(root = %root.display(), documents = docs.len(), "scanned documents");
    Ok(docs)
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `path` below `root`, components joined with `/` on every platform.
fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn without_extension(key: &str) -> String {
    match key.rsplit_once('.') {
        Some((base, ext)) if !ext.contains('/') && !base.is_empty() && !base.ends_with('/') => base.to_string(),
        _ => key.to_string(),
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Splits text into blocks: one per page, and pages longer than [LINES_PER_BLOCK] lines
/// split further. Lines are trimmed and joined with single spaces, soft hyphens dropped,
/// and whitespace runs collapsed. Blank blocks are omitted.
pub fn text_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    for page in text.split(PAGE_BREAK) {
        let lines: Vec<&str> = page.lines().collect();
        for group in lines.chunks(LINES_PER_BLOCK) {
            let block = clean(&group.join(" "));
            if !block.is_empty() {
                blocks.push(block);
            }
        }
    }
    blocks
}

fn clean(text: &str) -> String {
    let without_hyphens: String = text.chars().filter(|&c| c != SOFT_HYPHEN).collect();
    without_hyphens.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Display title derived from a file stem: `reglamento_de_matricula` → `Reglamento De Matricula`.
pub fn title_from_stem(stem: &str) -> String {
    stem.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {}: {}", .0.display(), .1)]
    Read(PathBuf, std::io::Error),
}
