//! Optional per-file metadata (title, url, validity) joined onto documents at ingestion.
//!
//! The table is a TOML file keyed by filename, or by the `/`-separated path below the
//! documents folder when two files share a name (the path key wins):
//!
//! ```toml
//! ["reglamento_de_matricula.pdf"]
//! title = "Reglamento de Matrícula"
//! url = "https://example.org/reglamento.pdf"
//! validity = "2025"
//! ```
//!
//! A missing, unreadable or malformed table never fails ingestion: it is reported and the
//! documents fall back to filename-derived metadata.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SourceEntry {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "vigencia")]
    pub validity: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    entries: HashMap<String, SourceEntry>,
}

impl SourceTable {
    /// Parse a table from TOML text.
    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        let entries: HashMap<String, SourceEntry> = toml::from_str(s)?;
        Ok(Self { entries })
    }

    /// Load the table at `path`. Returns an empty table (and logs a warning) when the file
    /// cannot be read or parsed; an absent file is silently empty.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read source metadata, using filename defaults");
                return Self::default();
            }
        };
        let text = decode(&bytes);
        if text.trim().is_empty() {
            return Self::default();
        }
        match Self::parse(&text) {
            Ok(table) => table,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed source metadata, using filename defaults");
                Self::default()
            }
        }
    }

    pub fn get(&self, file_name: &str) -> Option<&SourceEntry> {
        self.entries.get(file_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// UTF-8 (BOM stripped) when valid, otherwise Latin-1.
fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.strip_prefix(UTF8_BOM).unwrap_or(s).to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
