//! Where Normativa stores its own data (config, index).
//!
//! Source documents stay in the folder the operator chooses. We only store app state here.

use std::path::PathBuf;

/// Returns the directory where Normativa stores config, index, and other app data.
/// On Linux: `~/.local/share/normativa/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("cl", "UFRO", "Normativa")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Default index directory: `index/` inside the app data directory.
pub fn default_index_dir() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join("index"))
}
