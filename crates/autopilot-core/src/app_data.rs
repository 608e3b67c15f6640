//! Where the indexer keeps its own data (config, persisted embeddings).
//!
//! Repositories are cloned into throwaway scratch directories; nothing from a
//! clone is kept here, only app state.

use std::path::PathBuf;

/// Returns the directory where autopilot stores config and the local vector index.
/// On Linux: `~/.local/share/autopilot/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("dev", "Autopilot", "autopilot")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Default location of the persisted vector index inside [`app_data_dir`].
pub fn default_store_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join("embeddings.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_path_lives_in_app_data_dir() {
        if let (Some(dir), Some(store)) = (app_data_dir(), default_store_path()) {
            assert!(store.starts_with(dir));
        }
    }
}
