//! Discovery module: find the vault root by walking up the directory tree

use std::path::{Path, PathBuf};

use crate::{CATALOG_FILE, INDEX_DIR, NvError, Result, STATE_FILE, VECTORS_FILE};

/// Find the vault root directory by walking up from the given path.
///
/// Returns the path to the directory containing .notevault (not the
/// .notevault folder itself).
pub fn find_vault_root(start: &Path) -> Result<PathBuf> {
    let mut current = start.canonicalize()?;

    loop {
        if index_dir(&current).is_dir() {
            return Ok(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return Err(NvError::NotInVault),
        }
    }
}

/// Get the .notevault directory path for a given root.
pub fn index_dir(root: &Path) -> PathBuf {
    root.join(INDEX_DIR)
}

/// Get the config file path.
pub fn config_path(root: &Path) -> PathBuf {
    index_dir(root).join("config.json")
}

/// Get the chunk catalog path.
pub fn catalog_path(root: &Path) -> PathBuf {
    index_dir(root).join(CATALOG_FILE)
}

/// Get the vector store path.
pub fn vectors_path(root: &Path) -> PathBuf {
    index_dir(root).join(VECTORS_FILE)
}

/// Get the index state path.
pub fn state_path(root: &Path) -> PathBuf {
    index_dir(root).join(STATE_FILE)
}

/// Sibling path with a `.bak` suffix appended to the file name.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

/// Vault-relative path with `/` separators, used as the key in the
/// catalog and the state file.
pub fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
