//! Change detection: decide whether a file needs re-indexing

use std::time::UNIX_EPOCH;

use crate::state::SourceFile;

/// Blake3 hex digest of file content.
pub fn checksum(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// Modification time in milliseconds since the Unix epoch, 0 if unknown.
pub fn mtime_millis(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns `false` only when not forced and the persisted entry matches
/// both `mtime` and `checksum` and is marked indexed. A missing checksum
/// never matches.
pub fn should_reindex(
    persisted: Option<&SourceFile>,
    mtime: u64,
    checksum: Option<&str>,
    force: bool,
) -> bool {
    if force {
        return true;
    }
    let Some(checksum) = checksum else {
        return true;
    };
    match persisted {
        Some(file) => {
            !(file.indexed && file.mtime == mtime && file.checksum.as_deref() == Some(checksum))
        }
        None => true,
    }
}
