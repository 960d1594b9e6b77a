//! Shared helpers for persisted state and gateway paths.

use std::path::Path;

use crate::error::Result;

/// Replace `path` with `contents` by writing a sibling temp file and renaming it over.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Turn a request path into a flat display name ("/a%20b.txt" -> "a b.txt").
///
/// Returns `None` for the root.
pub(crate) fn display_name_from_path(path: &str) -> Option<String> {
    let decoded = urlencoding::decode(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.to_string());
    let trimmed = decoded.trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Format a byte count the way listings show it ("1.50MB").
pub fn human_size(size: u64) -> String {
    let suffixes = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    let mut idx = 0;
    while value > 1024.0 && idx < suffixes.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    format!("{:.2}{}", value, suffixes[idx])
}
