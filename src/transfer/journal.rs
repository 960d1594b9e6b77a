//! Resume journals for interrupted transfers.
//!
//! Each in-flight transfer owns one JSON file under the journal directory. It
//! is rewritten after every committed chunk and deleted once the transfer
//! finalizes. A journal that cannot be parsed is reported as
//! [`StoreError::CorruptState`] and left on disk untouched.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::channel::Locator;
use crate::error::{Result, StoreError};
use crate::utils::write_atomic;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(path)?;
    let value = serde_json::from_str(&json).map_err(|e| StoreError::corrupt(path, e))?;
    Ok(Some(value))
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
}

fn delete_file(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Saved upload progress.
///
/// Chunks are committed strictly in order, so progress is a watermark:
/// `collected_locators[i]` is the locator of chunk `i` for every
/// `i <= last_completed_chunk_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJournal {
    /// Locators of the chunks sent so far, in chunk order
    pub collected_locators: Vec<Locator>,
    /// Locator of the standalone digest blob, once sent
    pub hash_locator: Option<Locator>,
    /// Index of the last committed chunk (`None` before the first)
    pub last_completed_chunk_index: Option<usize>,
    /// Object size in bytes
    pub total_size_bytes: u64,
    /// Planned number of chunks
    pub total_chunks: usize,
    /// Object id issued when the upload first started
    pub issued_id: String,
    /// Name the object will be listed under
    #[serde(default)]
    pub display_name: String,
    /// Whole-file digest computed before any network activity
    #[serde(default)]
    pub content_hash_hex: String,
    /// Unix timestamp when the upload started
    #[serde(default)]
    pub created_at: i64,
}

impl UploadJournal {
    pub fn new(
        issued_id: String,
        display_name: String,
        content_hash_hex: String,
        total_size_bytes: u64,
        total_chunks: usize,
    ) -> Self {
        Self {
            collected_locators: Vec::new(),
            hash_locator: None,
            last_completed_chunk_index: None,
            total_size_bytes,
            total_chunks,
            issued_id,
            display_name,
            content_hash_hex,
            created_at: now_secs(),
        }
    }

    /// Journal path for an upload of content with `digest` and `size`.
    ///
    /// Keyed by content rather than source path, so re-sending the same bytes
    /// from a different temp file still resumes. Two uploads of identical
    /// content running at the same time share this journal and the slice
    /// directory under the same digest, and are not safe together.
    pub fn state_file_path(journal_dir: &Path, digest: &str, size: u64) -> PathBuf {
        journal_dir.join(format!("upload-{}-{}.json", digest, size))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let Some(journal) = load_json::<Self>(path)? else {
            return Ok(None);
        };
        let expected = journal.last_completed_chunk_index.map_or(0, |i| i + 1);
        if journal.collected_locators.len() != expected {
            return Err(StoreError::corrupt(
                path,
                format!(
                    "{} locators recorded but last completed chunk is {:?}",
                    journal.collected_locators.len(),
                    journal.last_completed_chunk_index
                ),
            ));
        }
        Ok(Some(journal))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, path.as_ref())
    }

    pub fn delete<P: AsRef<Path>>(path: P) -> Result<()> {
        delete_file(path.as_ref())
    }

    /// Whether this journal describes an upload of the given content.
    pub fn matches(&self, size: u64, total_chunks: usize, digest: &str) -> bool {
        self.total_size_bytes == size
            && self.total_chunks == total_chunks
            && self.content_hash_hex.eq_ignore_ascii_case(digest)
    }

    /// Index of the next chunk to send.
    pub fn next_chunk_index(&self) -> usize {
        self.last_completed_chunk_index.map_or(0, |i| i + 1)
    }

    /// Commit the locator of the next chunk.
    pub fn record_chunk(&mut self, locator: Locator) {
        self.collected_locators.push(locator);
        self.last_completed_chunk_index = Some(self.collected_locators.len() - 1);
    }

    pub fn is_complete(&self) -> bool {
        self.collected_locators.len() == self.total_chunks
    }
}

/// Saved download progress.
///
/// Chunks may land out of order, so progress is the set of indices whose
/// byte ranges are already written and flushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJournal {
    pub completed_chunk_indices: BTreeSet<usize>,
    pub total_chunks: usize,
    pub total_size_bytes: u64,
    pub display_name: String,
    /// Output file the recorded chunks were written into
    #[serde(default)]
    pub dest: Option<PathBuf>,
}

impl DownloadJournal {
    pub fn new(
        display_name: String,
        dest: &Path,
        total_size_bytes: u64,
        total_chunks: usize,
    ) -> Self {
        Self {
            completed_chunk_indices: BTreeSet::new(),
            total_chunks,
            total_size_bytes,
            display_name,
            dest: Some(dest.to_path_buf()),
        }
    }

    pub fn state_file_path(journal_dir: &Path, id: &str) -> PathBuf {
        journal_dir.join(format!("download-{}.json", id))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let Some(journal) = load_json::<Self>(path)? else {
            return Ok(None);
        };
        if let Some(&max) = journal.completed_chunk_indices.iter().next_back() {
            if max >= journal.total_chunks {
                return Err(StoreError::corrupt(
                    path,
                    format!(
                        "chunk index {} out of range for {} chunks",
                        max, journal.total_chunks
                    ),
                ));
            }
        }
        Ok(Some(journal))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, path.as_ref())
    }

    pub fn delete<P: AsRef<Path>>(path: P) -> Result<()> {
        delete_file(path.as_ref())
    }

    /// Whether this journal describes a download of the given shape into
    /// `dest`. Journals without a recorded destination never match.
    pub fn matches(&self, size: u64, total_chunks: usize, dest: &Path) -> bool {
        self.total_size_bytes == size
            && self.total_chunks == total_chunks
            && self.dest.as_deref() == Some(dest)
    }

    pub fn mark_complete(&mut self, index: usize) {
        self.completed_chunk_indices.insert(index);
    }

    pub fn is_done(&self, index: usize) -> bool {
        self.completed_chunk_indices.contains(&index)
    }

    /// Indices not yet written, ascending.
    pub fn pending(&self) -> Vec<usize> {
        (0..self.total_chunks).filter(|i| !self.is_done(*i)).collect()
    }
}

/// Object ids issued to uploads that have not finished yet.
///
/// Journals that cannot be read are skipped.
pub fn pending_upload_ids(journal_dir: &Path) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();
    if !journal_dir.exists() {
        return Ok(ids);
    }
    for entry in std::fs::read_dir(journal_dir)? {
        let path = entry?.path();
        let is_upload = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("upload-") && n.ends_with(".json"))
            .unwrap_or(false);
        if !is_upload {
            continue;
        }
        if let Ok(Some(journal)) = UploadJournal::load(&path) {
            ids.insert(journal.issued_id);
        }
    }
    Ok(ids)
}

/// Remove every journal under `journal_dir`. Returns how many were removed.
pub fn sweep(journal_dir: &Path) -> Result<usize> {
    if !journal_dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(journal_dir)? {
        let path = entry?.path();
        let is_journal = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| {
                (n.starts_with("upload-") || n.starts_with("download-")) && n.ends_with(".json")
            })
            .unwrap_or(false);
        if is_journal {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
