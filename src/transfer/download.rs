//! Download pipeline.
//!
//! Chunks are fetched in random order and written at their own offsets, so
//! progress is the set of finished indices rather than a watermark. Each chunk
//! is fully fetched into memory before it touches the output file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::integrity::{verify, Verification};
use super::journal::DownloadJournal;
use super::planner::ChunkPlan;
use super::{blocking, TransferControl, TransferSettings};
use crate::catalog::Manifest;
use crate::channel::Locator;
use crate::error::{Result, StoreError};
use crate::progress::TransferProgress;
use crate::session::SessionHandle;

/// Result of the post-download digest comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Verified,
    Mismatch { expected: String, actual: String },
    /// No digest was available to compare against.
    Unchecked,
}

impl From<Verification> for IntegrityStatus {
    fn from(v: Verification) -> Self {
        if v.matched() {
            IntegrityStatus::Verified
        } else {
            IntegrityStatus::Mismatch {
                expected: v.expected,
                actual: v.actual,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub id: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub integrity: IntegrityStatus,
}

impl DownloadReport {
    /// Turn a digest mismatch into [`StoreError::IntegrityMismatch`], for
    /// callers that treat it as fatal. The downloaded file is left in place.
    pub fn require_verified(self) -> Result<Self> {
        match self.integrity {
            IntegrityStatus::Mismatch { expected, actual } => {
                Err(StoreError::IntegrityMismatch { expected, actual })
            }
            _ => Ok(self),
        }
    }
}

/// Fetch the digest blob and decode it as a hex string.
pub(crate) async fn fetch_expected_digest(
    session: &SessionHandle,
    settings: &TransferSettings,
    cancel: &CancellationToken,
    locator: &Locator,
) -> Result<String> {
    let blob = settings
        .retry
        .run(cancel, "fetch digest blob", || session.fetch_chunk(locator))
        .await?;
    Ok(String::from_utf8_lossy(&blob).trim().to_ascii_lowercase())
}

/// Compare `path` against `expected`, logging a mismatch. Never fails on mismatch.
pub(crate) async fn check_integrity(
    id: &str,
    path: &Path,
    expected: Option<String>,
) -> Result<IntegrityStatus> {
    let Some(expected) = expected else {
        warn!(id, "no digest available, skipping verification");
        return Ok(IntegrityStatus::Unchecked);
    };
    let target = path.to_path_buf();
    let status: IntegrityStatus = blocking(move || verify(target, &expected)).await?.into();
    match &status {
        IntegrityStatus::Mismatch { expected, actual } => {
            warn!(
                id,
                expected = %expected,
                actual = %actual,
                "integrity mismatch, keeping downloaded file"
            );
        }
        _ => debug!(id, "digest verified"),
    }
    Ok(status)
}

pub struct DownloadPipeline<'a> {
    session: &'a SessionHandle,
    settings: &'a TransferSettings,
}

impl<'a> DownloadPipeline<'a> {
    pub fn new(session: &'a SessionHandle, settings: &'a TransferSettings) -> Self {
        Self { session, settings }
    }

    /// Reassemble the object described by `manifest` into `dest`.
    pub async fn run(
        &self,
        manifest: &Manifest,
        dest: &Path,
        control: &mut TransferControl,
    ) -> Result<DownloadReport> {
        let id = manifest.id.as_str();
        let size = manifest.total_size_bytes;
        let plan = ChunkPlan::new(size, self.settings.chunk_size)?;
        // Older uploaders could append a trailing empty chunk
        let total_chunks = manifest.chunk_count();
        if total_chunks < plan.count() {
            return Err(StoreError::InvalidRequest(format!(
                "object {} lists {} chunks, {} needed for {} bytes",
                id,
                total_chunks,
                plan.count(),
                size
            )));
        }

        let expected = match &manifest.hash_locator {
            Some(locator) => {
                match fetch_expected_digest(self.session, self.settings, &control.cancel, locator).await {
                    Ok(digest) => Some(digest),
                    Err(StoreError::Cancelled) => return Err(StoreError::Cancelled),
                    Err(e) => {
                        warn!(id, error = %e, "digest blob unavailable, using catalog digest");
                        manifest.content_hash_hex.clone()
                    }
                }
            }
            None => manifest.content_hash_hex.clone(),
        };

        let state_path = DownloadJournal::state_file_path(&self.settings.journal_dir, id);
        let resumed = match DownloadJournal::load(&state_path)? {
            Some(journal) if journal.matches(size, total_chunks, dest) && dest.exists() => {
                info!(
                    id,
                    done = journal.completed_chunk_indices.len(),
                    chunks = total_chunks,
                    "resuming download"
                );
                Some(journal)
            }
            Some(_) => {
                warn!(id, path = %state_path.display(), "discarding stale download journal");
                None
            }
            None => None,
        };
        let fresh = resumed.is_none();
        let mut journal = resumed.unwrap_or_else(|| {
            DownloadJournal::new(manifest.display_name.clone(), dest, size, total_chunks)
        });

        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(fresh)
            .open(dest)
            .await?;
        if fresh {
            info!(id, name = %manifest.display_name, size, chunks = total_chunks, "starting download");
            journal.save(&state_path)?;
        }

        let mut pending = journal.pending();
        {
            let mut rng = rand::thread_rng();
            pending.shuffle(&mut rng);
        }

        for index in pending {
            let locator = &manifest.chunk_locators[index];
            let range = plan.range(index);
            let want = range.end - range.start;
            let fetched = self
                .settings
                .retry
                .run(&control.cancel, "fetch chunk", || self.session.fetch_chunk(locator))
                .await;
            let mut data = match fetched {
                Ok(data) => data,
                Err(e) => {
                    if matches!(e, StoreError::Cancelled) {
                        info!(id, chunk = index, "download cancelled, journal kept for resume");
                    }
                    return Err(e);
                }
            };
            // Written fitted to its range; the digest check reports the damage.
            if data.len() as u64 != want {
                warn!(
                    id,
                    chunk = index,
                    got = data.len(),
                    expected = want,
                    "chunk has wrong length, fitting it to its range"
                );
                data.resize(want as usize, 0);
            }

            file.seek(SeekFrom::Start(range.start)).await?;
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_data().await?;
            journal.mark_complete(index);
            journal.save(&state_path)?;
            debug!(id, chunk = index, bytes = data.len(), "chunk written");

            let done = journal.completed_chunk_indices.len();
            let bytes_done: u64 = journal
                .completed_chunk_indices
                .iter()
                .map(|i| plan.len_of(*i))
                .sum();
            control.report(&TransferProgress::new(
                done,
                total_chunks,
                bytes_done,
                size,
                &manifest.display_name,
            ));
        }

        file.set_len(size).await?;
        file.sync_all().await?;
        drop(file);

        let integrity = check_integrity(id, dest, expected).await?;
        DownloadJournal::delete(&state_path)?;
        info!(id, path = %dest.display(), "download complete");

        Ok(DownloadReport {
            id: id.to_string(),
            path: dest.to_path_buf(),
            bytes: size,
            integrity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::transfer::integrity::digest_bytes;
    use crate::transfer::upload::UploadPipeline;
    use crate::transfer::RetryPolicy;
    use std::time::Duration;

    fn settings(dir: &Path) -> TransferSettings {
        TransferSettings {
            chunk_size: 10,
            journal_dir: dir.join("journal"),
            slices_dir: dir.join("slices"),
            retry: RetryPolicy::new(vec![Duration::from_millis(1)]),
        }
    }

    async fn uploaded(
        dir: &Path,
        session: &SessionHandle,
        settings: &TransferSettings,
        len: usize,
    ) -> (Manifest, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 13 % 256) as u8).collect();
        let path = dir.join("source.bin");
        std::fs::write(&path, &data).unwrap();
        let manifest = UploadPipeline::new(session, settings)
            .run(&path, "file.bin", || Ok("42".into()), &mut TransferControl::default())
            .await
            .unwrap();
        (manifest, data)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());
        let (manifest, data) = uploaded(dir.path(), &session, &settings, 47).await;

        let dest = dir.path().join("out").join("file.bin");
        let report = DownloadPipeline::new(&session, &settings)
            .run(&manifest, &dest, &mut TransferControl::default())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert_eq!(report.integrity, IntegrityStatus::Verified);
        assert_eq!(report.bytes, 47);
        assert!(!DownloadJournal::state_file_path(&settings.journal_dir, "42").exists());
    }

    #[tokio::test]
    async fn test_failed_fetches_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());
        let (manifest, data) = uploaded(dir.path(), &session, &settings, 20).await;
        channel.fail_next_fetches(3);

        let dest = dir.path().join("out.bin");
        DownloadPipeline::new(&session, &settings)
            .run(&manifest, &dest, &mut TransferControl::default())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn test_mismatch_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());
        let (manifest, data) = uploaded(dir.path(), &session, &settings, 12).await;
        // Same length, different bytes
        channel.tamper(&manifest.chunk_locators[1], vec![0xff, 0xff]);

        let dest = dir.path().join("out.bin");
        let report = DownloadPipeline::new(&session, &settings)
            .run(&manifest, &dest, &mut TransferControl::default())
            .await
            .unwrap();

        let written = std::fs::read(&dest).unwrap();
        assert_eq!(written.len(), 12);
        match &report.integrity {
            IntegrityStatus::Mismatch { expected, actual } => {
                assert_eq!(expected, &digest_bytes(&data));
                assert_eq!(actual, &digest_bytes(&written));
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert!(matches!(
            report.require_verified(),
            Err(StoreError::IntegrityMismatch { .. })
        ));
        assert!(!DownloadJournal::state_file_path(&settings.journal_dir, "42").exists());
    }

    #[tokio::test]
    async fn test_interrupted_download_only_fetches_missing_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());
        let (manifest, data) = uploaded(dir.path(), &session, &settings, 45).await;
        let dest = dir.path().join("out.bin");
        let state_path = DownloadJournal::state_file_path(&settings.journal_dir, "42");

        // Digest blob plus two chunks, then the channel stalls
        channel.set_fetch_budget(Some(3));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut control = TransferControl::new(cancel).with_progress(Box::new(move |p| {
            if p.chunks_done == 2 {
                trigger.cancel();
            }
        }));
        let err = DownloadPipeline::new(&session, &settings)
            .run(&manifest, &dest, &mut control)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));

        let journal = DownloadJournal::load(&state_path).unwrap().unwrap();
        let first_pass = journal.completed_chunk_indices.clone();
        assert_eq!(first_pass.len(), 2);
        let on_disk = std::fs::read(&dest).unwrap();
        for &i in &first_pass {
            let r = ChunkPlan::new(45, 10).unwrap().range(i);
            let (s, e) = (r.start as usize, r.end as usize);
            assert_eq!(&on_disk[s..e], &data[s..e]);
        }

        channel.set_fetch_budget(None);
        let before = channel.fetch_log().len();
        let seen_sizes = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sizes = seen_sizes.clone();
        let mut control = TransferControl::default().with_progress(Box::new(move |p| {
            sizes.lock().unwrap().push(p.chunks_done);
        }));
        let report = DownloadPipeline::new(&session, &settings)
            .run(&manifest, &dest, &mut control)
            .await
            .unwrap();

        assert_eq!(report.integrity, IntegrityStatus::Verified);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        let refetched: Vec<Locator> = channel.fetch_log()[before..].to_vec();
        // Digest blob again, then only the three missing chunks
        assert_eq!(refetched.len(), 4);
        for &i in &first_pass {
            assert!(!refetched.contains(&manifest.chunk_locators[i]));
        }
        // Completed count never shrinks across the resume
        assert_eq!(*seen_sizes.lock().unwrap(), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_stale_journal_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());
        let (manifest, data) = uploaded(dir.path(), &session, &settings, 25).await;

        let state_path = DownloadJournal::state_file_path(&settings.journal_dir, "42");
        let dest = dir.path().join("fresh.bin");
        let mut stale = DownloadJournal::new("file.bin".into(), &dest, 25, 3);
        stale.mark_complete(0);
        stale.mark_complete(1);
        stale.save(&state_path).unwrap();

        // Output file missing, so nothing recorded can be trusted
        DownloadPipeline::new(&session, &settings)
            .run(&manifest, &dest, &mut TransferControl::default())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert_eq!(channel.fetch_log().len(), 4);
    }

    #[tokio::test]
    async fn test_wrong_length_chunk_finishes_with_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());
        let (manifest, data) = uploaded(dir.path(), &session, &settings, 40).await;
        assert!(channel.tamper(&manifest.chunk_locators[1], vec![7u8; 5]));
        assert!(channel.tamper(&manifest.chunk_locators[2], vec![9u8; 14]));

        let dest = dir.path().join("out.bin");
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            DownloadPipeline::new(&session, &settings).run(
                &manifest,
                &dest,
                &mut TransferControl::default(),
            ),
        )
        .await
        .expect("download should not keep refetching")
        .unwrap();

        assert!(matches!(report.integrity, IntegrityStatus::Mismatch { .. }));
        // Digest blob plus one fetch per chunk
        assert_eq!(channel.fetch_log().len(), 5);
        let written = std::fs::read(&dest).unwrap();
        assert_eq!(written.len(), 40);
        assert_eq!(&written[..10], &data[..10]);
        assert_eq!(&written[10..15], &[7u8; 5]);
        assert_eq!(&written[15..20], &[0u8; 5]);
        assert_eq!(&written[20..30], &[9u8; 10]);
        assert_eq!(&written[30..], &data[30..]);
        assert!(!DownloadJournal::state_file_path(&settings.journal_dir, "42").exists());
    }

    #[tokio::test]
    async fn test_journal_for_other_destination_is_not_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());
        let (manifest, data) = uploaded(dir.path(), &session, &settings, 45).await;

        channel.set_fetch_budget(Some(3));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut control = TransferControl::new(cancel).with_progress(Box::new(move |p| {
            if p.chunks_done == 2 {
                trigger.cancel();
            }
        }));
        let first = dir.path().join("first.bin");
        let err = DownloadPipeline::new(&session, &settings)
            .run(&manifest, &first, &mut control)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));

        channel.set_fetch_budget(None);
        let second = dir.path().join("second.bin");
        std::fs::write(&second, vec![0xaa; 45]).unwrap();
        let report = DownloadPipeline::new(&session, &settings)
            .run(&manifest, &second, &mut TransferControl::default())
            .await
            .unwrap();
        assert_eq!(report.integrity, IntegrityStatus::Verified);
        assert_eq!(std::fs::read(&second).unwrap(), data);
    }

    #[tokio::test]
    async fn test_legacy_manifest_without_digest_is_unchecked() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());
        let (mut manifest, data) = uploaded(dir.path(), &session, &settings, 8).await;
        manifest.hash_locator = None;
        manifest.content_hash_hex = None;

        let dest = dir.path().join("out.bin");
        let report = DownloadPipeline::new(&session, &settings)
            .run(&manifest, &dest, &mut TransferControl::default())
            .await
            .unwrap();
        assert_eq!(report.integrity, IntegrityStatus::Unchecked);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn test_too_few_locators_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let session = SessionHandle::spawn(MemoryChannel::new());
        let manifest = Manifest::new("1", "x", 25, vec![Locator::from("mem://0/x")], None, None);
        let err = DownloadPipeline::new(&session, &settings)
            .run(&manifest, &dir.path().join("o"), &mut TransferControl::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest(_)));
    }
}
