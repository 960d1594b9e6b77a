//! Upload pipeline.
//!
//! `hash -> slice -> digest blob -> chunk loop -> finalize -> cleanup`, with a
//! resume entry into the chunk loop when a journal for the same content is
//! found. Resumed runs keep the issued id and every locator already collected.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::integrity::digest_file;
use super::journal::UploadJournal;
use super::planner::ChunkPlan;
use super::{blocking, TransferControl, TransferSettings};
use crate::catalog::Manifest;
use crate::error::{Result, StoreError};
use crate::progress::TransferProgress;
use crate::session::SessionHandle;
use crate::utils::write_atomic;

fn slice_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}.part", index))
}

/// Name a chunk is sent under: `<id>.<index>`.
pub fn chunk_name(id: &str, index: usize) -> String {
    format!("{}.{}", id, index)
}

/// Name of the digest blob: `<id>.md5`.
pub fn hash_blob_name(id: &str) -> String {
    format!("{}.md5", id)
}

/// Copy each chunk of `source` from `from` onwards into its own slice file.
/// Slices that already exist with the right length are kept.
fn write_slices(source: &Path, dir: &Path, plan: &ChunkPlan, from: usize) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = File::open(source)?;
    for (index, range) in plan.chunks().skip(from) {
        let path = slice_path(dir, index);
        let len = range.end - range.start;
        let intact = std::fs::metadata(&path)
            .map(|m| m.len() == len)
            .unwrap_or(false);
        if intact {
            continue;
        }
        file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)?;
        write_atomic(&path, &buf)?;
    }
    Ok(())
}

fn remove_slices(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub struct UploadPipeline<'a> {
    session: &'a SessionHandle,
    settings: &'a TransferSettings,
}

impl<'a> UploadPipeline<'a> {
    pub fn new(session: &'a SessionHandle, settings: &'a TransferSettings) -> Self {
        Self { session, settings }
    }

    /// Upload `source` as `display_name` and return its completed manifest.
    ///
    /// `issue_id` is only called when no resumable journal exists. Transient
    /// channel failures are retried without bound; the run ends early only on
    /// cancellation (journal kept), an unusable channel, or a local error.
    pub async fn run(
        &self,
        source: &Path,
        display_name: &str,
        issue_id: impl FnOnce() -> Result<String>,
        control: &mut TransferControl,
    ) -> Result<Manifest> {
        let metadata = tokio::fs::metadata(source).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StoreError::NotFound(format!("source file {}", source.display()))
            }
            _ => StoreError::Io(e),
        })?;
        if !metadata.is_file() {
            return Err(StoreError::InvalidRequest(format!(
                "{} is not a regular file",
                source.display()
            )));
        }
        let size = metadata.len();

        // Digest before any network activity
        let digest = {
            let path = source.to_path_buf();
            blocking(move || digest_file(path)).await?
        };
        let plan = ChunkPlan::new(size, self.settings.chunk_size)?;
        let state_path =
            UploadJournal::state_file_path(&self.settings.journal_dir, &digest, size);

        let mut journal = match UploadJournal::load(&state_path)? {
            Some(existing) if existing.matches(size, plan.count(), &digest) => {
                info!(
                    id = %existing.issued_id,
                    next_chunk = existing.next_chunk_index(),
                    chunks = plan.count(),
                    "resuming upload"
                );
                existing
            }
            stale => {
                if stale.is_some() {
                    warn!(path = %state_path.display(), "discarding upload journal for different chunking");
                }
                let journal = UploadJournal::new(
                    issue_id()?,
                    display_name.to_string(),
                    digest.clone(),
                    size,
                    plan.count(),
                );
                journal.save(&state_path)?;
                info!(id = %journal.issued_id, name = display_name, size, chunks = plan.count(), "starting upload");
                journal
            }
        };
        let id = journal.issued_id.clone();

        let retry = &self.settings.retry;
        retry
            .run(&control.cancel, "channel check", || self.session.check())
            .await?;

        // Slice once, so retries read stable local copies
        let slice_dir = self.settings.slices_dir.join(&digest);
        {
            let source = source.to_path_buf();
            let dir = slice_dir.clone();
            let from = journal.next_chunk_index();
            blocking(move || write_slices(&source, &dir, &plan, from)).await?;
        }

        if journal.hash_locator.is_none() {
            let name = hash_blob_name(&id);
            let locator = retry
                .run(&control.cancel, "send digest blob", || {
                    self.session.send_chunk(&name, digest.as_bytes().to_vec())
                })
                .await?;
            debug!(id = %id, locator = %locator, "digest blob sent");
            journal.hash_locator = Some(locator);
            journal.save(&state_path)?;
        }

        for index in journal.next_chunk_index()..plan.count() {
            let data = tokio::fs::read(slice_path(&slice_dir, index)).await?;
            let name = chunk_name(&id, index);
            let sent = retry
                .run(&control.cancel, "send chunk", || {
                    self.session.send_chunk(&name, data.clone())
                })
                .await;
            let locator = match sent {
                Ok(locator) => locator,
                Err(e) => {
                    if matches!(e, StoreError::Cancelled) {
                        info!(id = %id, chunk = index, "upload cancelled, journal kept for resume");
                    }
                    return Err(e);
                }
            };
            debug!(id = %id, chunk = index, bytes = data.len(), "chunk sent");
            journal.record_chunk(locator);
            journal.save(&state_path)?;

            control.report(&TransferProgress::new(
                index + 1,
                plan.count(),
                plan.range(index).end,
                size,
                display_name,
            ));
        }

        let manifest = Manifest::new(
            id.clone(),
            display_name,
            size,
            journal.collected_locators.clone(),
            journal.hash_locator.clone(),
            Some(digest),
        );

        remove_slices(&slice_dir)?;
        UploadJournal::delete(&state_path)?;
        info!(id = %id, name = display_name, "upload complete");
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::transfer::integrity::digest_bytes;
    use crate::transfer::RetryPolicy;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn settings(dir: &Path) -> TransferSettings {
        TransferSettings {
            chunk_size: 10,
            journal_dir: dir.join("journal"),
            slices_dir: dir.join("slices"),
            retry: RetryPolicy::new(vec![Duration::from_millis(1)]),
        }
    }

    fn source(dir: &Path, len: usize) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        let path = dir.join("source.bin");
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    #[tokio::test]
    async fn test_upload_sends_digest_blob_then_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let (path, data) = source(dir.path(), 25);
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());

        let mut control = TransferControl::default();
        let manifest = UploadPipeline::new(&session, &settings)
            .run(&path, "file.bin", || Ok("77".into()), &mut control)
            .await
            .unwrap();

        assert_eq!(manifest.id, "77");
        assert_eq!(manifest.total_size_bytes, 25);
        assert_eq!(manifest.chunk_locators.len(), 3);
        assert_eq!(manifest.content_hash_hex, Some(digest_bytes(&data)));
        assert_eq!(channel.sent_names(), vec!["77.md5", "77.0", "77.1", "77.2"]);

        let hash_blob = channel.blob(manifest.hash_locator.as_ref().unwrap()).unwrap();
        assert_eq!(hash_blob, digest_bytes(&data).into_bytes());
        let last = channel.blob(&manifest.chunk_locators[2]).unwrap();
        assert_eq!(last, data[20..].to_vec());

        // Journal and slices are cleaned up
        assert_eq!(std::fs::read_dir(&settings.journal_dir).unwrap().count(), 0);
        assert!(!settings.slices_dir.join(digest_bytes(&data)).exists());
    }

    #[tokio::test]
    async fn test_missing_source_fails_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());

        let err = UploadPipeline::new(&session, &settings)
            .run(&dir.path().join("missing"), "x", || Ok("1".into()), &mut TransferControl::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(channel.sent_names().is_empty());
    }

    #[tokio::test]
    async fn test_unusable_channel_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let (path, _) = source(dir.path(), 5);
        let channel = MemoryChannel::new();
        channel.set_unusable("not a text channel");
        let session = SessionHandle::spawn(channel.clone());

        let err = UploadPipeline::new(&session, &settings)
            .run(&path, "x", || Ok("1".into()), &mut TransferControl::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ChannelUnusable(_)));
        assert!(channel.sent_names().is_empty());
    }

    #[tokio::test]
    async fn test_transient_send_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let (path, _) = source(dir.path(), 15);
        let channel = MemoryChannel::new();
        channel.fail_next_sends(4);
        let session = SessionHandle::spawn(channel.clone());

        let manifest = UploadPipeline::new(&session, &settings)
            .run(&path, "x", || Ok("5".into()), &mut TransferControl::default())
            .await
            .unwrap();
        assert_eq!(manifest.chunk_locators.len(), 2);
        assert_eq!(channel.sent_names(), vec!["5.md5", "5.0", "5.1"]);
    }

    #[tokio::test]
    async fn test_interrupted_upload_resumes_with_same_id() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let (path, data) = source(dir.path(), 25);
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());

        // Digest blob and chunk 0 go through, then the channel stalls
        channel.set_send_budget(Some(2));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut control = TransferControl::new(cancel).with_progress(Box::new(move |p| {
            if p.chunks_done == 1 {
                trigger.cancel();
            }
        }));
        let err = UploadPipeline::new(&session, &settings)
            .run(&path, "file.bin", || Ok("77".into()), &mut control)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));

        let state_path =
            UploadJournal::state_file_path(&settings.journal_dir, &digest_bytes(&data), 25);
        let journal = UploadJournal::load(&state_path).unwrap().unwrap();
        assert_eq!(journal.last_completed_chunk_index, Some(0));
        assert_eq!(journal.issued_id, "77");
        let first = journal.collected_locators[0].clone();

        channel.set_send_budget(None);
        let manifest = UploadPipeline::new(&session, &settings)
            .run(&path, "file.bin", || Ok("99".into()), &mut TransferControl::default())
            .await
            .unwrap();

        assert_eq!(manifest.id, "77");
        assert_eq!(manifest.chunk_locators.len(), 3);
        assert_eq!(manifest.chunk_locators[0], first);
        assert_eq!(channel.sent_names(), vec!["77.md5", "77.0", "77.1", "77.2"]);
        assert!(UploadJournal::load(&state_path).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_file_is_one_empty_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let (path, _) = source(dir.path(), 0);
        let channel = MemoryChannel::new();
        let session = SessionHandle::spawn(channel.clone());

        let manifest = UploadPipeline::new(&session, &settings)
            .run(&path, "empty", || Ok("3".into()), &mut TransferControl::default())
            .await
            .unwrap();
        assert_eq!(manifest.chunk_locators.len(), 1);
        assert_eq!(channel.blob(&manifest.chunk_locators[0]).unwrap(), Vec::<u8>::new());
    }
}
