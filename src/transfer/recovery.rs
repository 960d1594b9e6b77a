//! Rebuild an object from bare channel locators.
//!
//! Used when the catalog entry is lost but the chunk locators are still known
//! (for example, copied from the channel history). The total size is not
//! known up front, so chunks are fetched in order and appended.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::download::{check_integrity, fetch_expected_digest, DownloadReport, IntegrityStatus};
use super::integrity::digest_file;
use super::{blocking, TransferControl, TransferSettings};
use crate::catalog::Manifest;
use crate::channel::Locator;
use crate::error::{Result, StoreError};
use crate::progress::TransferProgress;
use crate::session::SessionHandle;

#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub id: String,
    pub display_name: String,
    pub hash_locator: Option<Locator>,
    /// Chunk locators in chunk order
    pub chunk_locators: Vec<Locator>,
}

/// Reassemble `request` into `dest` and build the matching manifest.
///
/// The manifest's digest describes the bytes actually recovered, so a
/// mismatch against the digest blob is reported but not carried into it.
pub async fn recover(
    session: &SessionHandle,
    settings: &TransferSettings,
    request: &RecoveryRequest,
    dest: &Path,
    control: &mut TransferControl,
) -> Result<(Manifest, DownloadReport)> {
    if request.chunk_locators.is_empty() {
        return Err(StoreError::InvalidRequest(
            "recovery needs at least one chunk locator".to_string(),
        ));
    }
    let id = request.id.as_str();
    let total_chunks = request.chunk_locators.len();

    let expected = match &request.hash_locator {
        Some(locator) => match fetch_expected_digest(session, settings, &control.cancel, locator).await {
            Ok(digest) => Some(digest),
            Err(StoreError::Cancelled) => return Err(StoreError::Cancelled),
            Err(e) => {
                warn!(id, error = %e, "digest blob unavailable");
                None
            }
        },
        None => None,
    };

    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut file = File::create(dest).await?;
    let mut written = 0u64;
    info!(id, chunks = total_chunks, "recovering object");

    for (index, locator) in request.chunk_locators.iter().enumerate() {
        let data = settings
            .retry
            .run(&control.cancel, "fetch chunk", || session.fetch_chunk(locator))
            .await?;
        let last = index + 1 == total_chunks;
        if !last && data.len() as u64 != settings.chunk_size {
            warn!(
                id,
                chunk = index,
                bytes = data.len(),
                chunk_size = settings.chunk_size,
                "unexpected chunk length"
            );
        }
        file.write_all(&data).await?;
        written += data.len() as u64;
        debug!(id, chunk = index, bytes = data.len(), "chunk recovered");
        control.report(&TransferProgress::new(
            index + 1,
            total_chunks,
            written,
            written,
            &request.display_name,
        ));
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    let integrity = check_integrity(id, dest, expected).await?;
    let digest = match &integrity {
        IntegrityStatus::Mismatch { actual, .. } => actual.clone(),
        _ => {
            let path = dest.to_path_buf();
            blocking(move || digest_file(path)).await?
        }
    };

    let manifest = Manifest::new(
        id,
        request.display_name.clone(),
        written,
        request.chunk_locators.clone(),
        request.hash_locator.clone(),
        Some(digest),
    );
    let report = DownloadReport {
        id: id.to_string(),
        path: dest.to_path_buf(),
        bytes: written,
        integrity,
    };
    Ok((manifest, report))
}
