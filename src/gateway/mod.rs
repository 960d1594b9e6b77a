//! WebDAV gateway over the store.
//!
//! The namespace is a single flat directory: every catalog entry appears at
//! `/<display name>`. Writes go through the upload pipeline, reads through
//! the download pipeline with a local cache in front. LOCK, UNLOCK and
//! PROPPATCH are acknowledged but enforce nothing, and MKCOL is always
//! rejected.

mod server;
pub mod xml;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::catalog::Manifest;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::transfer::TransferControl;
use crate::utils::display_name_from_path;
use xml::{LockInfo, PropEntry};

pub use server::{router, serve};

pub const ALLOWED_METHODS: &str =
    "OPTIONS, GET, HEAD, PUT, DELETE, COPY, MOVE, MKCOL, PROPFIND, PROPPATCH, LOCK, UNLOCK";
const ROOT_NAME: &str = "chanstore";
const LOCK_OWNER: &str = "chanstore";
const LOCK_TIMEOUT_SECS: u64 = 3600;
const XML_CONTENT_TYPE: &str = "text/xml; charset=\"utf-8\"";

/// HTTP date as used by `getlastmodified` and `Last-Modified`.
pub fn http_date_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn empty(status: StatusCode) -> Response {
    (status, [(header::CONTENT_LENGTH, "0")]).into_response()
}

fn xml_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, XML_CONTENT_TYPE)], body).into_response()
}

fn require_name(path: &str) -> Result<String> {
    display_name_from_path(path)
        .ok_or_else(|| StoreError::InvalidRequest("no file name in path".to_string()))
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove file");
        }
    }
}

/// Shared state behind every request.
pub struct Gateway {
    store: Arc<Store>,
    cache_dir: PathBuf,
    temp_dir: PathBuf,
    /// Serialises cache fills so two readers never write the same file
    fill_lock: Mutex<()>,
}

impl Gateway {
    pub fn new(store: Arc<Store>) -> Self {
        let cache_dir = store.config().cache_dir();
        let temp_dir = store.config().temp_dir();
        Self {
            store,
            cache_dir,
            temp_dir,
            fill_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn cache_path(&self, id: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.dat", id))
    }

    fn drop_cache(&self, id: &str) {
        remove_if_exists(&self.cache_path(id));
    }

    fn lookup(&self, name: &str) -> Result<Manifest> {
        self.store
            .find_by_name(name)?
            .ok_or_else(|| StoreError::NotFound(format!("file {}", name)))
    }

    /// Local copy of `manifest`, downloading it on first use.
    ///
    /// Copies are dropped on DELETE and MOVE only; [`Store::sweep`] clears the
    /// whole cache directory.
    async fn cached_copy(&self, manifest: &Manifest) -> Result<PathBuf> {
        let path = self.cache_path(&manifest.id);
        let _guard = self.fill_lock.lock().await;
        if path.exists() {
            return Ok(path);
        }
        let partial = self.cache_dir.join(format!("{}.part", manifest.id));
        self.store
            .download_manifest(manifest, &partial, &mut TransferControl::default())
            .await?;
        tokio::fs::rename(&partial, &path).await?;
        Ok(path)
    }

    /// Stream a request body into a fresh temp file.
    async fn spool(&self, body: Body) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let path = self.temp_dir.join(format!("{}.upload", uuid::Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    remove_if_exists(&path);
                    return Err(StoreError::InvalidRequest(format!("request body: {}", e)));
                }
            };
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(path)
    }

    /// Upload `source` as `name`, then drop any older entries with that name.
    /// Returns whether an entry was replaced.
    async fn store_as(&self, source: &Path, name: &str) -> Result<bool> {
        let previous = self.store.catalog().find_all_by_name(name)?;
        let manifest = self
            .store
            .upload_as(source, name, &mut TransferControl::default())
            .await?;
        for old in previous.iter().filter(|m| m.id != manifest.id) {
            self.store.delete(&old.id)?;
            self.drop_cache(&old.id);
        }
        info!(id = %manifest.id, name, "stored via gateway");
        Ok(!previous.is_empty())
    }

    pub fn options(&self) -> Response {
        (
            StatusCode::OK,
            [
                (header::HeaderName::from_static("dav"), "1,2"),
                (header::HeaderName::from_static("ms-author-via"), "DAV"),
                (header::ALLOW, ALLOWED_METHODS),
                (header::CONTENT_LENGTH, "0"),
            ],
        )
            .into_response()
    }

    /// Depth 0 describes only the target; anything else also lists the root's children.
    pub fn propfind(&self, path: &str, headers: &HeaderMap) -> Result<Response> {
        let depth_zero = headers
            .get("depth")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false);
        let now = http_date_now();

        let entries = match display_name_from_path(path) {
            None => {
                let mut entries = vec![PropEntry::collection("/", ROOT_NAME, &now)];
                if !depth_zero {
                    entries.extend(
                        self.store
                            .list()?
                            .iter()
                            .map(|m| PropEntry::file(&m.display_name, m.total_size_bytes, &now)),
                    );
                }
                entries
            }
            Some(name) => {
                let manifest = self.lookup(&name)?;
                vec![PropEntry::file(
                    &manifest.display_name,
                    manifest.total_size_bytes,
                    &now,
                )]
            }
        };
        Ok(xml_response(
            StatusCode::MULTI_STATUS,
            xml::multistatus(&entries)?,
        ))
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        let Some(name) = display_name_from_path(path) else {
            let listing: String = self
                .store
                .list()?
                .iter()
                .map(|m| format!("{}\t{}\n", m.display_name, m.total_size_bytes))
                .collect();
            return Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                listing,
            )
                .into_response());
        };

        let manifest = self.lookup(&name)?;
        let local = self.cached_copy(&manifest).await?;
        let file = tokio::fs::File::open(&local).await?;
        let len = file.metadata().await?.len();
        let disposition = format!(
            "attachment; filename=\"{}\"",
            name.replace(['"', '\\'], "_")
        );

        let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        if let Ok(value) = HeaderValue::from_str(&http_date_now()) {
            headers.insert(header::LAST_MODIFIED, value);
        }
        Ok(response)
    }

    pub fn head(&self, path: &str) -> Result<Response> {
        let Some(name) = display_name_from_path(path) else {
            return Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            )
                .into_response());
        };
        let manifest = self.lookup(&name)?;
        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from(manifest.total_size_bytes),
        );
        if let Ok(value) = HeaderValue::from_str(&http_date_now()) {
            headers.insert(header::LAST_MODIFIED, value);
        }
        Ok(response)
    }

    pub async fn put(&self, path: &str, body: Body) -> Result<Response> {
        let name = require_name(path)?;
        let spooled = self.spool(body).await?;
        let result = self.store_as(&spooled, &name).await;
        remove_if_exists(&spooled);
        let replaced = result?;
        Ok(empty(if replaced {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        }))
    }

    /// Remove every entry named by `path` from the catalog.
    pub fn delete(&self, path: &str) -> Result<Response> {
        let name = require_name(path)?;
        let matches = self.store.catalog().find_all_by_name(&name)?;
        if matches.is_empty() {
            return Err(StoreError::NotFound(format!("file {}", name)));
        }
        for manifest in &matches {
            self.store.delete(&manifest.id)?;
            self.drop_cache(&manifest.id);
        }
        info!(name = %name, "deleted via gateway");
        Ok(empty(StatusCode::NO_CONTENT))
    }

    /// Download under the old name, upload under the new one, and for a move,
    /// drop the old entry afterwards. A crash in between leaves both entries.
    pub async fn transfer(&self, path: &str, headers: &HeaderMap, remove_source: bool) -> Result<Response> {
        let source_name = require_name(path)?;
        let dest_name = destination_name(headers)?;
        if source_name == dest_name {
            return Err(StoreError::InvalidRequest(
                "source and destination are the same".to_string(),
            ));
        }
        let overwrite = headers
            .get("overwrite")
            .and_then(|v| v.to_str().ok())
            .map(|v| !v.trim().eq_ignore_ascii_case("F"))
            .unwrap_or(true);

        let source = self.lookup(&source_name)?;
        let dest_exists = self.store.find_by_name(&dest_name)?.is_some();
        if dest_exists && !overwrite {
            return Err(StoreError::PreconditionFailed(format!(
                "{} exists and Overwrite is F",
                dest_name
            )));
        }

        let local = self.cached_copy(&source).await?;
        self.store_as(&local, &dest_name).await?;
        if remove_source {
            self.store.delete(&source.id)?;
            self.drop_cache(&source.id);
            info!(from = %source_name, to = %dest_name, "moved via gateway");
        } else {
            info!(from = %source_name, to = %dest_name, "copied via gateway");
        }
        Ok(empty(if dest_exists {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        }))
    }

    pub fn lock(&self) -> Result<Response> {
        let lock = LockInfo {
            token: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
            owner: LOCK_OWNER.to_string(),
            timeout_secs: LOCK_TIMEOUT_SECS,
        };
        let body = xml::lock_discovery(&lock)?;
        let mut response = xml_response(StatusCode::OK, body);
        if let Ok(value) = HeaderValue::from_str(&format!("<{}>", lock.token)) {
            response
                .headers_mut()
                .insert(header::HeaderName::from_static("lock-token"), value);
        }
        Ok(response)
    }

    pub fn unlock(&self) -> Response {
        empty(StatusCode::NO_CONTENT)
    }

    pub fn proppatch(&self, path: &str) -> Result<Response> {
        Ok(xml_response(StatusCode::MULTI_STATUS, xml::proppatch(path)?))
    }

    pub fn mkcol(&self) -> Response {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, ALLOWED_METHODS)],
            "Directory creation not supported",
        )
            .into_response()
    }
}

/// Display name from a `Destination` header (absolute URL or bare path).
fn destination_name(headers: &HeaderMap) -> Result<String> {
    let raw = headers
        .get("destination")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| StoreError::InvalidRequest("missing Destination header".to_string()))?;
    let path = match reqwest::Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(_) => raw.to_string(),
    };
    display_name_from_path(&path)
        .ok_or_else(|| StoreError::InvalidRequest("destination has no file name".to_string()))
}
