//! High-level store API.
//!
//! [`Store`] ties the catalog, the channel session and the transfer pipelines
//! together. It is the entry point used by the gateway and the demo binaries.
//!
//! # Example
//! ```no_run
//! # async fn example() -> chanstore::Result<()> {
//! use chanstore::{Store, StoreConfig, TransferControl};
//!
//! let store = Store::connect(StoreConfig::from_env()).await?;
//! let manifest = store
//!     .upload_file("backup.tar", &mut TransferControl::default())
//!     .await?;
//! println!("stored as {}", manifest.id);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use tracing::{info, warn};

use crate::catalog::{Manifest, ObjectCatalog};
use crate::channel::RestChannel;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::session::SessionHandle;
use crate::transfer::recovery::recover;
use crate::transfer::{
    journal, DownloadPipeline, DownloadReport, RecoveryRequest, RetryPolicy, TransferControl,
    TransferSettings, UploadPipeline,
};

pub struct Store {
    config: StoreConfig,
    catalog: ObjectCatalog,
    session: SessionHandle,
    settings: TransferSettings,
}

impl Store {
    pub fn new(config: StoreConfig, catalog: ObjectCatalog, session: SessionHandle) -> Self {
        let settings = TransferSettings::from_config(&config, RetryPolicy::default());
        Self {
            config,
            catalog,
            session,
            settings,
        }
    }

    /// Open the catalog named in `config` and connect to its channel over REST,
    /// through `config.proxy` when one is set.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let catalog = ObjectCatalog::open(&config.catalog_path)?;
        let session_config = catalog.session()?;
        let channel = match &config.proxy {
            Some(proxy) => RestChannel::with_proxy(&session_config, &config.api_base, proxy)?,
            None => RestChannel::new(&session_config, &config.api_base)?,
        };
        let session = SessionHandle::spawn(channel);
        Ok(Self::new(config, catalog, session))
    }

    /// Replace the backoff schedule used by every transfer.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.settings.retry = retry;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ObjectCatalog {
        &self.catalog
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Upload a local file under its own file name.
    pub async fn upload_file<P: AsRef<Path>>(
        &self,
        path: P,
        control: &mut TransferControl,
    ) -> Result<Manifest> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StoreError::InvalidRequest(format!("no file name in {}", path.display())))?;
        self.upload_as(path, &name, control).await
    }

    /// Upload a local file and list it as `display_name`.
    ///
    /// Fresh ids skip those held by unfinished uploads. If the id of a resumed
    /// upload was registered by another object meanwhile, the upload is
    /// listed under a newly issued id instead.
    pub async fn upload_as<P: AsRef<Path>>(
        &self,
        path: P,
        display_name: &str,
        control: &mut TransferControl,
    ) -> Result<Manifest> {
        let journal_dir = &self.settings.journal_dir;
        let issue_id = || {
            let reserved = journal::pending_upload_ids(journal_dir)?;
            self.catalog.issue_id_excluding(&reserved)
        };
        let mut manifest = UploadPipeline::new(&self.session, &self.settings)
            .run(path.as_ref(), display_name, issue_id, control)
            .await?;
        while !self.catalog.insert_new(&manifest)? {
            let taken = std::mem::replace(&mut manifest.id, issue_id()?);
            warn!(
                id = %taken,
                new_id = %manifest.id,
                "id already names another object, registering upload under a new id"
            );
        }
        Ok(manifest)
    }

    pub async fn download<P: AsRef<Path>>(
        &self,
        id: &str,
        dest: P,
        control: &mut TransferControl,
    ) -> Result<DownloadReport> {
        let manifest = self.catalog.get(id)?;
        self.download_manifest(&manifest, dest.as_ref(), control)
            .await
    }

    pub async fn download_by_name<P: AsRef<Path>>(
        &self,
        name: &str,
        dest: P,
        control: &mut TransferControl,
    ) -> Result<DownloadReport> {
        let manifest = self
            .catalog
            .find_by_name(name)?
            .ok_or_else(|| StoreError::NotFound(format!("object named {}", name)))?;
        self.download_manifest(&manifest, dest.as_ref(), control)
            .await
    }

    pub async fn download_manifest(
        &self,
        manifest: &Manifest,
        dest: &Path,
        control: &mut TransferControl,
    ) -> Result<DownloadReport> {
        DownloadPipeline::new(&self.session, &self.settings)
            .run(manifest, dest, control)
            .await
    }

    pub fn list(&self) -> Result<Vec<Manifest>> {
        self.catalog.list()
    }

    pub fn get(&self, id: &str) -> Result<Manifest> {
        self.catalog.get(id)
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Manifest>> {
        self.catalog.find_by_name(name)
    }

    /// Drop an object from the catalog.
    ///
    /// Chunks already on the channel stay there.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.catalog.delete(id)?;
        if removed {
            info!(id, "object removed from catalog");
        }
        Ok(removed)
    }

    /// Rebuild an object from raw locators into `dest`, optionally registering it.
    ///
    /// Registration refuses to overwrite an existing id.
    pub async fn recover<P: AsRef<Path>>(
        &self,
        request: &RecoveryRequest,
        dest: P,
        insert: bool,
        control: &mut TransferControl,
    ) -> Result<(Manifest, DownloadReport)> {
        if insert && self.catalog.get(&request.id).is_ok() {
            return Err(StoreError::InvalidRequest(format!(
                "object {} already exists",
                request.id
            )));
        }
        let (manifest, report) =
            recover(&self.session, &self.settings, request, dest.as_ref(), control).await?;
        if insert {
            self.catalog.put(&manifest)?;
            info!(id = %manifest.id, "recovered object registered");
        }
        Ok((manifest, report))
    }

    /// Remove every resume journal, leftover chunk slice and gateway cache
    /// file. Returns how many journals were removed.
    ///
    /// Run it while no transfer or gateway is active.
    pub fn sweep(&self) -> Result<usize> {
        let removed = journal::sweep(&self.settings.journal_dir)?;
        for (dir, what) in [
            (self.settings.slices_dir.clone(), "chunk slices"),
            (self.config.cache_dir(), "gateway cache"),
        ] {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(error = %e, path = %dir.display(), "could not remove {}", what),
            }
        }
        Ok(removed)
    }
}
