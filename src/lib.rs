//! # chanstore
//!
//! Object storage on top of a chat channel. Files are split into fixed-size
//! chunks, each chunk is posted to the channel as an attachment, and a local
//! catalog maps object ids to the ordered chunk locators.
//!
//! ## Features
//!
//! - **Transfers**:
//!   - Chunked upload and download with resume journals that survive restarts.
//!   - Unbounded retry with backoff for transient channel failures.
//!   - End-to-end MD5 verification against a digest blob stored next to the chunks.
//!   - Progress reporting through a callback.
//! - **Catalog**: a two-record JSON file holding the channel credentials and
//!   the manifest map. Older three- and four-field manifests are still read.
//! - **Recovery**: rebuild an object from bare locators when its catalog entry is gone.
//! - **WebDAV gateway**: a flat namespace over the catalog, mountable from a
//!   file manager (`gateway::serve`).
//!
//! ## Example
//!
//! ```no_run
//! use chanstore::{Store, StoreConfig, TransferControl};
//!
//! # async fn example() -> chanstore::Result<()> {
//! let store = Store::connect(StoreConfig::from_env()).await?;
//!
//! let manifest = store
//!     .upload_file("report.pdf", &mut TransferControl::default())
//!     .await?;
//!
//! for object in store.list()? {
//!     println!("{} {} ({} bytes)", object.id, object.display_name, object.total_size_bytes);
//! }
//!
//! store
//!     .download(&manifest.id, "report-copy.pdf", &mut TransferControl::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod channel;
pub mod config;
pub mod error;
pub mod gateway;
pub mod progress;
pub mod session;
pub mod store;
pub mod transfer;
mod utils;

// Re-export commonly used types
pub use catalog::{Manifest, ManifestVersion, ObjectCatalog};
pub use channel::{Channel, Locator, MemoryChannel, RestChannel};
pub use config::{SessionConfig, StoreConfig};
pub use error::{Result, StoreError};
pub use progress::{ProgressCallback, TransferProgress};
pub use session::SessionHandle;
pub use store::Store;
pub use transfer::{DownloadReport, IntegrityStatus, RecoveryRequest, RetryPolicy, TransferControl};
pub use utils::human_size;
