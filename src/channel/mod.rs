//! Message channel used as the backing store.
//!
//! The store never talks to the network directly: it drives a [`Channel`]
//! through the session actor. Implementations only need to send a named blob
//! and hand back a durable reference to it, fetch a blob by that reference,
//! and list recent messages.

mod memory;
mod rest;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::MemoryChannel;
pub use rest::RestChannel;

/// Opaque reference to a blob stored on the channel (for Discord, an attachment URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Locator {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A message as returned by [`Channel::list_recent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentMessage {
    pub id: String,
    pub author_id: String,
    pub attachments: Vec<Locator>,
}

/// Transport capability the store is built on.
///
/// Implementations classify their failures: misconfiguration is
/// [`crate::StoreError::ChannelUnusable`], anything that may go away on retry
/// is transient (see [`crate::StoreError::is_transient`]).
#[async_trait]
pub trait Channel: Send + 'static {
    /// Confirm the destination exists, is writable and is of a usable kind.
    async fn check(&mut self) -> Result<()>;

    /// Send one blob as an attachment named `name` and return its locator.
    async fn send_chunk(&mut self, name: &str, data: Vec<u8>) -> Result<Locator>;

    /// Fetch the full contents of a previously sent blob.
    async fn fetch_chunk(&mut self, locator: &Locator) -> Result<Vec<u8>>;

    /// Recent messages, newest first.
    async fn list_recent(&mut self, limit: usize) -> Result<Vec<RecentMessage>>;
}
