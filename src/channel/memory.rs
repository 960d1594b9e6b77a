//! In-process [`Channel`] for tests and offline demos.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{Channel, Locator, RecentMessage};
use crate::error::{Result, StoreError};

const SCHEME: &str = "mem://";
const AUTHOR: &str = "memory";

#[derive(Debug, Default)]
struct Inner {
    blobs: Vec<(String, Vec<u8>)>,
    fail_sends: usize,
    fail_fetches: usize,
    send_budget: Option<usize>,
    fetch_budget: Option<usize>,
    unusable: Option<String>,
    fetch_log: Vec<Locator>,
}

/// Channel that keeps every blob in memory.
///
/// Clones share the same storage, so a test can keep one handle for fault
/// injection and inspection while the store owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `n` sends with a transient error.
    pub fn fail_next_sends(&self, n: usize) {
        self.lock().fail_sends = n;
    }

    /// Fail the next `n` fetches with a transient error.
    pub fn fail_next_fetches(&self, n: usize) {
        self.lock().fail_fetches = n;
    }

    /// Allow `n` more successful sends, then fail every send until reset with `None`.
    pub fn set_send_budget(&self, n: Option<usize>) {
        self.lock().send_budget = n;
    }

    /// Allow `n` more successful fetches, then fail every fetch until reset with `None`.
    pub fn set_fetch_budget(&self, n: Option<usize>) {
        self.lock().fetch_budget = n;
    }

    /// Make `check` and `send_chunk` fail with [`StoreError::ChannelUnusable`].
    pub fn set_unusable(&self, reason: impl Into<String>) {
        self.lock().unusable = Some(reason.into());
    }

    /// Names of all blobs sent so far, oldest first.
    pub fn sent_names(&self) -> Vec<String> {
        self.lock().blobs.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Every locator fetched so far, in fetch order.
    pub fn fetch_log(&self) -> Vec<Locator> {
        self.lock().fetch_log.clone()
    }

    pub fn blob(&self, locator: &Locator) -> Option<Vec<u8>> {
        let index = parse_index(locator)?;
        self.lock().blobs.get(index).map(|(_, d)| d.clone())
    }

    /// Overwrite the stored contents behind `locator`.
    pub fn tamper(&self, locator: &Locator, data: Vec<u8>) -> bool {
        let Some(index) = parse_index(locator) else {
            return false;
        };
        match self.lock().blobs.get_mut(index) {
            Some(slot) => {
                slot.1 = data;
                true
            }
            None => false,
        }
    }
}

fn parse_index(locator: &Locator) -> Option<usize> {
    locator
        .as_str()
        .strip_prefix(SCHEME)?
        .split('/')
        .next()?
        .parse()
        .ok()
}

fn take_failure(fail: &mut usize, budget: &mut Option<usize>) -> bool {
    if *fail > 0 {
        *fail -= 1;
        return true;
    }
    match budget {
        Some(0) => true,
        Some(n) => {
            *n -= 1;
            false
        }
        None => false,
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn check(&mut self) -> Result<()> {
        match &self.lock().unusable {
            Some(reason) => Err(StoreError::ChannelUnusable(reason.clone())),
            None => Ok(()),
        }
    }

    async fn send_chunk(&mut self, name: &str, data: Vec<u8>) -> Result<Locator> {
        let mut inner = self.lock();
        if let Some(reason) = &inner.unusable {
            return Err(StoreError::ChannelUnusable(reason.clone()));
        }
        let state = &mut *inner;
        if take_failure(&mut state.fail_sends, &mut state.send_budget) {
            return Err(StoreError::Transient(format!("send {} refused", name)));
        }
        let index = inner.blobs.len();
        inner.blobs.push((name.to_string(), data));
        Ok(Locator::new(format!("{}{}/{}", SCHEME, index, name)))
    }

    async fn fetch_chunk(&mut self, locator: &Locator) -> Result<Vec<u8>> {
        let mut inner = self.lock();
        let state = &mut *inner;
        if take_failure(&mut state.fail_fetches, &mut state.fetch_budget) {
            return Err(StoreError::Transient(format!("fetch {} refused", locator)));
        }
        let data = parse_index(locator)
            .and_then(|i| inner.blobs.get(i))
            .map(|(_, d)| d.clone())
            .ok_or(StoreError::HttpError(404))?;
        inner.fetch_log.push(locator.clone());
        Ok(data)
    }

    async fn list_recent(&mut self, limit: usize) -> Result<Vec<RecentMessage>> {
        let inner = self.lock();
        Ok(inner
            .blobs
            .iter()
            .enumerate()
            .rev()
            .take(limit)
            .map(|(i, (name, _))| RecentMessage {
                id: i.to_string(),
                author_id: AUTHOR.to_string(),
                attachments: vec![Locator::new(format!("{}{}/{}", SCHEME, i, name))],
            })
            .collect())
    }
}
