//! Actor that owns the channel connection.
//!
//! Every network operation on the channel goes through one task reading a
//! bounded mailbox. Callers hold a cheap, cloneable [`SessionHandle`] and await
//! the reply to each request, so chunk transfers routed through the same
//! session run strictly one after another.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::channel::{Channel, Locator, RecentMessage};
use crate::error::{Result, StoreError};

const MAILBOX_SIZE: usize = 64;

#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

enum SessionCommand {
    Check {
        reply: oneshot::Sender<Result<()>>,
    },
    SendChunk {
        name: String,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<Locator>>,
    },
    FetchChunk {
        locator: Locator,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    ListRecent {
        limit: usize,
        reply: oneshot::Sender<Result<Vec<RecentMessage>>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct SessionActor {
    channel: Box<dyn Channel>,
    rx: mpsc::Receiver<SessionCommand>,
}

impl SessionHandle {
    /// Start an actor that owns `channel` and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<C: Channel>(channel: C) -> Self {
        SessionActor::spawn(Box::new(channel))
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<R>>) -> SessionCommand,
    ) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        let cmd = build(tx);
        self.tx
            .send(cmd)
            .await
            .map_err(|_| StoreError::Custom("Session actor stopped".to_string()))?;
        rx.await
            .map_err(|_| StoreError::Custom("Session actor stopped".to_string()))?
    }

    pub async fn check(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Check { reply }).await
    }

    pub async fn send_chunk(&self, name: &str, data: Vec<u8>) -> Result<Locator> {
        self.request(|reply| SessionCommand::SendChunk {
            name: name.to_string(),
            data,
            reply,
        })
        .await
    }

    pub async fn fetch_chunk(&self, locator: &Locator) -> Result<Vec<u8>> {
        self.request(|reply| SessionCommand::FetchChunk {
            locator: locator.clone(),
            reply,
        })
        .await
    }

    pub async fn list_recent(&self, limit: usize) -> Result<Vec<RecentMessage>> {
        self.request(|reply| SessionCommand::ListRecent { limit, reply })
            .await
    }

    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(SessionCommand::Shutdown { reply: tx }).await;
        let _ = rx.await;
    }
}

impl SessionActor {
    fn spawn(channel: Box<dyn Channel>) -> SessionHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        let actor = SessionActor { channel, rx };
        tokio::spawn(actor.run());
        SessionHandle { tx }
    }

    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            if self.handle_command(cmd).await {
                break;
            }
        }
        debug!("session actor stopped");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Check { reply } => {
                let res = self.channel.check().await;
                let _ = reply.send(res);
            }
            SessionCommand::SendChunk { name, data, reply } => {
                let res = self.channel.send_chunk(&name, data).await;
                let _ = reply.send(res);
            }
            SessionCommand::FetchChunk { locator, reply } => {
                let res = self.channel.fetch_chunk(&locator).await;
                let _ = reply.send(res);
            }
            SessionCommand::ListRecent { limit, reply } => {
                let res = self.channel.list_recent(limit).await;
                let _ = reply.send(res);
            }
            SessionCommand::Shutdown { reply } => {
                let _ = reply.send(());
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;

    #[tokio::test]
    async fn test_requests_reach_channel() {
        let channel = MemoryChannel::new();
        let handle = SessionHandle::spawn(channel.clone());

        handle.check().await.unwrap();
        let loc = handle.send_chunk("7.0", b"hello".to_vec()).await.unwrap();
        assert_eq!(handle.fetch_chunk(&loc).await.unwrap(), b"hello");
        assert_eq!(handle.list_recent(5).await.unwrap().len(), 1);
        assert_eq!(channel.sent_names(), vec!["7.0".to_string()]);
    }

    #[tokio::test]
    async fn test_errors_pass_through_unchanged() {
        let channel = MemoryChannel::new();
        channel.set_unusable("wrong kind");
        let handle = SessionHandle::spawn(channel);
        assert!(matches!(
            handle.check().await,
            Err(StoreError::ChannelUnusable(_))
        ));
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_fail() {
        let handle = SessionHandle::spawn(MemoryChannel::new());
        let other = handle.clone();
        handle.shutdown().await;
        assert!(matches!(other.check().await, Err(StoreError::Custom(_))));
    }
}
