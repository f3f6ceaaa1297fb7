//! The receive side of a session: a [`ReceiveQueue`] and the poller that
//! fills it, started and stopped together.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::info;
use webqq_core::model::ReceivedMessage;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::media::{MediaFetcher, MediaMode};
use crate::poller::{Poller, PollerHandle, SharedPollerState};
use crate::queue::{MediaUpdate, ReceiveQueue};
use crate::session::Session;
use crate::transport::HttpTransport;

/// Incoming messages of a session.
pub struct Inbox {
    queue: Arc<ReceiveQueue>,
    poller: PollerHandle,
}

impl Inbox {
    /// Creates the queue and starts polling.
    ///
    /// # Errors
    ///
    /// Fails if called outside a tokio runtime or if the session lacks its
    /// channel identifiers.
    pub fn start(
        transport: Arc<dyn HttpTransport>,
        session: Arc<Session>,
        config: &ClientConfig,
    ) -> ClientResult<Self> {
        Handle::try_current().map_err(|e| {
            ClientError::configuration("the inbox needs a tokio runtime").with_source(e)
        })?;
        session.validate()?;

        let queue = Arc::new(ReceiveQueue::new(
            config.queue.capacity,
            config.queue.overflow,
        ));

        let mut poller = Poller::new(
            transport.clone(),
            session.clone(),
            queue.clone(),
            config.endpoints.clone(),
            config.poll.poller_config(),
        );
        if config.media.mode != MediaMode::Disabled {
            let fetcher = MediaFetcher::new(
                transport,
                session,
                config.endpoints.clone(),
                config.media.timeout(),
            );
            poller = poller.with_media(config.media.mode, Arc::new(fetcher));
        }

        info!(
            capacity = config.queue.capacity,
            overflow = ?config.queue.overflow,
            "inbox started"
        );
        Ok(Self {
            queue,
            poller: poller.spawn(),
        })
    }

    /// Waits for the next message; `None` once shut down and drained.
    pub async fn recv(&self) -> Option<ReceivedMessage> {
        self.queue.recv().await
    }

    /// Waits up to `timeout` for the next message.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<ReceivedMessage> {
        self.queue.recv_timeout(timeout).await
    }

    pub fn try_recv(&self) -> Option<ReceivedMessage> {
        self.queue.try_recv()
    }

    /// Removes and returns every queued message.
    pub fn drain(&self) -> Vec<ReceivedMessage> {
        self.queue.drain()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Subscribes to payloads downloaded after their message was queued.
    pub fn media_updates(&self) -> broadcast::Receiver<MediaUpdate> {
        self.queue.subscribe_media()
    }

    /// Returns the poller's shared state.
    pub fn poller_state(&self) -> SharedPollerState {
        self.poller.state()
    }

    /// Returns the underlying queue.
    pub fn queue(&self) -> &Arc<ReceiveQueue> {
        &self.queue
    }

    /// Stops the poller and closes the queue.
    ///
    /// Messages still queued stay available through the queue handle.
    pub async fn shutdown(self) -> ClientResult<()> {
        let result = self.poller.stop().await;
        self.queue.close();
        info!(pending = self.queue.len(), "inbox shut down");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientErrorCode;
    use crate::poller::PollerStatus;
    use crate::transport::testing::ScriptedTransport;

    #[test]
    fn start_requires_runtime() {
        let transport = Arc::new(ScriptedTransport::new());
        let session = Arc::new(Session::new("1", "2"));

        let err = Inbox::start(transport, session, &ClientConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), ClientErrorCode::Configuration);
    }

    #[tokio::test]
    async fn start_requires_session_ids() {
        let transport = Arc::new(ScriptedTransport::new());
        let session = Arc::new(Session::new("1", ""));

        let err = Inbox::start(transport, session, &ClientConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), ClientErrorCode::Credentials);
    }

    #[tokio::test]
    async fn shutdown_stops_poller_and_closes_queue() {
        let transport = Arc::new(ScriptedTransport::new());
        let session = Arc::new(Session::new("1", "2"));
        let inbox = Inbox::start(transport.clone(), session, &ClientConfig::default()).unwrap();
        let state = inbox.poller_state();
        let queue = inbox.queue().clone();

        transport.wait_for("/poll2", 1).await;
        assert_eq!(state.read().await.status, PollerStatus::Running);

        inbox.shutdown().await.unwrap();
        assert_eq!(state.read().await.status, PollerStatus::Stopped);
        assert!(queue.is_closed());
        assert!(queue.recv().await.is_none());
    }
}
