//! Background long-poll loop.
//!
//! The poller keeps one `poll2` request outstanding at all times. The server
//! holds the request until it has events to deliver (or about a minute
//! passes), so a successful response is followed by the next request right
//! away. Transport failures back off exponentially.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use webqq_core::model::Message;
use webqq_protocol::{PollBatch, ProtocolError, parse_poll_response, poll_body};

use crate::config::EndpointSettings;
use crate::error::{ClientError, ClientResult};
use crate::media::{MediaFetcher, MediaMode};
use crate::queue::ReceiveQueue;
use crate::session::Session;
use crate::transport::{HttpRequest, HttpTransport};

/// `retcode` of a poll that ended without events.
const RETCODE_IDLE: &str = "102";

/// Poller configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Timeout of one poll request.
    pub request_timeout: Duration,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Maximum delay between retries.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl PollerConfig {
    /// Builder: set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the backoff delay based on consecutive failures.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_backoff.as_secs_f64();
        let exponent = i32::try_from(consecutive_failures - 1).unwrap_or(i32::MAX);
        let delay = base * self.backoff_multiplier.powi(exponent);
        let max = self.max_backoff.as_secs_f64();

        // Out of range for `Duration` only when the cap itself is.
        Duration::try_from_secs_f64(delay.min(max)).unwrap_or(self.max_backoff)
    }
}

/// Lifecycle of a poller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollerStatus {
    #[default]
    Idle,
    Running,
    Stopped,
}

/// Poller state, shared with the handle.
#[derive(Debug, Default)]
pub struct PollerState {
    pub status: PollerStatus,
    /// Number of consecutive failed polls.
    pub consecutive_failures: u32,
    /// Last successful poll time.
    pub last_success: Option<DateTime<Utc>>,
    /// Last poll attempt time.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
    /// Responses that were parsed successfully.
    pub batches: u64,
    /// Messages pushed to the queue.
    pub messages: u64,
    /// Events dropped because they failed to decode.
    pub discarded: u64,
}

impl PollerState {
    /// Creates a new poller state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed poll request.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        self.last_attempt = self.last_success;
        self.last_error = None;
    }

    /// Records a failed poll and returns the new failure count.
    pub fn record_failure(&mut self, error: impl Into<String>) -> u32 {
        self.consecutive_failures += 1;
        self.last_attempt = Some(Utc::now());
        self.last_error = Some(error.into());
        self.consecutive_failures
    }

    /// Records a parsed batch.
    pub fn record_batch(&mut self, batch: &PollBatch) {
        self.batches += 1;
        self.messages += batch.messages.len() as u64;
        self.discarded += batch.discarded as u64;
    }
}

/// Shared poller state.
pub type SharedPollerState = Arc<RwLock<PollerState>>;

/// Creates a new shared poller state.
pub fn new_poller_state() -> SharedPollerState {
    Arc::new(RwLock::new(PollerState::new()))
}

enum Outcome {
    Continue,
    Stop,
}

/// Long-poll loop feeding a [`ReceiveQueue`].
pub struct Poller {
    transport: Arc<dyn HttpTransport>,
    session: Arc<Session>,
    queue: Arc<ReceiveQueue>,
    endpoints: EndpointSettings,
    config: PollerConfig,
    media_mode: MediaMode,
    media: Option<Arc<MediaFetcher>>,
    state: SharedPollerState,
}

impl Poller {
    /// Creates a poller that does not download media.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<Session>,
        queue: Arc<ReceiveQueue>,
        endpoints: EndpointSettings,
        config: PollerConfig,
    ) -> Self {
        Self {
            transport,
            session,
            queue,
            endpoints,
            config,
            media_mode: MediaMode::Disabled,
            media: None,
            state: new_poller_state(),
        }
    }

    /// Builder: download media with `fetcher` in the given mode.
    pub fn with_media(mut self, mode: MediaMode, fetcher: Arc<MediaFetcher>) -> Self {
        self.media_mode = mode;
        self.media = Some(fetcher);
        self
    }

    /// Returns the shared state.
    pub fn state(&self) -> SharedPollerState {
        self.state.clone()
    }

    /// Starts the loop on a new task.
    pub fn spawn(self) -> PollerHandle {
        let (cancel, cancelled) = watch::channel(false);
        let state = self.state.clone();
        let task = tokio::spawn(self.run(cancelled));
        PollerHandle {
            cancel,
            task,
            state,
        }
    }

    /// Runs the loop until `cancel` turns true, its sender is dropped, or
    /// the queue is closed.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) {
        self.state.write().await.status = PollerStatus::Running;
        info!(
            channel = %self.endpoints.channel,
            media = ?self.media_mode,
            "poller started"
        );

        let mut media_tasks = JoinSet::new();

        loop {
            let cancelled = *cancel.borrow();
            if cancelled {
                break;
            }

            let result = tokio::select! {
                biased;
                _ = cancel.changed() => break,
                result = self.poll_once() => result,
            };

            let outcome = match result {
                Ok(body) => {
                    self.state.write().await.record_success();
                    match parse_poll_response(&body) {
                        Ok(batch) => {
                            self.state.write().await.record_batch(&batch);
                            tokio::select! {
                                biased;
                                _ = cancel.changed() => Outcome::Stop,
                                outcome = self.deliver(batch, &mut media_tasks) => outcome,
                            }
                        }
                        Err(ProtocolError::BadRetcode(Some(code))) if code == RETCODE_IDLE => {
                            debug!("poll ended without events");
                            Outcome::Continue
                        }
                        Err(e) => {
                            warn!(error = %e, "discarding poll response");
                            // A session the server no longer accepts answers
                            // immediately; back off instead of spinning.
                            self.backoff(&mut cancel, &e.to_string()).await
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "poll request failed");
                    self.backoff(&mut cancel, &e.to_string()).await
                }
            };

            while media_tasks.try_join_next().is_some() {}

            if let Outcome::Stop = outcome {
                break;
            }
        }

        media_tasks.abort_all();
        self.state.write().await.status = PollerStatus::Stopped;
        info!("poller stopped");
    }

    async fn poll_once(&self) -> ClientResult<Vec<u8>> {
        let body = poll_body(self.session.channel_ids())?;
        let request = HttpRequest::post_form(format!("{}/poll2", self.endpoints.channel), body)
            .with_header("Referer", self.endpoints.channel_referer.as_str())
            .with_header("Content-Transfer-Encoding", "binary")
            .with_cookies(&self.session.cookies)
            .with_timeout(self.config.request_timeout);

        let response = self.transport.execute(request).await?;
        Ok(response.require_status(&[200], "poll")?.body)
    }

    // Records a failure and sleeps, returning Stop if cancelled meanwhile.
    async fn backoff(&self, cancel: &mut watch::Receiver<bool>, error: &str) -> Outcome {
        let failures = self.state.write().await.record_failure(error);
        let delay = self.config.backoff_delay(failures);
        debug!(
            failures,
            backoff_ms = delay.as_millis() as u64,
            "backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.changed() => Outcome::Stop,
            _ = tokio::time::sleep(delay) => Outcome::Continue,
        }
    }

    async fn deliver(&self, batch: PollBatch, media_tasks: &mut JoinSet<()>) -> Outcome {
        if batch.discarded > 0 || batch.skipped_unknown > 0 {
            debug!(
                delivered = batch.messages.len(),
                discarded = batch.discarded,
                skipped = batch.skipped_unknown,
                "poll batch"
            );
        }

        for message in batch.messages {
            if let Err(e) = self.deliver_one(message, media_tasks).await {
                debug!(error = %e, "queue closed, stopping");
                return Outcome::Stop;
            }
        }
        Outcome::Continue
    }

    async fn deliver_one(
        &self,
        mut message: Message,
        media_tasks: &mut JoinSet<()>,
    ) -> ClientResult<()> {
        let fetcher = match (&self.media, &mut message) {
            (Some(fetcher), Message::Chat(envelope)) if envelope.has_media() => {
                match self.media_mode {
                    MediaMode::Inline => {
                        fetcher.fetch_inline(envelope).await;
                        None
                    }
                    MediaMode::Background => {
                        MediaFetcher::mark_pending(envelope);
                        Some((Arc::clone(fetcher), envelope.clone()))
                    }
                    MediaMode::Disabled => None,
                }
            }
            _ => None,
        };

        let seq = self.queue.push(message).await?;

        if let (Some(seq), Some((fetcher, envelope))) = (seq, fetcher) {
            fetcher.spawn_background(media_tasks, seq, envelope, Arc::clone(&self.queue));
        }
        Ok(())
    }
}

/// Handle to a running poller.
pub struct PollerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
    state: SharedPollerState,
}

impl PollerHandle {
    /// Returns the shared state.
    pub fn state(&self) -> SharedPollerState {
        self.state.clone()
    }

    /// Returns true once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop and waits for it to exit.
    ///
    /// An outstanding long poll is abandoned. When this returns, the loop no
    /// longer touches the queue.
    pub async fn stop(self) -> ClientResult<()> {
        self.cancel.send_replace(true);
        self.task
            .await
            .map_err(|e| ClientError::internal("poller task failed").with_source(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientErrorCode;
    use crate::transport::testing::ScriptedTransport;
    use webqq_core::model::{ContentPart, MediaPayload, MessageKind};

    const BUDDY: &str = r#"{"retcode":0,"result":[{"poll_type":"message","value":{"msg_id":1,"from_uin":111,"to_uin":222,"msg_id2":2,"msg_type":9,"reply_ip":1,"time":1300000000,"content":[["font",{"size":12,"color":"000000","style":[0,0,0],"name":"Arial"}],"hi"]}}]}"#;

    fn poller(transport: Arc<ScriptedTransport>, queue: Arc<ReceiveQueue>) -> Poller {
        let session = Session::new("30179476", "8368abc").with_cookies("ptwebqq=x");
        let config = PollerConfig::default().with_backoff(
            Duration::from_millis(5),
            Duration::from_millis(20),
            2.0,
        );
        Poller::new(
            transport,
            Arc::new(session),
            queue,
            EndpointSettings::default(),
            config,
        )
    }

    #[test]
    fn config_backoff_delay() {
        let config = PollerConfig::default().with_backoff(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2.0,
        );

        assert_eq!(config.backoff_delay(0), Duration::ZERO);
        assert_eq!(config.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(4));

        // Capped at max
        assert_eq!(config.backoff_delay(10), Duration::from_secs(60));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn backoff_delay_with_unbounded_cap() {
        let config = PollerConfig::default().with_backoff(
            Duration::from_secs(1),
            Duration::from_secs(u64::MAX),
            2.0,
        );

        assert_eq!(config.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn state_record_success_resets_failures() {
        let mut state = PollerState::new();
        assert_eq!(state.record_failure("boom"), 1);
        assert_eq!(state.record_failure("boom"), 2);
        assert_eq!(state.last_error.as_deref(), Some("boom"));

        state.record_success();
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_success.is_some());
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn poll_request_shape() {
        let transport = Arc::new(ScriptedTransport::new());
        let queue = Arc::new(ReceiveQueue::default());
        let handle = poller(transport.clone(), queue).spawn();

        transport.wait_for("/poll2", 1).await;
        handle.stop().await.unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.url, "http://d.web2.qq.com/channel/poll2");
        assert_eq!(
            request.header("Referer"),
            Some("http://d.web2.qq.com/proxy.html?v=20101025002")
        );
        assert_eq!(request.header("Content-Transfer-Encoding"), Some("binary"));
        assert_eq!(
            request.header("Content-Type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(request.header("Cookie"), Some("ptwebqq=x"));
        assert_eq!(request.timeout, Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn delivers_messages_across_batches_in_order() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("/poll2", 200, BUDDY);
        transport.respond(
            "/poll2",
            200,
            r#"{"retcode":0,"result":[
                {"poll_type":"buddies_status_change","value":{"uin":333,"status":"offline","client_type":1}},
                {"poll_type":"message","value":{"from_uin":444,"to_uin":222,"content":["x",["font",{"name":"Arial"}]]}}
            ]}"#,
        );
        let queue = Arc::new(ReceiveQueue::default());
        let handle = poller(transport.clone(), queue.clone()).spawn();
        let state = handle.state();

        transport.wait_for("/poll2", 3).await;
        handle.stop().await.unwrap();

        let received = queue.drain();
        let seqs: Vec<u64> = received.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        let first = received[0].message.as_chat().unwrap();
        assert_eq!(first.from_uin, "111");
        assert_eq!(first.parts, vec![ContentPart::text("hi")]);
        assert_eq!(received[1].kind(), MessageKind::StatusChange);
        assert_eq!(received[2].message.as_chat().unwrap().from_uin, "444");

        let state = state.read().await;
        assert_eq!(state.status, PollerStatus::Stopped);
        assert_eq!(state.batches, 2);
        assert_eq!(state.messages, 3);
    }

    #[tokio::test]
    async fn bad_retcode_queues_nothing() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("/poll2", 200, r#"{"retcode":121,"t":"0"}"#);
        transport.respond("/poll2", 200, r#"{"retcode":102,"errmsg":""}"#);
        let queue = Arc::new(ReceiveQueue::default());
        let handle = poller(transport.clone(), queue.clone()).spawn();
        let state = handle.state();

        transport.wait_for("/poll2", 3).await;
        handle.stop().await.unwrap();

        assert!(queue.is_empty());
        let state = state.read().await;
        assert_eq!(state.batches, 0);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn failures_back_off_and_recover() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail("/poll2", ClientErrorCode::Network, "connection refused");
        transport.respond("/poll2", 503, "");
        transport.respond("/poll2", 200, BUDDY);
        let queue = Arc::new(ReceiveQueue::default());
        let handle = poller(transport.clone(), queue.clone()).spawn();
        let state = handle.state();

        let received = queue.recv_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(received.message.as_chat().unwrap().from_uin, "111");

        transport.wait_for("/poll2", 4).await;
        {
            let state = state.read().await;
            assert_eq!(state.consecutive_failures, 0);
            assert!(state.last_success.is_some());
        }
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_interrupts_backoff() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail("/poll2", ClientErrorCode::Network, "down");
        let queue = Arc::new(ReceiveQueue::default());
        let mut poller = poller(transport.clone(), queue);
        poller.config = poller
            .config
            .clone()
            .with_backoff(Duration::from_secs(3600), Duration::from_secs(3600), 2.0);
        let handle = poller.spawn();
        let state = handle.state();

        transport.wait_for("/poll2", 1).await;
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.read().await.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn stops_when_queue_closes() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("/poll2", 200, BUDDY);
        let queue = Arc::new(ReceiveQueue::default());
        queue.close();
        let handle = poller(transport, queue).spawn();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(handle.state().read().await.status, PollerStatus::Stopped);
    }

    #[tokio::test]
    async fn inline_media_is_fetched_before_queueing() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            "/poll2",
            200,
            r#"{"retcode":0,"result":[{"poll_type":"message","value":{"from_uin":111,"to_uin":222,"content":[["offpic",{"success":1,"file_path":"/abc"}],["font",{"name":"Arial"}]]}}]}"#,
        );
        transport.respond("get_offpic2", 200, "jpeg");
        let queue = Arc::new(ReceiveQueue::default());
        let poller = poller(transport.clone(), queue.clone());
        let fetcher = Arc::new(MediaFetcher::new(
            transport.clone(),
            poller.session.clone(),
            EndpointSettings::default(),
            Duration::from_secs(1),
        ));
        let handle = poller.with_media(MediaMode::Inline, fetcher).spawn();

        let received = queue.recv_timeout(Duration::from_secs(5)).await.unwrap();
        handle.stop().await.unwrap();

        assert_eq!(
            received.message.as_chat().unwrap().parts[0].payload(),
            Some(&MediaPayload::Fetched(b"jpeg".to_vec()))
        );
    }
}
