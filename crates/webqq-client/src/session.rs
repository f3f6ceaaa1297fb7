//! Session context shared by the poller and send tasks.
//!
//! A [`Session`] is produced by the login flow, which lives outside this
//! crate; the client only reads its identifiers and owns the two pieces of
//! mutable state that belong to messaging: the outgoing message id counter
//! and the cached group signature.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use webqq_protocol::{ChannelIds, GroupSignature};

use crate::error::{ClientError, ClientResult};

/// Identifiers and credentials of a logged-in WebQQ session.
pub struct Session {
    /// `clientid` chosen at login.
    pub client_id: String,
    /// `psessionid` returned by login.
    pub session_id: String,
    /// Raw `Cookie` header value.
    pub cookies: String,
    /// Web session token used by picture endpoints.
    pub vfwebqq: String,
    /// Uin of the logged-in account.
    pub uin: String,
    /// `skey` cookie value, required by offline picture uploads.
    pub skey: String,
    msg_id: AtomicU64,
    group_signature: Mutex<Option<GroupSignature>>,
}

impl Session {
    /// Creates a session with the channel identifiers.
    pub fn new(client_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            session_id: session_id.into(),
            cookies: String::new(),
            vfwebqq: String::new(),
            uin: String::new(),
            skey: String::new(),
            msg_id: AtomicU64::new(initial_msg_id()),
            group_signature: Mutex::new(None),
        }
    }

    /// Builder: set the cookie header.
    pub fn with_cookies(mut self, cookies: impl Into<String>) -> Self {
        self.cookies = cookies.into();
        self
    }

    /// Builder: set the web session token.
    pub fn with_vfwebqq(mut self, vfwebqq: impl Into<String>) -> Self {
        self.vfwebqq = vfwebqq.into();
        self
    }

    /// Builder: set the account uin.
    pub fn with_uin(mut self, uin: impl Into<String>) -> Self {
        self.uin = uin.into();
        self
    }

    /// Builder: set the `skey`.
    pub fn with_skey(mut self, skey: impl Into<String>) -> Self {
        self.skey = skey.into();
        self
    }

    /// Builder: set the last used message id; the next send uses `id + 1`.
    pub fn with_msg_id(self, id: u64) -> Self {
        self.msg_id.store(id, Ordering::Relaxed);
        self
    }

    /// Builder: seed the group signature, e.g. when restoring a session.
    pub fn with_group_signature(mut self, signature: GroupSignature) -> Self {
        self.group_signature = Mutex::new(Some(signature));
        self
    }

    /// Checks that the channel identifiers are present.
    pub fn validate(&self) -> ClientResult<()> {
        if self.client_id.is_empty() {
            return Err(ClientError::credentials("client id is empty"));
        }
        if self.session_id.is_empty() {
            return Err(ClientError::credentials("session id is empty"));
        }
        Ok(())
    }

    /// Returns the identifiers sent with every channel request.
    pub fn channel_ids(&self) -> ChannelIds<'_> {
        ChannelIds {
            client_id: &self.client_id,
            session_id: &self.session_id,
        }
    }

    /// Allocates the next outgoing message id.
    pub fn next_msg_id(&self) -> u64 {
        self.msg_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the cached group signature, if any.
    pub async fn cached_group_signature(&self) -> Option<GroupSignature> {
        self.group_signature.lock().await.clone()
    }

    /// Returns the group signature, calling `fetch` if none is cached.
    ///
    /// The lock is held across `fetch`, so concurrent callers wait for the
    /// first fetch instead of issuing their own. A failed fetch caches
    /// nothing.
    pub async fn group_signature<F, Fut>(&self, fetch: F) -> ClientResult<GroupSignature>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<GroupSignature>>,
    {
        let mut cached = self.group_signature.lock().await;
        if let Some(signature) = cached.as_ref() {
            return Ok(signature.clone());
        }

        debug!("fetching group signature");
        let signature = fetch().await?;
        *cached = Some(signature.clone());
        Ok(signature)
    }

    /// Drops the cached group signature.
    pub async fn clear_group_signature(&self) {
        self.group_signature.lock().await.take();
    }
}

// Message ids only need to differ from those of earlier sessions of the
// same account; the server rejects reused ids.
fn initial_msg_id() -> u64 {
    let seconds = Utc::now().timestamp().unsigned_abs();
    (seconds % 10_000) * 10_000
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("uin", &self.uin)
            .field("session_id", &"<redacted>")
            .field("cookies", &"<redacted>")
            .field("vfwebqq", &"<redacted>")
            .field("skey", &"<redacted>")
            .field("msg_id", &self.msg_id.load(Ordering::Relaxed))
            .finish()
    }
}
