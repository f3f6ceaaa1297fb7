//! One-stop client for a logged-in session.

use std::sync::Arc;

use tracing::debug;
use webqq_core::model::{ContentPart, EnvelopeKind, Message};
use webqq_core::tracing::{LogSettings, init_tracing};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::inbox::Inbox;
use crate::sender::{SendHandle, Sender};
use crate::session::Session;
use crate::transport::HttpTransport;
use crate::upload::Uploader;

/// Receives and sends messages on one session.
///
/// Owns the [`Inbox`] (queue and poller) and a [`Sender`]/[`Uploader`] pair
/// sharing the same transport and session.
pub struct MessageClient {
    session: Arc<Session>,
    inbox: Inbox,
    sender: Sender,
    uploader: Uploader,
}

impl MessageClient {
    /// Creates a client using `reqwest` and starts polling.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime, with an incomplete session, or if the
    /// HTTP client cannot be built.
    #[cfg(feature = "reqwest")]
    pub fn new(session: Session, config: ClientConfig) -> ClientResult<Self> {
        let transport = crate::transport::ReqwestTransport::new(config.poll.request_timeout())?;
        Self::with_transport(Arc::new(transport), session, config)
    }

    /// Creates a client on a custom transport and starts polling.
    ///
    /// With `log.install` set, the global log subscriber is installed first
    /// unless the program already installed one.
    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        session: Session,
        config: ClientConfig,
    ) -> ClientResult<Self> {
        config.validate()?;
        if config.log.install {
            install_log_output(&config.log)?;
        }
        let session = Arc::new(session);
        let inbox = Inbox::start(transport.clone(), session.clone(), &config)?;
        let sender = Sender::new(
            transport,
            session.clone(),
            config.endpoints.clone(),
            config.send.clone(),
        );
        let uploader = Uploader::new(sender.clone(), config.upload.clone());

        Ok(Self {
            session,
            inbox,
            sender,
            uploader,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Incoming messages.
    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// See [`Sender::send`].
    pub fn send(&self, message: &Message) -> ClientResult<SendHandle> {
        self.sender.send(message)
    }

    /// See [`Sender::send_text`].
    pub fn send_text(&self, kind: EnvelopeKind, to: &str, text: &str) -> ClientResult<SendHandle> {
        self.sender.send_text(kind, to, text)
    }

    /// See [`Uploader::upload_offline_picture`].
    pub async fn upload_offline_picture(
        &self,
        to: &str,
        filename: &str,
        data: Vec<u8>,
    ) -> ClientResult<ContentPart> {
        self.uploader.upload_offline_picture(to, filename, data).await
    }

    /// See [`Uploader::upload_custom_face`].
    pub async fn upload_custom_face(&self, filename: &str, data: Vec<u8>) -> ClientResult<ContentPart> {
        self.uploader.upload_custom_face(filename, data).await
    }

    /// Stops polling and closes the inbox. Sends already started keep
    /// running to completion.
    pub async fn shutdown(self) -> ClientResult<()> {
        self.inbox.shutdown().await
    }
}

fn install_log_output(settings: &LogSettings) -> ClientResult<()> {
    match init_tracing(settings) {
        Ok(()) => {
            debug!(level = %settings.level, format = ?settings.format, "installed log output");
            Ok(())
        }
        Err(e) if e.is_already_installed() => {
            debug!("log subscriber already installed, keeping it");
            Ok(())
        }
        Err(e) => Err(ClientError::configuration("failed to install log output").with_source(e)),
    }
}
