//! Outgoing chat messages.
//!
//! [`Sender::send`] validates and encodes the message on the caller's task,
//! then hands the request to a spawned task and returns a [`SendHandle`].
//! Awaiting the handle yields the outcome; dropping it lets the send finish
//! in the background.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webqq_core::model::{ContentPart, EnvelopeKind, FontDescriptor, Message, MessageEnvelope};
use webqq_protocol::{
    GroupSignature, SendFields, check_send_response, encode_content_with_limit,
    parse_group_signature, send_body,
};

use crate::config::{EndpointSettings, SendSettings};
use crate::error::{ClientError, ClientResult};
use crate::session::Session;
use crate::transport::{HttpRequest, HttpTransport};

/// Completion of a send started by [`Sender::send`].
///
/// Resolves to `Ok(())` once the server accepted the message.
#[derive(Debug)]
pub struct SendHandle {
    msg_id: u64,
    task: JoinHandle<ClientResult<()>>,
}

impl SendHandle {
    /// Message id allocated for this send.
    pub fn msg_id(&self) -> u64 {
        self.msg_id
    }

    /// Returns true once the send has completed.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the send if its request has not completed yet.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Future for SendHandle {
    type Output = ClientResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ClientError::cancelled("send was aborted")),
            Err(e) => Err(ClientError::internal("send task panicked").with_source(e)),
        })
    }
}

struct Outgoing {
    endpoint: &'static str,
    dest_field: &'static str,
    dest: String,
    group_code: Option<String>,
    content: String,
    has_custom_face: bool,
    msg_id: u64,
}

/// Sends chat messages on a session.
#[derive(Clone)]
pub struct Sender {
    transport: Arc<dyn HttpTransport>,
    session: Arc<Session>,
    endpoints: EndpointSettings,
    settings: SendSettings,
}

impl Sender {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<Session>,
        endpoints: EndpointSettings,
        settings: SendSettings,
    ) -> Self {
        Self {
            transport,
            session,
            endpoints,
            settings,
        }
    }

    pub(crate) fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub(crate) fn endpoints(&self) -> &EndpointSettings {
        &self.endpoints
    }

    /// Starts sending `message`.
    ///
    /// Only buddy and group messages can be sent; other kinds, invalid
    /// envelopes and oversized content fail here without any request.
    /// Must be called within a tokio runtime.
    pub fn send(&self, message: &Message) -> ClientResult<SendHandle> {
        let Message::Chat(envelope) = message else {
            return Err(ClientError::unsupported_kind(format!(
                "cannot send {:?} messages",
                message.kind()
            )));
        };
        let outgoing = self.prepare(envelope)?;
        let msg_id = outgoing.msg_id;

        debug!(
            msg_id,
            endpoint = outgoing.endpoint,
            to = %outgoing.dest,
            "sending message"
        );

        let sender = self.clone();
        let task = tokio::spawn(async move { sender.deliver(outgoing).await });
        Ok(SendHandle { msg_id, task })
    }

    /// Sends `text` to a buddy or group with the configured font.
    pub fn send_text(&self, kind: EnvelopeKind, to: &str, text: &str) -> ClientResult<SendHandle> {
        let envelope = MessageEnvelope::new(kind, self.session.uin.as_str(), to, self.font())
            .with_part(ContentPart::text(text));
        self.send(&Message::Chat(envelope))
    }

    /// Font used by [`send_text`](Self::send_text).
    pub fn font(&self) -> FontDescriptor {
        FontDescriptor::new(self.settings.font_name.as_str(), self.settings.font_size)
    }

    fn prepare(&self, envelope: &MessageEnvelope) -> ClientResult<Outgoing> {
        if envelope.to_uin.is_empty() {
            return Err(ClientError::invalid_message("message has no recipient"));
        }
        if envelope.parts.is_empty() {
            return Err(ClientError::invalid_message("message has no content"));
        }
        if envelope.font.name.is_empty() {
            return Err(ClientError::invalid_message("message has no font"));
        }

        let (endpoint, dest_field) = match envelope.kind {
            EnvelopeKind::Buddy => ("send_buddy_msg2", "to"),
            EnvelopeKind::Group => ("send_qun_msg2", "group_uin"),
        };

        let encoded = encode_content_with_limit(envelope, self.settings.max_content_bytes)?;
        if encoded.has_custom_face && envelope.group_code.is_none() {
            return Err(ClientError::invalid_message(
                "custom faces require a group code",
            ));
        }

        Ok(Outgoing {
            endpoint,
            dest_field,
            dest: envelope.to_uin.clone(),
            group_code: envelope.group_code.clone(),
            content: encoded.content,
            has_custom_face: encoded.has_custom_face,
            msg_id: self.session.next_msg_id(),
        })
    }

    async fn deliver(&self, outgoing: Outgoing) -> ClientResult<()> {
        let signature = if outgoing.has_custom_face {
            Some(self.group_signature().await?)
        } else {
            None
        };
        let custom_face = match (&outgoing.group_code, &signature) {
            (Some(code), Some(signature)) => Some((code.as_str(), signature)),
            _ => None,
        };

        let body = send_body(
            self.session.channel_ids(),
            &SendFields {
                dest_field: outgoing.dest_field,
                dest: &outgoing.dest,
                custom_face,
                content: &outgoing.content,
                msg_id: outgoing.msg_id,
            },
        )?;
        if body.len() > self.settings.max_body_bytes {
            return Err(ClientError::invalid_message(format!(
                "request body too large: {} bytes (max: {})",
                body.len(),
                self.settings.max_body_bytes
            )));
        }

        let request = HttpRequest::post_form(
            format!("{}/{}", self.endpoints.channel, outgoing.endpoint),
            body,
        )
        .with_header("Referer", self.endpoints.channel_referer.as_str())
        .with_header("Content-Transfer-Encoding", "binary")
        .with_cookies(&self.session.cookies);

        let result = self.complete(request).await;
        match &result {
            Ok(()) => info!(msg_id = outgoing.msg_id, to = %outgoing.dest, "message sent"),
            Err(e) => warn!(msg_id = outgoing.msg_id, error = %e, "message send failed"),
        }
        result
    }

    async fn complete(&self, request: HttpRequest) -> ClientResult<()> {
        let response = self.transport.execute(request).await?;
        let response = response.require_status(&[200], "send")?;
        check_send_response(&response.body)?;
        Ok(())
    }

    /// Returns the group signature, fetching it once per session.
    pub async fn group_signature(&self) -> ClientResult<GroupSignature> {
        self.session
            .group_signature(|| self.fetch_group_signature())
            .await
    }

    async fn fetch_group_signature(&self) -> ClientResult<GroupSignature> {
        let url = format!(
            "{}/get_gface_sig2?clientid={}&psessionid={}&t={}",
            self.endpoints.secure_channel,
            urlencoding::encode(&self.session.client_id),
            urlencoding::encode(&self.session.session_id),
            Utc::now().timestamp_millis()
        );
        let request = HttpRequest::get(url)
            .with_header("Referer", self.endpoints.signature_referer.as_str())
            .with_cookies(&self.session.cookies);

        let response = self.transport.execute(request).await?;
        let response = response.require_status(&[200], "group signature")?;
        Ok(parse_group_signature(&response.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientErrorCode;
    use crate::transport::testing::ScriptedTransport;
    use insta::assert_snapshot;
    use webqq_core::model::{CustomFace, StatusChangeEvent};

    const SENT: &str = r#"{"retcode":0,"result":"ok"}"#;
    const SIGNATURE: &str =
        r#"{"retcode":0,"result":{"reply":0,"gface_key":"YkC3WaD3","gface_sig":"8c0e"}}"#;

    fn sender(transport: Arc<ScriptedTransport>) -> Sender {
        let session = Session::new("30179476", "8368abc")
            .with_uin("222")
            .with_cookies("ptwebqq=x")
            .with_msg_id(4999);
        Sender::new(
            transport,
            Arc::new(session),
            EndpointSettings::default(),
            SendSettings::default(),
        )
    }

    fn buddy(text: &str) -> Message {
        Message::Chat(
            MessageEnvelope::buddy("222", "111", FontDescriptor::default())
                .with_part(ContentPart::text(text)),
        )
    }

    fn decoded_r(body: &str) -> serde_json::Value {
        let r = body
            .strip_prefix("r=")
            .and_then(|rest| rest.split('&').next())
            .unwrap();
        serde_json::from_str(&urlencoding::decode(r).unwrap()).unwrap()
    }

    fn form_body(request: &HttpRequest) -> String {
        match &request.body {
            crate::transport::RequestBody::Form(body) => body.clone(),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_chat_message_is_rejected_without_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let sender = sender(transport.clone());

        let status = Message::StatusChange(StatusChangeEvent::new("333", "offline", 1));
        let err = sender.send(&status).unwrap_err();
        assert_eq!(err.code(), ClientErrorCode::UnsupportedKind);

        let unknown = Message::Unknown {
            poll_type: "kick_message".into(),
        };
        assert_eq!(
            sender.send(&unknown).unwrap_err().code(),
            ClientErrorCode::UnsupportedKind
        );
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn invalid_envelopes_are_rejected() {
        let transport = Arc::new(ScriptedTransport::new());
        let sender = sender(transport.clone());

        let empty = Message::Chat(MessageEnvelope::buddy("222", "111", FontDescriptor::default()));
        assert_eq!(
            sender.send(&empty).unwrap_err().code(),
            ClientErrorCode::InvalidMessage
        );

        let face = Message::Chat(
            MessageEnvelope::buddy("222", "111", FontDescriptor::default())
                .with_part(ContentPart::CustomFace(CustomFace::new("a.jpg"))),
        );
        assert_eq!(
            sender.send(&face).unwrap_err().code(),
            ClientErrorCode::InvalidMessage
        );
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn oversized_content_fails_loudly() {
        let transport = Arc::new(ScriptedTransport::new());
        let mut sender = sender(transport.clone());
        sender.settings.max_content_bytes = 16;

        let err = sender.send(&buddy(&"x".repeat(64))).unwrap_err();
        assert_eq!(err.code(), ClientErrorCode::InvalidMessage);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn buddy_message_request() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("send_buddy_msg2", 200, SENT);
        let sender = sender(transport.clone());

        let handle = sender.send(&buddy("hi\nthere")).unwrap();
        assert_eq!(handle.msg_id(), 5000);
        handle.await.unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.url, "http://d.web2.qq.com/channel/send_buddy_msg2");
        assert_eq!(
            request.header("Referer"),
            Some("http://d.web2.qq.com/proxy.html?v=20101025002")
        );
        assert_eq!(request.header("Cookie"), Some("ptwebqq=x"));

        let body = form_body(request);
        assert!(body.ends_with("&clientid=30179476&psessionid=8368abc"));
        assert_snapshot!(decoded_r(&body), @r#"{"clientid":"30179476","content":"[\"hi\\\\nthere\",[\"font\",{\"color\":\"000000\",\"name\":\"Arial\",\"size\":\"12\",\"style\":[0,0,0]}]]","face":0,"msg_id":5000,"psessionid":"8368abc","to":111}"#);
    }

    #[tokio::test]
    async fn group_message_with_custom_face_fetches_signature_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("get_gface_sig2", 200, SIGNATURE);
        transport.respond("send_qun_msg2", 200, SENT);
        transport.respond("send_qun_msg2", 200, SENT);
        let sender = sender(transport.clone());

        let message = Message::Chat(
            MessageEnvelope::group("222", "2000", "4000", FontDescriptor::default())
                .with_part(ContentPart::CustomFace(CustomFace::new("a.jpg"))),
        );
        sender.send(&message).unwrap().await.unwrap();
        sender.send(&message).unwrap().await.unwrap();

        assert_eq!(transport.count("get_gface_sig2"), 1);
        assert_eq!(transport.count("send_qun_msg2"), 2);

        let requests = transport.requests();
        let signature = &requests[0];
        assert!(
            signature
                .url
                .starts_with("https://d.web2.qq.com/channel/get_gface_sig2?clientid=30179476&psessionid=8368abc&t=")
        );
        assert_eq!(
            signature.header("Referer"),
            Some("https://d.web2.qq.com/cfproxy.html?v=20110331002&callback=1")
        );

        let r = decoded_r(&form_body(&requests[1]));
        assert_eq!(r["group_uin"], 2000);
        assert_eq!(r["group_code"], 4000);
        assert_eq!(r["key"], "YkC3WaD3");
        assert_eq!(r["sig"], "8c0e");
    }

    #[tokio::test]
    async fn failed_signature_fails_the_send() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("get_gface_sig2", 500, "");
        let sender = sender(transport.clone());

        let message = Message::Chat(
            MessageEnvelope::group("222", "2000", "4000", FontDescriptor::default())
                .with_part(ContentPart::CustomFace(CustomFace::new("a.jpg"))),
        );
        let err = sender.send(&message).unwrap().await.unwrap_err();
        assert_eq!(err.code(), ClientErrorCode::HttpStatus);
        assert_eq!(transport.count("send_qun_msg2"), 0);
        assert!(sender.session.cached_group_signature().await.is_none());
    }

    #[tokio::test]
    async fn completion_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("send_buddy_msg2", 502, "");
        transport.respond("send_buddy_msg2", 200, r#"{"retcode":0,"result":null}"#);
        transport.respond("send_buddy_msg2", 200, r#"{"retcode":108}"#);
        transport.respond("send_buddy_msg2", 200, "<html>");
        transport.fail("send_buddy_msg2", ClientErrorCode::Network, "reset");
        let sender = sender(transport);

        let mut codes = Vec::new();
        for _ in 0..5 {
            codes.push(sender.send(&buddy("x")).unwrap().await.unwrap_err().code());
        }
        assert_eq!(
            codes,
            vec![
                ClientErrorCode::HttpStatus,
                ClientErrorCode::InvalidResponse,
                ClientErrorCode::InvalidResponse,
                ClientErrorCode::InvalidResponse,
                ClientErrorCode::Network,
            ]
        );
    }

    #[tokio::test]
    async fn abort_resolves_to_cancelled() {
        // Nothing scripted: the request never completes.
        let transport = Arc::new(ScriptedTransport::new());
        let sender = sender(transport.clone());

        let handle = sender.send(&buddy("x")).unwrap();
        transport.wait_for("send_buddy_msg2", 1).await;
        handle.abort();
        let err = handle.await.unwrap_err();
        assert_eq!(err.code(), ClientErrorCode::Cancelled);
    }

    #[tokio::test]
    async fn send_text_uses_configured_font() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("send_qun_msg2", 200, SENT);
        let sender = sender(transport.clone());

        sender
            .send_text(EnvelopeKind::Group, "2000", "hello")
            .unwrap()
            .await
            .unwrap();

        let r = decoded_r(&form_body(&transport.requests()[0]));
        assert_eq!(r["group_uin"], 2000);
        assert_snapshot!(r["content"].as_str().unwrap(), @r#"["hello",["font",{"color":"000000","name":"宋体","size":"13","style":[0,0,0]}]]"#);
    }
}
