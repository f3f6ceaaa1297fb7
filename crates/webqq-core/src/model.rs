//! Message content model.
//!
//! This module provides the typed in-memory representation of everything the
//! long-poll channel delivers and everything the client sends back:
//! - [`ContentPart`]: one atomic unit of a message body
//! - [`MessageEnvelope`]: a buddy or group chat message with its font and parts
//! - [`StatusChangeEvent`]: a buddy going online/offline/away
//! - [`Message`]: the sum type over all of the above
//! - [`ReceivedMessage`]: a message plus its arrival order

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smallest font size the client renders; smaller sizes are raised to this.
pub const MIN_FONT_SIZE: i32 = 10;

/// State of the lazily fetched binary payload of an image part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum MediaPayload {
    /// No fetch was ever attempted (fetching disabled, or an outgoing part).
    #[default]
    NotRequested,
    /// A fetch has been scheduled but has not completed yet.
    Pending,
    /// The payload was fetched successfully.
    Fetched(Vec<u8>),
    /// The fetch failed; the reason is kept for display and diagnostics.
    Failed(String),
}

impl MediaPayload {
    /// Returns the fetched bytes, if any.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Fetched(data) => Some(data),
            _ => None,
        }
    }

    /// Returns true once the fetch has either succeeded or failed.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Fetched(_) | Self::Failed(_))
    }

    /// Returns true while a fetch is outstanding.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// An offline picture attachment (`offpic` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflinePicture {
    /// Server-side path identifying the picture.
    pub file_path: String,
    /// Name the server stored the upload under (outgoing pictures only).
    pub stored_filename: Option<String>,
    /// Picture bytes.
    pub payload: MediaPayload,
    /// Payload size in bytes.
    pub size: u64,
    /// Whether the server reported the upload as successful.
    pub success: bool,
}

impl OfflinePicture {
    /// Creates a picture reference with no payload.
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            stored_filename: None,
            payload: MediaPayload::NotRequested,
            size: 0,
            success: false,
        }
    }

    /// Builder: set the success flag.
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Builder: set the stored filename and size reported by an upload.
    pub fn with_upload(mut self, stored_filename: impl Into<String>, size: u64) -> Self {
        self.stored_filename = Some(stored_filename.into());
        self.size = size;
        self.success = true;
        self
    }
}

/// A user-uploaded image emoticon (`cface` on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFace {
    /// File name of the face, e.g. `0C3AED06704CA9381EDCC20B7F552802.jPg`.
    pub name: String,
    /// Server file id (object form only).
    pub file_id: Option<String>,
    /// Access key (object form only).
    pub key: Option<String>,
    /// Storage server address (object form only).
    pub server_ip: Option<String>,
    /// Storage server port (object form only).
    pub server_port: Option<String>,
    /// Face image bytes.
    pub payload: MediaPayload,
    /// Payload size in bytes.
    pub size: u64,
}

impl CustomFace {
    /// Creates a face known only by its file name (legacy form and uploads).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_id: None,
            key: None,
            server_ip: None,
            server_port: None,
            payload: MediaPayload::NotRequested,
            size: 0,
        }
    }

    /// Builder: set the file id and key.
    pub fn with_file(mut self, file_id: Option<String>, key: Option<String>) -> Self {
        self.file_id = file_id;
        self.key = key;
        self
    }

    /// Builder: set the storage server address from an `ip:port` string.
    ///
    /// The value is split on the first colon; without a colon the whole value
    /// is taken as the address and the port stays unset.
    pub fn with_server(mut self, server: &str) -> Self {
        match server.split_once(':') {
            Some((ip, port)) => {
                self.server_ip = Some(ip.to_string());
                self.server_port = Some(port.to_string());
            }
            None => {
                self.server_ip = Some(server.to_string());
                self.server_port = None;
            }
        }
        self
    }
}

/// One atomic unit of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// A run of text.
    Text { text: String },
    /// A built-in emoticon.
    Face { id: i32 },
    /// An offline picture.
    OfflinePicture(OfflinePicture),
    /// A custom face image.
    CustomFace(CustomFace),
}

impl ContentPart {
    /// Creates a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates a built-in emoticon part.
    pub fn face(id: i32) -> Self {
        Self::Face { id }
    }

    /// Returns true for parts carrying a lazily fetched payload.
    pub fn is_media(&self) -> bool {
        matches!(self, Self::OfflinePicture(_) | Self::CustomFace(_))
    }

    /// Returns the payload of a media part.
    pub fn payload(&self) -> Option<&MediaPayload> {
        match self {
            Self::OfflinePicture(pic) => Some(&pic.payload),
            Self::CustomFace(face) => Some(&face.payload),
            _ => None,
        }
    }

    /// Replaces the payload of a media part, updating its size.
    ///
    /// Returns false (and changes nothing) for text and emoticon parts.
    pub fn set_payload(&mut self, payload: MediaPayload) -> bool {
        let (slot, size) = match self {
            Self::OfflinePicture(pic) => (&mut pic.payload, &mut pic.size),
            Self::CustomFace(face) => (&mut face.payload, &mut face.size),
            _ => return false,
        };
        if let Some(data) = payload.bytes() {
            *size = data.len() as u64;
        }
        *slot = payload;
        true
    }
}

/// Font used to render a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontDescriptor {
    /// Font family name.
    pub name: String,
    /// Point size.
    pub size: i32,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    /// Hex RGB color without the leading `#`.
    pub color: String,
}

impl Default for FontDescriptor {
    fn default() -> Self {
        Self {
            name: "Arial".to_string(),
            size: 12,
            bold: false,
            italic: false,
            underline: false,
            color: "000000".to_string(),
        }
    }
}

impl FontDescriptor {
    /// Creates a plain font with the given name and size.
    pub fn new(name: impl Into<String>, size: i32) -> Self {
        Self {
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    /// Builder: set bold/italic/underline.
    pub fn with_style(mut self, bold: bool, italic: bool, underline: bool) -> Self {
        self.bold = bold;
        self.italic = italic;
        self.underline = underline;
        self
    }

    /// Builder: set the color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Raises the size to [`MIN_FONT_SIZE`] if it is smaller.
    pub fn normalize(&mut self) {
        self.size = self.size.max(MIN_FONT_SIZE);
    }
}

/// Whether a chat message is a direct (buddy) or a group message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Buddy,
    Group,
}

/// A buddy or group chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub kind: EnvelopeKind,
    /// Sender uin (for group messages, the group's uin).
    pub from_uin: String,
    /// Recipient uin (for outgoing group messages, the group's uin).
    pub to_uin: String,
    /// Member who wrote a group message.
    pub sender_uin: Option<String>,
    /// Group code of a group message.
    pub group_code: Option<String>,
    pub msg_id: Option<String>,
    /// Unix timestamp in seconds, 0 when unknown.
    pub timestamp: i64,
    pub font: FontDescriptor,
    pub parts: Vec<ContentPart>,
}

impl MessageEnvelope {
    /// Creates an envelope with no parts.
    pub fn new(
        kind: EnvelopeKind,
        from_uin: impl Into<String>,
        to_uin: impl Into<String>,
        font: FontDescriptor,
    ) -> Self {
        Self {
            kind,
            from_uin: from_uin.into(),
            to_uin: to_uin.into(),
            sender_uin: None,
            group_code: None,
            msg_id: None,
            timestamp: 0,
            font,
            parts: Vec::new(),
        }
    }

    /// Creates a buddy message envelope.
    pub fn buddy(from_uin: impl Into<String>, to_uin: impl Into<String>, font: FontDescriptor) -> Self {
        Self::new(EnvelopeKind::Buddy, from_uin, to_uin, font)
    }

    /// Creates a group message envelope.
    pub fn group(
        from_uin: impl Into<String>,
        group_uin: impl Into<String>,
        group_code: impl Into<String>,
        font: FontDescriptor,
    ) -> Self {
        let mut envelope = Self::new(EnvelopeKind::Group, from_uin, group_uin, font);
        envelope.group_code = Some(group_code.into());
        envelope
    }

    /// Builder: append a part.
    pub fn with_part(mut self, part: ContentPart) -> Self {
        self.parts.push(part);
        self
    }

    /// Builder: set the message id.
    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }

    /// Builder: set the timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Appends a part.
    pub fn push_part(&mut self, part: ContentPart) {
        self.parts.push(part);
    }

    /// Returns true if the envelope can be delivered or sent.
    pub fn is_valid(&self) -> bool {
        !self.from_uin.is_empty()
            && !self.to_uin.is_empty()
            && !self.font.name.is_empty()
            && !self.font.color.is_empty()
            && !self.parts.is_empty()
    }

    /// Returns true if any part carries a lazily fetched payload.
    pub fn has_media(&self) -> bool {
        self.parts.iter().any(ContentPart::is_media)
    }

    /// Returns the concatenated text parts, with emoticons and images left out.
    pub fn plain_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Returns the send time, if the server provided one.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        if self.timestamp == 0 {
            return None;
        }
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// A buddy's presence changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    /// Uin of the buddy.
    pub who: String,
    /// New status, e.g. `online`, `offline`, `away`.
    pub status: String,
    /// Client the buddy is using (1 = desktop).
    pub client_type: i32,
}

impl StatusChangeEvent {
    /// Creates a status change event.
    pub fn new(who: impl Into<String>, status: impl Into<String>, client_type: i32) -> Self {
        Self {
            who: who.into(),
            status: status.into(),
            client_type,
        }
    }

    /// Returns true if both the buddy and the status are known.
    pub fn is_valid(&self) -> bool {
        !self.who.is_empty() && !self.status.is_empty()
    }
}

/// Discriminator over everything the poll channel delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Buddy,
    Group,
    StatusChange,
    Unknown,
}

impl From<EnvelopeKind> for MessageKind {
    fn from(kind: EnvelopeKind) -> Self {
        match kind {
            EnvelopeKind::Buddy => Self::Buddy,
            EnvelopeKind::Group => Self::Group,
        }
    }
}

/// A decoded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A buddy or group chat message.
    Chat(MessageEnvelope),
    /// A presence change.
    StatusChange(StatusChangeEvent),
    /// An event type this client does not understand.
    Unknown { poll_type: String },
}

impl Message {
    /// Returns the kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Chat(envelope) => envelope.kind.into(),
            Self::StatusChange(_) => MessageKind::StatusChange,
            Self::Unknown { .. } => MessageKind::Unknown,
        }
    }

    /// Returns the chat envelope, if this is a chat message.
    pub fn as_chat(&self) -> Option<&MessageEnvelope> {
        match self {
            Self::Chat(envelope) => Some(envelope),
            _ => None,
        }
    }

    /// Returns the status change, if this is one.
    pub fn as_status_change(&self) -> Option<&StatusChangeEvent> {
        match self {
            Self::StatusChange(event) => Some(event),
            _ => None,
        }
    }
}

impl From<MessageEnvelope> for Message {
    fn from(envelope: MessageEnvelope) -> Self {
        Self::Chat(envelope)
    }
}

impl From<StatusChangeEvent> for Message {
    fn from(event: StatusChangeEvent) -> Self {
        Self::StatusChange(event)
    }
}

/// A message as handed to the consumer, with its arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// Arrival sequence number, strictly increasing per queue.
    pub seq: u64,
    /// When the message was queued.
    pub received_at: DateTime<Utc>,
    pub message: Message,
}

impl ReceivedMessage {
    /// Wraps a message with its sequence number.
    pub fn new(seq: u64, message: Message) -> Self {
        Self {
            seq,
            received_at: Utc::now(),
            message,
        }
    }

    /// Returns the kind of the wrapped message.
    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    /// Unwraps the message.
    pub fn into_message(self) -> Message {
        self.message
    }
}
