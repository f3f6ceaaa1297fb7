//! Decoding of individual poll events into the content model.

use serde_json::Value;
use tracing::debug;
use webqq_core::model::{
    ContentPart, CustomFace, EnvelopeKind, FontDescriptor, Message, MessageEnvelope, MessageKind,
    OfflinePicture, StatusChangeEvent,
};
use webqq_core::text::unescape;

use crate::error::DecodeError;
use crate::wire::{find_field, int_value, scalar_int, scalar_string, simple_value};

const DEFAULT_FONT_NAME: &str = "Arial";
const DEFAULT_FONT_COLOR: &str = "000000";
const DEFAULT_FONT_SIZE: i32 = 12;
const DEFAULT_CLIENT_TYPE: i32 = 1;

/// Font and parts read from a wire content array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedContent {
    /// Font of the last font token, if any was present.
    pub font: Option<FontDescriptor>,
    pub parts: Vec<ContentPart>,
}

/// Decodes the `value` object of an event of the given kind.
pub fn decode_event(kind: MessageKind, value: &Value) -> Result<Message, DecodeError> {
    match kind {
        MessageKind::Buddy => decode_chat(EnvelopeKind::Buddy, value).map(Message::Chat),
        MessageKind::Group => decode_chat(EnvelopeKind::Group, value).map(Message::Chat),
        MessageKind::StatusChange => decode_status_change(value).map(Message::StatusChange),
        MessageKind::Unknown => Err(DecodeError::UnknownKind),
    }
}

/// Decodes a buddy or group chat message.
///
/// ```text
/// {"msg_id":5244,"from_uin":570454553,"to_uin":75396018,"time":1339663883,
///  "content":[["font",{"size":10,"color":"000000","style":[0,0,0],"name":"Arial"}],"hello\n "]}
/// ```
pub fn decode_chat(kind: EnvelopeKind, value: &Value) -> Result<MessageEnvelope, DecodeError> {
    let from_uin = simple_value(value, "from_uin")
        .filter(|uin| !uin.is_empty())
        .ok_or(DecodeError::MissingField("from_uin"))?;
    let to_uin = simple_value(value, "to_uin")
        .filter(|uin| !uin.is_empty())
        .ok_or(DecodeError::MissingField("to_uin"))?;

    let content = find_field(value, "content").ok_or(DecodeError::MissingContent)?;
    let DecodedContent { font, parts } = decode_content(content)?;

    let mut font = font.ok_or(DecodeError::MissingFont)?;
    if parts.is_empty() {
        return Err(DecodeError::EmptyContent);
    }
    font.normalize();

    let mut envelope = MessageEnvelope::new(kind, from_uin, to_uin, font);
    envelope.msg_id = simple_value(value, "msg_id");
    envelope.timestamp = int_value(value, "time").unwrap_or(0);
    // Group-only fields; a buddy message simply lacks them.
    envelope.sender_uin = simple_value(value, "send_uin");
    envelope.group_code = simple_value(value, "group_code");
    envelope.parts = parts;

    Ok(envelope)
}

/// Decodes a buddy status change.
pub fn decode_status_change(value: &Value) -> Result<StatusChangeEvent, DecodeError> {
    let who = simple_value(value, "uin")
        .filter(|who| !who.is_empty())
        .ok_or(DecodeError::MissingField("uin"))?;
    let status = simple_value(value, "status")
        .filter(|status| !status.is_empty())
        .ok_or(DecodeError::MissingField("status"))?;
    let client_type = int_value(value, "client_type")
        .and_then(|t| i32::try_from(t).ok())
        .unwrap_or(DEFAULT_CLIENT_TYPE);

    Ok(StatusChangeEvent::new(who, status, client_type))
}

/// Walks a wire content array.
///
/// Unknown tags and elements that are neither strings nor arrays are
/// skipped. A known tag missing the data it needs fails the whole array.
pub fn decode_content(content: &Value) -> Result<DecodedContent, DecodeError> {
    let elements = content.as_array().ok_or(DecodeError::MissingContent)?;
    let mut decoded = DecodedContent::default();

    for element in elements {
        match element {
            Value::String(text) => decoded.parts.push(ContentPart::text(unescape(text))),
            Value::Array(items) => {
                let Some(tag) = items.first().and_then(Value::as_str) else {
                    debug!("skipping content array without tag");
                    continue;
                };
                match tag {
                    "font" => decoded.font = Some(decode_font(items.get(1))),
                    "face" => decoded.parts.push(decode_face(items)?),
                    "offpic" => decoded.parts.push(decode_offpic(items)?),
                    "cface" => decoded.parts.push(decode_cface(items)?),
                    other => debug!(tag = other, "ignoring unknown content tag"),
                }
            }
            _ => {}
        }
    }

    Ok(decoded)
}

fn decode_font(options: Option<&Value>) -> FontDescriptor {
    let Some(options) = options else {
        return FontDescriptor::default();
    };

    let name = simple_value(options, "name")
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_FONT_NAME.to_string());
    let color = simple_value(options, "color")
        .filter(|color| !color.is_empty())
        .unwrap_or_else(|| DEFAULT_FONT_COLOR.to_string());
    let size = int_value(options, "size")
        .and_then(|s| i32::try_from(s).ok())
        .unwrap_or(DEFAULT_FONT_SIZE);

    let style = find_field(options, "style").and_then(Value::as_array);
    let flag = |index: usize| {
        style
            .and_then(|s| s.get(index))
            .and_then(scalar_int)
            .is_some_and(|v| v != 0)
    };

    FontDescriptor::new(name, size)
        .with_style(flag(0), flag(1), flag(2))
        .with_color(color)
}

fn decode_face(items: &[Value]) -> Result<ContentPart, DecodeError> {
    let id = items
        .get(1)
        .and_then(scalar_int)
        .and_then(|id| i32::try_from(id).ok())
        .ok_or_else(|| DecodeError::malformed("face", "missing emoticon id"))?;
    Ok(ContentPart::face(id))
}

// ["offpic",{"success":1,"file_path":"/d65c58ae-faa6-44f3-980e-272fb44a507f"}]
fn decode_offpic(items: &[Value]) -> Result<ContentPart, DecodeError> {
    let options = items
        .get(1)
        .ok_or_else(|| DecodeError::malformed("offpic", "missing options"))?;
    let file_path = simple_value(options, "file_path")
        .ok_or_else(|| DecodeError::malformed("offpic", "missing file_path"))?;
    let success = int_value(options, "success").unwrap_or(0) != 0;

    Ok(ContentPart::OfflinePicture(
        OfflinePicture::new(file_path).with_success(success),
    ))
}

// ["cface",{"name":"0C3A...jPg","file_id":914490174,"key":"YkC3...","server":"119.147.15.201:443"}]
// ["cface","0C3A...jPg",""]
fn decode_cface(items: &[Value]) -> Result<ContentPart, DecodeError> {
    let second = items
        .get(1)
        .ok_or_else(|| DecodeError::malformed("cface", "missing face data"))?;

    let face = match second {
        Value::Object(_) => {
            let name = simple_value(second, "name")
                .ok_or_else(|| DecodeError::malformed("cface", "missing name"))?;
            let mut face = CustomFace::new(name).with_file(
                simple_value(second, "file_id"),
                simple_value(second, "key"),
            );
            if let Some(server) = simple_value(second, "server") {
                face = face.with_server(&server);
            }
            face
        }
        other => {
            let name = scalar_string(other)
                .ok_or_else(|| DecodeError::malformed("cface", "missing name"))?;
            CustomFace::new(name)
        }
    };

    Ok(ContentPart::CustomFace(face))
}
