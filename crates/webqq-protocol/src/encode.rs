//! Encoding of outgoing messages into the wire content array.

use serde_json::{Value, json};
use webqq_core::model::{ContentPart, FontDescriptor, MessageEnvelope};
use webqq_core::text::escape;

use crate::MAX_CONTENT_SIZE;
use crate::error::{ProtocolError, ProtocolResult};

/// A message body ready to be embedded in a send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedContent {
    /// JSON text of the content array.
    pub content: String,
    /// Whether any part is a custom face, which requires the group
    /// signature credentials on send.
    pub has_custom_face: bool,
}

/// Encodes the parts and font of `envelope`, bounded by [`MAX_CONTENT_SIZE`].
pub fn encode_content(envelope: &MessageEnvelope) -> ProtocolResult<EncodedContent> {
    encode_content_with_limit(envelope, MAX_CONTENT_SIZE)
}

/// Encodes the parts and font of `envelope`, failing if the result is
/// larger than `max_size` bytes.
pub fn encode_content_with_limit(
    envelope: &MessageEnvelope,
    max_size: usize,
) -> ProtocolResult<EncodedContent> {
    let mut has_custom_face = false;
    let mut items: Vec<Value> = Vec::with_capacity(envelope.parts.len() + 1);

    for part in &envelope.parts {
        let item = match part {
            ContentPart::Text { text } => Value::String(escape(text)),
            ContentPart::Face { id } => json!(["face", id]),
            ContentPart::OfflinePicture(pic) => json!([
                "offpic",
                pic.file_path,
                pic.stored_filename.as_deref().unwrap_or_default(),
                pic.size
            ]),
            ContentPart::CustomFace(face) => {
                has_custom_face = true;
                json!(["cface", "group", face.name])
            }
        };
        items.push(item);
    }
    items.push(font_token(&envelope.font));

    let content = serde_json::to_string(&items)?;
    if content.len() > max_size {
        return Err(ProtocolError::ContentTooLarge {
            size: content.len(),
            max: max_size,
        });
    }

    Ok(EncodedContent {
        content,
        has_custom_face,
    })
}

fn font_token(font: &FontDescriptor) -> Value {
    json!([
        "font",
        {
            "name": font.name,
            "size": font.size.to_string(),
            "style": [
                u8::from(font.bold),
                u8::from(font.italic),
                u8::from(font.underline)
            ],
            "color": font.color,
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_content;
    use webqq_core::model::{CustomFace, EnvelopeKind, OfflinePicture};

    fn envelope(parts: Vec<ContentPart>) -> MessageEnvelope {
        let mut envelope = MessageEnvelope::buddy("111", "222", FontDescriptor::default());
        envelope.parts = parts;
        envelope
    }

    #[test]
    fn encode_text_and_face() {
        let encoded =
            encode_content(&envelope(vec![ContentPart::text("hi"), ContentPart::face(3)])).unwrap();
        assert!(!encoded.has_custom_face);
        insta::assert_snapshot!(
            encoded.content,
            @r#"["hi",["face",3],["font",{"color":"000000","name":"Arial","size":"12","style":[0,0,0]}]]"#
        );
    }

    #[test]
    fn encode_escapes_text() {
        let encoded = encode_content(&envelope(vec![ContentPart::text("a\nb\\")])).unwrap();
        insta::assert_snapshot!(
            encoded.content,
            @r#"["a\\nb\\\\",["font",{"color":"000000","name":"Arial","size":"12","style":[0,0,0]}]]"#
        );
    }

    #[test]
    fn encode_pictures() {
        let encoded = encode_content(&envelope(vec![
            ContentPart::OfflinePicture(OfflinePicture::new("/abc").with_upload("pic.png", 2048)),
            ContentPart::CustomFace(CustomFace::new("face.jpg")),
        ]))
        .unwrap();
        assert!(encoded.has_custom_face);
        insta::assert_snapshot!(
            encoded.content,
            @r#"[["offpic","/abc","pic.png",2048],["cface","group","face.jpg"],["font",{"color":"000000","name":"Arial","size":"12","style":[0,0,0]}]]"#
        );
    }

    #[test]
    fn encode_styled_font() {
        let mut message = envelope(vec![ContentPart::text("x")]);
        message.font = FontDescriptor::new("Courier", 13)
            .with_style(true, false, true)
            .with_color("ff0000");
        let encoded = encode_content(&message).unwrap();
        assert!(encoded
            .content
            .ends_with(r#"["font",{"color":"ff0000","name":"Courier","size":"13","style":[1,0,1]}]]"#));
    }

    #[test]
    fn round_trip_through_decoder() {
        let original = envelope(vec![ContentPart::text("hi"), ContentPart::face(3)]);
        let encoded = encode_content(&original).unwrap();

        let value: Value = serde_json::from_str(&encoded.content).unwrap();
        let decoded = decode_content(&value).unwrap();
        assert_eq!(decoded.parts, original.parts);
        assert_eq!(decoded.font, Some(FontDescriptor::default()));
        assert_eq!(original.kind, EnvelopeKind::Buddy);
    }

    #[test]
    fn round_trip_preserves_control_characters() {
        let original = envelope(vec![ContentPart::text("tab\there\nnew \\ line")]);
        let encoded = encode_content(&original).unwrap();
        let value: Value = serde_json::from_str(&encoded.content).unwrap();
        assert_eq!(decode_content(&value).unwrap().parts, original.parts);
    }

    #[test]
    fn content_too_large() {
        let message = envelope(vec![ContentPart::text("x".repeat(200))]);
        let err = encode_content_with_limit(&message, 100).unwrap_err();
        assert!(matches!(err, ProtocolError::ContentTooLarge { max: 100, .. }));

        assert!(encode_content_with_limit(&message, 1024).is_ok());
    }
}
