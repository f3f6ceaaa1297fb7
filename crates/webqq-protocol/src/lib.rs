//! Wire format of the WebQQ long-poll channel.
//!
//! The server speaks an ad-hoc JSON dialect: every response is wrapped in
//! `{"retcode": 0, "result": ...}` and chat message bodies are arrays mixing
//! plain strings with tagged arrays such as `["face", 14]` or
//! `["font", {...}]`.
//!
//! This crate only converts between that dialect and the types of
//! [`webqq_core::model`]; it performs no I/O.
//!
//! # Example
//!
//! ```rust
//! use webqq_protocol::parse_poll_response;
//!
//! let body = br#"{"retcode":0,"result":[{"poll_type":"buddies_status_change",
//!     "value":{"uin":333,"status":"offline","client_type":1}}]}"#;
//! let batch = parse_poll_response(body).unwrap();
//! assert_eq!(batch.messages.len(), 1);
//! ```

mod decode;
mod encode;
mod error;
mod parse;
mod request;
mod response;
mod upload;
pub mod wire;

pub use decode::{DecodedContent, decode_chat, decode_content, decode_event, decode_status_change};
pub use encode::{EncodedContent, encode_content, encode_content_with_limit};
pub use error::{DecodeError, ProtocolError, ProtocolResult};
pub use parse::{PollBatch, message_kind, parse_poll_response};
pub use request::{ChannelIds, SendFields, poll_body, send_body};
pub use response::{GroupSignature, check_send_response, parse_group_signature, retcode};
pub use upload::{CustomFaceUpload, OfflinePictureUpload, parse_custom_face_upload, parse_offline_picture_upload};

/// `retcode` of a successful response.
pub const RETCODE_OK: i64 = 0;

/// Default upper bound for an encoded content array (64 KiB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;
