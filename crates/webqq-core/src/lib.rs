//! Core types: message content model, text escaping, tracing setup.

pub mod model;
pub mod text;
pub mod tracing;

pub use model::{
    ContentPart, CustomFace, EnvelopeKind, FontDescriptor, MediaPayload, Message, MessageEnvelope,
    MessageKind, OfflinePicture, ReceivedMessage, StatusChangeEvent,
};
pub use text::{escape, unescape};
pub use tracing::{LogFormat, LogSettings, TracingError, init_tracing};
