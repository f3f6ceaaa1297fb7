//! Poll response parsing.

use serde_json::Value;
use tracing::{debug, warn};
use webqq_core::model::{Message, MessageKind};

use crate::RETCODE_OK;
use crate::decode::decode_event;
use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::{find_field, int_value, simple_value};

/// Messages decoded from one poll response, in server order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollBatch {
    pub messages: Vec<Message>,
    /// Events that failed to decode.
    pub discarded: usize,
    /// Events of a kind this client does not handle.
    pub skipped_unknown: usize,
}

impl PollBatch {
    /// Returns true if the batch carries no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Maps a `poll_type` to the message kind it carries.
pub fn message_kind(poll_type: &str) -> MessageKind {
    match poll_type {
        "message" => MessageKind::Buddy,
        "group_message" => MessageKind::Group,
        "buddies_status_change" => MessageKind::StatusChange,
        _ => MessageKind::Unknown,
    }
}

/// Parses a poll response body.
///
/// Fails only when the response as a whole is unusable. Individual events
/// that do not decode are counted in [`PollBatch::discarded`] and skipped.
pub fn parse_poll_response(body: &[u8]) -> ProtocolResult<PollBatch> {
    let json: Value = serde_json::from_slice(body).map_err(ProtocolError::Syntax)?;

    if int_value(&json, "retcode") != Some(RETCODE_OK) {
        return Err(ProtocolError::BadRetcode(simple_value(&json, "retcode")));
    }

    let events = find_field(&json, "result")
        .ok_or(ProtocolError::MissingResult)?
        .as_array()
        .ok_or_else(|| ProtocolError::MalformedResult("result is not an array".to_string()))?;

    let mut batch = PollBatch::default();
    for (index, event) in events.iter().enumerate() {
        let poll_type = simple_value(event, "poll_type").unwrap_or_default();
        let kind = message_kind(&poll_type);
        if kind == MessageKind::Unknown {
            debug!(index, poll_type = %poll_type, "skipping unhandled poll event");
            batch.skipped_unknown += 1;
            continue;
        }

        let Some(value) = find_field(event, "value") else {
            warn!(index, poll_type = %poll_type, "discarding poll event without value");
            batch.discarded += 1;
            continue;
        };

        match decode_event(kind, value) {
            Ok(message) => batch.messages.push(message),
            Err(e) => {
                warn!(index, poll_type = %poll_type, error = %e, "discarding undecodable poll event");
                batch.discarded += 1;
            }
        }
    }

    debug!(
        messages = batch.messages.len(),
        discarded = batch.discarded,
        skipped = batch.skipped_unknown,
        "parsed poll response"
    );
    Ok(batch)
}
