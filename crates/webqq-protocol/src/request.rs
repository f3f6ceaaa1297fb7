//! Form bodies for poll and send requests.
//!
//! Both endpoints take a single urlencoded `r` field holding a JSON object.

use serde_json::{Map, Value};

use crate::error::ProtocolResult;
use crate::response::GroupSignature;

/// Session identifiers sent with every channel request.
#[derive(Debug, Clone, Copy)]
pub struct ChannelIds<'a> {
    pub client_id: &'a str,
    pub session_id: &'a str,
}

/// Destination and credentials of a send request.
#[derive(Debug, Clone)]
pub struct SendFields<'a> {
    /// `to` for buddy messages, `group_uin` for group messages.
    pub dest_field: &'a str,
    pub dest: &'a str,
    /// Group code and signature, only set when the content has custom faces.
    pub custom_face: Option<(&'a str, &'a GroupSignature)>,
    /// Encoded content array, embedded as a JSON string.
    pub content: &'a str,
    pub msg_id: u64,
}

/// Builds the `r=...` body of a poll request.
pub fn poll_body(ids: ChannelIds<'_>) -> ProtocolResult<String> {
    let mut r = Map::new();
    r.insert("clientid".into(), Value::from(ids.client_id));
    r.insert("psessionid".into(), Value::from(ids.session_id));
    Ok(format!("r={}", urlencoding::encode(&serde_json::to_string(&r)?)))
}

/// Builds the body of a `send_buddy_msg2`/`send_qun_msg2` request.
pub fn send_body(ids: ChannelIds<'_>, fields: &SendFields<'_>) -> ProtocolResult<String> {
    let mut r = Map::new();
    r.insert(fields.dest_field.into(), numeric_id(fields.dest));
    if let Some((group_code, signature)) = fields.custom_face {
        r.insert("group_code".into(), numeric_id(group_code));
        r.insert("key".into(), Value::from(signature.key.as_str()));
        r.insert("sig".into(), Value::from(signature.sig.as_str()));
    }
    r.insert("face".into(), Value::from(0));
    r.insert("content".into(), Value::from(fields.content));
    r.insert("msg_id".into(), Value::from(fields.msg_id));
    r.insert("clientid".into(), Value::from(ids.client_id));
    r.insert("psessionid".into(), Value::from(ids.session_id));

    Ok(format!(
        "r={}&clientid={}&psessionid={}",
        urlencoding::encode(&serde_json::to_string(&r)?),
        urlencoding::encode(ids.client_id),
        urlencoding::encode(ids.session_id),
    ))
}

// Uins and group codes go out as bare numbers when they are numeric.
fn numeric_id(id: &str) -> Value {
    id.parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(id))
}
