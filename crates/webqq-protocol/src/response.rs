//! Parsing of the small JSON responses around sending.

use serde_json::Value;

use crate::RETCODE_OK;
use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::{find_field, int_value, simple_value};

/// Credentials required to send custom faces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSignature {
    pub key: String,
    pub sig: String,
}

fn parse_result(body: &[u8]) -> ProtocolResult<Value> {
    let mut json: Value = serde_json::from_slice(body).map_err(ProtocolError::Syntax)?;
    if int_value(&json, "retcode") != Some(RETCODE_OK) {
        return Err(ProtocolError::BadRetcode(simple_value(&json, "retcode")));
    }
    match json.as_object_mut().and_then(|o| o.remove("result")) {
        None | Some(Value::Null) => Err(ProtocolError::MissingResult),
        Some(result) => Ok(result),
    }
}

/// Checks the completion body of a send request.
///
/// A send succeeded if the body carries `retcode` 0 and a non-null `result`,
/// typically `{"retcode":0,"result":"ok"}`.
pub fn check_send_response(body: &[u8]) -> ProtocolResult<()> {
    parse_result(body).map(|_| ())
}

/// Parses the `get_gface_sig2` response.
///
/// ```text
/// {"retcode":0,"result":{"reply":0,"gface_key":"...","gface_sig":"..."}}
/// ```
pub fn parse_group_signature(body: &[u8]) -> ProtocolResult<GroupSignature> {
    let result = parse_result(body)?;
    let field = |name: &str| {
        simple_value(&result, name)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProtocolError::MalformedResult(format!("missing {}", name)))
    };
    Ok(GroupSignature {
        key: field("gface_key")?,
        sig: field("gface_sig")?,
    })
}

/// Returns the `retcode` of an arbitrary response, if it has one.
pub fn retcode(body: &[u8]) -> Option<i64> {
    let json: Value = serde_json::from_slice(body).ok()?;
    find_field(&json, "retcode").and_then(crate::wire::scalar_int)
}
