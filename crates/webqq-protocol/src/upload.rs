//! Parsing of picture upload responses.
//!
//! Both upload endpoints answer with an HTML page calling a JavaScript
//! callback; the JSON object is cut out of the page.

use serde_json::Value;
use webqq_core::model::{ContentPart, CustomFace, OfflinePicture};

use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::{int_value, simple_value};

/// Result of an offline picture upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflinePictureUpload {
    pub file_path: String,
    pub filename: String,
    pub size: u64,
}

impl OfflinePictureUpload {
    /// Turns the upload into a content part for sending.
    pub fn into_part(self) -> ContentPart {
        ContentPart::OfflinePicture(
            OfflinePicture::new(self.file_path).with_upload(self.filename, self.size),
        )
    }
}

/// Result of a custom face upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFaceUpload {
    pub name: String,
    /// The server already had this face (`ret` 4).
    pub already_uploaded: bool,
}

impl CustomFaceUpload {
    /// Turns the upload into a content part for sending.
    pub fn into_part(self) -> ContentPart {
        ContentPart::CustomFace(CustomFace::new(self.name))
    }
}

// Cuts from the first '{' to the first '}' after it.
fn embedded_object(page: &str) -> ProtocolResult<&str> {
    let start = page
        .find('{')
        .ok_or_else(|| ProtocolError::MalformedResult("no JSON object in response".into()))?;
    let len = page[start..]
        .find('}')
        .ok_or_else(|| ProtocolError::MalformedResult("unterminated JSON object".into()))?;
    Ok(&page[start..=start + len])
}

/// Parses the `upload_offline_pic` response.
///
/// ```text
/// <script>parent.EQQ.Model.ChatMsg.callbackSendPic({"retcode":0,"result":"OK",
///   "progress":100,"filesize":2048,"fileurl":null,"filename":"pic.png",
///   "filepath":"/a6dc4d6d-..."});</script>
/// ```
pub fn parse_offline_picture_upload(page: &str) -> ProtocolResult<OfflinePictureUpload> {
    let json: Value =
        serde_json::from_str(embedded_object(page)?).map_err(ProtocolError::Syntax)?;
    if int_value(&json, "retcode") != Some(crate::RETCODE_OK) {
        return Err(ProtocolError::BadRetcode(simple_value(&json, "retcode")));
    }

    let file_path = simple_value(&json, "filepath")
        .ok_or_else(|| ProtocolError::MalformedResult("missing filepath".into()))?;
    Ok(OfflinePictureUpload {
        file_path,
        filename: simple_value(&json, "filename").unwrap_or_default(),
        size: int_value(&json, "filesize")
            .and_then(|s| u64::try_from(s).ok())
            .unwrap_or(0),
    })
}

/// Parses the `cface_upload` response.
///
/// ```text
/// <script>parent.EQQ.Model.ChatMsg.callbackSendPicGroup({'ret':0,'msg':'5F7E31F0001EF4310865F1FF4549B12B.jPg'});</script>
/// ```
///
/// `ret` 4 means the face was uploaded before; its name is still reported,
/// followed by a human-readable note after the first space.
pub fn parse_custom_face_upload(page: &str) -> ProtocolResult<CustomFaceUpload> {
    let object = embedded_object(page)?.replace('\'', "\"");
    let json: Value = serde_json::from_str(&object).map_err(ProtocolError::Syntax)?;

    let ret = int_value(&json, "ret");
    let already_uploaded = match ret {
        Some(0) => false,
        Some(4) => true,
        _ => return Err(ProtocolError::BadRetcode(simple_value(&json, "ret"))),
    };

    let msg = simple_value(&json, "msg")
        .ok_or_else(|| ProtocolError::MalformedResult("missing msg".into()))?;
    let name = msg.split(' ').next().unwrap_or_default().to_string();
    if name.is_empty() {
        return Err(ProtocolError::MalformedResult("empty face name".into()));
    }

    Ok(CustomFaceUpload {
        name,
        already_uploaded,
    })
}
