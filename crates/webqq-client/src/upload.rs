//! Image uploads for outgoing messages.
//!
//! An image must be uploaded before it can be referenced by a message part.
//! Buddy messages carry offline pictures; group messages carry custom faces.

use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};
use webqq_core::model::ContentPart;
use webqq_protocol::{parse_custom_face_upload, parse_offline_picture_upload};

use crate::config::UploadSettings;
use crate::error::ClientResult;
use crate::sender::Sender;
use crate::transport::{FormPart, HttpRequest};

const WEB_ORIGIN: &str = "http://web2.qq.com";

/// Uploads images on the session of a [`Sender`].
#[derive(Clone)]
pub struct Uploader {
    sender: Sender,
    settings: UploadSettings,
}

impl Uploader {
    pub fn new(sender: Sender, settings: UploadSettings) -> Self {
        Self { sender, settings }
    }

    /// Uploads a picture for the buddy `to` and returns the part to send.
    ///
    /// `peeruin` is the recipient unless `upload.peer_uin` overrides it.
    pub async fn upload_offline_picture(
        &self,
        to: &str,
        filename: &str,
        data: Vec<u8>,
    ) -> ClientResult<ContentPart> {
        let session = self.sender.session();
        let endpoints = self.sender.endpoints();
        let peer_uin = self.settings.peer_uin.as_deref().unwrap_or(to);
        let size = data.len();

        let parts = vec![
            FormPart::text("callback", "parent.EQQ.Model.ChatMsg.callbackSendPic"),
            FormPart::text("locallangid", "2052"),
            FormPart::text("clientversion", "1409"),
            FormPart::text("uin", session.uin.as_str()),
            FormPart::text("skey", session.skey.as_str()),
            FormPart::text("appid", "1002101"),
            FormPart::text("peeruin", peer_uin),
            FormPart::file("file", filename, image_content_type(filename), data),
            FormPart::text("field", "1"),
            FormPart::text("vfwebqq", session.vfwebqq.as_str()),
            FormPart::text("senderviplevel", "0"),
            FormPart::text("reciverviplevel", "0"),
        ];
        let request = HttpRequest::post_multipart(
            format!("{}?time={}", endpoints.offline_upload, Utc::now().timestamp()),
            parts,
        )
        .with_header("Origin", WEB_ORIGIN)
        .with_header("Referer", endpoints.web_referer.as_str())
        .with_cookies(&session.cookies)
        .with_timeout(self.settings.timeout());

        debug!(filename, bytes = size, peer_uin, "uploading offline picture");
        let response = self.sender.transport().execute(request).await?;
        let response = response.require_status(&[200], "offline picture upload")?;
        let upload = parse_offline_picture_upload(&response.text())?;

        info!(file_path = %upload.file_path, size = upload.size, "offline picture uploaded");
        Ok(upload.into_part())
    }

    /// Uploads a custom face and returns the part to send.
    ///
    /// Also fetches the group signature if the session has none yet, since
    /// sending the face will need it.
    pub async fn upload_custom_face(&self, filename: &str, data: Vec<u8>) -> ClientResult<ContentPart> {
        let session = self.sender.session();
        let endpoints = self.sender.endpoints();
        let size = data.len();

        let parts = vec![
            FormPart::text("from", "control"),
            FormPart::text("f", "EQQ.Model.ChatMsg.callbackSendPicGroup"),
            FormPart::text("vfwebqq", session.vfwebqq.as_str()),
            FormPart::file("custom_face", filename, image_content_type(filename), data),
            FormPart::text("fileid", "1"),
        ];
        let request = HttpRequest::post_multipart(
            format!("{}?time={}", endpoints.cface_upload, Utc::now().timestamp()),
            parts,
        )
        .with_header("Origin", WEB_ORIGIN)
        .with_header("Referer", endpoints.web_referer.as_str())
        .with_cookies(&session.cookies)
        .with_timeout(self.settings.timeout());

        debug!(filename, bytes = size, "uploading custom face");
        let response = self.sender.transport().execute(request).await?;
        let response = response.require_status(&[200], "custom face upload")?;
        let upload = parse_custom_face_upload(&response.text())?;
        info!(
            name = %upload.name,
            already_uploaded = upload.already_uploaded,
            "custom face uploaded"
        );

        if let Err(e) = self.sender.group_signature().await {
            warn!(error = %e, "failed to fetch group signature after upload");
        }
        Ok(upload.into_part())
    }
}

fn image_content_type(filename: &str) -> String {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
        Some("png") => "image/png".to_string(),
        Some("gif") => "image/gif".to_string(),
        Some("bmp") => "image/bmp".to_string(),
        Some(other) => format!("image/{}", other),
        None => "application/octet-stream".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::{EndpointSettings, SendSettings};
    use crate::error::ClientErrorCode;
    use crate::session::Session;
    use crate::transport::RequestBody;
    use crate::transport::testing::ScriptedTransport;
    use webqq_core::model::{CustomFace, MediaPayload, OfflinePicture};

    const OFFPIC_OK: &str = r#"<head><script type="text/javascript">document.domain='qq.com';parent.EQQ.Model.ChatMsg.callbackSendPic({"retcode":0, "result":"OK", "progress":100, "filesize":5, "fileurl":null, "filename":"pic.png", "filepath":"/a6dc4d6d-9ae2", "msg":"ok"});</script></head>"#;
    const CFACE_OK: &str = r#"<head><script>parent.EQQ.Model.ChatMsg.callbackSendPicGroup({'ret':0,'msg':'5F7E31F0001EF4310865F1FF4549B12B.jPg '});</script></head>"#;
    const SIGNATURE: &str =
        r#"{"retcode":0,"result":{"reply":0,"gface_key":"k","gface_sig":"s"}}"#;

    fn uploader(transport: Arc<ScriptedTransport>, settings: UploadSettings) -> Uploader {
        let session = Session::new("cid", "psid")
            .with_uin("10001")
            .with_skey("@skey")
            .with_vfwebqq("vf")
            .with_cookies("skey=@skey");
        let sender = Sender::new(
            transport,
            Arc::new(session),
            EndpointSettings::default(),
            SendSettings::default(),
        );
        Uploader::new(sender, settings)
    }

    fn text_field<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
        let RequestBody::Multipart(parts) = &request.body else {
            return None;
        };
        parts.iter().find_map(|part| match part {
            FormPart::Text { name: n, value } if n == name => Some(value.as_str()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn offline_picture_upload() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("upload_offline_pic", 200, OFFPIC_OK);
        let uploader = uploader(transport.clone(), UploadSettings::default());

        let part = uploader
            .upload_offline_picture("593023668", "pic.png", b"\x89PNG\n".to_vec())
            .await
            .unwrap();

        let expected = OfflinePicture::new("/a6dc4d6d-9ae2").with_upload("pic.png", 5);
        assert_eq!(part, ContentPart::OfflinePicture(expected));
        assert_eq!(part.payload(), Some(&MediaPayload::NotRequested));

        let request = &transport.requests()[0];
        assert!(
            request
                .url
                .starts_with("http://weboffline.ftn.qq.com/ftn_access/upload_offline_pic?time=")
        );
        assert_eq!(request.header("Origin"), Some("http://web2.qq.com"));
        assert_eq!(request.header("Cookie"), Some("skey=@skey"));
        assert_eq!(text_field(request, "uin"), Some("10001"));
        assert_eq!(text_field(request, "skey"), Some("@skey"));
        assert_eq!(text_field(request, "peeruin"), Some("593023668"));
        assert_eq!(text_field(request, "vfwebqq"), Some("vf"));

        let RequestBody::Multipart(parts) = &request.body else {
            panic!("expected multipart body");
        };
        let names: Vec<&str> = parts.iter().map(FormPart::name).collect();
        assert_eq!(
            names,
            vec![
                "callback",
                "locallangid",
                "clientversion",
                "uin",
                "skey",
                "appid",
                "peeruin",
                "file",
                "field",
                "vfwebqq",
                "senderviplevel",
                "reciverviplevel"
            ]
        );
        assert!(matches!(
            &parts[7],
            FormPart::File { filename, content_type, .. } if filename == "pic.png" && content_type == "image/png"
        ));
    }

    #[tokio::test]
    async fn peer_uin_override() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("upload_offline_pic", 200, OFFPIC_OK);
        let settings = UploadSettings {
            peer_uin: Some("42".into()),
            ..Default::default()
        };
        let uploader = uploader(transport.clone(), settings);

        uploader
            .upload_offline_picture("593023668", "pic.png", vec![1])
            .await
            .unwrap();
        assert_eq!(text_field(&transport.requests()[0], "peeruin"), Some("42"));
    }

    #[tokio::test]
    async fn offline_picture_upload_rejected() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            "upload_offline_pic",
            200,
            r#"callbackSendPic({"retcode":1,"result":"error"});"#,
        );
        transport.respond("upload_offline_pic", 403, "");
        let uploader = uploader(transport, UploadSettings::default());

        let err = uploader
            .upload_offline_picture("1", "a.jpg", vec![1])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ClientErrorCode::InvalidResponse);

        let err = uploader
            .upload_offline_picture("1", "a.jpg", vec![1])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ClientErrorCode::HttpStatus);
    }

    #[tokio::test]
    async fn custom_face_upload_primes_signature() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("cface_upload", 200, CFACE_OK);
        transport.respond("get_gface_sig2", 200, SIGNATURE);
        let uploader = uploader(transport.clone(), UploadSettings::default());

        let part = uploader
            .upload_custom_face("face.jpg", vec![0xff, 0xd8])
            .await
            .unwrap();
        assert_eq!(
            part,
            ContentPart::CustomFace(CustomFace::new("5F7E31F0001EF4310865F1FF4549B12B.jPg"))
        );

        let requests = transport.requests();
        assert!(requests[0].url.starts_with("http://up.web2.qq.com/cgi-bin/cface_upload?time="));
        assert_eq!(text_field(&requests[0], "f"), Some("EQQ.Model.ChatMsg.callbackSendPicGroup"));
        assert_eq!(text_field(&requests[0], "fileid"), Some("1"));
        assert_eq!(transport.count("get_gface_sig2"), 1);
        assert!(uploader.sender.session().cached_group_signature().await.is_some());
    }

    #[tokio::test]
    async fn custom_face_upload_survives_signature_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("cface_upload", 200, CFACE_OK);
        transport.respond("get_gface_sig2", 500, "");
        let uploader = uploader(transport, UploadSettings::default());

        assert!(uploader.upload_custom_face("face.jpg", vec![1]).await.is_ok());
    }

    #[test]
    fn content_types() {
        assert_eq!(image_content_type("a.JPG"), "image/jpeg");
        assert_eq!(image_content_type("a.png"), "image/png");
        assert_eq!(image_content_type("a.webp"), "image/webp");
        assert_eq!(image_content_type("noext"), "application/octet-stream");
    }
}
