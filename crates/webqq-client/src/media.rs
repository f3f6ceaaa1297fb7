//! Downloads of image payloads referenced by received messages.
//!
//! Offline pictures and custom faces arrive as references; their bytes are
//! fetched with one extra request per part. A failed download never drops
//! the message, it only marks the part's payload as failed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, warn};
use url::Url;
use webqq_core::model::{ContentPart, EnvelopeKind, MediaPayload, MessageEnvelope};

use crate::config::EndpointSettings;
use crate::error::{ClientError, ClientResult};
use crate::queue::{MediaUpdate, ReceiveQueue};
use crate::session::Session;
use crate::transport::{HttpRequest, HttpTransport};

const ACCEPT_OK: &[u16] = &[200];
// The buddy face endpoint may answer with a redirect to the image.
const ACCEPT_OK_OR_REDIRECT: &[u16] = &[200, 302];

/// When image payloads are downloaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaMode {
    /// Queue the message right away and download in a separate task,
    /// publishing each result as a [`MediaUpdate`].
    #[default]
    Background,
    /// Download before queueing the message.
    Inline,
    /// Never download.
    Disabled,
}

struct MediaJob {
    part_index: usize,
    request: Result<HttpRequest, String>,
    accepted: &'static [u16],
}

/// Downloads image payloads of received messages.
pub struct MediaFetcher {
    transport: Arc<dyn HttpTransport>,
    session: Arc<Session>,
    endpoints: EndpointSettings,
    timeout: Duration,
}

impl MediaFetcher {
    /// Creates a fetcher; `timeout` bounds all downloads of one message.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<Session>,
        endpoints: EndpointSettings,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            session,
            endpoints,
            timeout,
        }
    }

    /// Sets every media payload of `envelope` to `Pending`.
    ///
    /// Returns true if the envelope has any media part.
    pub fn mark_pending(envelope: &mut MessageEnvelope) -> bool {
        let mut any = false;
        for part in envelope.parts.iter_mut() {
            any |= part.set_payload(MediaPayload::Pending);
        }
        any
    }

    /// Downloads every media part of `envelope`.
    ///
    /// Returns one `(part_index, payload)` pair per media part, in part
    /// order. Parts not finished when the timeout expires are reported as
    /// failed.
    pub async fn fetch_all(&self, envelope: &MessageEnvelope) -> Vec<(usize, MediaPayload)> {
        let jobs = self.plan(envelope);
        let mut results = Vec::with_capacity(jobs.len());

        let completed = tokio::time::timeout(self.timeout, async {
            for job in &jobs {
                results.push((job.part_index, self.run(job).await));
            }
        })
        .await;

        if completed.is_err() {
            warn!(
                from = %envelope.from_uin,
                finished = results.len(),
                total = jobs.len(),
                "media download timed out"
            );
            for job in &jobs[results.len()..] {
                results.push((job.part_index, MediaPayload::Failed("timed out".into())));
            }
        }
        results
    }

    /// Downloads every media part and stores the payloads in `envelope`.
    pub async fn fetch_inline(&self, envelope: &mut MessageEnvelope) {
        for (index, payload) in self.fetch_all(envelope).await {
            if let Some(part) = envelope.parts.get_mut(index) {
                part.set_payload(payload);
            }
        }
    }

    /// Downloads the media parts of the queued message `seq` in a task on
    /// `tasks`, applying each result to the queue. Aborting the set cancels
    /// the download.
    pub fn spawn_background(
        self: &Arc<Self>,
        tasks: &mut JoinSet<()>,
        seq: u64,
        envelope: MessageEnvelope,
        queue: Arc<ReceiveQueue>,
    ) -> AbortHandle {
        let fetcher = Arc::clone(self);
        tasks.spawn(async move { fetcher.fetch_into_queue(seq, &envelope, &queue).await })
    }

    /// Downloads the media parts of the queued message `seq` and applies
    /// each result to `queue`.
    pub async fn fetch_into_queue(&self, seq: u64, envelope: &MessageEnvelope, queue: &ReceiveQueue) {
        for (part_index, payload) in self.fetch_all(envelope).await {
            queue.apply_media_update(MediaUpdate {
                seq,
                part_index,
                payload,
            });
        }
    }

    async fn run(&self, job: &MediaJob) -> MediaPayload {
        let request = match &job.request {
            Ok(request) => request.clone(),
            Err(reason) => return MediaPayload::Failed(reason.clone()),
        };

        let url = request.url.clone();
        match self.download(request, job.accepted).await {
            Ok(data) => {
                debug!(url = %url, bytes = data.len(), "downloaded media");
                MediaPayload::Fetched(data)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "media download failed");
                MediaPayload::Failed(e.to_string())
            }
        }
    }

    async fn download(&self, request: HttpRequest, accepted: &[u16]) -> ClientResult<Vec<u8>> {
        let response = self.transport.execute(request).await?;
        Ok(response.require_status(accepted, "media download")?.body)
    }

    fn plan(&self, envelope: &MessageEnvelope) -> Vec<MediaJob> {
        envelope
            .parts
            .iter()
            .enumerate()
            .filter_map(|(part_index, part)| {
                let (request, accepted) = match part {
                    ContentPart::OfflinePicture(pic) => {
                        (self.offline_picture_request(envelope, &pic.file_path), ACCEPT_OK)
                    }
                    ContentPart::CustomFace(face) => match envelope.kind {
                        EnvelopeKind::Buddy => (
                            self.buddy_face_request(envelope, &face.name),
                            ACCEPT_OK_OR_REDIRECT,
                        ),
                        EnvelopeKind::Group => {
                            (self.group_face_request(envelope, part), ACCEPT_OK)
                        }
                    },
                    _ => return None,
                };
                Some(MediaJob {
                    part_index,
                    request: request.map_err(|e| e.message().to_string()),
                    accepted,
                })
            })
            .collect()
    }

    fn build_url(&self, base: &str, params: &[(&str, &str)]) -> ClientResult<String> {
        Url::parse_with_params(base, params)
            .map(String::from)
            .map_err(|e| ClientError::configuration(format!("invalid endpoint {}: {}", base, e)))
    }

    fn offline_picture_request(
        &self,
        envelope: &MessageEnvelope,
        file_path: &str,
    ) -> ClientResult<HttpRequest> {
        let url = self.build_url(
            &format!("{}/get_offpic2", self.endpoints.channel),
            &[
                ("file_path", file_path),
                ("f_uin", &envelope.from_uin),
                ("clientid", &self.session.client_id),
                ("psessionid", &self.session.session_id),
            ],
        )?;
        Ok(self.get(url))
    }

    fn buddy_face_request(&self, envelope: &MessageEnvelope, name: &str) -> ClientResult<HttpRequest> {
        let msg_id = envelope
            .msg_id
            .as_deref()
            .ok_or_else(|| ClientError::invalid_message("custom face without message id"))?;
        let url = self.build_url(
            &format!("{}/get_cface2", self.endpoints.channel),
            &[
                ("lcid", msg_id),
                ("guid", name),
                ("to", &envelope.from_uin),
                ("count", "5"),
                ("time", "1"),
                ("clientid", &self.session.client_id),
                ("psessionid", &self.session.session_id),
            ],
        )?;
        Ok(self.get(url))
    }

    fn group_face_request(
        &self,
        envelope: &MessageEnvelope,
        part: &ContentPart,
    ) -> ClientResult<HttpRequest> {
        let ContentPart::CustomFace(face) = part else {
            return Err(ClientError::internal("not a custom face"));
        };
        let group_code = envelope
            .group_code
            .as_deref()
            .ok_or_else(|| ClientError::invalid_message("group face without group code"))?;
        let sender = envelope
            .sender_uin
            .as_deref()
            .ok_or_else(|| ClientError::invalid_message("group face without sender"))?;
        let now = Utc::now().timestamp().to_string();

        let url = self.build_url(
            &self.endpoints.group_pic,
            &[
                ("type", "0"),
                ("gid", group_code),
                ("uin", sender),
                ("rip", face.server_ip.as_deref().unwrap_or_default()),
                ("rport", face.server_port.as_deref().unwrap_or_default()),
                ("fid", face.file_id.as_deref().unwrap_or_default()),
                ("pic", &face.name),
                ("vfwebqq", &self.session.vfwebqq),
                ("t", &now),
            ],
        )?;
        Ok(self.get(url))
    }

    fn get(&self, url: String) -> HttpRequest {
        HttpRequest::get(url)
            .with_header("Referer", self.endpoints.web_referer.as_str())
            .with_cookies(&self.session.cookies)
    }
}
