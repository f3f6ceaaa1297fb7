//! HTTP transport abstraction.
//!
//! The poller, media fetcher, sender, and uploads only talk to the network
//! through [`HttpTransport`], which keeps them independent of the HTTP stack
//! and lets tests replay canned server responses.

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

#[cfg(feature = "reqwest")]
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// A boxed future for async trait methods.
///
/// Boxing keeps [`HttpTransport`] object-safe so it can be shared as
/// `Arc<dyn HttpTransport>` between the poller and send tasks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    /// A plain text field.
    Text { name: String, value: String },
    /// A file field.
    File {
        name: String,
        filename: String,
        content_type: String,
        data: Vec<u8>,
    },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self::File {
            name: name.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Returns the field name.
    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::File { name, .. } => name,
        }
    }
}

/// Request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestBody {
    #[default]
    Empty,
    /// An `application/x-www-form-urlencoded` body, already encoded.
    Form(String),
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    /// Returns the approximate payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Form(body) => body.len(),
            Self::Multipart(parts) => parts
                .iter()
                .map(|part| match part {
                    FormPart::Text { value, .. } => value.len(),
                    FormPart::File { data, .. } => data.len(),
                })
                .sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    /// Per-request timeout overriding the transport default.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    /// Creates a POST request with an urlencoded form body.
    pub fn post_form(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Form(body.into()),
            timeout: None,
        }
        .with_header("Content-Type", "application/x-www-form-urlencoded")
    }

    /// Creates a POST request with a multipart body.
    pub fn post_multipart(url: impl Into<String>, parts: Vec<FormPart>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Multipart(parts),
            timeout: None,
        }
    }

    /// Builder: add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builder: add a `Cookie` header unless `cookies` is empty.
    pub fn with_cookies(self, cookies: &str) -> Self {
        if cookies.is_empty() {
            self
        } else {
            self.with_header("Cookie", cookies)
        }
    }

    /// Builder: set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the first header named `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// An HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response without headers.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Returns the body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Fails with an `HttpStatus` error unless the status is one of `accepted`.
    pub fn require_status(self, accepted: &[u16], what: &str) -> ClientResult<Self> {
        if accepted.contains(&self.status) {
            Ok(self)
        } else {
            Err(ClientError::http_status(
                self.status,
                format!("{} returned unexpected status", what),
            ))
        }
    }
}

/// Executes HTTP requests on behalf of the client.
///
/// Implementations must be `Send + Sync`: one instance is shared by the
/// poller task, background media tasks, and every send task.
pub trait HttpTransport: Send + Sync {
    /// Performs the request and returns the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns a `Network` error when no response was received.
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, ClientResult<HttpResponse>>;

    /// Returns a short name for logs.
    fn name(&self) -> &str {
        "http"
    }
}

/// [`HttpTransport`] backed by a `reqwest` client.
#[cfg(feature = "reqwest")]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[cfg(feature = "reqwest")]
impl ReqwestTransport {
    /// Creates a transport whose requests time out after `timeout` unless
    /// they set their own.
    pub fn new(timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::configuration("failed to create HTTP client").with_source(e))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "reqwest")]
fn multipart_form(parts: Vec<FormPart>) -> ClientResult<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name, value),
            FormPart::File {
                name,
                filename,
                content_type,
                data,
            } => {
                let file = reqwest::multipart::Part::bytes(data)
                    .file_name(filename)
                    .mime_str(&content_type)
                    .map_err(|e| {
                        ClientError::invalid_message(format!(
                            "invalid content type {}",
                            content_type
                        ))
                        .with_source(e)
                    })?;
                form.part(name, file)
            }
        };
    }
    Ok(form)
}

#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'_, ClientResult<HttpResponse>> {
        Box::pin(async move {
            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
            };
            let mut builder = self.client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            builder = match request.body {
                RequestBody::Empty => builder,
                RequestBody::Form(body) => builder.body(body),
                RequestBody::Multipart(parts) => builder.multipart(multipart_form(parts)?),
            };

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    ClientError::network("request timeout")
                } else if e.is_connect() {
                    ClientError::network(format!("connection failed: {}", e))
                } else {
                    ClientError::network(format!("request failed: {}", e))
                }
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response
                .bytes()
                .await
                .map_err(|e| ClientError::network(format!("failed to read response: {}", e)))?
                .to_vec();

            debug!(url = %request.url, status, bytes = body.len(), "http request completed");
            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use crate::error::ClientErrorCode;

    #[test]
    fn request_builders() {
        let request = HttpRequest::post_form("http://example/poll2", "r=1")
            .with_header("Referer", "http://example/proxy.html")
            .with_cookies("ptwebqq=abc")
            .with_timeout(Duration::from_secs(3));

        assert_eq!(request.method, Method::Post);
        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(request.header("cookie"), Some("ptwebqq=abc"));
        assert_eq!(request.timeout, Some(Duration::from_secs(3)));
        assert_eq!(request.body.len(), 3);
    }

    #[test]
    fn empty_cookies_add_no_header() {
        let request = HttpRequest::get("http://example/").with_cookies("");
        assert!(request.header("Cookie").is_none());
        assert!(request.body.is_empty());
    }

    #[test]
    fn multipart_len_counts_values_and_files() {
        let body = RequestBody::Multipart(vec![
            FormPart::text("from", "control"),
            FormPart::file("custom_face", "a.png", "image/png", vec![0; 10]),
        ]);
        assert_eq!(body.len(), 17);
    }

    #[test]
    fn require_status() {
        let ok = HttpResponse::new(302, "moved").require_status(&[200, 302], "fetch");
        assert!(ok.is_ok());

        let err = HttpResponse::new(404, "")
            .require_status(&[200], "fetch")
            .unwrap_err();
        assert_eq!(err.code(), ClientErrorCode::HttpStatus);
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn scripted_transport_replays_in_order() {
        let transport = ScriptedTransport::new();
        transport.respond("/a", 200, "first");
        transport.respond("/a", 500, "second");
        transport.fail("/b", ClientErrorCode::Network, "down");

        let first = transport.execute(HttpRequest::get("http://x/a")).await.unwrap();
        assert_eq!(first.text(), "first");
        let second = transport.execute(HttpRequest::get("http://x/a")).await.unwrap();
        assert_eq!(second.status, 500);
        let err = transport.execute(HttpRequest::get("http://x/b")).await.unwrap_err();
        assert_eq!(err.code(), ClientErrorCode::Network);

        assert_eq!(transport.count("/a"), 2);
        assert_eq!(transport.requests().len(), 3);
    }
}
