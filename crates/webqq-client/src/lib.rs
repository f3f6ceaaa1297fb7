//! Message pipeline for a logged-in WebQQ session.
//!
//! This crate provides the I/O side of the client:
//!
//! - [`Inbox`] - long-poll loop feeding a [`ReceiveQueue`]
//! - [`Sender`] - asynchronous sends completing through a [`SendHandle`]
//! - [`MediaFetcher`] - downloads of pictures referenced by received messages
//! - [`Uploader`] - picture uploads for outgoing messages
//! - [`MessageClient`] - all of the above on one session
//!
//! # Architecture
//!
//! ```text
//!   poll2 ──▶ Poller ──▶ parse_poll_response ──▶ ReceiveQueue ──▶ consumer
//!                │                                    ▲
//!                └──▶ MediaFetcher (background) ──────┘ MediaUpdate
//!
//!   caller ──▶ Sender ──▶ encode_content ──▶ send_buddy_msg2 / send_qun_msg2
//!                 │
//!                 └──▶ SendHandle (Future<Output = ClientResult<()>>)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use webqq_client::{ClientConfig, MessageClient, Session};
//!
//! let session = Session::new(client_id, psessionid).with_cookies(cookies);
//! let client = MessageClient::new(session, ClientConfig::load()?)?;
//! while let Some(received) = client.inbox().recv().await {
//!     println!("{:?}", received.message);
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod inbox;
pub mod media;
pub mod poller;
pub mod queue;
pub mod sender;
pub mod session;
pub mod transport;
pub mod upload;


// Re-export main types at crate root
pub use client::MessageClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientErrorCode, ClientResult};
pub use inbox::Inbox;
pub use media::{MediaFetcher, MediaMode};
pub use poller::{Poller, PollerConfig, PollerHandle, PollerState, PollerStatus, SharedPollerState};
pub use queue::{MediaUpdate, OverflowPolicy, ReceiveQueue};
pub use sender::{SendHandle, Sender};
pub use session::Session;
#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
pub use transport::{BoxFuture, FormPart, HttpRequest, HttpResponse, HttpTransport, Method, RequestBody};
pub use upload::Uploader;
