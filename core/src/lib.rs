//! Async client for the notification orchestration API.
//!
//! # Overview
//! Exposes events, users, flows, templates and webhooks through
//! [`NotifyClient`]. Payloads are opaque JSON; the service owns their schema
//! and validation.
//!
//! # Design
//! - Every call goes through one [`Dispatcher`], which adds authentication,
//!   encodes the body and applies the retry policy (429 honours
//!   `retry-after`, transport failures back off exponentially, everything
//!   else fails fast).
//! - Requests and responses are plain data (`HttpRequest` / `HttpResponse`);
//!   the network round trip sits behind the [`Transport`] trait so the
//!   dispatcher can be driven without a socket.
//! - Configuration is immutable after construction and shared by clones.
//!
//! ```no_run
//! use notify_core::{ListOptions, NotifyClient};
//! use serde_json::json;
//!
//! # async fn example() -> notify_core::Result<()> {
//! let client = NotifyClient::from_env()?;
//! client
//!     .events()
//!     .ingest(&json!({"event_name": "order.shipped", "user_id": "u1"}))
//!     .await?;
//! let templates = client
//!     .templates()
//!     .list(&ListOptions::new().with("channel", "zns"))
//!     .await?;
//! # let _ = templates;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod resources;
pub mod transport;

pub use client::NotifyClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use dispatch::{Dispatcher, Outcome, RequestOptions, TRACING_TARGET};
pub use error::{ApiError, Error, Result, TransportError};
pub use http::{ApiResponse, HttpMethod, HttpRequest, HttpResponse, RateLimit};
pub use resources::{Events, Flows, ListOptions, Templates, Users, Webhooks};
pub use transport::{ReqwestTransport, Transport};
