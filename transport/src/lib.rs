//! # Agora Transport
//!
//! HTTP request transport for the Agora client.
//!
//! ## Features
//!
//! - **Anti-forgery tokens**: fetched lazily, cached, refreshed through a
//!   single-flight and attached to every mutating request
//! - **Bounded retry**: a rejected token is refreshed and the request
//!   replayed exactly once
//! - **Tracing**: every call runs in an `http.client` span and propagates
//!   W3C trace context
//! - **Error classification**: non-2xx bodies become [`ApiError`] with MFA
//!   and disambiguation helpers
//! - **Uploads** with progress reporting, and time-bounded **embed** fetches
//!
//! ## Example
//!
//! ```no_run
//! use agora_transport::{ClientConfig, Method, RequestTransport};
//! use serde_json::json;
//!
//! # async fn example() -> agora_transport::Result<()> {
//! let transport = RequestTransport::new(ClientConfig::new("https://agora.example"))?;
//!
//! // Carries X-CSRF-Token; the token is fetched on first use
//! let body = json!({ "rating": 4 });
//! let saved = transport
//!     .request(Method::PUT, "/posts/p1/bookshelf", Some(&body))
//!     .await?;
//! println!("{saved}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod csrf;
pub mod embed;
pub mod error;
pub mod propagation;
pub mod retry;
pub mod telemetry;
pub mod upload;

pub use client::{RequestOptions, RequestTransport, decode};
pub use config::{ClientConfig, ConfigError, CsrfConfig, ObservabilityConfig};
pub use csrf::CsrfTokenCache;
pub use error::{ApiError, Result, TransportError};
pub use retry::{TokenRetryPolicy, is_token_rejection};
pub use upload::{UploadFile, UploadProgress};

// Re-exported so callers can name methods without depending on reqwest
pub use reqwest::Method;
