//! The request transport
//!
//! [`RequestTransport`] issues every HTTP call the client makes. Mutating
//! calls carry the anti-forgery token; a rejected token is refreshed and the
//! call replayed once. Every call runs inside an `http.client` span whose
//! context is propagated to the server.

use crate::config::ClientConfig;
use crate::csrf::CsrfTokenCache;
use crate::error::{ApiError, Result, TransportError};
use crate::propagation::apply_trace_headers;
use crate::retry::{TokenRetryPolicy, is_mutating};
use agora_core::wire::{WireCsrfToken, csrf_token_from_wire};
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, Span, debug, error, field, info_span, warn};

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query parameters appended to the URL
    pub query: Vec<(String, String)>,
    /// Error statuses the caller expects; they are logged at `debug`
    pub suppress_statuses: Vec<u16>,
    /// Timeout overriding the configured default
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append several query parameters
    #[must_use]
    pub fn queries<I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.query.extend(pairs);
        self
    }

    /// Log `status` at `debug` instead of `warn`/`error`
    #[must_use]
    pub fn suppress(mut self, status: u16) -> Self {
        self.suppress_statuses.push(status);
        self
    }

    /// Set the timeout for this call
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct Inner {
    client: Client,
    config: ClientConfig,
    csrf: CsrfTokenCache,
    retry: TokenRetryPolicy,
}

/// HTTP transport for the Agora API.
///
/// Cheap to clone; clones share the connection pool, cookie jar and
/// anti-forgery token.
#[derive(Clone)]
pub struct RequestTransport {
    inner: Arc<Inner>,
}

impl RequestTransport {
    /// Build a transport from validated configuration
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Config` if the configuration is invalid, or
    /// `TransportError::InvalidRequest` if the HTTP client cannot be built
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                csrf: CsrfTokenCache::new(),
                retry: TokenRetryPolicy::default(),
            }),
        })
    }

    /// Build a transport from environment variables
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Config` if `AGORA_API_URL` is not set or the
    /// configuration is invalid
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// The configuration this transport was built with
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The anti-forgery token cache
    #[must_use]
    pub fn csrf(&self) -> &CsrfTokenCache {
        &self.inner.csrf
    }

    /// Absolute URL of an API path
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        self.inner.config.url(path)
    }

    /// Issue a request with default options.
    ///
    /// Returns the decoded JSON body, or `Value::Null` for an empty or `204`
    /// response.
    ///
    /// # Errors
    ///
    /// See [`RequestTransport::request_with`].
    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        self.request_with(method, path, body, &RequestOptions::default())
            .await
    }

    /// Issue a request.
    ///
    /// # Errors
    ///
    /// - `TransportError::Network` / `Timeout` when no response arrived
    /// - `TransportError::Api` for a non-2xx status, including a token
    ///   rejection that persisted through the retry
    /// - `TransportError::ResponseParseFailed` for an undecodable 2xx body
    pub async fn request_with(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<Value> {
        self.execute(method, path, options, |builder| {
            Ok(match body {
                Some(body) => builder.json(body),
                None => builder,
            })
        })
        .await
    }

    /// `GET` and decode
    ///
    /// # Errors
    ///
    /// See [`RequestTransport::request_with`].
    pub async fn get<T: DeserializeOwned>(&self, path: &str, options: &RequestOptions) -> Result<T> {
        decode(self.request_with(Method::GET, path, None, options).await?)
    }

    /// `POST` a body and decode
    ///
    /// # Errors
    ///
    /// See [`RequestTransport::request_with`].
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = encode(body)?;
        decode(self.request(Method::POST, path, Some(&body)).await?)
    }

    /// `PUT` a body and decode
    ///
    /// # Errors
    ///
    /// See [`RequestTransport::request_with`].
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = encode(body)?;
        decode(self.request(Method::PUT, path, Some(&body)).await?)
    }

    /// `PATCH` a body and decode
    ///
    /// # Errors
    ///
    /// See [`RequestTransport::request_with`].
    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = encode(body)?;
        decode(self.request(Method::PATCH, path, Some(&body)).await?)
    }

    /// `DELETE` and decode; use `()` for an empty response
    ///
    /// # Errors
    ///
    /// See [`RequestTransport::request_with`].
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        decode(self.request(Method::DELETE, path, None).await?)
    }

    /// Run one logical request: span, token, send and at most one replay.
    ///
    /// `attach` adds the body to each attempt's builder; it is called once
    /// per attempt so non-reusable bodies can be rebuilt.
    pub(crate) async fn execute<B>(
        &self,
        method: Method,
        path: &str,
        options: &RequestOptions,
        attach: B,
    ) -> Result<Value>
    where
        B: Fn(RequestBuilder) -> Result<RequestBuilder> + Sync,
    {
        let span = info_span!(
            "http.client",
            http.method = %method,
            http.target = %path,
            http.status_code = field::Empty,
            otel.kind = "client",
        );

        async {
            let result = self.send_with_retry(&method, path, options, &attach).await;
            log_outcome(&method, path, options, &result);
            result
        }
        .instrument(span)
        .await
    }

    async fn send_with_retry<B>(
        &self,
        method: &Method,
        path: &str,
        options: &RequestOptions,
        attach: &B,
    ) -> Result<Value>
    where
        B: Fn(RequestBuilder) -> Result<RequestBuilder> + Sync,
    {
        let needs_token = is_mutating(method) && !self.inner.config.csrf.is_exempt(path);
        let mut attempt = 0;

        loop {
            let token = if needs_token {
                Some(self.csrf_token().await?)
            } else {
                None
            };

            match self
                .send_once(method, path, options, token.as_deref(), attach)
                .await
            {
                Err(error) if token.is_some() && self.inner.retry.should_retry(method, &error, attempt) => {
                    if let Some(rejected) = token.as_deref() {
                        self.inner.csrf.invalidate_if(rejected);
                    }
                    counter!("transport.csrf.retries").increment(1);
                    warn!(
                        attempt,
                        status = ?error.status(),
                        "Anti-forgery token rejected, retrying with a fresh token"
                    );
                    attempt += 1;
                },
                result => return result,
            }
        }
    }

    async fn send_once<B>(
        &self,
        method: &Method,
        path: &str,
        options: &RequestOptions,
        token: Option<&str>,
        attach: &B,
    ) -> Result<Value>
    where
        B: Fn(RequestBuilder) -> Result<RequestBuilder> + Sync,
    {
        let mut headers = HeaderMap::new();
        apply_trace_headers(&Span::current(), &mut headers);
        if let Some(token) = token {
            let name = HeaderName::from_bytes(self.inner.config.csrf.header.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_str(token)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            headers.insert(name, value);
        }

        let mut builder = self
            .inner
            .client
            .request(method.clone(), self.url(path))
            .headers(headers);
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(timeout) = options.timeout.or_else(|| self.inner.config.request_timeout()) {
            builder = builder.timeout(timeout);
        }
        let builder = attach(builder)?;

        counter!("transport.requests.total").increment(1);
        let response = builder.send().await?;
        let status = response.status();
        Span::current().record("http.status_code", status.as_u16());
        let body = response.text().await?;

        if status.is_success() {
            if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body)
                .map_err(|e| TransportError::ResponseParseFailed(e.to_string()));
        }

        Err(TransportError::Api(ApiError::from_response(
            status.as_u16(),
            &body,
        )))
    }

    async fn csrf_token(&self) -> Result<String> {
        let transport = self.clone();
        self.inner
            .csrf
            .get_or_fetch(move || async move { transport.fetch_csrf_token().await })
            .await
    }

    async fn fetch_csrf_token(&self) -> Result<String> {
        counter!("transport.csrf.fetches").increment(1);
        debug!("Fetching anti-forgery token");

        let path = self.inner.config.csrf.path.as_str();
        let options = RequestOptions::default();
        let span = info_span!(
            "http.client",
            http.method = %Method::GET,
            http.target = %path,
            http.status_code = field::Empty,
            otel.kind = "client",
        );

        let result = self
            .send_once(&Method::GET, path, &options, None, &no_body)
            .instrument(span)
            .await;
        log_outcome(&Method::GET, path, &options, &result);

        let wire: WireCsrfToken = decode(result?)?;
        Ok(csrf_token_from_wire(wire)?)
    }
}

impl std::fmt::Debug for RequestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTransport")
            .field("base_url", &self.inner.config.base_url)
            .field("api_prefix", &self.inner.config.api_prefix)
            .field("csrf", &self.inner.csrf)
            .finish_non_exhaustive()
    }
}

/// Decode a response body into `T`
///
/// # Errors
///
/// Returns `TransportError::ResponseParseFailed` if the body does not match.
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| TransportError::ResponseParseFailed(e.to_string()))
}

#[allow(clippy::unnecessary_wraps)] // Matches the body-attaching signature
fn no_body(builder: RequestBuilder) -> Result<RequestBuilder> {
    Ok(builder)
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| TransportError::InvalidRequest(e.to_string()))
}

fn log_outcome(method: &Method, path: &str, options: &RequestOptions, result: &Result<Value>) {
    let Err(failure) = result else {
        debug!(%method, path, "Request succeeded");
        return;
    };
    counter!("transport.errors.total").increment(1);

    match failure {
        TransportError::Api(api) if options.suppress_statuses.contains(&api.status) => {
            debug!(%method, path, status = api.status, code = %api.code, "Request failed with expected status");
        },
        TransportError::Api(api) if api.is_server_error() => {
            error!(%method, path, status = api.status, code = %api.code, message = %api.message, "Server error");
        },
        TransportError::Api(api) => {
            warn!(%method, path, status = api.status, code = %api.code, message = %api.message, "Request rejected");
        },
        other => {
            error!(%method, path, error = %other, "Request failed without a response");
        },
    }
}
