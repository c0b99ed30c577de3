//! Anti-forgery token cache.
//!
//! The token is fetched lazily, cached until the server rejects it and
//! refreshed through a single-flight, so N concurrent mutations with an empty
//! cache trigger exactly one fetch.

use crate::error::TransportError;
use agora_core::SingleFlight;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

type TokenResult = Result<String, TransportError>;

/// Shared anti-forgery token state for one transport.
#[derive(Clone, Default)]
pub struct CsrfTokenCache {
    token: Arc<Mutex<Option<String>>>,
    flight: SingleFlight<(), TokenResult>,
}

impl CsrfTokenCache {
    /// Empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token, if any
    #[must_use]
    pub fn cached(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return the cached token or join the pending fetch, starting one with
    /// `fetch` if none is pending.
    ///
    /// The fetched token is stored by the fetch itself, so the cache is
    /// populated even if every caller stops waiting.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, shared by every caller that joined it.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> TokenResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TokenResult> + Send + 'static,
    {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let slot = Arc::clone(&self.token);
        self.flight
            .run((), move || {
                let pending = fetch();
                async move {
                    let token = pending.await?;
                    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
                    Ok(token)
                }
            })
            .await
    }

    /// Drop the cached token
    pub fn invalidate(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Drop the cached token only if it is still `rejected`.
    ///
    /// A concurrent request may already have replaced it; that newer token
    /// is kept.
    pub fn invalidate_if(&self, rejected: &str) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if token.as_deref() == Some(rejected) {
            *token = None;
        }
    }

    /// Whether a fetch is pending
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.flight.is_in_flight(&())
    }
}

impl std::fmt::Debug for CsrfTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfTokenCache")
            .field("cached", &self.cached().is_some())
            .field("fetching", &self.is_fetching())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fetcher(
        calls: &Arc<AtomicUsize>,
        token: &'static str,
    ) -> impl Future<Output = TokenResult> + Send + 'static {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(token.to_string())
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_trigger_one_fetch() {
        let cache = CsrfTokenCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let tokens = futures::future::join_all(
            (0..8).map(|_| cache.get_or_fetch(|| fetcher(&calls, "tok-1"))),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| matches!(t.as_deref(), Ok("tok-1"))));
        assert_eq!(cache.cached().as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_cached_token_skips_fetch() {
        let cache = CsrfTokenCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_fetch(|| fetcher(&calls, "tok-1")).await.unwrap();
        cache.get_or_fetch(|| fetcher(&calls, "tok-2")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_if_keeps_newer_token() {
        let cache = CsrfTokenCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        cache.get_or_fetch(|| fetcher(&calls, "tok-2")).await.unwrap();

        cache.invalidate_if("tok-1");
        assert_eq!(cache.cached().as_deref(), Some("tok-2"));

        cache.invalidate_if("tok-2");
        assert!(cache.cached().is_none());
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let cache = CsrfTokenCache::new();

        let failed = cache
            .get_or_fetch(|| async { Err(TransportError::Network("offline".to_string())) })
            .await;
        assert!(failed.is_err());
        assert!(cache.cached().is_none());
        assert!(!cache.is_fetching());
    }
}
