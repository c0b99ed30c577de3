//! Link preview fetches.
//!
//! Embeds are auxiliary: they sit outside the mutation path, so they are the
//! one call with a client-enforced timeout (`embed_timeout_secs`, 5 seconds
//! by default). A preview the server cannot build is reported as `None`
//! rather than as an error.

use crate::client::{RequestOptions, RequestTransport, decode};
use crate::error::Result;
use agora_core::EmbedPreview;
use agora_core::wire::{WireEmbed, embed_from_wire};
use reqwest::Method;

/// Embed preview endpoint
pub const EMBEDS_PATH: &str = "/embeds";

impl RequestTransport {
    /// Fetch a preview for `url`.
    ///
    /// Returns `Ok(None)` when the server has no preview (`404`/`422`).
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Timeout` once the embed timeout elapses, and
    /// otherwise the same errors as [`RequestTransport::request_with`].
    pub async fn fetch_embed(&self, url: &str) -> Result<Option<EmbedPreview>> {
        let options = RequestOptions::new()
            .query("url", url)
            .suppress(404)
            .suppress(422)
            .timeout(self.config().embed_timeout());

        match self.request_with(Method::GET, EMBEDS_PATH, None, &options).await {
            Ok(value) => {
                let wire: WireEmbed = decode(value)?;
                Ok(Some(embed_from_wire(wire)))
            },
            Err(error) if matches!(error.status(), Some(404 | 422)) => Ok(None),
            Err(error) => Err(error),
        }
    }
}
