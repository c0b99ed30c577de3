//! Multipart file upload with progress reporting
//!
//! The file is sent as field `file` of a multipart form. The body is
//! streamed in chunks and the progress callback is invoked after each chunk
//! is handed to the connection. Uploads follow the same token, retry and
//! span contract as every other mutating request; a replay rebuilds the form
//! and restarts progress from zero.

use crate::client::{RequestOptions, RequestTransport, decode};
use crate::error::{Result, TransportError};
use agora_core::UploadedFile;
use agora_core::wire::{WireUpload, upload_from_wire};
use async_stream::stream;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Method};
use std::sync::Arc;

/// Chunk size of the streamed upload body
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Default upload endpoint
pub const UPLOADS_PATH: &str = "/uploads";

/// A file to upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// File name reported to the server
    pub file_name: String,
    /// MIME type
    pub content_type: String,
    /// File contents
    pub bytes: Bytes,
}

impl UploadFile {
    /// Create an upload from owned bytes
    #[must_use]
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Size in bytes
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Whether the file is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Bytes of the file handed to the connection so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    /// Bytes sent
    pub sent: u64,
    /// Total file size
    pub total: u64,
}

impl UploadProgress {
    /// Completion in `0.0..=1.0`; an empty file is complete
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.sent as f64 / self.total as f64
        }
    }
}

type ProgressFn = Arc<dyn Fn(UploadProgress) + Send + Sync>;

fn progress_body(bytes: Bytes, on_progress: ProgressFn) -> Body {
    let total = bytes.len() as u64;
    let chunks = stream! {
        let mut offset = 0;
        while offset < bytes.len() {
            let end = usize::min(offset + UPLOAD_CHUNK_SIZE, bytes.len());
            yield Ok::<Bytes, std::io::Error>(bytes.slice(offset..end));
            offset = end;
            on_progress(UploadProgress { sent: offset as u64, total });
        }
    };
    Body::wrap_stream(chunks)
}

fn build_form(file: &UploadFile, on_progress: &ProgressFn) -> Result<Form> {
    let body = progress_body(file.bytes.clone(), Arc::clone(on_progress));
    let part = Part::stream_with_length(body, file.len())
        .file_name(file.file_name.clone())
        .mime_str(&file.content_type)
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
    Ok(Form::new().part("file", part))
}

impl RequestTransport {
    /// Upload a file to `path` (usually [`UPLOADS_PATH`]).
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidRequest` for an unparseable content
    /// type, and otherwise the same errors as
    /// [`RequestTransport::request_with`].
    pub async fn upload<P>(&self, path: &str, file: &UploadFile, on_progress: P) -> Result<UploadedFile>
    where
        P: Fn(UploadProgress) + Send + Sync + 'static,
    {
        let on_progress: ProgressFn = Arc::new(on_progress);
        tracing::debug!(
            file_name = %file.file_name,
            size = file.len(),
            "Uploading file"
        );

        let value = self
            .execute(Method::POST, path, &RequestOptions::default(), |builder| {
                Ok(builder.multipart(build_form(file, &on_progress)?))
            })
            .await?;

        let wire: WireUpload = decode(value)?;
        Ok(upload_from_wire(wire))
    }
}
