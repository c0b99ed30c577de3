//! W3C Trace Context propagation for outbound requests
//!
//! Every request carries `traceparent` (and `tracestate` when present)
//! headers built from its `http.client` span, so server-side traces join the
//! client's.

use opentelemetry::propagation::TextMapPropagator;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Trace headers for `span`.
///
/// Empty when no OpenTelemetry layer is installed, since the span then has
/// no valid context.
#[must_use]
pub fn inject_trace_headers(span: &Span) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let propagator = TraceContextPropagator::new();
    let context = span.context();

    propagator.inject_context(&context, &mut headers);

    headers
}

/// Copy trace headers for `span` into a request header map.
///
/// Header pairs that are not valid HTTP are skipped.
pub fn apply_trace_headers(span: &Span, target: &mut HeaderMap) {
    for (name, value) in inject_trace_headers(span) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            target.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_headers_without_otel_context() {
        let span = tracing::info_span!("http.client");
        let mut headers = HeaderMap::new();

        apply_trace_headers(&span, &mut headers);

        assert!(!headers.contains_key("traceparent"));
    }
}
