//! Outbound webhook client port.
//!
//! `engine-infra` implements this with `reqwest`. Kept as a trait so the
//! WEBHOOK step dispatcher in `workflow::runtime` can be tested without a
//! network stack.

use engine_types::error::WebhookError;
use serde_json::Value;

/// The result of an outbound webhook call that completed at the HTTP layer
/// (i.e. did not fail with a network error). A non-2xx response is *not* a
/// `WebhookError` -- it is recorded as `ok: false` so the workflow can branch
/// on it (spec.md §4.1 WEBHOOK step, §5 failure classification).
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub ok: bool,
    pub body: Value,
}

/// An outbound HTTP request as assembled by the WEBHOOK step dispatcher.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub method: String,
    pub headers: std::collections::HashMap<String, String>,
    pub body: Value,
}

pub trait WebhookClient: Send + Sync {
    /// Issue the request. Network/timeout failures return `WebhookError`;
    /// any HTTP response, including non-2xx, is a successful `Ok`.
    fn call(
        &self,
        request: WebhookRequest,
    ) -> impl std::future::Future<Output = Result<WebhookResponse, WebhookError>> + Send;
}
