//! `reqwest`-backed implementation of `engine_core::webhook::WebhookClient`.

use std::str::FromStr;
use std::time::Duration;

use engine_core::webhook::{WebhookClient, WebhookRequest, WebhookResponse};
use engine_types::error::WebhookError;
use reqwest::{Client, Method};
use serde_json::Value;

/// Outbound WEBHOOK step dispatcher (spec.md §4.1).
///
/// Holds its own `reqwest::Client` so connection pooling is shared across
/// calls; `timeout` bounds each individual request regardless of method.
#[derive(Clone)]
pub struct ReqwestWebhookClient {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestWebhookClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder with only a timeout should never fail");
        Self { client, timeout_secs: timeout.as_secs() }
    }
}

impl WebhookClient for ReqwestWebhookClient {
    async fn call(&self, request: WebhookRequest) -> Result<WebhookResponse, WebhookError> {
        let method = Method::from_str(&request.method.to_uppercase())
            .map_err(|err| WebhookError::TransientProviderError(format!("invalid method {}: {err}", request.method)))?;

        let mut builder = self.client.request(method, &request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                WebhookError::Timeout(self.timeout_secs)
            } else {
                WebhookError::TransientProviderError(err.to_string())
            }
        })?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        Ok(WebhookResponse { status: status.as_u16(), ok: status.is_success(), body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_client_without_panicking() {
        let _client = ReqwestWebhookClient::new(Duration::from_secs(30));
    }
}
