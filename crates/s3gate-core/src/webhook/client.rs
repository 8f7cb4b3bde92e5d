//! HTTP client for one declared webhook.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use tracing::debug;

use crate::config::WebhookConfig;
use crate::error::{GatewayError, GatewayResult};

/// Maximum number of redirects a hook follows.
pub const REDIRECT_LIMIT: usize = 20;

/// Ready-to-use client for one webhook.
#[derive(Debug, Clone)]
pub struct HookClient {
    client: reqwest::Client,
    url: String,
    method: Method,
    headers: HeaderMap,
    retry_count: u32,
    wait: Duration,
    max_wait: Duration,
}

impl HookClient {
    /// Build the client, resolving secret headers once.
    pub fn new(config: &WebhookConfig) -> GatewayResult<Self> {
        let (wait, max_wait) = config.retry_waits()?;
        let method = Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| GatewayError::Config(format!("webhook {}: {e}", config.url)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            insert_header(&mut headers, name, value)?;
        }
        for (name, secret) in &config.secret_headers {
            insert_header(&mut headers, name, &secret.resolve()?)?;
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(REDIRECT_LIMIT))
            .build()
            .context("build webhook http client")?;

        Ok(Self {
            client,
            url: config.url.clone(),
            method,
            headers,
            retry_count: config.retry_count,
            wait,
            max_wait,
        })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `body`, retrying transport failures with a doubling wait.
    ///
    /// Any HTTP answer, whatever its status, ends the attempts.
    pub async fn send(&self, body: &[u8]) -> Result<(StatusCode, String), reqwest::Error> {
        let mut attempt = 0;
        let mut wait = self.wait;
        loop {
            let result = self
                .client
                .request(self.method.clone(), &self.url)
                .headers(self.headers.clone())
                .body(body.to_vec())
                .send()
                .await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Ok((status, text));
                }
                Err(e) if attempt < self.retry_count => {
                    attempt += 1;
                    debug!(url = %self.url, attempt, error = %e, "webhook transport error, retrying");
                    tokio::time::sleep(wait).await;
                    wait = (wait * 2).min(self.max_wait);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> GatewayResult<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| GatewayError::Config(format!("invalid webhook header name {name}: {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| GatewayError::Config(format!("invalid webhook header value for {name}: {e}")))?;
    headers.insert(name, value);
    Ok(())
}
