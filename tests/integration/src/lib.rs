//! Integration tests for a running s3gate server.
//!
//! These tests require:
//! - an S3-compatible server at `S3_ENDPOINT_URL` (default `http://localhost:4566`)
//!   holding the bucket `S3GATE_TEST_BUCKET` (default `s3gate-integration`);
//! - an s3gate server at `S3GATE_URL` (default `http://localhost:8080`) started
//!   with `demos/integration.yaml`.
//!
//! They are marked `#[ignore]` so they don't run during normal `cargo test`.
//!
//! Run them with:
//! ```text
//! cargo test -p s3gate-integration -- --ignored
//! ```

use std::sync::Once;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Endpoint URL of the backing S3 server.
fn s3_endpoint_url() -> String {
    std::env::var("S3_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:4566".to_owned())
}

/// Base URL of the gateway.
#[must_use]
pub fn gateway_url() -> String {
    std::env::var("S3GATE_URL").unwrap_or_else(|_| "http://localhost:8080".to_owned())
}

/// Bucket mounted at `/` by the integration configuration.
#[must_use]
pub fn test_bucket() -> String {
    std::env::var("S3GATE_TEST_BUCKET").unwrap_or_else(|_| "s3gate-integration".to_owned())
}

/// Create a configured S3 client pointing at the backing server.
#[must_use]
pub fn s3_client() -> aws_sdk_s3::Client {
    init_tracing();

    let creds = Credentials::new("test", "test", None, None, "integration-test");

    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(creds)
        .endpoint_url(s3_endpoint_url())
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(config)
}

/// HTTP client for the gateway that does not follow redirects.
#[must_use]
pub fn http_client() -> reqwest::Client {
    init_tracing();

    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("build http client")
}

/// Generate a unique key prefix for a test.
#[must_use]
pub fn test_prefix(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("test-{prefix}-{id}")
}

/// Store `body` under `key` in the test bucket.
pub async fn seed_object(client: &aws_sdk_s3::Client, key: &str, body: &'static [u8]) {
    client
        .put_object()
        .bucket(test_bucket())
        .key(key)
        .body(ByteStream::from_static(body))
        .content_type("text/plain")
        .checksum_algorithm(aws_sdk_s3::types::ChecksumAlgorithm::Sha256)
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to seed {key}: {e}"));
}

/// Delete every object below `prefix`.
pub async fn cleanup_prefix(client: &aws_sdk_s3::Client, prefix: &str) {
    let bucket = test_bucket();
    let Ok(resp) = client
        .list_objects_v2()
        .bucket(&bucket)
        .prefix(prefix)
        .send()
        .await
    else {
        return;
    };
    for obj in resp.contents() {
        if let Some(key) = obj.key() {
            let _ = client.delete_object().bucket(&bucket).key(key).send().await;
        }
    }
}

mod test_delete;
mod test_get;
mod test_put;
