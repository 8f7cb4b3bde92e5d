//! [`ObjectStore`] over `aws-sdk-s3`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as SdkDateTime};
use aws_sdk_s3::types::{ChecksumMode, ObjectCannedAcl, StorageClass};
use aws_smithy_runtime_api::http::{Request as SdkRequest, Response as SdkResponse};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, warn};

use super::list::{ListPage, ListedObject, PageSource, counted_listing};
use super::{
    DELETE_OBJECT_OPERATION, GET_OBJECT_OPERATION, GetConditions, GetOutput,
    HEAD_OBJECT_OPERATION, HeadOutput, LIST_OBJECTS_OPERATION, ObjectDescriptor, ObjectMetadata,
    ObjectStore, ObjectStream, PUT_OBJECT_OPERATION, PutRequest, ResultInfo,
};
use crate::checksums::ObjectChecksums;
use crate::config::{RequestConfig, TargetConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::metrics::Metrics;

/// S3-backed store for one target.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    target_name: String,
    bucket: String,
    region: String,
    endpoint: String,
    list_max_keys: i32,
    request_config: Arc<RequestConfig>,
    metrics: Arc<dyn Metrics>,
}

impl S3ObjectStore {
    /// Build a client from the target's bucket settings.
    ///
    /// Static credentials are used when configured, otherwise the SDK's
    /// default provider chain.
    pub async fn from_target(
        target: &TargetConfig,
        metrics: Arc<dyn Metrics>,
    ) -> GatewayResult<Self> {
        let bucket = &target.bucket;
        let region = Region::new(bucket.region.clone());

        let mut builder = if let Some(creds) = &bucket.credentials {
            let credentials = Credentials::new(
                creds.access_key.resolve()?,
                creds.secret_key.resolve()?,
                None,
                None,
                "s3gate-config",
            );
            aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(credentials)
        } else {
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            aws_sdk_s3::config::Builder::from(&shared)
        };

        let endpoint = bucket
            .s3_endpoint
            .as_deref()
            .map(|ep| endpoint_url(ep, bucket.disable_ssl))
            .unwrap_or_default();
        if !endpoint.is_empty() {
            builder = builder.endpoint_url(&endpoint).force_path_style(true);
        }
        builder = builder.retry_config(RetryConfig::disabled());

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            target_name: target.name.clone(),
            bucket: bucket.name.clone(),
            region: bucket.region.clone(),
            endpoint,
            list_max_keys: bucket.s3_list_max_keys,
            request_config: Arc::new(bucket.request_config.clone()),
            metrics,
        })
    }

    fn result_info(&self, key: &str) -> ResultInfo {
        ResultInfo {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            s3_endpoint: self.endpoint.clone(),
            key: key.to_owned(),
        }
    }

    fn count(&self, operation: &str) {
        self.metrics
            .inc_s3_operations(&self.target_name, &self.bucket, operation);
    }
}

#[async_trait]
impl PageSource for S3ObjectStore {
    async fn fetch_page(
        &self,
        prefix: &str,
        token: Option<String>,
        max_keys: i32,
    ) -> GatewayResult<ListPage> {
        let headers = self.request_config.list_headers.clone();
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .delimiter("/")
            .max_keys(max_keys)
            .set_continuation_token(token)
            .customize()
            .mutate_request(move |req| apply_headers(req, &headers))
            .send()
            .await
            .map_err(|e| provider_error(LIST_OBJECTS_OPERATION, prefix, &e))?;

        Ok(ListPage {
            common_prefixes: output
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix().map(ToOwned::to_owned))
                .collect(),
            objects: output
                .contents()
                .iter()
                .map(|o| ListedObject {
                    key: o.key().unwrap_or_default().to_owned(),
                    etag: o.e_tag().unwrap_or_default().to_owned(),
                    size: o.size().unwrap_or_default(),
                    last_modified: o.last_modified().and_then(to_chrono),
                })
                .collect(),
            key_count: output.key_count().unwrap_or_default(),
            next_token: output
                .next_continuation_token()
                .filter(|t| !t.is_empty())
                .map(ToOwned::to_owned),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, prefix: &str) -> GatewayResult<(Vec<ObjectDescriptor>, ResultInfo)> {
        debug!(bucket = %self.bucket, prefix, "listing objects");
        let entries = counted_listing(
            self,
            prefix,
            self.list_max_keys,
            self.metrics.as_ref(),
            &self.target_name,
            &self.bucket,
        )
        .await?;
        Ok((entries, self.result_info(prefix)))
    }

    async fn head(&self, key: &str) -> GatewayResult<(HeadOutput, ResultInfo)> {
        debug!(bucket = %self.bucket, key, "head object");
        let headers = self.request_config.get_headers.clone();
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .checksum_mode(ChecksumMode::Enabled)
            .customize()
            .mutate_request(move |req| apply_headers(req, &headers))
            .send()
            .await;
        self.count(HEAD_OBJECT_OPERATION);

        let output = result.map_err(|e| match classify_sdk_error(&e) {
            Some(mapped @ GatewayError::NotFound) => mapped,
            _ => provider_error(HEAD_OBJECT_OPERATION, key, &e),
        })?;

        let checksums = ObjectChecksums {
            sha256: output.checksum_sha256().map(ToOwned::to_owned),
            sha1: output.checksum_sha1().map(ToOwned::to_owned),
            crc32c: output.checksum_crc32_c().map(ToOwned::to_owned),
            crc32: output.checksum_crc32().map(ToOwned::to_owned),
        };
        let metadata = ObjectMetadata {
            cache_control: output.cache_control().unwrap_or_default().to_owned(),
            expires: output.expires_string().unwrap_or_default().to_owned(),
            content_disposition: output.content_disposition().unwrap_or_default().to_owned(),
            content_encoding: output.content_encoding().unwrap_or_default().to_owned(),
            content_language: output.content_language().unwrap_or_default().to_owned(),
            content_length: output.content_length().unwrap_or_default(),
            content_range: String::new(),
            content_type: output.content_type().unwrap_or_default().to_owned(),
            etag: output.e_tag().unwrap_or_default().to_owned(),
            last_modified: output.last_modified().and_then(to_chrono),
            content_digest: checksums.content_digest(),
            metadata: output.metadata().cloned().unwrap_or_default(),
        };

        Ok((
            HeadOutput {
                key: key.to_owned(),
                metadata,
            },
            self.result_info(key),
        ))
    }

    async fn get(
        &self,
        key: &str,
        conditions: &GetConditions,
    ) -> GatewayResult<(GetOutput, ResultInfo)> {
        debug!(bucket = %self.bucket, key, "get object");
        let headers = self.request_config.get_headers.clone();
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .checksum_mode(ChecksumMode::Enabled)
            .set_if_modified_since(conditions.if_modified_since.map(to_sdk))
            .set_if_unmodified_since(conditions.if_unmodified_since.map(to_sdk))
            .set_if_match(conditions.if_match.clone())
            .set_if_none_match(conditions.if_none_match.clone())
            .set_range(conditions.range.clone())
            .customize()
            .mutate_request(move |req| apply_headers(req, &headers))
            .send()
            .await;
        self.count(GET_OBJECT_OPERATION);

        let output = result.map_err(|e| {
            classify_sdk_error(&e).unwrap_or_else(|| provider_error(GET_OBJECT_OPERATION, key, &e))
        })?;

        let checksums = ObjectChecksums {
            sha256: output.checksum_sha256().map(ToOwned::to_owned),
            sha1: output.checksum_sha1().map(ToOwned::to_owned),
            crc32c: output.checksum_crc32_c().map(ToOwned::to_owned),
            crc32: output.checksum_crc32().map(ToOwned::to_owned),
        };
        let metadata = ObjectMetadata {
            cache_control: output.cache_control().unwrap_or_default().to_owned(),
            expires: output.expires_string().unwrap_or_default().to_owned(),
            content_disposition: output.content_disposition().unwrap_or_default().to_owned(),
            content_encoding: output.content_encoding().unwrap_or_default().to_owned(),
            content_language: output.content_language().unwrap_or_default().to_owned(),
            content_length: output.content_length().unwrap_or_default(),
            content_range: output.content_range().unwrap_or_default().to_owned(),
            content_type: output.content_type().unwrap_or_default().to_owned(),
            etag: output.e_tag().unwrap_or_default().to_owned(),
            last_modified: output.last_modified().and_then(to_chrono),
            content_digest: checksums.content_digest(),
            metadata: output.metadata().cloned().unwrap_or_default(),
        };

        Ok((
            GetOutput {
                body: into_object_stream(output.body),
                metadata,
            },
            self.result_info(key),
        ))
    }

    async fn put(&self, request: PutRequest) -> GatewayResult<ResultInfo> {
        debug!(bucket = %self.bucket, key = %request.key, "put object");
        let headers = self.request_config.put_headers.clone();
        let key = request.key;
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(request.body))
            .content_type(request.content_type)
            .content_length(request.content_size)
            .set_cache_control(request.cache_control)
            .set_content_disposition(request.content_disposition)
            .set_content_encoding(request.content_encoding)
            .set_content_language(request.content_language)
            .set_expires(request.expires.map(to_sdk))
            .set_metadata(request.metadata.map(|m| m.into_iter().collect()))
            .set_storage_class(request.storage_class.as_deref().map(StorageClass::from))
            .set_acl(request.canned_acl.as_deref().map(ObjectCannedAcl::from))
            .customize()
            .mutate_request(move |req| apply_headers(req, &headers))
            .send()
            .await;
        self.count(PUT_OBJECT_OPERATION);

        result.map_err(|e| provider_error(PUT_OBJECT_OPERATION, &key, &e))?;
        Ok(self.result_info(&key))
    }

    async fn delete(&self, key: &str) -> GatewayResult<ResultInfo> {
        debug!(bucket = %self.bucket, key, "delete object");
        let headers = self.request_config.delete_headers.clone();
        let result = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .customize()
            .mutate_request(move |req| apply_headers(req, &headers))
            .send()
            .await;
        self.count(DELETE_OBJECT_OPERATION);

        result.map_err(|e| provider_error(DELETE_OBJECT_OPERATION, key, &e))?;
        Ok(self.result_info(key))
    }

    async fn signed_url(
        &self,
        key: &str,
        conditions: &GetConditions,
        expiration: Duration,
    ) -> GatewayResult<String> {
        let presigning =
            PresigningConfig::expires_in(expiration).context("invalid presign expiration")?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_if_modified_since(conditions.if_modified_since.map(to_sdk))
            .set_if_unmodified_since(conditions.if_unmodified_since.map(to_sdk))
            .set_if_match(conditions.if_match.clone())
            .set_if_none_match(conditions.if_none_match.clone())
            .set_range(conditions.range.clone())
            .presigned(presigning)
            .await
            .map_err(|e| provider_error("presign-get-object", key, &e))?;
        Ok(presigned.uri().to_owned())
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Map a provider error code and HTTP status onto the expected outcomes.
///
/// Returns `None` for anything that must stay opaque.
pub(crate) fn classify_provider_error(
    code: Option<&str>,
    status: Option<u16>,
) -> Option<GatewayError> {
    match (code, status) {
        (Some("NoSuchKey" | "NotFound"), _) | (None, Some(404)) => Some(GatewayError::NotFound),
        (Some("NotModified"), _) | (None, Some(304)) => Some(GatewayError::NotModified),
        (Some("PreconditionFailed"), _) | (None, Some(412)) => {
            Some(GatewayError::PreconditionFailed)
        }
        _ => None,
    }
}

fn classify_sdk_error<E>(err: &SdkError<E, SdkResponse>) -> Option<GatewayError>
where
    E: ProvideErrorMetadata,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    classify_provider_error(err.code(), status)
}

fn provider_error<E>(operation: &str, key: &str, err: &E) -> GatewayError
where
    E: std::error::Error,
{
    GatewayError::Internal(anyhow::anyhow!(
        "{operation} failed for {key}: {}",
        DisplayErrorContext(err)
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn endpoint_url(endpoint: &str, disable_ssl: bool) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_owned();
    }
    let scheme = if disable_ssl { "http" } else { "https" };
    format!("{scheme}://{endpoint}")
}

fn apply_headers(req: &mut SdkRequest, headers: &BTreeMap<String, String>) {
    for (name, value) in headers {
        if let Err(e) = req.headers_mut().try_insert(name.clone(), value.clone()) {
            warn!(header = %name, error = %e, "skipping invalid request header");
        }
    }
}

fn into_object_stream(body: ByteStream) -> ObjectStream {
    futures::stream::unfold(body, |mut body| async move {
        body.next()
            .await
            .map(|chunk| (chunk.map_err(std::io::Error::other), body))
    })
    .boxed()
}

fn to_chrono(dt: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn to_sdk(dt: DateTime<Utc>) -> SdkDateTime {
    SdkDateTime::from_secs(dt.timestamp())
}
