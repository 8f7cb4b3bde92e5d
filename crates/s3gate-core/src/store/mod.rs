//! Object store adapter.
//!
//! [`ObjectStore`] is the per-target capability the gateway drives. The
//! production implementation is [`S3ObjectStore`]; listing pagination is kept
//! separate in [`list`] so it can be exercised without a provider.
//!
//! Cancellation follows the async model: dropping the returned future aborts
//! the in-flight call.

pub mod list;
mod s3;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::GatewayResult;

pub use list::{ListPage, ListedObject, PageSource, collect_listing};
pub use s3::S3ObjectStore;

/// Operation label for list calls.
pub const LIST_OBJECTS_OPERATION: &str = "list-objects";
/// Operation label for get calls.
pub const GET_OBJECT_OPERATION: &str = "get-object";
/// Operation label for head calls.
pub const HEAD_OBJECT_OPERATION: &str = "head-object";
/// Operation label for put calls.
pub const PUT_OBJECT_OPERATION: &str = "put-object";
/// Operation label for delete calls.
pub const DELETE_OBJECT_OPERATION: &str = "delete-object";

/// Protocol maximum for one list page.
pub const S3_MAX_KEYS: i32 = 1000;

/// Streamed object body. Dropping it releases the underlying connection.
pub type ObjectStream = BoxStream<'static, io::Result<Bytes>>;

/// Entry kind in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectKind {
    /// A regular object.
    File,
    /// A common prefix.
    Folder,
}

/// One listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDescriptor {
    /// Entry kind.
    pub kind: ObjectKind,
    /// Full object key (or common prefix).
    pub key: String,
    /// Key relative to the listed prefix.
    pub name: String,
    /// Entity tag.
    pub etag: String,
    /// Size in bytes.
    pub size: i64,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Where an operation ran. Handed to webhooks as output metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultInfo {
    /// Bucket name.
    pub bucket: String,
    /// Bucket region.
    pub region: String,
    /// Custom endpoint, if any.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub s3_endpoint: String,
    /// Object key or listed prefix.
    pub key: String,
}

/// Content metadata shared by head and get.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// `Cache-Control`.
    pub cache_control: String,
    /// `Expires`.
    pub expires: String,
    /// `Content-Disposition`.
    pub content_disposition: String,
    /// `Content-Encoding`.
    pub content_encoding: String,
    /// `Content-Language`.
    pub content_language: String,
    /// `Content-Length`.
    pub content_length: i64,
    /// `Content-Range`, for ranged reads.
    pub content_range: String,
    /// `Content-Type`.
    pub content_type: String,
    /// `ETag`.
    pub etag: String,
    /// `Last-Modified`.
    pub last_modified: Option<DateTime<Utc>>,
    /// Selected `Content-Digest` value, empty when none qualifies.
    pub content_digest: String,
    /// User metadata.
    pub metadata: HashMap<String, String>,
}

/// Result of a head call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadOutput {
    /// The key that was inspected.
    pub key: String,
    /// Content metadata.
    pub metadata: ObjectMetadata,
}

/// Conditional and range parameters for a get call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetConditions {
    /// `If-Modified-Since`.
    pub if_modified_since: Option<DateTime<Utc>>,
    /// `If-Unmodified-Since`.
    pub if_unmodified_since: Option<DateTime<Utc>>,
    /// `If-Match`.
    pub if_match: Option<String>,
    /// `If-None-Match`.
    pub if_none_match: Option<String>,
    /// `Range`.
    pub range: Option<String>,
}

/// Result of a get call. The caller owns `body`.
pub struct GetOutput {
    /// Object content.
    pub body: ObjectStream,
    /// Content metadata.
    pub metadata: ObjectMetadata,
}

impl fmt::Debug for GetOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetOutput")
            .field("body", &"<stream>")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Parameters of a put call. Unset options are omitted from the request.
#[derive(Debug, Clone, Default)]
pub struct PutRequest {
    /// Destination key.
    pub key: String,
    /// Object content.
    pub body: Bytes,
    /// `Content-Type`.
    pub content_type: String,
    /// Content length in bytes.
    pub content_size: i64,
    /// `Cache-Control`.
    pub cache_control: Option<String>,
    /// `Content-Disposition`.
    pub content_disposition: Option<String>,
    /// `Content-Encoding`.
    pub content_encoding: Option<String>,
    /// `Content-Language`.
    pub content_language: Option<String>,
    /// `Expires`.
    pub expires: Option<DateTime<Utc>>,
    /// User metadata.
    pub metadata: Option<BTreeMap<String, String>>,
    /// Storage class.
    pub storage_class: Option<String>,
    /// Canned ACL.
    pub canned_acl: Option<String>,
}

/// Per-target object store capability.
///
/// Implementations perform no retries. Every call that reaches the network
/// emits exactly one operation metric, whatever the outcome.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// List the direct children of `prefix`, folders first.
    async fn list(&self, prefix: &str) -> GatewayResult<(Vec<ObjectDescriptor>, ResultInfo)>;

    /// Fetch metadata for `key`. Missing keys yield `GatewayError::NotFound`.
    async fn head(&self, key: &str) -> GatewayResult<(HeadOutput, ResultInfo)>;

    /// Open `key` for reading with conditional parameters.
    async fn get(
        &self,
        key: &str,
        conditions: &GetConditions,
    ) -> GatewayResult<(GetOutput, ResultInfo)>;

    /// Store one object.
    async fn put(&self, request: PutRequest) -> GatewayResult<ResultInfo>;

    /// Remove exactly one object.
    async fn delete(&self, key: &str) -> GatewayResult<ResultInfo>;

    /// Presigned GET URL for `key`. `conditions` are signed into the URL.
    async fn signed_url(
        &self,
        key: &str,
        conditions: &GetConditions,
        expiration: Duration,
    ) -> GatewayResult<String>;
}
