//! Response renderer seam.
//!
//! Gateway entry points never return a response. They push exactly one
//! outcome through a [`ResponseHandler`], handing it a [`ContentLoader`] so
//! templates stored in the target bucket can be fetched lazily.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{GatewayError, GatewayResult};
use crate::store::{ObjectKind, ObjectMetadata, ObjectStream};

/// Reads template sources from the target bucket.
#[async_trait]
pub trait ContentLoader: Send + Sync {
    /// Load the object at `path` as text.
    async fn load(&self, path: &str) -> GatewayResult<String>;
}

/// One entry of a folder listing, with its public path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    /// Entity tag.
    pub etag: String,
    /// Name relative to the listed folder.
    pub name: String,
    /// Full object key.
    pub key: String,
    /// Public path under the mount point.
    pub path: String,
    /// Size in bytes.
    pub size: i64,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
}

/// A file answer. `body` is `None` for HEAD.
pub struct StreamFile {
    /// Object content.
    pub body: Option<ObjectStream>,
    /// Content metadata.
    pub metadata: ObjectMetadata,
}

impl fmt::Debug for StreamFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamFile")
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Echo of a stored upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PutEcho {
    /// Final object key.
    pub key: String,
    /// Declared content type.
    pub content_type: String,
    /// Size in bytes.
    pub content_size: i64,
    /// Rendered user metadata.
    pub metadata: BTreeMap<String, String>,
    /// Rendered storage class, empty when unset.
    pub storage_class: String,
    /// Uploaded file name.
    pub filename: String,
}

/// Echo of a removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteEcho {
    /// Removed object key.
    pub key: String,
}

/// Renders gateway outcomes.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    /// 404.
    async fn not_found(&self, loader: &dyn ContentLoader);
    /// 403.
    async fn forbidden(&self, loader: &dyn ContentLoader, err: &GatewayError);
    /// 400.
    async fn bad_request(&self, loader: &dyn ContentLoader, err: &GatewayError);
    /// 401.
    ///
    /// The gateway itself never authenticates. This is the rendering hook for
    /// an authentication layer mounted in front of it, using the target's
    /// `unauthorized` template.
    async fn unauthorized(&self, loader: &dyn ContentLoader, err: &GatewayError);
    /// 500.
    async fn internal_server_error(&self, loader: &dyn ContentLoader, err: &GatewayError);
    /// 304.
    fn not_modified(&self);
    /// 412.
    fn precondition_failed(&self);
    /// Redirect to an absolute URL.
    fn redirect_to(&self, url: &str);
    /// Redirect to the request URI with a `/` appended.
    fn redirect_with_trailing_slash(&self);
    /// Answer with file content, or headers only when `file.body` is `None`.
    async fn stream_file(&self, loader: &dyn ContentLoader, file: StreamFile) -> GatewayResult<()>;
    /// Answer with a folder listing.
    async fn folders_files_list(&self, loader: &dyn ContentLoader, entries: Vec<Entry>);
    /// Answer a successful upload.
    async fn put(&self, loader: &dyn ContentLoader, echo: PutEcho);
    /// Answer a successful removal.
    async fn delete(&self, loader: &dyn ContentLoader, echo: DeleteEcho);
}
