//! Bucket gateway.
//!
//! Turns one file-style request into object store calls, renders exactly one
//! outcome through the [`ResponseHandler`], and queues webhooks for completed
//! operations. Nothing here retries.

mod delete;
mod get;
mod put;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::error;

use crate::error::{GatewayError, GatewayResult};
use crate::request::RequestContext;
use crate::response::{ContentLoader, Entry, ResponseHandler};
use crate::rewrite::{RewriteContext, rewrite_key};
use crate::store::{GetConditions, ObjectDescriptor, ObjectKind, ObjectStore};
use crate::target::{Target, TargetEntry, read_object};
use crate::template::TemplateEngine;
use crate::webhook::WebhookDispatcher;

/// Input of GET and HEAD.
#[derive(Debug, Clone, Default)]
pub struct GetInput {
    /// Path below the mount point, percent-decoded.
    pub request_path: String,
    /// Conditional and range headers.
    pub conditions: GetConditions,
}

/// Input of PUT.
#[derive(Debug, Clone, Default)]
pub struct PutInput {
    /// Folder path below the mount point, percent-decoded.
    pub request_path: String,
    /// Uploaded file name.
    pub filename: String,
    /// Declared content type.
    pub content_type: String,
    /// Size in bytes.
    pub content_size: i64,
    /// File content.
    pub body: Bytes,
}

/// Request orchestration for one target.
#[derive(Debug, Clone)]
pub struct BucketGateway {
    target: Arc<Target>,
    store: Arc<dyn ObjectStore>,
    webhooks: Arc<dyn WebhookDispatcher>,
    engine: Arc<dyn TemplateEngine>,
}

impl BucketGateway {
    /// Gateway over a registry entry.
    #[must_use]
    pub fn new(
        entry: &TargetEntry,
        webhooks: Arc<dyn WebhookDispatcher>,
        engine: Arc<dyn TemplateEngine>,
    ) -> Self {
        Self {
            target: Arc::clone(&entry.target),
            store: Arc::clone(&entry.store),
            webhooks,
            engine,
        }
    }

    /// Root prefix followed by the request path without its leading `/`.
    fn start_key(&self, request_path: &str) -> String {
        let mut key = self.target.config.bucket.root_prefix();
        key.push_str(request_path.strip_prefix('/').unwrap_or(request_path));
        key
    }

    fn rewrite(&self, ctx: &RequestContext, key: &str) -> GatewayResult<String> {
        let rewrite_ctx = RewriteContext {
            request: &ctx.request,
            user: ctx.user.as_ref(),
            target: &self.target.config,
            helpers: &self.target.helpers,
            engine: self.engine.as_ref(),
        };
        rewrite_key(key, &self.target.rules, &rewrite_ctx)
    }

    /// Public listing entries for `descriptors`.
    fn entries(&self, mount_path: &str, descriptors: Vec<ObjectDescriptor>) -> Vec<Entry> {
        let root = self.target.config.bucket.root_prefix();
        descriptors
            .into_iter()
            .map(|d| {
                let relative = d.key.strip_prefix(root.as_str()).unwrap_or(&d.key);
                let mut path = join_path(mount_path, relative);
                if d.kind == ObjectKind::Folder {
                    path.push('/');
                }
                Entry {
                    kind: d.kind,
                    etag: d.etag,
                    name: d.name,
                    key: d.key,
                    path,
                    size: d.size,
                    last_modified: d.last_modified,
                }
            })
            .collect()
    }

    /// Render an error that has no dedicated outcome in the calling flow.
    async fn render_error(&self, response: &dyn ResponseHandler, err: &GatewayError) {
        match err {
            GatewayError::ObjectExists { .. } => response.forbidden(self, err).await,
            GatewayError::RemovalFolder | GatewayError::BadRequest(_) => {
                response.bad_request(self, err).await;
            }
            _ => {
                error!(target_name = %self.target.name(), error = %err, "request failed");
                response.internal_server_error(self, err).await;
            }
        }
    }
}

#[async_trait]
impl ContentLoader for BucketGateway {
    async fn load(&self, path: &str) -> GatewayResult<String> {
        read_object(self.store.as_ref(), path).await
    }
}

/// Whether a request path designates a folder.
fn is_folder_path(path: &str) -> bool {
    path.is_empty() || path.ends_with('/')
}

/// Join `name` under the folder key `key`, with exactly one separator.
fn join_key(key: &str, name: &str) -> String {
    let folder = key.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if folder.is_empty() {
        name.to_owned()
    } else {
        format!("{folder}/{name}")
    }
}

/// Lexical path join: empty parts are skipped, `.` and `..` are resolved, and
/// the trailing separator is dropped.
fn join_path(base: &str, rest: &str) -> String {
    let joined = [base, rest]
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        return joined;
    }

    let rooted = joined.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }

    let body = parts.join("/");
    match (rooted, body.is_empty()) {
        (true, _) => format!("/{body}"),
        (false, true) => ".".to_owned(),
        (false, false) => body,
    }
}
