//! HTTP rendering of gateway outcomes.
//!
//! [`HttpResponseHandler`] implements the core [`ResponseHandler`] seam and
//! keeps the single response it was asked to produce. HTML pages are resolved
//! in order from the target's template override (local file or bucket
//! object), the global override (local file), and the embedded default, then
//! rendered with the helpers prepended.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH,
    CONTENT_RANGE, CONTENT_TYPE, ETAG, EXPIRES, HeaderName, LAST_MODIFIED, LOCATION,
};
use http::{StatusCode, response::Builder};
use parking_lot::Mutex;
use s3gate_core::config::{TargetTemplatesConfig, TemplateItem, TemplatesConfig};
use s3gate_core::request::{AuthenticatedUser, RequestContext, RequestInfo};
use s3gate_core::response::{
    ContentLoader, DeleteEcho, Entry, PutEcho, ResponseHandler, StreamFile,
};
use s3gate_core::store::ObjectMetadata;
use s3gate_core::target::{Snapshot, Target, read_local};
use s3gate_core::template::TemplateEngine;
use s3gate_core::{GatewayError, GatewayResult};
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::body::GatewayBody;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const CONTENT_DIGEST: HeaderName = HeaderName::from_static("content-digest");

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    FolderList,
    NotFound,
    InternalServerError,
    Forbidden,
    BadRequest,
    Unauthorized,
}

impl Page {
    fn status(self) -> StatusCode {
        match self {
            Self::FolderList => StatusCode::OK,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    fn embedded(self) -> &'static str {
        match self {
            Self::FolderList => include_str!("../templates/folder-list.html"),
            Self::NotFound => include_str!("../templates/not-found.html"),
            Self::InternalServerError => include_str!("../templates/internal-server-error.html"),
            Self::Forbidden => include_str!("../templates/forbidden.html"),
            Self::BadRequest => include_str!("../templates/bad-request.html"),
            Self::Unauthorized => include_str!("../templates/unauthorized.html"),
        }
    }

    fn target_item(self, templates: &TargetTemplatesConfig) -> Option<&TemplateItem> {
        match self {
            Self::FolderList => templates.folder_list.as_ref(),
            Self::NotFound => templates.not_found.as_ref(),
            Self::InternalServerError => templates.internal_server_error.as_ref(),
            Self::Forbidden => templates.forbidden.as_ref(),
            Self::BadRequest => templates.bad_request.as_ref(),
            Self::Unauthorized => templates.unauthorized.as_ref(),
        }
    }

    fn global_path(self, templates: &TemplatesConfig) -> Option<&str> {
        match self {
            Self::FolderList => templates.folder_list.as_deref(),
            Self::NotFound => templates.not_found.as_deref(),
            Self::InternalServerError => templates.internal_server_error.as_deref(),
            Self::Forbidden => templates.forbidden.as_deref(),
            Self::BadRequest => templates.bad_request.as_deref(),
            Self::Unauthorized => templates.unauthorized.as_deref(),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpResponseHandler
// ---------------------------------------------------------------------------

/// Renders gateway outcomes as HTTP responses.
///
/// Exactly one response is expected per request; take it with
/// [`HttpResponseHandler::into_response`].
#[derive(Debug)]
pub struct HttpResponseHandler {
    request: RequestInfo,
    user: Option<AuthenticatedUser>,
    target: Option<Arc<Target>>,
    snapshot: Arc<Snapshot>,
    engine: Arc<dyn TemplateEngine>,
    response: Mutex<Option<http::Response<GatewayBody>>>,
}

impl HttpResponseHandler {
    /// Handler for a request routed to `target` (or to no target).
    #[must_use]
    pub fn new(
        ctx: &RequestContext,
        target: Option<Arc<Target>>,
        snapshot: Arc<Snapshot>,
        engine: Arc<dyn TemplateEngine>,
    ) -> Self {
        Self {
            request: ctx.request.clone(),
            user: ctx.user.clone(),
            target,
            snapshot,
            engine,
            response: Mutex::new(None),
        }
    }

    /// The rendered response, or a bare 500 when nothing was rendered.
    #[must_use]
    pub fn into_response(self) -> http::Response<GatewayBody> {
        self.response.into_inner().unwrap_or_else(|| {
            error!(path = %self.request.path, "no response rendered");
            fallback_internal_error("no response rendered")
        })
    }

    fn set(&self, response: http::Response<GatewayBody>) {
        let previous = self.response.lock().replace(response);
        if let Some(previous) = previous {
            warn!(status = %previous.status(), "response rendered twice, keeping the last one");
        }
    }

    fn set_built(&self, built: Result<http::Response<GatewayBody>, http::Error>) {
        match built {
            Ok(response) => self.set(response),
            Err(e) => {
                error!(error = %e, "cannot build response");
                self.set(fallback_internal_error(&e.to_string()));
            }
        }
    }

    fn helpers(&self) -> &str {
        self.target
            .as_ref()
            .map_or(&self.snapshot.global_helpers, |t| &t.helpers)
    }

    async fn load_page(&self, page: Page, loader: &dyn ContentLoader) -> GatewayResult<String> {
        let item = self
            .target
            .as_ref()
            .and_then(|t| page.target_item(&t.config.templates));
        match item {
            Some(item) if item.in_bucket => loader.load(&item.path).await,
            Some(item) => read_local(&item.path),
            None => match page.global_path(&self.snapshot.templates) {
                Some(path) => read_local(path),
                None => Ok(page.embedded().to_owned()),
            },
        }
    }

    async fn render_page(
        &self,
        page: Page,
        loader: &dyn ContentLoader,
        data: &Value,
    ) -> GatewayResult<http::Response<GatewayBody>> {
        let source = self.load_page(page, loader).await?;
        let source = format!("{}\n{source}", self.helpers());
        let html = self.engine.render_html(&source, data)?;
        http::Response::builder()
            .status(page.status())
            .header(CONTENT_TYPE, HTML_CONTENT_TYPE)
            .body(GatewayBody::from_string(html))
            .map_err(|e| GatewayError::Internal(e.into()))
    }

    fn error_data(&self, message: &str) -> Value {
        json!({
            "request": self.request,
            "user": self.user,
            "error": message,
        })
    }

    async fn error_page(&self, page: Page, loader: &dyn ContentLoader, message: &str) {
        match self.render_page(page, loader, &self.error_data(message)).await {
            Ok(response) => self.set(response),
            Err(e) if page == Page::InternalServerError => {
                error!(error = %e, "cannot render internal server error page");
                self.set(fallback_internal_error(&e.to_string()));
            }
            Err(e) => {
                error!(error = %e, "cannot render error page");
                self.internal_page(loader, &e).await;
            }
        }
    }

    async fn internal_page(&self, loader: &dyn ContentLoader, err: &GatewayError) {
        let data = self.error_data(&err.to_string());
        match self.render_page(Page::InternalServerError, loader, &data).await {
            Ok(response) => self.set(response),
            Err(e) => {
                error!(error = %e, "cannot render internal server error page");
                self.set(fallback_internal_error(&e.to_string()));
            }
        }
    }
}

#[async_trait]
impl ResponseHandler for HttpResponseHandler {
    async fn not_found(&self, loader: &dyn ContentLoader) {
        self.error_page(Page::NotFound, loader, "Not Found").await;
    }

    async fn forbidden(&self, loader: &dyn ContentLoader, err: &GatewayError) {
        self.error_page(Page::Forbidden, loader, &err.to_string()).await;
    }

    async fn bad_request(&self, loader: &dyn ContentLoader, err: &GatewayError) {
        self.error_page(Page::BadRequest, loader, &err.to_string()).await;
    }

    async fn unauthorized(&self, loader: &dyn ContentLoader, err: &GatewayError) {
        self.error_page(Page::Unauthorized, loader, &err.to_string()).await;
    }

    async fn internal_server_error(&self, loader: &dyn ContentLoader, err: &GatewayError) {
        self.internal_page(loader, err).await;
    }

    fn not_modified(&self) {
        self.set_built(
            http::Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .body(GatewayBody::empty()),
        );
    }

    fn precondition_failed(&self) {
        self.set_built(
            http::Response::builder()
                .status(StatusCode::PRECONDITION_FAILED)
                .body(GatewayBody::empty()),
        );
    }

    fn redirect_to(&self, url: &str) {
        self.set_built(redirect(url));
    }

    fn redirect_with_trailing_slash(&self) {
        self.set_built(redirect(&with_trailing_slash(&self.request)));
    }

    async fn stream_file(&self, _loader: &dyn ContentLoader, file: StreamFile) -> GatewayResult<()> {
        let status = file_status(&file.metadata);
        let builder = file_headers(http::Response::builder().status(status), &file.metadata);
        let body = file.body.map_or_else(GatewayBody::empty, GatewayBody::streaming);
        let response = builder
            .body(body)
            .map_err(|e| GatewayError::Internal(anyhow::Error::from(e).context("file headers")))?;
        self.set(response);
        Ok(())
    }

    async fn folders_files_list(&self, loader: &dyn ContentLoader, entries: Vec<Entry>) {
        let (bucket_name, name) = self.target.as_ref().map_or_else(Default::default, |t| {
            (t.config.bucket.name.clone(), t.config.name.clone())
        });
        let data = json!({
            "request": self.request,
            "user": self.user,
            "entries": entries,
            "bucketName": bucket_name,
            "name": name,
            "path": self.request.url,
        });
        match self.render_page(Page::FolderList, loader, &data).await {
            Ok(response) => self.set(response),
            Err(e) => {
                error!(error = %e, "cannot render folder list");
                self.internal_page(loader, &e).await;
            }
        }
    }

    async fn put(&self, _loader: &dyn ContentLoader, echo: PutEcho) {
        let body = match serde_json::to_vec(&echo) {
            Ok(body) => body,
            Err(e) => {
                self.set(fallback_internal_error(&e.to_string()));
                return;
            }
        };
        self.set_built(
            http::Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "application/json")
                .body(GatewayBody::from_bytes(body)),
        );
    }

    async fn delete(&self, _loader: &dyn ContentLoader, _echo: DeleteEcho) {
        self.set_built(
            http::Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(GatewayBody::empty()),
        );
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn redirect(location: &str) -> Result<http::Response<GatewayBody>, http::Error> {
    http::Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, location)
        .body(GatewayBody::empty())
}

/// The request path with a `/` appended, query string preserved.
fn with_trailing_slash(request: &RequestInfo) -> String {
    let mut location = request.path.clone();
    if !location.starts_with('/') {
        location.insert(0, '/');
    }
    if !location.ends_with('/') {
        location.push('/');
    }
    if let Some((_, query)) = request.url.split_once('?') {
        location.push('?');
        location.push_str(query);
    }
    location
}

/// 206 for a partial range, 200 when the range spans the whole object.
fn file_status(metadata: &ObjectMetadata) -> StatusCode {
    if metadata.content_range.is_empty() {
        return StatusCode::OK;
    }
    let total = metadata
        .content_range
        .split('/')
        .nth(1)
        .and_then(|t| t.trim().parse::<i64>().ok());
    if total == Some(metadata.content_length) {
        StatusCode::OK
    } else {
        StatusCode::PARTIAL_CONTENT
    }
}

fn file_headers(mut builder: Builder, metadata: &ObjectMetadata) -> Builder {
    for (name, value) in [
        (CACHE_CONTROL, &metadata.cache_control),
        (EXPIRES, &metadata.expires),
        (CONTENT_DISPOSITION, &metadata.content_disposition),
        (CONTENT_ENCODING, &metadata.content_encoding),
        (CONTENT_LANGUAGE, &metadata.content_language),
        (CONTENT_RANGE, &metadata.content_range),
        (CONTENT_TYPE, &metadata.content_type),
        (ETAG, &metadata.etag),
        (CONTENT_DIGEST, &metadata.content_digest),
    ] {
        if !value.is_empty() {
            builder = builder.header(name, value.as_str());
        }
    }
    if metadata.content_length > 0 {
        builder = builder.header(CONTENT_LENGTH, metadata.content_length);
    }
    if let Some(modified) = metadata.last_modified {
        builder = builder.header(LAST_MODIFIED, http_date(modified));
    }
    builder
}

fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Static 500 page used when the configured one cannot be rendered.
pub(crate) fn fallback_internal_error(message: &str) -> http::Response<GatewayBody> {
    let html = format!(
        "<!DOCTYPE html>\n<html>\n  <body>\n    <h1>Internal Server Error</h1>\n    <p>{}</p>\n  </body>\n</html>",
        escape_html(message)
    );
    let mut response = http::Response::new(GatewayBody::from_string(html));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static(HTML_CONTENT_TYPE),
    );
    response
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}
