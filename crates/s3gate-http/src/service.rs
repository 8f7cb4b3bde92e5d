//! The gateway HTTP service implementing hyper's `Service` trait.
//!
//! [`GatewayHttpService`] handles, in order:
//!
//! 1. Health check interception (`GET /healthz`)
//! 2. Prometheus scrape (`GET /metrics`)
//! 3. Mount routing against the current target snapshot
//! 4. Method gating from the target's action policy (405 otherwise)
//! 5. Request parsing into gateway inputs
//! 6. Gateway dispatch, rendered through [`HttpResponseHandler`]
//! 7. Common response headers (`x-request-id`) and request metrics

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ALLOW, CONTENT_TYPE, HOST};
use http::{HeaderValue, Method, StatusCode};
use http_body_util::BodyExt;
use hyper::service::Service;
use s3gate_core::config::ActionsConfig;
use s3gate_core::metrics::{Metrics, PrometheusMetrics};
use s3gate_core::request::{RequestContext, RequestInfo};
use s3gate_core::response::{ContentLoader, ResponseHandler};
use s3gate_core::target::TargetRegistry;
use s3gate_core::template::TemplateEngine;
use s3gate_core::{BucketGateway, GatewayError, GatewayResult, WebhookDispatcher};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::body::GatewayBody;
use crate::renderer::{HttpResponseHandler, fallback_internal_error};
use crate::request::{decode_path, get_input, put_input};
use crate::router;

/// Response header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The gateway HTTP service.
#[derive(Debug, Clone)]
pub struct GatewayHttpService {
    registry: Arc<TargetRegistry>,
    webhooks: Arc<dyn WebhookDispatcher>,
    engine: Arc<dyn TemplateEngine>,
    metrics: Arc<PrometheusMetrics>,
}

impl GatewayHttpService {
    /// Create a service serving the targets of `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<TargetRegistry>,
        webhooks: Arc<dyn WebhookDispatcher>,
        engine: Arc<dyn TemplateEngine>,
        metrics: Arc<PrometheusMetrics>,
    ) -> Self {
        Self {
            registry,
            webhooks,
            engine,
            metrics,
        }
    }

    /// Answer one request.
    pub async fn handle<B>(&self, req: http::Request<B>) -> http::Response<GatewayBody>
    where
        B: http_body::Body<Data = Bytes> + Send,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let request_id = Uuid::new_v4().to_string();
        let method = req.method().clone();
        let uri = req.uri().clone();
        debug!(%method, %uri, request_id, "processing request");

        let response = if method == Method::GET && uri.path() == "/healthz" {
            health_check_response()
        } else if method == Method::GET && uri.path() == "/metrics" {
            self.metrics_response()
        } else {
            self.process_request(req, &request_id).await
        };

        let status = response.status();
        self.metrics.inc_http_requests(method.as_str(), status.as_u16());
        info!(%method, %uri, status = status.as_u16(), request_id, "request answered");
        add_common_headers(response, &request_id)
    }

    async fn process_request<B>(
        &self,
        req: http::Request<B>,
        request_id: &str,
    ) -> http::Response<GatewayBody>
    where
        B: http_body::Body<Data = Bytes> + Send,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let (parts, body) = req.into_parts();
        let snapshot = self.registry.snapshot();
        let host = parts.headers.get(HOST).and_then(|v| v.to_str().ok());
        let mut ctx = RequestContext {
            request: RequestInfo::from_parts(&parts.method, &parts.uri, &parts.headers),
            user: None,
            mount_path: String::new(),
            request_id: request_id.to_owned(),
        };

        let Some(route) = router::resolve(&snapshot, host, parts.uri.path()) else {
            debug!(path = %parts.uri.path(), request_id, "no target mounted");
            let handler =
                HttpResponseHandler::new(&ctx, None, Arc::clone(&snapshot), Arc::clone(&self.engine));
            handler.not_found(&NoBucket).await;
            return handler.into_response();
        };

        let target = Arc::clone(&route.entry.target);
        let actions = &target.config.actions;
        if !method_enabled(actions, &parts.method) {
            warn!(method = %parts.method, target_name = %target.name(), request_id, "method not allowed");
            return method_not_allowed(actions);
        }

        ctx.mount_path = route.mount_path.to_owned();
        let raw_request_path = route.raw_request_path.to_owned();
        let gateway = BucketGateway::new(
            route.entry,
            Arc::clone(&self.webhooks),
            Arc::clone(&self.engine),
        );
        let handler = HttpResponseHandler::new(
            &ctx,
            Some(Arc::clone(&target)),
            Arc::clone(&snapshot),
            Arc::clone(&self.engine),
        );
        info!(target_name = %target.name(), mount_path = %ctx.mount_path, request_id, "routed request");

        let request_path = match decode_path(&raw_request_path) {
            Ok(path) => path,
            Err(e) => {
                handler.internal_server_error(&gateway, &e).await;
                return handler.into_response();
            }
        };

        match parts.method {
            Method::GET | Method::HEAD => match get_input(request_path, &parts.headers) {
                Ok(input) if parts.method == Method::HEAD => {
                    gateway.head(&ctx, &input, &handler).await;
                }
                Ok(input) => gateway.get(&ctx, &input, &handler).await,
                Err(e) => handler.bad_request(&gateway, &e).await,
            },
            Method::PUT => {
                let input = match collect_body(body).await {
                    Ok(bytes) => put_input(request_path, &parts.headers, &bytes),
                    Err(e) => Err(e),
                };
                match input {
                    Ok(input) => gateway.put(&ctx, input, &handler).await,
                    Err(e) => handler.internal_server_error(&gateway, &e).await,
                }
            }
            Method::DELETE => gateway.delete(&ctx, &request_path, &handler).await,
            _ => return method_not_allowed(actions),
        }

        handler.into_response()
    }

    fn metrics_response(&self) -> http::Response<GatewayBody> {
        match self.metrics.encode() {
            Ok(text) => {
                let mut response = http::Response::new(GatewayBody::from_string(text));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                );
                response
            }
            Err(e) => fallback_internal_error(&e.to_string()),
        }
    }
}

impl<B> Service<http::Request<B>> for GatewayHttpService
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    type Response = http::Response<GatewayBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

/// Loader for requests that matched no target; nothing lives in a bucket.
#[derive(Debug)]
struct NoBucket;

#[async_trait]
impl ContentLoader for NoBucket {
    async fn load(&self, _path: &str) -> GatewayResult<String> {
        Err(GatewayError::NotFound)
    }
}

async fn collect_body<B>(body: B) -> GatewayResult<Bytes>
where
    B: http_body::Body<Data = Bytes>,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let collected = body
        .collect()
        .await
        .map_err(|e| GatewayError::Internal(anyhow::Error::new(e).context("read request body")))?;
    Ok(collected.to_bytes())
}

fn method_enabled(actions: &ActionsConfig, method: &Method) -> bool {
    match *method {
        Method::GET | Method::HEAD => actions.get_enabled(),
        Method::PUT => actions.put_enabled(),
        Method::DELETE => actions.delete_enabled(),
        _ => false,
    }
}

fn method_not_allowed(actions: &ActionsConfig) -> http::Response<GatewayBody> {
    let mut allowed = Vec::new();
    if actions.get_enabled() {
        allowed.extend(["GET", "HEAD"]);
    }
    if actions.put_enabled() {
        allowed.push("PUT");
    }
    if actions.delete_enabled() {
        allowed.push("DELETE");
    }

    let mut response = http::Response::new(GatewayBody::empty());
    *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
    if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
        response.headers_mut().insert(ALLOW, value);
    }
    response
}

fn health_check_response() -> http::Response<GatewayBody> {
    let mut response =
        http::Response::new(GatewayBody::from_string(r#"{"status":"ok","service":"s3gate"}"#));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn add_common_headers(
    mut response: http::Response<GatewayBody>,
    request_id: &str,
) -> http::Response<GatewayBody> {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
