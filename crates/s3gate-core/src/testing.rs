//! Test doubles for the unit tests of this crate and, behind the `testing`
//! feature, of dependent crates.

#![allow(missing_docs, clippy::missing_panics_doc)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use parking_lot::Mutex;

use crate::config::{GatewayConfig, TargetConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::BucketGateway;
use crate::metrics::Metrics;
use crate::request::RequestContext;
use crate::response::{ContentLoader, DeleteEcho, Entry, PutEcho, ResponseHandler, StreamFile};
use crate::rewrite::RewriteRule;
use crate::store::{
    GetConditions, GetOutput, HeadOutput, ObjectDescriptor, ObjectKind, ObjectMetadata,
    ObjectStore, PutRequest, ResultInfo,
};
use crate::target::{Snapshot, StoreFactory, Target, TargetEntry};
use crate::template::MiniJinjaEngine;
use crate::webhook::{HookAction, HookEvent, WebhookDispatcher};

type Failure = Box<dyn Fn() -> GatewayError + Send + Sync>;

/// In-memory bucket recording every call as `"<op> <key>"`.
#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    failures: Mutex<HashMap<String, Failure>>,
    calls: Mutex<Vec<String>>,
    last_put: Mutex<Option<PutRequest>>,
    last_signed_conditions: Mutex<Option<GetConditions>>,
}

impl fmt::Debug for FakeObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeObjectStore")
            .field("objects", &self.objects.lock().len())
            .finish_non_exhaustive()
    }
}

impl FakeObjectStore {
    pub fn insert_file(&self, key: &str, content: &str) {
        self.objects
            .lock()
            .insert(key.to_owned(), Bytes::copy_from_slice(content.as_bytes()));
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().remove(key);
    }

    /// Every call touching `key` fails with `f()`.
    pub fn fail_with(&self, key: &str, f: impl Fn() -> GatewayError + Send + Sync + 'static) {
        self.failures.lock().insert(key.to_owned(), Box::new(f));
    }

    pub fn content(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .get(key)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn last_put(&self) -> Option<PutRequest> {
        self.last_put.lock().clone()
    }

    pub fn last_signed_conditions(&self) -> Option<GetConditions> {
        self.last_signed_conditions.lock().clone()
    }

    fn record(&self, op: &str, key: &str) -> GatewayResult<()> {
        self.calls.lock().push(format!("{op} {key}"));
        match self.failures.lock().get(key) {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }

    fn info(key: &str) -> ResultInfo {
        ResultInfo {
            bucket: "fake-bucket".into(),
            region: "us-east-1".into(),
            s3_endpoint: String::new(),
            key: key.to_owned(),
        }
    }

    fn metadata(content: &Bytes) -> ObjectMetadata {
        ObjectMetadata {
            content_length: i64::try_from(content.len()).unwrap_or_default(),
            content_type: "text/plain".into(),
            etag: "\"fake\"".into(),
            ..ObjectMetadata::default()
        }
    }

    fn object(&self, key: &str) -> GatewayResult<Bytes> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or(GatewayError::NotFound)
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn list(&self, prefix: &str) -> GatewayResult<(Vec<ObjectDescriptor>, ResultInfo)> {
        self.record("list", prefix)?;
        let objects = self.objects.lock();
        let mut folders = BTreeSet::new();
        let mut files = Vec::new();
        for (key, content) in objects.range(prefix.to_owned()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            if let Some(idx) = rest.find('/') {
                folders.insert(format!("{prefix}{}", &rest[..=idx]));
            } else if !rest.is_empty() {
                files.push(ObjectDescriptor {
                    kind: ObjectKind::File,
                    key: key.clone(),
                    name: rest.to_owned(),
                    etag: "\"fake\"".into(),
                    size: i64::try_from(content.len()).unwrap_or_default(),
                    last_modified: None,
                });
            }
        }
        let mut entries: Vec<_> = folders
            .into_iter()
            .map(|key| ObjectDescriptor {
                kind: ObjectKind::Folder,
                name: key[prefix.len()..].to_owned(),
                key,
                etag: String::new(),
                size: 0,
                last_modified: None,
            })
            .collect();
        entries.extend(files);
        Ok((entries, Self::info(prefix)))
    }

    async fn head(&self, key: &str) -> GatewayResult<(HeadOutput, ResultInfo)> {
        self.record("head", key)?;
        let content = self.object(key)?;
        Ok((
            HeadOutput {
                key: key.to_owned(),
                metadata: Self::metadata(&content),
            },
            Self::info(key),
        ))
    }

    async fn get(
        &self,
        key: &str,
        _conditions: &GetConditions,
    ) -> GatewayResult<(GetOutput, ResultInfo)> {
        self.record("get", key)?;
        let content = self.object(key)?;
        let metadata = Self::metadata(&content);
        let body = Box::pin(futures::stream::iter([Ok::<_, std::io::Error>(content)]));
        Ok((GetOutput { body, metadata }, Self::info(key)))
    }

    async fn put(&self, request: PutRequest) -> GatewayResult<ResultInfo> {
        self.record("put", &request.key)?;
        self.objects
            .lock()
            .insert(request.key.clone(), request.body.clone());
        let info = Self::info(&request.key);
        *self.last_put.lock() = Some(request);
        Ok(info)
    }

    async fn delete(&self, key: &str) -> GatewayResult<ResultInfo> {
        self.record("delete", key)?;
        self.objects.lock().remove(key);
        Ok(Self::info(key))
    }

    async fn signed_url(
        &self,
        key: &str,
        conditions: &GetConditions,
        expiration: Duration,
    ) -> GatewayResult<String> {
        self.record("signed_url", key)?;
        *self.last_signed_conditions.lock() = Some(conditions.clone());
        Ok(format!(
            "https://signed.example/{key}?expires={}",
            expiration.as_secs()
        ))
    }
}

/// Hands out the same fake store for every target.
#[derive(Debug)]
pub struct FakeStoreFactory {
    store: Arc<FakeObjectStore>,
}

impl FakeStoreFactory {
    pub fn new(store: Arc<FakeObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreFactory for FakeStoreFactory {
    async fn create(&self, _target: &TargetConfig) -> GatewayResult<Arc<dyn ObjectStore>> {
        Ok(self.store.clone())
    }
}

/// Dispatcher that keeps events instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<HookEvent>>,
    loaded: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().clone()
    }

    pub fn actions(&self) -> Vec<HookAction> {
        self.events.lock().iter().map(|e| e.action).collect()
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().clone()
    }
}

impl WebhookDispatcher for RecordingDispatcher {
    fn load(&self, targets: &[TargetConfig]) -> GatewayResult<()> {
        *self.loaded.lock() = targets.iter().map(|t| t.name.clone()).collect();
        Ok(())
    }

    fn dispatch(&self, event: HookEvent) {
        self.events.lock().push(event);
    }
}

/// Metrics sink keeping S3 operation counts and webhook outcomes.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    s3_operations: Mutex<Vec<(String, String, String)>>,
    succeed_webhooks: Mutex<Vec<(String, String)>>,
    failed_webhooks: Mutex<Vec<(String, String)>>,
}

impl RecordingMetrics {
    /// Every counted operation as `(target, bucket, operation)`.
    pub fn s3_operations(&self) -> Vec<(String, String, String)> {
        self.s3_operations.lock().clone()
    }

    pub fn succeed_webhooks(&self) -> Vec<(String, String)> {
        self.succeed_webhooks.lock().clone()
    }

    pub fn failed_webhooks(&self) -> Vec<(String, String)> {
        self.failed_webhooks.lock().clone()
    }
}

impl Metrics for RecordingMetrics {
    fn inc_s3_operations(&self, target: &str, bucket: &str, operation: &str) {
        self.s3_operations
            .lock()
            .push((target.into(), bucket.into(), operation.into()));
    }

    fn inc_succeed_webhooks(&self, target: &str, action: &str) {
        self.succeed_webhooks
            .lock()
            .push((target.into(), action.into()));
    }

    fn inc_failed_webhooks(&self, target: &str, action: &str) {
        self.failed_webhooks
            .lock()
            .push((target.into(), action.into()));
    }

    fn inc_http_requests(&self, _method: &str, _status: u16) {}
}

/// What a [`RecordingResponse`] was asked to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NotFound,
    Forbidden(String),
    BadRequest(String),
    Unauthorized(String),
    InternalServerError(String),
    NotModified,
    PreconditionFailed,
    Redirect(String),
    RedirectWithTrailingSlash,
    File {
        body: Option<String>,
        content_type: String,
    },
    Listing(Vec<Entry>),
    Put(PutEcho),
    Deleted(String),
}

/// Response handler that records outcomes.
#[derive(Debug, Default)]
pub struct RecordingResponse {
    outcomes: Mutex<Vec<Outcome>>,
}

impl RecordingResponse {
    /// The single rendered outcome.
    pub fn outcome(&self) -> Outcome {
        let outcomes = self.outcomes.lock();
        assert_eq!(outcomes.len(), 1, "expected one outcome, got {outcomes:?}");
        outcomes[0].clone()
    }

    fn push(&self, outcome: Outcome) {
        self.outcomes.lock().push(outcome);
    }
}

#[async_trait]
impl ResponseHandler for RecordingResponse {
    async fn not_found(&self, _loader: &dyn ContentLoader) {
        self.push(Outcome::NotFound);
    }

    async fn forbidden(&self, _loader: &dyn ContentLoader, err: &GatewayError) {
        self.push(Outcome::Forbidden(err.to_string()));
    }

    async fn bad_request(&self, _loader: &dyn ContentLoader, err: &GatewayError) {
        self.push(Outcome::BadRequest(err.to_string()));
    }

    async fn unauthorized(&self, _loader: &dyn ContentLoader, err: &GatewayError) {
        self.push(Outcome::Unauthorized(err.to_string()));
    }

    async fn internal_server_error(&self, _loader: &dyn ContentLoader, err: &GatewayError) {
        self.push(Outcome::InternalServerError(err.to_string()));
    }

    fn not_modified(&self) {
        self.push(Outcome::NotModified);
    }

    fn precondition_failed(&self) {
        self.push(Outcome::PreconditionFailed);
    }

    fn redirect_to(&self, url: &str) {
        self.push(Outcome::Redirect(url.to_owned()));
    }

    fn redirect_with_trailing_slash(&self) {
        self.push(Outcome::RedirectWithTrailingSlash);
    }

    async fn stream_file(&self, _loader: &dyn ContentLoader, file: StreamFile) -> GatewayResult<()> {
        let body = match file.body {
            Some(stream) => {
                let chunks: Vec<Bytes> = stream.try_collect().await.map_err(anyhow::Error::from)?;
                Some(String::from_utf8_lossy(&chunks.concat()).into_owned())
            }
            None => None,
        };
        self.push(Outcome::File {
            body,
            content_type: file.metadata.content_type,
        });
        Ok(())
    }

    async fn folders_files_list(&self, _loader: &dyn ContentLoader, entries: Vec<Entry>) {
        self.push(Outcome::Listing(entries));
    }

    async fn put(&self, _loader: &dyn ContentLoader, echo: PutEcho) {
        self.push(Outcome::Put(echo));
    }

    async fn delete(&self, _loader: &dyn ContentLoader, echo: DeleteEcho) {
        self.push(Outcome::Deleted(echo.key));
    }
}

/// Gateway over the first target of `yaml`, backed by fakes.
pub fn gateway_with(
    yaml: &str,
) -> (BucketGateway, Arc<FakeObjectStore>, Arc<RecordingDispatcher>) {
    let config = GatewayConfig::from_yaml_str(yaml).unwrap().targets.remove(0);
    let store = Arc::new(FakeObjectStore::default());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let entry = TargetEntry {
        target: Arc::new(Target {
            rules: RewriteRule::compile_all(&config.key_rewrite_list).unwrap(),
            helpers: String::new(),
            config,
        }),
        store: store.clone(),
    };
    let gateway = BucketGateway::new(
        &entry,
        dispatcher.clone(),
        Arc::new(MiniJinjaEngine::new()),
    );
    (gateway, store, dispatcher)
}

/// Snapshot of every target of `yaml`, all backed by `store`.
pub fn snapshot_with(yaml: &str, store: &Arc<FakeObjectStore>) -> Snapshot {
    let config = GatewayConfig::from_yaml_str(yaml).unwrap();
    let targets = config
        .targets
        .into_iter()
        .map(|config| TargetEntry {
            target: Arc::new(Target {
                rules: RewriteRule::compile_all(&config.key_rewrite_list).unwrap(),
                helpers: String::new(),
                config,
            }),
            store: store.clone(),
        })
        .collect();
    Snapshot {
        targets,
        templates: config.templates,
        global_helpers: String::new(),
    }
}

/// Request context for a request routed through `mount_path`.
pub fn request_context(mount_path: &str) -> RequestContext {
    RequestContext {
        mount_path: mount_path.to_owned(),
        request_id: "test-request".into(),
        ..RequestContext::default()
    }
}
