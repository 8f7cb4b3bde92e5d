//! Queue-backed [`WebhookDispatcher`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::HookClient;
use super::{HookAction, HookEvent, WebhookDispatcher};
use crate::config::{TargetConfig, WebhookConfig};
use crate::error::GatewayResult;
use crate::metrics::Metrics;

type HookList = Arc<[HookClient]>;

/// Hook clients of one target, per action.
#[derive(Debug, Clone)]
struct TargetHooks {
    get: HookList,
    put: HookList,
    delete: HookList,
}

impl TargetHooks {
    fn build(target: &TargetConfig) -> GatewayResult<Self> {
        let actions = &target.actions;
        Ok(Self {
            get: build_clients(actions.get_webhooks())?,
            put: build_clients(actions.put_webhooks())?,
            delete: build_clients(actions.delete_webhooks())?,
        })
    }

    fn for_action(&self, action: HookAction) -> &HookList {
        match action {
            HookAction::Get | HookAction::Head => &self.get,
            HookAction::Put => &self.put,
            HookAction::Delete => &self.delete,
        }
    }
}

fn build_clients(configs: &[WebhookConfig]) -> GatewayResult<HookList> {
    configs.iter().map(HookClient::new).collect()
}

/// One queued delivery: the event plus the hooks in force when it was queued.
struct Batch {
    event: HookEvent,
    hooks: HookList,
}

/// Dispatcher backed by a bounded queue and a fixed pool of workers.
///
/// Hook clients are rebuilt on [`WebhookDispatcher::load`]; batches already
/// queued keep the clients they were queued with.
pub struct WebhookManager {
    hooks: DashMap<String, TargetHooks>,
    queue: Mutex<Option<mpsc::Sender<Batch>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<dyn Metrics>,
}

impl fmt::Debug for WebhookManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookManager")
            .field("targets", &self.hooks.len())
            .field("running", &self.queue.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl WebhookManager {
    /// Spawn `workers` delivery tasks on the current runtime.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use s3gate_core::WebhookManager;
    /// use s3gate_core::metrics::PrometheusMetrics;
    ///
    /// # tokio_test::block_on(async {
    /// let metrics = Arc::new(PrometheusMetrics::new().unwrap());
    /// let manager = WebhookManager::start(2, 64, metrics);
    /// manager.shutdown().await;
    /// # });
    /// ```
    #[must_use]
    pub fn start(workers: usize, capacity: usize, metrics: Arc<dyn Metrics>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Batch>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(batch) = next else {
                            break;
                        };
                        run_hooks(metrics.as_ref(), &batch).await;
                    }
                    debug!(worker, "webhook worker stopped");
                })
            })
            .collect();

        Arc::new(Self {
            hooks: DashMap::new(),
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            metrics,
        })
    }

    /// Close the queue and wait for workers to drain it.
    pub async fn shutdown(&self) {
        drop(self.queue.lock().take());
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "webhook worker panicked");
            }
        }
        info!("webhook dispatcher stopped");
    }

    fn count_failed(&self, event: &HookEvent, hooks: usize) {
        for _ in 0..hooks {
            self.metrics
                .inc_failed_webhooks(&event.target, event.action.as_str());
        }
    }
}

impl WebhookDispatcher for WebhookManager {
    fn load(&self, targets: &[TargetConfig]) -> GatewayResult<()> {
        let built = targets
            .iter()
            .map(|t| Ok((t.name.clone(), TargetHooks::build(t)?)))
            .collect::<GatewayResult<Vec<_>>>()?;

        let names: HashSet<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        self.hooks.retain(|name, _| names.contains(name.as_str()));
        for (name, hooks) in built {
            self.hooks.insert(name, hooks);
        }
        debug!(targets = self.hooks.len(), "webhooks loaded");
        Ok(())
    }

    fn dispatch(&self, event: HookEvent) {
        let hooks = self
            .hooks
            .get(&event.target)
            .map(|entry| Arc::clone(entry.for_action(event.action)));
        let Some(hooks) = hooks.filter(|h| !h.is_empty()) else {
            debug!(target_name = %event.target, action = %event.action, "no webhook declared");
            return;
        };

        let count = hooks.len();
        let Some(tx) = self.queue.lock().clone() else {
            warn!(target_name = %event.target, action = %event.action, "webhook dispatcher stopped, dropping batch");
            self.count_failed(&event, count);
            return;
        };
        match tx.try_send(Batch { event, hooks }) {
            Ok(()) => {}
            Err(TrySendError::Full(batch)) => {
                warn!(target_name = %batch.event.target, action = %batch.event.action, "webhook queue full, dropping batch");
                self.count_failed(&batch.event, count);
            }
            Err(TrySendError::Closed(batch)) => {
                warn!(target_name = %batch.event.target, action = %batch.event.action, "webhook queue closed, dropping batch");
                self.count_failed(&batch.event, count);
            }
        }
    }
}

async fn run_hooks(metrics: &dyn Metrics, batch: &Batch) {
    let event = &batch.event;
    let action = event.action.as_str();
    let body = match serde_json::to_vec(&event.body()) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "cannot encode webhook body");
            for _ in batch.hooks.iter() {
                metrics.inc_failed_webhooks(&event.target, action);
            }
            return;
        }
    };

    for (number, hook) in batch.hooks.iter().enumerate() {
        info!(
            target_name = %event.target,
            webhook_action = action,
            webhook_number = number,
            url = hook.url(),
            "executing webhook"
        );
        match hook.send(&body).await {
            Ok((status, _)) if status.as_u16() < 400 => {
                info!(
                    target_name = %event.target,
                    webhook_action = action,
                    webhook_number = number,
                    webhook_status_code = status.as_u16(),
                    "webhook succeeded"
                );
                metrics.inc_succeed_webhooks(&event.target, action);
            }
            Ok((status, text)) => {
                error!(
                    target_name = %event.target,
                    webhook_action = action,
                    webhook_number = number,
                    webhook_status_code = status.as_u16(),
                    response = %text,
                    "webhook failed"
                );
                metrics.inc_failed_webhooks(&event.target, action);
            }
            Err(e) => {
                error!(
                    target_name = %event.target,
                    webhook_action = action,
                    webhook_number = number,
                    error = %e,
                    "webhook failed"
                );
                metrics.inc_failed_webhooks(&event.target, action);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use serde_json::Value;
    use tokio::net::TcpListener;

    use super::*;
    use crate::config::GatewayConfig;
    use crate::store::ResultInfo;
    use crate::testing::RecordingMetrics;

    #[derive(Debug, Clone)]
    struct Received {
        path: String,
        method: String,
        content_type: String,
        auth: String,
        body: Value,
    }

    /// Local hook endpoint answering 500 on `failing` paths and 200 elsewhere.
    async fn hook_server(failing: &'static [&'static str]) -> (String, Arc<Mutex<Vec<Received>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let sink = Arc::clone(&sink);
                        async move {
                            let header = |name: &str| {
                                req.headers()
                                    .get(name)
                                    .and_then(|v| v.to_str().ok())
                                    .unwrap_or_default()
                                    .to_owned()
                            };
                            let path = req.uri().path().to_owned();
                            let method = req.method().to_string();
                            let content_type = header("content-type");
                            let auth = header("authorization");
                            let bytes = req.into_body().collect().await.unwrap().to_bytes();
                            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                            let status = if failing.contains(&path.as_str()) { 500 } else { 200 };
                            sink.lock().push(Received {
                                path,
                                method,
                                content_type,
                                auth,
                                body,
                            });
                            Ok::<_, Infallible>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::new()))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        (format!("http://{addr}"), received)
    }

    async fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/unreachable")
    }

    fn targets(yaml: &str) -> Vec<TargetConfig> {
        GatewayConfig::from_yaml_str(yaml).unwrap().targets
    }

    fn pair(target: &str, action: &str) -> (String, String) {
        (target.to_owned(), action.to_owned())
    }

    fn output() -> ResultInfo {
        ResultInfo {
            bucket: "bucket".into(),
            region: "us-east-1".into(),
            s3_endpoint: String::new(),
            key: "a.txt".into(),
        }
    }

    #[tokio::test]
    async fn test_should_deliver_every_hook_in_order_despite_failures() {
        let (base, received) = hook_server(&["/second"]).await;
        let unreachable = closed_port_url().await;
        let config = format!(
            r#"
targets:
  - name: docs
    mount: {{ paths: ["/docs/"] }}
    bucket: {{ name: bucket }}
    actions:
      DELETE:
        enabled: true
        config:
          webhooks:
            - url: {unreachable}
            - url: {base}/second
              method: PATCH
            - url: {base}/third
              headers: {{ Content-Type: text/plain }}
              secretHeaders:
                Authorization: {{ value: "Bearer t" }}
"#
        );
        let metrics = Arc::new(RecordingMetrics::default());
        let manager = WebhookManager::start(1, 8, metrics.clone());
        manager.load(&targets(&config)).unwrap();

        manager.dispatch(HookEvent::delete("docs", "/docs/a.txt", output()));
        manager.shutdown().await;

        let received = received.lock().clone();
        let paths: Vec<_> = received.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/second", "/third"]);
        assert_eq!(received[0].method, "PATCH");
        assert_eq!(received[1].content_type, "application/json");
        assert_eq!(received[1].auth, "Bearer t");
        assert_eq!(received[1].body["action"], "DELETE");
        assert_eq!(received[1].body["target"]["name"], "docs");
        assert!(received[1].body.get("inputMetadata").is_none());

        assert_eq!(metrics.failed_webhooks(), vec![pair("docs", "DELETE"); 2]);
        assert_eq!(metrics.succeed_webhooks(), vec![pair("docs", "DELETE")]);
    }

    #[tokio::test]
    async fn test_should_route_head_to_get_hooks() {
        let (base, received) = hook_server(&[]).await;
        let config = format!(
            r#"
targets:
  - name: docs
    mount: {{ paths: ["/docs/"] }}
    bucket: {{ name: bucket }}
    actions:
      GET:
        enabled: true
        config:
          webhooks:
            - url: {base}/get
"#
        );
        let metrics = Arc::new(RecordingMetrics::default());
        let manager = WebhookManager::start(2, 8, metrics.clone());
        manager.load(&targets(&config)).unwrap();

        let conditions = crate::store::GetConditions::default();
        manager.dispatch(HookEvent::head("docs", "/docs/a.txt", &conditions, output()));
        manager.shutdown().await;

        let received = received.lock().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body["action"], "HEAD");
        assert_eq!(metrics.succeed_webhooks(), vec![pair("docs", "HEAD")]);
    }

    #[tokio::test]
    async fn test_should_be_noop_without_hooks() {
        let metrics = Arc::new(RecordingMetrics::default());
        let manager = WebhookManager::start(1, 8, metrics.clone());
        manager
            .load(&targets(
                r#"
targets:
  - name: docs
    mount: { paths: ["/docs/"] }
    bucket: { name: bucket }
"#,
            ))
            .unwrap();

        manager.dispatch(HookEvent::delete("docs", "/docs/a", output()));
        manager.dispatch(HookEvent::delete("unknown", "/x", output()));
        manager.shutdown().await;

        assert!(metrics.failed_webhooks().is_empty());
        assert!(metrics.succeed_webhooks().is_empty());
    }

    #[tokio::test]
    async fn test_should_prune_removed_targets_on_load() {
        let metrics = Arc::new(RecordingMetrics::default());
        let manager = WebhookManager::start(1, 8, metrics.clone());
        let hooked = |name: &str| {
            format!(
                r#"
  - name: {name}
    mount: {{ paths: ["/{name}/"] }}
    bucket: {{ name: bucket }}
    actions:
      PUT:
        enabled: true
        config:
          webhooks:
            - url: http://127.0.0.1:1/hook
"#
            )
        };
        manager
            .load(&targets(&format!("targets:{}{}", hooked("a"), hooked("b"))))
            .unwrap();
        assert!(manager.hooks.contains_key("a"));
        assert!(manager.hooks.contains_key("b"));

        manager
            .load(&targets(&format!("targets:{}", hooked("b"))))
            .unwrap();
        assert!(!manager.hooks.contains_key("a"));
        assert!(manager.hooks.contains_key("b"));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_should_count_batches_dropped_after_shutdown_as_failed() {
        let metrics = Arc::new(RecordingMetrics::default());
        let manager = WebhookManager::start(1, 8, metrics.clone());
        manager
            .load(&targets(
                r#"
targets:
  - name: docs
    mount: { paths: ["/docs/"] }
    bucket: { name: bucket }
    actions:
      DELETE:
        enabled: true
        config:
          webhooks:
            - url: http://127.0.0.1:1/a
            - url: http://127.0.0.1:1/b
"#,
            ))
            .unwrap();
        manager.shutdown().await;

        manager.dispatch(HookEvent::delete("docs", "/docs/a", output()));
        assert_eq!(metrics.failed_webhooks().len(), 2);
    }
}
