//! Targets and the reloadable registry that holds them.
//!
//! A reload builds a complete [`Snapshot`] before swapping it in, so requests
//! never observe a half-applied configuration and in-flight requests keep the
//! `Arc`s they started with.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures::TryStreamExt;
use parking_lot::RwLock;
use tracing::info;

use crate::config::{GatewayConfig, TargetConfig, TemplateItem, TemplatesConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::metrics::Metrics;
use crate::rewrite::RewriteRule;
use crate::store::{GetConditions, ObjectStore, S3ObjectStore};
use crate::webhook::WebhookDispatcher;

/// A target ready to serve requests.
#[derive(Debug)]
pub struct Target {
    /// Raw configuration.
    pub config: TargetConfig,
    /// Compiled rewrite rules, in declared order.
    pub rules: Vec<RewriteRule>,
    /// Target helpers followed by global helpers, joined by newlines.
    pub helpers: String,
}

impl Target {
    /// Target name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Creates the object store of a target.
#[async_trait]
pub trait StoreFactory: Send + Sync + fmt::Debug {
    /// Build a store for `target`.
    async fn create(&self, target: &TargetConfig) -> GatewayResult<Arc<dyn ObjectStore>>;
}

/// [`StoreFactory`] producing [`S3ObjectStore`]s.
#[derive(Debug, Clone)]
pub struct S3StoreFactory {
    metrics: Arc<dyn Metrics>,
}

impl S3StoreFactory {
    /// Factory whose stores report to `metrics`.
    #[must_use]
    pub fn new(metrics: Arc<dyn Metrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl StoreFactory for S3StoreFactory {
    async fn create(&self, target: &TargetConfig) -> GatewayResult<Arc<dyn ObjectStore>> {
        let store = S3ObjectStore::from_target(target, Arc::clone(&self.metrics)).await?;
        Ok(Arc::new(store))
    }
}

/// A target together with its store.
#[derive(Debug, Clone)]
pub struct TargetEntry {
    /// Target definition.
    pub target: Arc<Target>,
    /// Store of the target's bucket.
    pub store: Arc<dyn ObjectStore>,
}

/// Immutable view of every configured target.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Targets in declared order.
    pub targets: Vec<TargetEntry>,
    /// Global template overrides.
    pub templates: TemplatesConfig,
    /// Global helpers, joined by newlines.
    pub global_helpers: String,
}

impl Snapshot {
    /// Look up a target by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TargetEntry> {
        self.targets.iter().find(|e| e.target.name() == name)
    }
}

/// Holds the current [`Snapshot`] and replaces it on reload.
#[derive(Debug)]
pub struct TargetRegistry {
    current: RwLock<Arc<Snapshot>>,
    factory: Arc<dyn StoreFactory>,
    webhooks: Arc<dyn WebhookDispatcher>,
}

impl TargetRegistry {
    /// Empty registry; call [`TargetRegistry::reload`] before serving.
    #[must_use]
    pub fn new(factory: Arc<dyn StoreFactory>, webhooks: Arc<dyn WebhookDispatcher>) -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
            factory,
            webhooks,
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Build a new snapshot from `config` and swap it in.
    ///
    /// On error the previous snapshot and webhooks stay in force.
    pub async fn reload(&self, config: &GatewayConfig) -> GatewayResult<()> {
        let global_helpers = config
            .templates
            .helpers
            .iter()
            .map(|path| read_local(path))
            .collect::<GatewayResult<Vec<_>>>()?;

        let mut targets = Vec::with_capacity(config.targets.len());
        for target_config in &config.targets {
            let store = self.factory.create(target_config).await?;
            let rules = RewriteRule::compile_all(&target_config.key_rewrite_list)?;

            let mut helpers = Vec::new();
            for item in &target_config.templates.helpers {
                helpers.push(load_template(item, store.as_ref()).await?);
            }
            helpers.extend(global_helpers.iter().cloned());

            targets.push(TargetEntry {
                target: Arc::new(Target {
                    config: target_config.clone(),
                    rules,
                    helpers: helpers.join("\n"),
                }),
                store,
            });
        }

        self.webhooks.load(&config.targets)?;
        let snapshot = Snapshot {
            targets,
            templates: config.templates.clone(),
            global_helpers: global_helpers.join("\n"),
        };
        *self.current.write() = Arc::new(snapshot);
        info!(targets = config.targets.len(), "targets loaded");
        Ok(())
    }
}

/// Read a template either from the local filesystem or from `store`.
pub async fn load_template(item: &TemplateItem, store: &dyn ObjectStore) -> GatewayResult<String> {
    if item.in_bucket {
        read_object(store, &item.path).await
    } else {
        read_local(&item.path)
    }
}

/// Read a whole object as UTF-8 text.
pub async fn read_object(store: &dyn ObjectStore, key: &str) -> GatewayResult<String> {
    let (output, _) = store.get(key, &GetConditions::default()).await?;
    let chunks: Vec<_> = output
        .body
        .try_collect()
        .await
        .with_context(|| format!("read object {key}"))?;
    let bytes = chunks.concat();
    String::from_utf8(bytes)
        .with_context(|| format!("object {key} is not valid UTF-8"))
        .map_err(GatewayError::from)
}

/// Read a template from the local filesystem.
pub fn read_local(path: &str) -> GatewayResult<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("read template {path}"))
        .map_err(GatewayError::from)
}
