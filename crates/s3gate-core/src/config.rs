//! Gateway configuration.
//!
//! The configuration is a single YAML document describing the listener, the
//! global templates, and one entry per target. Server-level settings can be
//! overridden from environment variables after the file is parsed.
//!
//! # Examples
//!
//! ```
//! use s3gate_core::config::GatewayConfig;
//!
//! let config = GatewayConfig::from_yaml_str(
//!     r#"
//! targets:
//!   - name: docs
//!     mount:
//!       paths: ["/docs/"]
//!     bucket:
//!       name: docs-bucket
//!     actions:
//!       GET:
//!         enabled: true
//! "#,
//! )
//! .unwrap();
//! assert_eq!(config.targets[0].bucket.region, "us-east-1");
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::{GatewayError, GatewayResult};

/// Default S3 region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default (and protocol maximum) list page size.
pub const DEFAULT_S3_LIST_MAX_KEYS: i32 = 1000;

/// Default signed URL lifetime.
pub const DEFAULT_SIGNED_URL_EXPIRATION: Duration = Duration::from_secs(15 * 60);

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Listener and runtime settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Global template overrides (local files).
    #[serde(default)]
    pub templates: TemplatesConfig,
    /// Configured targets.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl GatewayConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(raw: &str) -> GatewayResult<Self> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| GatewayError::Config(format!("invalid YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, validate, and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_yaml_str(&raw)?;
        config.server.apply_env();
        Ok(config)
    }

    /// Look up a target by name.
    #[must_use]
    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> GatewayResult<()> {
        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.is_empty() {
                return Err(GatewayError::Config("target name must not be empty".into()));
            }
            if !names.insert(target.name.as_str()) {
                return Err(GatewayError::Config(format!(
                    "duplicate target name: {}",
                    target.name
                )));
            }
            target.validate()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Listener, logging, and webhook worker settings.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Bind address (e.g. `"0.0.0.0:8080"`).
    #[builder(default = String::from("0.0.0.0:8080"))]
    pub listen: String,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,

    /// Log output format: `text` or `json`.
    #[builder(default = String::from("text"))]
    pub log_format: String,

    /// Number of webhook delivery workers.
    #[builder(default = 4)]
    pub webhook_workers: usize,

    /// Capacity of the webhook delivery queue, in batches.
    #[builder(default = 1024)]
    pub webhook_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: String::from("0.0.0.0:8080"),
            log_level: String::from("info"),
            log_format: String::from("text"),
            webhook_workers: 4,
            webhook_queue_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// Override fields from environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `GATEWAY_LISTEN` | `listen` |
    /// | `LOG_LEVEL` | `log_level` |
    /// | `LOG_FORMAT` | `log_format` |
    /// | `WEBHOOK_WORKERS` | `webhook_workers` |
    /// | `WEBHOOK_QUEUE_CAPACITY` | `webhook_queue_capacity` |
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("GATEWAY_LISTEN") {
            self.listen = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("LOG_FORMAT") {
            self.log_format = v;
        }
        if let Ok(v) = std::env::var("WEBHOOK_WORKERS") {
            if let Ok(n) = v.parse::<usize>() {
                self.webhook_workers = n.max(1);
            }
        }
        if let Ok(v) = std::env::var("WEBHOOK_QUEUE_CAPACITY") {
            if let Ok(n) = v.parse::<usize>() {
                self.webhook_queue_capacity = n.max(1);
            }
        }
    }

    /// Whether JSON log output was requested.
    #[must_use]
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// Global templates, read from the local filesystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplatesConfig {
    /// Helper snippets prepended to every rewrite template.
    pub helpers: Vec<String>,
    /// Folder listing page.
    pub folder_list: Option<String>,
    /// 404 page.
    pub not_found: Option<String>,
    /// 500 page.
    pub internal_server_error: Option<String>,
    /// 403 page.
    pub forbidden: Option<String>,
    /// 400 page.
    pub bad_request: Option<String>,
    /// 401 page.
    pub unauthorized: Option<String>,
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// One bucket exposed under one or more mount paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    /// Unique target name.
    pub name: String,
    /// Where the target is exposed.
    pub mount: MountConfig,
    /// Backing bucket.
    pub bucket: BucketConfig,
    /// Ordered key rewrite rules.
    #[serde(default)]
    pub key_rewrite_list: Vec<KeyRewriteConfig>,
    /// Per-target template overrides.
    #[serde(default)]
    pub templates: TargetTemplatesConfig,
    /// Per-action policy.
    #[serde(default)]
    pub actions: ActionsConfig,
}

impl TargetConfig {
    fn validate(&self) -> GatewayResult<()> {
        let name = &self.name;
        if self.mount.paths.is_empty() {
            return Err(GatewayError::Config(format!(
                "target {name}: at least one mount path is required"
            )));
        }
        for path in &self.mount.paths {
            if !path.starts_with('/') || !path.ends_with('/') {
                return Err(GatewayError::Config(format!(
                    "target {name}: mount path {path} must start and end with /"
                )));
            }
        }
        if self.bucket.name.is_empty() {
            return Err(GatewayError::Config(format!(
                "target {name}: bucket name is required"
            )));
        }
        if self.bucket.s3_list_max_keys <= 0 {
            return Err(GatewayError::Config(format!(
                "target {name}: s3ListMaxKeys must be greater than 0"
            )));
        }
        for rule in &self.key_rewrite_list {
            Regex::new(&rule.source).map_err(|e| {
                GatewayError::Config(format!(
                    "target {name}: invalid rewrite source {}: {e}",
                    rule.source
                ))
            })?;
        }
        for hook in self.actions.all_webhooks() {
            hook.retry_waits().map_err(|e| {
                GatewayError::Config(format!("target {name}: webhook {}: {e}", hook.url))
            })?;
        }
        if let Some(get) = &self.actions.get {
            get.config.signed_url_expiration()?;
        }
        Ok(())
    }
}

/// Mount point of a target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountConfig {
    /// Optional `Host` header to match; any host when unset.
    #[serde(default)]
    pub host: Option<String>,
    /// Path prefixes, each starting and ending with `/`.
    pub paths: Vec<String>,
}

/// Backing bucket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfig {
    /// Bucket name.
    pub name: String,
    /// Root key prefix.
    #[serde(default)]
    pub prefix: String,
    /// Bucket region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom S3 endpoint.
    #[serde(default)]
    pub s3_endpoint: Option<String>,
    /// Static credentials; the SDK default chain is used when unset.
    #[serde(default, skip_serializing)]
    pub credentials: Option<BucketCredentialConfig>,
    /// Force plain HTTP towards the endpoint.
    #[serde(default)]
    pub disable_ssl: bool,
    /// Maximum number of entries per listing.
    #[serde(default = "default_s3_list_max_keys")]
    pub s3_list_max_keys: i32,
    /// Extra headers sent with each S3 operation.
    #[serde(default)]
    pub request_config: RequestConfig,
}

impl BucketConfig {
    /// The configured prefix, with a trailing `/` when non-empty.
    #[must_use]
    pub fn root_prefix(&self) -> String {
        let mut prefix = self.prefix.clone();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        prefix
    }
}

fn default_region() -> String {
    DEFAULT_REGION.to_owned()
}

fn default_s3_list_max_keys() -> i32 {
    DEFAULT_S3_LIST_MAX_KEYS
}

/// Static access key / secret key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketCredentialConfig {
    /// Access key id.
    pub access_key: CredentialConfig,
    /// Secret access key.
    pub secret_key: CredentialConfig,
}

/// Extra request headers per S3 operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestConfig {
    /// Headers for list operations.
    pub list_headers: BTreeMap<String, String>,
    /// Headers for get and head operations.
    pub get_headers: BTreeMap<String, String>,
    /// Headers for put operations.
    pub put_headers: BTreeMap<String, String>,
    /// Headers for delete operations.
    pub delete_headers: BTreeMap<String, String>,
}

/// A secret value read from a file, an environment variable, or inline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CredentialConfig {
    /// File holding the value.
    pub path: Option<String>,
    /// Environment variable holding the value.
    pub env: Option<String>,
    /// Inline value.
    pub value: Option<String>,
}

impl CredentialConfig {
    /// Resolve the secret. Inline value wins, then env, then file.
    pub fn resolve(&self) -> GatewayResult<String> {
        if let Some(value) = &self.value {
            return Ok(value.clone());
        }
        if let Some(env) = &self.env {
            return match std::env::var(env) {
                Ok(v) if !v.is_empty() => Ok(v),
                _ => Err(GatewayError::Config(format!(
                    "error loading credentials, environment variable {env} is empty"
                ))),
            };
        }
        if let Some(path) = &self.path {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                GatewayError::Config(format!("error loading credentials from {path}: {e}"))
            })?;
            return Ok(raw.trim_end_matches(['\r', '\n']).to_owned());
        }
        Err(GatewayError::Config(
            "credential needs one of path, env, or value".into(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Rewrite rules and templates
// ---------------------------------------------------------------------------

/// How a rewrite rule's target is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewriteTargetType {
    /// `$name` / `$N` substitution from the source match.
    #[default]
    Regex,
    /// Template rendered with the request context.
    Template,
}

/// One key rewrite rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRewriteConfig {
    /// Source regular expression.
    pub source: String,
    /// Target expression.
    pub target: String,
    /// Interpretation of `target`.
    #[serde(default)]
    pub target_type: RewriteTargetType,
}

/// A template file, local or stored in the target bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateItem {
    /// File path or object key.
    pub path: String,
    /// Whether `path` is a key in the target bucket.
    #[serde(default)]
    pub in_bucket: bool,
}

/// Per-target template overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetTemplatesConfig {
    /// Target-specific helper snippets for rewrite templates.
    pub helpers: Vec<TemplateItem>,
    /// Folder listing page.
    pub folder_list: Option<TemplateItem>,
    /// 404 page.
    pub not_found: Option<TemplateItem>,
    /// 500 page.
    pub internal_server_error: Option<TemplateItem>,
    /// 403 page.
    pub forbidden: Option<TemplateItem>,
    /// 400 page.
    pub bad_request: Option<TemplateItem>,
    /// 401 page.
    pub unauthorized: Option<TemplateItem>,
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Per-action policy blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionsConfig {
    /// GET and HEAD policy.
    #[serde(rename = "GET", default)]
    pub get: Option<GetActionConfig>,
    /// PUT policy.
    #[serde(rename = "PUT", default)]
    pub put: Option<PutActionConfig>,
    /// DELETE policy.
    #[serde(rename = "DELETE", default)]
    pub delete: Option<DeleteActionConfig>,
}

impl ActionsConfig {
    /// Whether GET/HEAD is served.
    #[must_use]
    pub fn get_enabled(&self) -> bool {
        self.get.as_ref().is_some_and(|a| a.enabled)
    }

    /// Whether PUT is served.
    #[must_use]
    pub fn put_enabled(&self) -> bool {
        self.put.as_ref().is_some_and(|a| a.enabled)
    }

    /// Whether DELETE is served.
    #[must_use]
    pub fn delete_enabled(&self) -> bool {
        self.delete.as_ref().is_some_and(|a| a.enabled)
    }

    /// GET webhooks, in declared order.
    #[must_use]
    pub fn get_webhooks(&self) -> &[WebhookConfig] {
        self.get.as_ref().map_or(&[], |a| a.config.webhooks.as_slice())
    }

    /// PUT webhooks, in declared order.
    #[must_use]
    pub fn put_webhooks(&self) -> &[WebhookConfig] {
        self.put
            .as_ref()
            .and_then(|a| a.config.as_ref())
            .map_or(&[], |c| c.webhooks.as_slice())
    }

    /// DELETE webhooks, in declared order.
    #[must_use]
    pub fn delete_webhooks(&self) -> &[WebhookConfig] {
        self.delete
            .as_ref()
            .map_or(&[], |a| a.config.webhooks.as_slice())
    }

    fn all_webhooks(&self) -> impl Iterator<Item = &WebhookConfig> {
        self.get_webhooks()
            .iter()
            .chain(self.put_webhooks())
            .chain(self.delete_webhooks())
    }
}

/// GET action block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetActionConfig {
    /// Whether GET/HEAD is served.
    #[serde(default)]
    pub enabled: bool,
    /// Behavior settings.
    #[serde(default)]
    pub config: GetConfig,
}

/// GET behavior settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetConfig {
    /// Redirect `path` to `path/` instead of answering 404.
    pub redirect_with_trailing_slash_for_not_found_file: bool,
    /// Object served for folder requests when present.
    pub index_document: Option<String>,
    /// Answer folder requests with an empty listing.
    pub disable_listing: bool,
    /// Redirect file requests to a presigned URL.
    pub redirect_to_signed_url: bool,
    /// Presigned URL lifetime (e.g. `"15m"`).
    pub signed_url_expiration: Option<String>,
    /// Webhooks fired after GET and HEAD.
    pub webhooks: Vec<WebhookConfig>,
}

impl GetConfig {
    /// Presigned URL lifetime, defaulting to 15 minutes.
    pub fn signed_url_expiration(&self) -> GatewayResult<Duration> {
        self.signed_url_expiration
            .as_deref()
            .map_or(Ok(DEFAULT_SIGNED_URL_EXPIRATION), parse_duration)
    }
}

/// PUT action block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutActionConfig {
    /// Whether PUT is served.
    #[serde(default)]
    pub enabled: bool,
    /// Upload policy; absent means a plain upload.
    #[serde(default)]
    pub config: Option<PutConfig>,
}

/// Upload policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PutConfig {
    /// User metadata templates.
    pub metadata: BTreeMap<String, String>,
    /// System metadata templates.
    pub system_metadata: Option<SystemMetadataConfig>,
    /// Storage class template.
    pub storage_class: Option<String>,
    /// Allow overwriting existing objects.
    pub allow_override: bool,
    /// Canned ACL applied to uploads.
    pub canned_acl: Option<String>,
    /// Webhooks fired after PUT.
    pub webhooks: Vec<WebhookConfig>,
}

/// System metadata templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemMetadataConfig {
    /// `Cache-Control`.
    pub cache_control: Option<String>,
    /// `Content-Disposition`.
    pub content_disposition: Option<String>,
    /// `Content-Encoding`.
    pub content_encoding: Option<String>,
    /// `Content-Language`.
    pub content_language: Option<String>,
    /// `Expires`, rendered as an RFC 3339 timestamp.
    pub expires: Option<String>,
}

/// DELETE action block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteActionConfig {
    /// Whether DELETE is served.
    #[serde(default)]
    pub enabled: bool,
    /// Behavior settings.
    #[serde(default)]
    pub config: DeleteConfig,
}

/// DELETE behavior settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteConfig {
    /// Webhooks fired after DELETE.
    pub webhooks: Vec<WebhookConfig>,
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

/// Default wait before the first webhook retry.
pub const DEFAULT_WEBHOOK_WAIT: Duration = Duration::from_millis(100);

/// Default cap on webhook retry waits.
pub const DEFAULT_WEBHOOK_MAX_WAIT: Duration = Duration::from_secs(2);

/// One webhook declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Endpoint.
    pub url: String,
    /// HTTP method.
    #[serde(default = "default_webhook_method")]
    pub method: String,
    /// Fixed headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Headers whose values come from secret storage.
    #[serde(default, skip_serializing)]
    pub secret_headers: BTreeMap<String, CredentialConfig>,
    /// Extra attempts after a transport failure.
    #[serde(default)]
    pub retry_count: u32,
    /// Wait before the first retry (e.g. `"500ms"`).
    #[serde(default)]
    pub default_wait_time: Option<String>,
    /// Upper bound for retry waits.
    #[serde(default)]
    pub max_wait_time: Option<String>,
}

impl WebhookConfig {
    /// Parsed `(default_wait, max_wait)`.
    pub fn retry_waits(&self) -> GatewayResult<(Duration, Duration)> {
        let wait = self
            .default_wait_time
            .as_deref()
            .map_or(Ok(DEFAULT_WEBHOOK_WAIT), parse_duration)?;
        let max = self
            .max_wait_time
            .as_deref()
            .map_or(Ok(DEFAULT_WEBHOOK_MAX_WAIT), parse_duration)?;
        Ok((wait, max.max(wait)))
    }
}

fn default_webhook_method() -> String {
    "POST".to_owned()
}

/// Fractional components such as `1.5s`.
static FRACTIONAL_COMPONENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d*)\.(\d+)([a-zA-Zµ]+)").ok());

/// Parse a duration such as `"250ms"`, `"2s"`, `"1m30s"`, `"1.5h"` or `"0"`.
///
/// Integer forms go straight to `humantime`. Fractional components are first
/// expanded to whole nanoseconds.
pub fn parse_duration(raw: &str) -> GatewayResult<Duration> {
    let invalid =
        |reason: String| GatewayError::Config(format!("invalid duration {raw:?}: {reason}"));
    let s = raw.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if !s.contains('.') {
        return humantime::parse_duration(s).map_err(|e| invalid(e.to_string()));
    }

    let re = FRACTIONAL_COMPONENT
        .as_ref()
        .ok_or_else(|| invalid("fractional pattern unavailable".into()))?;
    let mut expanded = String::with_capacity(s.len());
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let (Some(whole), Some(int), Some(frac), Some(unit)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let nanos = fractional_nanos(int.as_str(), frac.as_str(), unit.as_str())
            .map_err(invalid)?;
        expanded.push_str(&s[last..whole.start()]);
        expanded.push_str(&nanos.to_string());
        expanded.push_str("ns");
        last = whole.end();
    }
    expanded.push_str(&s[last..]);
    humantime::parse_duration(&expanded).map_err(|e| invalid(e.to_string()))
}

/// `int.frac` units in nanoseconds, precise to the nanosecond.
fn fractional_nanos(int: &str, frac: &str, unit: &str) -> Result<u128, String> {
    let unit_nanos = humantime::parse_duration(&format!("1{unit}"))
        .map_err(|e| e.to_string())?
        .as_nanos();
    let int: u128 = if int.is_empty() {
        0
    } else {
        int.parse().map_err(|_| "number is too large".to_owned())?
    };
    let frac = &frac[..frac.len().min(9)];
    let scale = 10u128.pow(u32::try_from(frac.len()).unwrap_or(9));
    let frac: u128 = frac.parse().map_err(|_| "invalid fraction".to_owned())?;

    unit_nanos
        .checked_mul(int)
        .and_then(|n| n.checked_add(unit_nanos * frac / scale))
        .ok_or_else(|| "number is too large".to_owned())
}
