//! Key rewrite engine.
//!
//! Rules are tried in declared order and the first rule whose source matches
//! decides the new key. Keys that match no rule pass through unchanged.

use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::config::{KeyRewriteConfig, RewriteTargetType, TargetConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::request::{AuthenticatedUser, RequestInfo};
use crate::template::{TemplateEngine, render_single_line};

/// A compiled rewrite rule.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    source: Regex,
    target: String,
    kind: RewriteTargetType,
}

impl RewriteRule {
    /// Compile one configured rule.
    pub fn compile(config: &KeyRewriteConfig) -> GatewayResult<Self> {
        let source = Regex::new(&config.source).map_err(|e| {
            GatewayError::Config(format!("invalid rewrite source {}: {e}", config.source))
        })?;
        Ok(Self {
            source,
            target: config.target.clone(),
            kind: config.target_type,
        })
    }

    /// Compile every rule of a target, preserving order.
    pub fn compile_all(configs: &[KeyRewriteConfig]) -> GatewayResult<Vec<Self>> {
        configs.iter().map(Self::compile).collect()
    }
}

/// Inputs for TEMPLATE rules.
#[derive(Debug, Clone, Copy)]
pub struct RewriteContext<'a> {
    /// Inbound request.
    pub request: &'a RequestInfo,
    /// Authenticated user.
    pub user: Option<&'a AuthenticatedUser>,
    /// Target configuration.
    pub target: &'a TargetConfig,
    /// Helper snippets prepended to every template.
    pub helpers: &'a str,
    /// Engine used to render templates.
    pub engine: &'a dyn TemplateEngine,
}

/// Rewrite `key` with the first matching rule.
pub fn rewrite_key(
    key: &str,
    rules: &[RewriteRule],
    ctx: &RewriteContext<'_>,
) -> GatewayResult<String> {
    let Some(rule) = rules.iter().find(|r| r.source.is_match(key)) else {
        return Ok(key.to_owned());
    };
    debug!(key, source = %rule.source, "key matches rewrite rule");

    let rewritten = if rule.source.captures_len() <= 1 {
        rule.target.clone()
    } else {
        match rule.kind {
            RewriteTargetType::Regex => {
                let mut expanded = String::new();
                if let Some(caps) = rule.source.captures(key) {
                    caps.expand(&rule.target, &mut expanded);
                }
                expanded
            }
            RewriteTargetType::Template => {
                let source = format!("{}\n{}", ctx.helpers, rule.target);
                let context = json!({
                    "request": ctx.request,
                    "user": ctx.user,
                    "target": ctx.target,
                    "key": key,
                });
                render_single_line(ctx.engine, &source, &context)?
            }
        }
    };

    debug!(key, rewritten, "key rewritten");
    Ok(rewritten)
}
