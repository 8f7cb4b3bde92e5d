//! Template engine seam.
//!
//! Rewrite rules, PUT metadata, and the HTTP pages are all rendered through a
//! [`TemplateEngine`]. The production engine is [`MiniJinjaEngine`].

use minijinja::Environment;

use crate::error::{GatewayError, GatewayResult};

/// Renders a template source against a JSON context.
pub trait TemplateEngine: Send + Sync + std::fmt::Debug {
    /// Render `source` with `context`.
    fn render(&self, source: &str, context: &serde_json::Value) -> GatewayResult<String>;

    /// Render an HTML page, escaping interpolated values.
    fn render_html(&self, source: &str, context: &serde_json::Value) -> GatewayResult<String>;
}

/// [`TemplateEngine`] backed by `minijinja`.
#[derive(Debug)]
pub struct MiniJinjaEngine {
    env: Environment<'static>,
}

impl MiniJinjaEngine {
    /// Create an engine with the gateway filters registered.
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("human_size", human_size);
        Self { env }
    }
}

impl Default for MiniJinjaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine for MiniJinjaEngine {
    fn render(&self, source: &str, context: &serde_json::Value) -> GatewayResult<String> {
        self.env
            .render_str(source, context)
            .map_err(|e| GatewayError::Template(e.to_string()))
    }

    fn render_html(&self, source: &str, context: &serde_json::Value) -> GatewayResult<String> {
        self.env
            .render_named_str("page.html", source, context)
            .map_err(|e| GatewayError::Template(e.to_string()))
    }
}

/// Render and collapse the output to a single trimmed line.
pub fn render_single_line(
    engine: &dyn TemplateEngine,
    source: &str,
    context: &serde_json::Value,
) -> GatewayResult<String> {
    let rendered = engine.render(source, context)?;
    Ok(strip_newlines(&rendered).trim().to_owned())
}

/// Remove every `\n` and `\r`.
#[must_use]
pub fn strip_newlines(s: &str) -> String {
    s.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

/// Format a byte count using SI units (`1.5 kB`).
#[allow(clippy::cast_precision_loss)]
fn human_size(bytes: i64) -> String {
    const UNITS: [&str; 6] = ["B", "kB", "MB", "GB", "TB", "PB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
