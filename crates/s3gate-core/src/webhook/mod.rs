//! Webhook dispatcher.
//!
//! After a completed operation the gateway hands a [`HookEvent`] to a
//! [`WebhookDispatcher`]. Delivery happens off the request path: the event is
//! queued and a worker sends it to every hook declared for the target and
//! action, one after another, in declared order.

mod client;
mod manager;

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::config::TargetConfig;
use crate::error::GatewayResult;
use crate::store::{GetConditions, ResultInfo};

pub use client::{HookClient, REDIRECT_LIMIT};
pub use manager::WebhookManager;

/// Operation that triggered a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HookAction {
    /// GET request.
    Get,
    /// HEAD request, delivered to the GET hooks.
    Head,
    /// PUT request.
    Put,
    /// DELETE request.
    Delete,
}

impl HookAction {
    /// Wire name of the action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conditional headers of a GET request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInputMetadata {
    /// `If-Modified-Since`, RFC 3339.
    pub if_modified_since: String,
    /// `If-Match`.
    pub if_match: String,
    /// `If-None-Match`.
    pub if_none_match: String,
    /// `If-Unmodified-Since`, RFC 3339.
    pub if_unmodified_since: String,
    /// `Range`.
    pub range: String,
}

impl From<&GetConditions> for GetInputMetadata {
    fn from(c: &GetConditions) -> Self {
        Self {
            if_modified_since: rfc3339(c.if_modified_since),
            if_match: c.if_match.clone().unwrap_or_default(),
            if_none_match: c.if_none_match.clone().unwrap_or_default(),
            if_unmodified_since: rfc3339(c.if_unmodified_since),
            range: c.range.clone().unwrap_or_default(),
        }
    }
}

/// Conditional headers of a HEAD request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadInputMetadata {
    /// `If-Modified-Since`, RFC 3339.
    pub if_modified_since: String,
    /// `If-Match`.
    pub if_match: String,
    /// `If-None-Match`.
    pub if_none_match: String,
    /// `If-Unmodified-Since`, RFC 3339.
    pub if_unmodified_since: String,
}

impl From<&GetConditions> for HeadInputMetadata {
    fn from(c: &GetConditions) -> Self {
        Self {
            if_modified_since: rfc3339(c.if_modified_since),
            if_match: c.if_match.clone().unwrap_or_default(),
            if_none_match: c.if_none_match.clone().unwrap_or_default(),
            if_unmodified_since: rfc3339(c.if_unmodified_since),
        }
    }
}

/// Upload description of a PUT request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PutInputMetadata {
    /// Uploaded file name.
    pub filename: String,
    /// Declared content type.
    pub content_type: String,
    /// Size in bytes.
    pub content_size: i64,
}

/// Request-side metadata carried in a webhook body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum InputMetadata {
    /// GET conditions.
    Get(GetInputMetadata),
    /// HEAD conditions.
    Head(HeadInputMetadata),
    /// PUT upload.
    Put(PutInputMetadata),
}

/// `target` member of a webhook body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookTarget {
    /// Target name.
    pub name: String,
}

/// JSON document delivered to every hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookBody {
    /// Request-side metadata; absent for DELETE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_metadata: Option<InputMetadata>,
    /// Where the operation ran.
    pub output_metadata: ResultInfo,
    /// Target that served the request.
    pub target: HookTarget,
    /// Triggering action.
    pub action: HookAction,
    /// Request path as received.
    pub request_path: String,
}

/// A completed operation to notify about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookEvent {
    /// Triggering action.
    pub action: HookAction,
    /// Target name.
    pub target: String,
    /// Request path as received.
    pub request_path: String,
    /// Request-side metadata.
    pub input: Option<InputMetadata>,
    /// Where the operation ran.
    pub output: ResultInfo,
}

impl HookEvent {
    /// Event for a GET.
    #[must_use]
    pub fn get(target: &str, request_path: &str, conditions: &GetConditions, output: ResultInfo) -> Self {
        Self::new(
            HookAction::Get,
            target,
            request_path,
            Some(InputMetadata::Get(conditions.into())),
            output,
        )
    }

    /// Event for a HEAD.
    #[must_use]
    pub fn head(target: &str, request_path: &str, conditions: &GetConditions, output: ResultInfo) -> Self {
        Self::new(
            HookAction::Head,
            target,
            request_path,
            Some(InputMetadata::Head(conditions.into())),
            output,
        )
    }

    /// Event for a PUT.
    #[must_use]
    pub fn put(target: &str, request_path: &str, input: PutInputMetadata, output: ResultInfo) -> Self {
        Self::new(
            HookAction::Put,
            target,
            request_path,
            Some(InputMetadata::Put(input)),
            output,
        )
    }

    /// Event for a DELETE.
    #[must_use]
    pub fn delete(target: &str, request_path: &str, output: ResultInfo) -> Self {
        Self::new(HookAction::Delete, target, request_path, None, output)
    }

    fn new(
        action: HookAction,
        target: &str,
        request_path: &str,
        input: Option<InputMetadata>,
        output: ResultInfo,
    ) -> Self {
        Self {
            action,
            target: target.to_owned(),
            request_path: request_path.to_owned(),
            input,
            output,
        }
    }

    /// The JSON body sent to hooks.
    #[must_use]
    pub fn body(&self) -> HookBody {
        HookBody {
            input_metadata: self.input.clone(),
            output_metadata: self.output.clone(),
            target: HookTarget {
                name: self.target.clone(),
            },
            action: self.action,
            request_path: self.request_path.clone(),
        }
    }
}

/// Fire-and-forget notification fan-out.
pub trait WebhookDispatcher: Send + Sync + fmt::Debug {
    /// Rebuild hook clients from the full target list, pruning removed targets.
    fn load(&self, targets: &[TargetConfig]) -> GatewayResult<()>;

    /// Queue delivery of `event`. Never blocks and never fails the caller.
    fn dispatch(&self, event: HookEvent);
}

fn rfc3339(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}
