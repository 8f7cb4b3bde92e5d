//! Request-scoped data handed explicitly through every gateway call.

use std::collections::BTreeMap;

use serde::Serialize;

/// Snapshot of the inbound HTTP request exposed to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    /// HTTP method.
    pub method: String,
    /// Request URI as received (path and query).
    pub url: String,
    /// URI path, still percent-encoded.
    pub path: String,
    /// `Host` header.
    pub host: String,
    /// Request headers; repeated headers are joined with `, `.
    pub headers: BTreeMap<String, String>,
}

impl RequestInfo {
    /// Capture method, URI and headers from request parts.
    #[must_use]
    pub fn from_parts(method: &http::Method, uri: &http::Uri, headers: &http::HeaderMap) -> Self {
        let mut map: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            let Ok(value) = value.to_str() else {
                continue;
            };
            map.entry(name.as_str().to_owned())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_owned());
        }
        let host = map
            .get("host")
            .cloned()
            .or_else(|| uri.host().map(ToOwned::to_owned))
            .unwrap_or_default();

        Self {
            method: method.as_str().to_owned(),
            url: uri
                .path_and_query()
                .map_or_else(|| uri.path().to_owned(), ToString::to_string),
            path: uri.path().to_owned(),
            host,
            headers: map,
        }
    }
}

/// Identity established by an upstream authentication layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    /// Login name.
    pub username: String,
    /// E-mail address, when known.
    pub email: Option<String>,
    /// Group memberships.
    pub groups: Vec<String>,
}

/// Everything a gateway call needs to know about its request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Inbound request snapshot.
    pub request: RequestInfo,
    /// Authenticated user, if any.
    pub user: Option<AuthenticatedUser>,
    /// Mount path the request was routed through (e.g. `/docs/`).
    pub mount_path: String,
    /// Correlation id for logs.
    pub request_id: String,
}
