//! Turns HTTP request parts into gateway inputs.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use http::header::{
    CONTENT_TYPE, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE, RANGE,
};
use percent_encoding::percent_decode_str;
use s3gate_core::store::GetConditions;
use s3gate_core::{GatewayError, GetInput, PutInput};

use crate::multipart::{extract_boundary, parse_upload};

/// Percent-decode a request path.
///
/// # Errors
///
/// Returns `Internal` when the decoded bytes are not valid UTF-8.
pub fn decode_path(raw: &str) -> Result<String, GatewayError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("cannot unescape path {raw}: {e}")))
}

/// Build the GET/HEAD input from the decoded path and request headers.
///
/// # Errors
///
/// Returns `BadRequest` when `If-Modified-Since` or `If-Unmodified-Since`
/// is not an HTTP date.
pub fn get_input(request_path: String, headers: &HeaderMap) -> Result<GetInput, GatewayError> {
    Ok(GetInput {
        request_path,
        conditions: GetConditions {
            if_modified_since: http_date_header(headers, &IF_MODIFIED_SINCE)?,
            if_unmodified_since: http_date_header(headers, &IF_UNMODIFIED_SINCE)?,
            if_match: string_header(headers, &IF_MATCH),
            if_none_match: string_header(headers, &IF_NONE_MATCH),
            range: string_header(headers, &RANGE),
        },
    })
}

/// Build the PUT input from the decoded path and the multipart body.
///
/// # Errors
///
/// Returns `BadRequest` when the body is not a multipart form carrying a
/// `file` part.
pub fn put_input(
    request_path: String,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<PutInput, GatewayError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let boundary = extract_boundary(content_type)?;
    let file = parse_upload(body, &boundary)?;

    Ok(PutInput {
        request_path,
        filename: file.filename,
        content_type: file.content_type,
        content_size: i64::try_from(file.data.len()).unwrap_or(i64::MAX),
        body: file.data,
    })
}

fn string_header(headers: &HeaderMap, name: &http::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

fn http_date_header(
    headers: &HeaderMap,
    name: &http::HeaderName,
) -> Result<Option<DateTime<Utc>>, GatewayError> {
    let Some(raw) = headers.get(name) else {
        return Ok(None);
    };
    let raw = raw
        .to_str()
        .map_err(|_| GatewayError::BadRequest(format!("{name} is not valid ASCII")))?;
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc2822(raw)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| GatewayError::BadRequest(format!("invalid {name} {raw:?}: {e}")))
}
