//! `multipart/form-data` parser for PUT uploads.
//!
//! The upload is the part named `file`; its `filename` and `Content-Type`
//! describe the object. Other fields are ignored. The parser works on the
//! already-collected body bytes.

use bytes::Bytes;
use s3gate_core::GatewayError;

/// The `file` part of an upload form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Client-side file name.
    pub filename: String,
    /// Part content type, empty when the part declares none.
    pub content_type: String,
    /// File content.
    pub data: Bytes,
}

/// Extract the boundary from a `multipart/form-data; boundary=...` content type.
///
/// # Errors
///
/// Returns `BadRequest` if the content type is not `multipart/form-data` or the
/// boundary parameter is missing.
pub fn extract_boundary(content_type: &str) -> Result<String, GatewayError> {
    if !content_type
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
    {
        return Err(GatewayError::BadRequest(format!(
            "PUT requires Content-Type multipart/form-data, got: {content_type}"
        )));
    }

    for part in content_type.split(';') {
        if let Some(val) = part.trim().strip_prefix("boundary=") {
            let boundary = val.trim_matches('"');
            if boundary.is_empty() {
                break;
            }
            return Ok(boundary.to_owned());
        }
    }

    Err(GatewayError::BadRequest(
        "missing boundary in Content-Type".into(),
    ))
}

/// Find the `file` part in a multipart body.
///
/// # Errors
///
/// Returns `BadRequest` when no part is named `file`.
pub fn parse_upload(body: &Bytes, boundary: &str) -> Result<UploadedFile, GatewayError> {
    let delimiter = format!("--{boundary}");

    for (start, end) in part_ranges(body, delimiter.as_bytes()) {
        let part = &body[start..end];
        let Some(split) = find_bytes(part, b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&part[..split]);
        let disposition = headers
            .split("\r\n")
            .find(|line| line.to_ascii_lowercase().starts_with("content-disposition:"));
        let Some(disposition) = disposition else {
            continue;
        };
        if quoted_param(disposition, "name").as_deref() != Some("file") {
            continue;
        }

        let content_type = headers
            .split("\r\n")
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.trim()
                    .eq_ignore_ascii_case("content-type")
                    .then(|| value.trim().to_owned())
            })
            .unwrap_or_default();
        let data_start = start + split + 4;
        return Ok(UploadedFile {
            filename: quoted_param(disposition, "filename").unwrap_or_default(),
            content_type,
            data: body.slice(data_start..end),
        });
    }

    Err(GatewayError::BadRequest(
        "missing file field in multipart form data".into(),
    ))
}

/// Byte ranges of every part between boundary delimiters, without the
/// delimiters and surrounding CRLFs.
fn part_ranges(body: &[u8], delimiter: &[u8]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let Some(first) = find_bytes(body, delimiter) else {
        return ranges;
    };
    let mut cursor = first + delimiter.len();

    loop {
        if body[cursor..].starts_with(b"--") {
            break;
        }
        if body[cursor..].starts_with(b"\r\n") {
            cursor += 2;
        }
        let Some(next) = find_bytes(&body[cursor..], delimiter) else {
            break;
        };
        let mut end = cursor + next;
        if end >= cursor + 2 && body[..end].ends_with(b"\r\n") {
            end -= 2;
        }
        if end > cursor {
            ranges.push((cursor, end));
        }
        cursor += next + delimiter.len();
    }

    ranges
}

/// Value of `param="value"` (or unquoted `param=value`) in a header line.
///
/// Matches whole parameter names only, so `name` never matches `filename`.
fn quoted_param(header_line: &str, param: &str) -> Option<String> {
    header_line.split(';').skip(1).find_map(|segment| {
        let (key, value) = segment.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case(param) {
            return None;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        Some(value.to_owned())
    })
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
