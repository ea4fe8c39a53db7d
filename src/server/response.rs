use crate::codec::Serializer;
use crate::context::ResponseStaging;
use crate::error::StateError;
use may_minihttp::Response;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{error, warn};

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "OK",
    }
}

// The embedded server only accepts `'static` header lines, so dynamic
// headers are interned once per unique line. Gateway response headers are
// fixed-value (content types, policy headers), keeping the set small; do not
// stage per-request unique values as headers.
static HEADER_LINES: Lazy<Mutex<HashSet<&'static str>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

fn intern_header_line(name: &str, value: &str) -> &'static str {
    let line = format!("{name}: {value}");
    let mut lines = HEADER_LINES.lock().unwrap();
    match lines.get(line.as_str()) {
        Some(existing) => existing,
        None => {
            let leaked: &'static str = Box::leak(line.into_boxed_str());
            lines.insert(leaked);
            leaked
        }
    }
}

/// Write a successful chain result: the staged status, headers, and payload
/// encoded by the configured serializer.
pub fn write_staged_response(
    res: &mut Response,
    serializer: &dyn Serializer,
    staging: &ResponseStaging,
) {
    res.status_code(staging.status_code as usize, status_reason(staging.status_code));
    res.header(intern_header_line("Content-Type", serializer.content_type()));
    for (name, value) in &staging.headers {
        res.header(intern_header_line(name, value));
    }
    match serializer.marshal(&staging.payload) {
        Ok(bytes) => res.body_vec(bytes),
        Err(err) => {
            error!(error = %err, "Response payload serialization failed");
            res.status_code(500, status_reason(500));
            res.body_vec(b"{\"errorCode\":\"GATEWAY:INTERNAL\",\"message\":\"SERIALIZATION\"}".to_vec());
        }
    }
}

/// Unified error writer: same serializer and content type as the success
/// path, body carrying the request id, stable code, and message. The
/// internal cause is logged here and never leaves the process.
pub fn write_state_error(
    res: &mut Response,
    serializer: &dyn Serializer,
    request_id: &str,
    headers: &[(String, String)],
    err: &StateError,
) {
    if let Some(cause) = &err.internal {
        warn!(
            request_id = %request_id,
            status = err.status_code,
            error_code = %err.error_code,
            message = %err.message,
            cause = %cause,
            "Request failed"
        );
    } else {
        warn!(
            request_id = %request_id,
            status = err.status_code,
            error_code = %err.error_code,
            message = %err.message,
            "Request failed"
        );
    }
    res.status_code(err.status_code as usize, status_reason(err.status_code));
    res.header(intern_header_line("Content-Type", serializer.content_type()));
    for (name, value) in headers {
        res.header(intern_header_line(name, value));
    }
    let body = serde_json::json!({
        "requestId": request_id,
        "errorCode": err.error_code,
        "message": err.message,
    });
    let bytes = serializer
        .marshal(&body)
        .unwrap_or_else(|_| body.to_string().into_bytes());
    res.body_vec(bytes);
}

/// Plain payload writer for the debug surface.
pub fn write_debug_payload(res: &mut Response, status: u16, content_type: &str, body: Vec<u8>) {
    res.status_code(status as usize, status_reason(status));
    res.header(intern_header_line("Content-Type", content_type));
    res.body_vec(body);
}

/// 401 challenge for the debug surface.
pub fn write_unauthorized(res: &mut Response) {
    res.status_code(401, status_reason(401));
    res.header("WWW-Authenticate: Basic realm=\"gantry-debug\"");
    res.header(intern_header_line("Content-Type", "application/json"));
    res.body_vec(Value::from("Unauthorized").to_string().into_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(403), "Forbidden");
        assert_eq!(status_reason(502), "Bad Gateway");
        assert_eq!(status_reason(418), "OK");
    }

    #[test]
    fn test_interned_lines_are_reused() {
        let a = intern_header_line("X-Test", "1");
        let b = intern_header_line("X-Test", "1");
        assert!(std::ptr::eq(a, b));
        assert_eq!(a, "X-Test: 1");
    }
}
