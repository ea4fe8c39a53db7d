use std::fmt;

// Stable error codes carried in gateway responses. Clients key off these,
// so they never change between releases.
pub const ERROR_CODE_GATEWAY_INTERNAL: &str = "GATEWAY:INTERNAL";
pub const ERROR_CODE_GATEWAY_BACKEND: &str = "GATEWAY:BACKEND";
pub const ERROR_CODE_REQUEST_INVALID: &str = "REQUEST:INVALID";
pub const ERROR_CODE_ROUTE_NOT_FOUND: &str = "ROUTE:NOT_FOUND";
pub const ERROR_CODE_VERSION_NOT_FOUND: &str = "ENDPOINT_VERSION_NOT_FOUND";
pub const ERROR_CODE_PERMISSION_DENIED: &str = "PERMISSION:ACCESS_DENIED";

pub const MESSAGE_FORM_PARSING: &str = "REQUEST:FORM_PARSING";
pub const MESSAGE_DUBBO_INVOKE: &str = "DUBBO_RPC:INVOKE";
pub const MESSAGE_HTTP_INVOKE: &str = "HTTP_RPC:INVOKE";

/// Structured gateway error flowing through filters, exchangers, the router
/// and argument resolution.
///
/// Carries the HTTP status to answer with, a stable machine-readable error
/// code, a human message, and an optional internal cause. The cause is logged
/// but never serialized into the response body.
#[derive(Debug)]
pub struct StateError {
    pub status_code: u16,
    pub error_code: String,
    pub message: String,
    pub internal: Option<anyhow::Error>,
}

impl StateError {
    pub fn new(
        status_code: u16,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status_code,
            error_code: error_code.into(),
            message: message.into(),
            internal: None,
        }
    }

    pub fn with_internal(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.internal = Some(cause.into());
        self
    }

    /// 500 with `GATEWAY:INTERNAL`, for programmer errors and recovered panics.
    pub fn gateway_internal(message: impl Into<String>) -> Self {
        Self::new(500, ERROR_CODE_GATEWAY_INTERNAL, message)
    }

    /// 400 with `REQUEST:INVALID`, for malformed client input.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(400, ERROR_CODE_REQUEST_INVALID, message)
    }

    /// 502 with `GATEWAY:BACKEND`, for upstream transport failures.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(502, ERROR_CODE_GATEWAY_BACKEND, message)
    }

    /// 404 answered when a routing key has no slot for the resolved version.
    pub fn version_not_found() -> Self {
        Self::new(404, ERROR_CODE_VERSION_NOT_FOUND, ERROR_CODE_VERSION_NOT_FOUND)
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StateError(status={}, code={}, message={})",
            self.status_code, self.error_code, self.message
        )
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.internal
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}
