use crate::error::{StateError, MESSAGE_FORM_PARSING};
use crate::model::{value_to_attachment, Endpoint};
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

// Attribute names seeded on every reattached context.
pub const ATTR_REQUEST_TIME: &str = "X-Request-Time";
pub const ATTR_REQUEST_ID: &str = "X-Request-Id";
pub const ATTR_REQUEST_HOST: &str = "X-Request-Host";
pub const ATTR_REQUEST_AGENT: &str = "X-Request-Agent";

pub const GATEWAY_AGENT: &str = "gantry/gateway";

/// Immutable view of the inbound HTTP request, built once per request by the
/// server layer. Header names are lowercased.
#[derive(Debug, Default)]
pub struct RequestReader {
    pub method: String,
    pub uri: String,
    pub path: String,
    pub host: String,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
    pub path_params: HashMap<String, String>,
    pub raw_body: Vec<u8>,
    /// Body decoded as JSON when the payload parses as such.
    pub body: Option<Value>,
    /// Request-scoped values seeded by the web layer; `Context::value` falls
    /// through to these.
    pub web_values: HashMap<String, Value>,
}

impl RequestReader {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn http_method(&self) -> Method {
        self.method.parse().unwrap_or(Method::GET)
    }
}

/// Response state staged by filters and the exchanger, written out by the
/// server layer once the chain returns.
#[derive(Debug, Clone)]
pub struct ResponseStaging {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub payload: Value,
}

impl Default for ResponseStaging {
    fn default() -> Self {
        Self {
            status_code: 200,
            headers: Vec::new(),
            payload: Value::Null,
        }
    }
}

/// Per-request state carrier passed through the filter chain.
///
/// Contexts are recycled through [`ContextPool`]: `reattach` binds one to a
/// new request, `release` clears all mutable state before it goes back to the
/// free list. Between the two the context is exclusively owned by the
/// dispatching coroutine; the attribute and value maps are behind locks so
/// filters that spawn helper tasks may read them concurrently.
pub struct Context {
    request_id: String,
    endpoint: Option<Arc<Endpoint>>,
    reader: RequestReader,
    response: Mutex<ResponseStaging>,
    attributes: RwLock<HashMap<String, Value>>,
    values: RwLock<HashMap<String, Value>>,
    logger: Mutex<Option<tracing::Span>>,
}

impl Context {
    fn new() -> Self {
        Self {
            request_id: String::new(),
            endpoint: None,
            reader: RequestReader::default(),
            response: Mutex::new(ResponseStaging::default()),
            attributes: RwLock::new(HashMap::new()),
            values: RwLock::new(HashMap::new()),
            logger: Mutex::new(None),
        }
    }

    /// Bind this context to a new request and seed the standard attributes.
    pub fn reattach(
        &mut self,
        request_id: String,
        reader: RequestReader,
        endpoint: Option<Arc<Endpoint>>,
    ) {
        let host = reader.host.clone();
        self.request_id = request_id;
        self.endpoint = endpoint;
        self.reader = reader;
        let unix_now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut attrs = self.attributes.write().unwrap();
        attrs.insert(ATTR_REQUEST_TIME.to_string(), Value::from(unix_now));
        attrs.insert(ATTR_REQUEST_ID.to_string(), Value::from(self.request_id.clone()));
        attrs.insert(ATTR_REQUEST_HOST.to_string(), Value::from(host));
        attrs.insert(ATTR_REQUEST_AGENT.to_string(), Value::from(GATEWAY_AGENT));
    }

    /// Clear all mutable state. The context must not be touched again until
    /// the next `reattach`.
    pub fn release(&mut self) {
        self.request_id.clear();
        self.endpoint = None;
        self.reader = RequestReader::default();
        *self.response.lock().unwrap() = ResponseStaging::default();
        self.attributes.write().unwrap().clear();
        self.values.write().unwrap().clear();
        *self.logger.lock().unwrap() = None;
    }

    /// Attach a request-scoped logging span; filters inherit it via
    /// [`Context::logger`].
    pub fn set_logger(&self, span: tracing::Span) {
        *self.logger.lock().unwrap() = Some(span);
    }

    pub fn logger(&self) -> Option<tracing::Span> {
        self.logger.lock().unwrap().clone()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn endpoint(&self) -> Option<Arc<Endpoint>> {
        self.endpoint.clone()
    }

    pub fn request(&self) -> &RequestReader {
        &self.reader
    }

    /// Eagerly parse a `application/x-www-form-urlencoded` body. Called by
    /// the route handler before the filter chain runs; a malformed body is a
    /// client error.
    pub fn parse_form(&mut self) -> Result<(), StateError> {
        let is_form = self
            .reader
            .header("content-type")
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if !is_form || self.reader.raw_body.is_empty() {
            return Ok(());
        }
        validate_urlencoded(&self.reader.raw_body).map_err(|reason| {
            StateError::invalid_request(MESSAGE_FORM_PARSING)
                .with_internal(anyhow::anyhow!("form body: {reason}"))
        })?;
        self.reader.form = url::form_urlencoded::parse(&self.reader.raw_body)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Ok(())
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.read().unwrap().get(name).cloned()
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: Value) {
        self.attributes.write().unwrap().insert(name.into(), value);
    }

    /// Copied-out view of all attributes.
    pub fn attributes(&self) -> HashMap<String, Value> {
        self.attributes.read().unwrap().clone()
    }

    /// Attributes as a string map, the form propagated to backends as call
    /// attachments.
    pub fn attachments(&self) -> HashMap<String, String> {
        self.attributes
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), value_to_attachment(v)))
            .collect()
    }

    /// Read a value: the local cache wins, then the web layer's
    /// request-scoped values.
    pub fn value(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.values.read().unwrap().get(name) {
            return Some(v.clone());
        }
        self.reader.web_values.get(name).cloned()
    }

    /// Writes only ever touch the local cache.
    pub fn set_value(&self, name: impl Into<String>, value: Value) {
        self.values.write().unwrap().insert(name.into(), value);
    }

    pub fn set_response_status(&self, status_code: u16) {
        self.response.lock().unwrap().status_code = status_code;
    }

    pub fn add_response_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.response
            .lock()
            .unwrap()
            .headers
            .push((name.into(), value.into()));
    }

    pub fn set_response_payload(&self, payload: Value) {
        self.response.lock().unwrap().payload = payload;
    }

    /// Snapshot of the staged response, taken by the server layer for
    /// writing.
    pub fn response(&self) -> ResponseStaging {
        self.response.lock().unwrap().clone()
    }

    /// Headers staged so far; the unified error writer applies these even on
    /// failure paths.
    pub fn response_headers(&self) -> Vec<(String, String)> {
        self.response.lock().unwrap().headers.clone()
    }
}

/// Reject bodies with broken percent escapes before lossy decoding hides
/// them.
fn validate_urlencoded(bytes: &[u8]) -> Result<(), String> {
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return Err(format!("invalid percent escape at byte {i}"));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Free-list pool of contexts. Never shared across concurrent requests: a
/// context leaves the pool on acquire and only re-enters after `release`
/// wiped it.
pub struct ContextPool {
    free: Mutex<Vec<Box<Context>>>,
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextPool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn acquire(&self) -> Box<Context> {
        self.free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Box::new(Context::new()))
    }

    pub fn release(&self, mut ctx: Box<Context>) {
        ctx.release();
        self.free.lock().unwrap().push(ctx);
    }

    #[cfg(test)]
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}
