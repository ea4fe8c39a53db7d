use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Where a backend-call argument is looked up in the inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentSource {
    Query,
    Path,
    Form,
    Header,
    Cookie,
    Attribute,
    Body,
    /// Probe path, query, form, header, then attributes.
    #[default]
    Auto,
}

/// Declarative spec for one backend-call argument.
///
/// `class` is the backend-side type name (Java class for Dubbo generic
/// calls). When absent, the type is inferred from the raw value at resolve
/// time. `key` defaults to `name`. `fields` makes the argument structured:
/// children resolve recursively into an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub source: ArgumentSource,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub fields: Vec<Argument>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl Argument {
    /// The lookup key in the request: `key` when set, else `name`.
    pub fn lookup_key(&self) -> &str {
        if self.key.is_empty() {
            &self.name
        } else {
            &self.key
        }
    }
}

/// Backend address and call selector of an endpoint or service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Upstream {
    #[serde(default)]
    pub proto: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub method: String,
}

/// The unit of routing: binds `(httpMethod, httpPattern, version)` to a
/// backend call.
///
/// `(httpMethod, httpPattern)` is the unique routing key; `version`
/// disambiguates parallel deployments behind the same key (empty means the
/// default slot). `filters` names the selective filter type ids this endpoint
/// opts into. `permission`/`permissions` are backend-service ids consulted by
/// the permission filter when `authorize` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default)]
    pub version: String,
    pub http_method: String,
    pub http_pattern: String,
    #[serde(default)]
    pub authorize: bool,
    #[serde(default)]
    pub upstream: Upstream,
    #[serde(default)]
    pub arguments: Vec<Argument>,
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Endpoint {
    /// Required-field validation applied to every decoded registry payload.
    pub fn validate(&self) -> Result<(), String> {
        if self.http_method.trim().is_empty() {
            return Err("httpMethod is empty".into());
        }
        if self.http_pattern.trim().is_empty() {
            return Err("httpPattern is empty".into());
        }
        if self.upstream.proto.trim().is_empty() {
            return Err("upstream.proto is empty".into());
        }
        Ok(())
    }

    /// Synthetic endpoint for invoking a backend service outside routing,
    /// e.g. the permission filter calling a verification service.
    pub fn from_service(service: &BackendService) -> Self {
        Endpoint {
            version: String::new(),
            http_method: String::new(),
            http_pattern: String::new(),
            authorize: false,
            upstream: service.upstream.clone(),
            arguments: service.arguments.clone(),
            permission: None,
            permissions: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// All permission service ids declared on this endpoint, `permission`
    /// first.
    pub fn permission_ids(&self) -> Vec<&str> {
        let mut ids = Vec::with_capacity(1 + self.permissions.len());
        if let Some(id) = self.permission.as_deref() {
            if !id.is_empty() {
                ids.push(id);
            }
        }
        ids.extend(self.permissions.iter().map(String::as_str));
        ids
    }
}

/// A reusable backend-call specification registered once and referenced by a
/// stable id from endpoints and filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendService {
    pub id: String,
    #[serde(default)]
    pub upstream: Upstream,
    #[serde(default)]
    pub arguments: Vec<Argument>,
}

impl BackendService {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id is empty".into());
        }
        if self.upstream.proto.trim().is_empty() {
            return Err("upstream.proto is empty".into());
        }
        Ok(())
    }
}

/// Kind of a registry change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    Added,
    Updated,
    Removed,
}

/// Typed endpoint change published by the registry reconciler.
#[derive(Debug, Clone)]
pub struct EndpointEvent {
    pub event_type: EventType,
    pub endpoint: Endpoint,
}

/// Typed backend-service change published by the registry reconciler.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub event_type: EventType,
    pub service: BackendService,
}

/// Decode a registry node payload into an endpoint. Malformed payloads
/// return `None` after a warning; they must never take the listener down.
pub fn decode_endpoint(data: &[u8]) -> Option<Endpoint> {
    let endpoint: Endpoint = match serde_json::from_slice(data) {
        Ok(ep) => ep,
        Err(err) => {
            warn!(error = %err, "Dropping malformed endpoint payload");
            return None;
        }
    };
    if let Err(reason) = endpoint.validate() {
        warn!(reason = %reason, "Dropping invalid endpoint payload");
        return None;
    }
    Some(endpoint)
}

/// Decode a registry node payload into a backend service, same error policy
/// as [`decode_endpoint`].
pub fn decode_service(data: &[u8]) -> Option<BackendService> {
    let service: BackendService = match serde_json::from_slice(data) {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "Dropping malformed service payload");
            return None;
        }
    };
    if let Err(reason) = service.validate() {
        warn!(reason = %reason, "Dropping invalid service payload");
        return None;
    }
    Some(service)
}

/// Coerce an attribute value into its attachment string form. Strings pass
/// through unquoted; everything else serializes as JSON.
pub fn value_to_attachment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_endpoint_scenario_payload() {
        let data = br#"{
            "httpMethod": "GET",
            "httpPattern": "/api/{id}",
            "version": "v1",
            "upstream": {"proto": "dubbo", "uri": "com.X.Svc", "method": "get"},
            "arguments": [{"name": "id", "source": "path"}]
        }"#;
        let ep = decode_endpoint(data).expect("valid payload");
        assert_eq!(ep.http_method, "GET");
        assert_eq!(ep.http_pattern, "/api/{id}");
        assert_eq!(ep.version, "v1");
        assert_eq!(ep.upstream.proto, "dubbo");
        assert_eq!(ep.arguments.len(), 1);
        assert_eq!(ep.arguments[0].source, ArgumentSource::Path);
        assert_eq!(ep.arguments[0].lookup_key(), "id");
        assert!(ep.arguments[0].required);
    }

    #[test]
    fn test_decode_endpoint_rejects_missing_fields() {
        assert!(decode_endpoint(b"{\"httpMethod\": \"GET\"}").is_none());
        assert!(decode_endpoint(b"not json at all").is_none());
        assert!(decode_endpoint(
            br#"{"httpMethod": "GET", "httpPattern": "/x", "upstream": {}}"#
        )
        .is_none());
    }

    #[test]
    fn test_decode_service() {
        let data = br#"{
            "id": "perm-verify",
            "upstream": {"proto": "dubbo", "uri": "com.X.Auth", "method": "verify"}
        }"#;
        let svc = decode_service(data).expect("valid payload");
        assert_eq!(svc.id, "perm-verify");
        assert!(decode_service(br#"{"id": "", "upstream": {"proto": "dubbo"}}"#).is_none());
    }

    #[test]
    fn test_permission_ids_order() {
        let mut ep = decode_endpoint(
            br#"{"httpMethod":"GET","httpPattern":"/x","upstream":{"proto":"dubbo"}}"#,
        )
        .unwrap();
        ep.permission = Some("first".into());
        ep.permissions = vec!["second".into()];
        assert_eq!(ep.permission_ids(), vec!["first", "second"]);
    }
}
