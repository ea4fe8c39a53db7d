use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_version_header() -> String {
    "X-Version".to_string()
}

fn default_version_value() -> String {
    "v1".to_string()
}

fn default_basic_auth_username() -> String {
    "gantry".to_string()
}

fn default_endpoint_path() -> String {
    "/gantry-endpoint".to_string()
}

fn default_service_path() -> String {
    "/gantry-service".to_string()
}

fn default_registry_proto() -> String {
    "fs".to_string()
}

fn default_registry_active() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_registry_timeout_ms() -> u64 {
    5_000
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_cluster() -> String {
    "failover".to_string()
}

fn default_load_balance() -> String {
    "random".to_string()
}

fn default_body_limit() -> usize {
    1 << 20
}

/// Top-level gateway configuration, loaded from a YAML file.
///
/// Every field has a default so an empty document is a runnable
/// configuration. Timeouts are milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(rename = "HttpServer", default)]
    pub http_server: HttpServerConfig,
    #[serde(rename = "EndpointRegistry", default)]
    pub endpoint_registry: EndpointRegistryConfig,
    #[serde(rename = "Backend", default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted request body, in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
    #[serde(default)]
    pub tls_cert_file: String,
    #[serde(default)]
    pub tls_key_file: String,
    /// Header that selects the endpoint version for a request.
    #[serde(default = "default_version_header")]
    pub version_header: String,
    /// Version slot used when the header is absent or unknown.
    #[serde(default = "default_version_value")]
    pub default_version: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(rename = "BasicAuth", default)]
    pub basic_auth: BasicAuthConfig,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            body_limit: default_body_limit(),
            tls_cert_file: String::new(),
            tls_key_file: String::new(),
            version_header: default_version_header(),
            default_version: default_version_value(),
            debug: false,
            basic_auth: BasicAuthConfig::default(),
        }
    }
}

impl HttpServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// TLS is requested only when both file paths are set.
    pub fn tls_configured(&self) -> bool {
        !self.tls_cert_file.is_empty() && !self.tls_key_file.is_empty()
    }
}

/// Credentials protecting the debug endpoints. A missing password is
/// replaced at startup by a random 8-character string logged once.
#[derive(Debug, Clone, Deserialize)]
pub struct BasicAuthConfig {
    #[serde(default = "default_basic_auth_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self {
            username: default_basic_auth_username(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EndpointRegistryConfig {
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,
    #[serde(default = "default_service_path")]
    pub service_path: String,
    /// Backend protocol resolved through the registry-factory slot.
    #[serde(default = "default_registry_proto")]
    pub registry_proto: String,
    #[serde(default = "default_registry_active")]
    pub registry_active: Vec<String>,
    /// Per-id backend settings, keyed by the ids in `registry-active`.
    #[serde(flatten)]
    pub backends: HashMap<String, RegistryBackendConfig>,
}

impl Default for EndpointRegistryConfig {
    fn default() -> Self {
        Self {
            endpoint_path: default_endpoint_path(),
            service_path: default_service_path(),
            registry_proto: default_registry_proto(),
            registry_active: default_registry_active(),
            backends: HashMap::new(),
        }
    }
}

impl EndpointRegistryConfig {
    /// Settings for one active backend id; defaults when the sub-table is
    /// absent.
    pub fn backend(&self, id: &str) -> RegistryBackendConfig {
        self.backends.get(id).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryBackendConfig {
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_registry_timeout_ms")]
    pub timeout: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Default for RegistryBackendConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            timeout: default_registry_timeout_ms(),
            username: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "Dubbo", default)]
    pub dubbo: DubboConfig,
    #[serde(rename = "Http", default)]
    pub http: HttpBackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DubboConfig {
    #[serde(default = "default_cluster")]
    pub cluster: String,
    #[serde(default = "default_load_balance")]
    pub load_balance: String,
    #[serde(default)]
    pub trace_enable: bool,
    /// Delay before a freshly built reference is considered warm, in ms.
    #[serde(default)]
    pub reference_delay: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout: u64,
    #[serde(rename = "Registry", default)]
    pub registry: DubboRegistryConfig,
}

impl Default for DubboConfig {
    fn default() -> Self {
        Self {
            cluster: default_cluster(),
            load_balance: default_load_balance(),
            trace_enable: false,
            reference_delay: 0,
            timeout: default_http_timeout_ms(),
            registry: DubboRegistryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DubboRegistryConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpBackendConfig {
    #[serde(default = "default_http_timeout_ms")]
    pub timeout: u64,
    #[serde(default)]
    pub trace_enable: bool,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout_ms(),
            trace_enable: false,
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: GatewayConfig = serde_yaml::from_slice(&bytes)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_runnable() {
        let config: GatewayConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.http_server.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.http_server.version_header, "X-Version");
        assert_eq!(config.http_server.default_version, "v1");
        assert_eq!(config.endpoint_registry.endpoint_path, "/gantry-endpoint");
        assert_eq!(config.endpoint_registry.registry_active, vec!["default"]);
        assert_eq!(config.backend.http.timeout, 10_000);
        assert!(!config.http_server.tls_configured());
    }

    #[test]
    fn test_full_document() {
        let doc = r#"
HttpServer:
  address: 127.0.0.1
  port: 9090
  version-header: X-Api-Version
  debug: true
  BasicAuth:
    username: ops
    password: s3cret
EndpointRegistry:
  endpoint-path: /meta/endpoints
  service-path: /meta/services
  registry-proto: fs
  registry-active: [primary]
  primary:
    address: /var/lib/gantry/registry
    timeout: 2000
Backend:
  Dubbo:
    cluster: failfast
    load-balance: roundrobin
    trace-enable: true
  Http:
    timeout: 1500
"#;
        let config: GatewayConfig = serde_yaml::from_str(doc).unwrap();
        assert_eq!(config.http_server.bind_address(), "127.0.0.1:9090");
        assert_eq!(config.http_server.version_header, "X-Api-Version");
        assert!(config.http_server.debug);
        assert_eq!(config.http_server.basic_auth.username, "ops");
        let primary = config.endpoint_registry.backend("primary");
        assert_eq!(primary.address, "/var/lib/gantry/registry");
        assert_eq!(primary.timeout, 2000);
        // An id without a sub-table resolves to defaults.
        assert_eq!(config.endpoint_registry.backend("missing").timeout, 5000);
        assert_eq!(config.backend.dubbo.cluster, "failfast");
        assert_eq!(config.backend.http.timeout, 1500);
    }
}
