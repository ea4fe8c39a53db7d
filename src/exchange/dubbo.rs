use super::Exchanger;
use crate::argument::{resolve_arguments, ArgumentLookup};
use crate::config::{DubboConfig, GatewayConfig};
use crate::context::Context;
use crate::error::{StateError, MESSAGE_DUBBO_INVOKE};
use crate::model::Endpoint;
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

pub const PROTO_DUBBO: &str = "dubbo";

/// Client-side view of one provider interface, built lazily on first use and
/// cached for the process lifetime.
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub interface: String,
    pub provider_url: String,
    pub cluster: String,
    pub load_balance: String,
    pub timeout: Duration,
}

/// The generic-invocation seam: `(reference, method, types, values,
/// attachments) -> result`. The concrete Dubbo client library sits behind
/// this trait; tests inject their own.
pub trait GenericInvoker: Send + Sync {
    fn invoke(
        &self,
        reference: &ReferenceConfig,
        method: &str,
        arg_types: &[String],
        arg_values: &[Value],
        attachments: &HashMap<String, String>,
    ) -> anyhow::Result<Value>;
}

/// Default invoker: JSON-RPC 2.0 POST against the provider address, one
/// endpoint per interface. Attachments travel as request headers.
pub struct JsonRpcInvoker {
    client: OnceCell<reqwest::blocking::Client>,
    sequence: AtomicU64,
}

impl Default for JsonRpcInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRpcInvoker {
    pub fn new() -> Self {
        Self {
            client: OnceCell::new(),
            sequence: AtomicU64::new(1),
        }
    }

    fn client(&self, timeout: Duration) -> anyhow::Result<&reqwest::blocking::Client> {
        self.client.get_or_try_init(|| {
            reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(anyhow::Error::from)
        })
    }
}

impl GenericInvoker for JsonRpcInvoker {
    fn invoke(
        &self,
        reference: &ReferenceConfig,
        method: &str,
        arg_types: &[String],
        arg_values: &[Value],
        attachments: &HashMap<String, String>,
    ) -> anyhow::Result<Value> {
        let url = format!(
            "{}/{}",
            reference.provider_url.trim_end_matches('/'),
            reference.interface
        );
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": arg_values,
            "paramTypes": arg_types,
            "id": self.sequence.fetch_add(1, Ordering::Relaxed),
        });
        let mut builder = self.client(reference.timeout)?.post(&url).json(&request);
        for (name, value) in attachments {
            builder = builder.header(name, value);
        }
        let response = builder.send()?.error_for_status()?;
        let body: Value = response.json()?;
        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            anyhow::bail!("provider error: {error}");
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Dubbo-generic exchanger.
///
/// Owns the `interface -> reference` cache, filled lazily under the write
/// lock on first use. Context attributes propagate to providers through the
/// invoker's attachment mechanism.
pub struct DubboExchanger {
    lookup: ArgumentLookup,
    invoker: Arc<dyn GenericInvoker>,
    settings: OnceCell<DubboConfig>,
    references: RwLock<HashMap<String, Arc<ReferenceConfig>>>,
}

impl DubboExchanger {
    pub fn new(lookup: ArgumentLookup, invoker: Arc<dyn GenericInvoker>) -> Self {
        Self {
            lookup,
            invoker,
            settings: OnceCell::new(),
            references: RwLock::new(HashMap::new()),
        }
    }

    fn settings(&self) -> &DubboConfig {
        // init() runs before any request reaches the exchanger.
        self.settings.get_or_init(DubboConfig::default)
    }

    fn reference(&self, endpoint: &Endpoint) -> Arc<ReferenceConfig> {
        let interface = &endpoint.upstream.uri;
        if let Some(found) = self.references.read().unwrap().get(interface) {
            return found.clone();
        }
        let mut references = self.references.write().unwrap();
        // Another coroutine may have filled the slot while we waited.
        if let Some(found) = references.get(interface) {
            return found.clone();
        }
        let settings = self.settings();
        let provider_url = if endpoint.upstream.host.is_empty() {
            settings.registry.address.clone()
        } else {
            endpoint.upstream.host.clone()
        };
        let provider_url = if provider_url.contains("://") {
            provider_url
        } else {
            format!("http://{provider_url}")
        };
        let built = Arc::new(ReferenceConfig {
            interface: interface.clone(),
            provider_url,
            cluster: settings.cluster.clone(),
            load_balance: settings.load_balance.clone(),
            timeout: Duration::from_millis(settings.timeout),
        });
        info!(
            interface = %built.interface,
            provider = %built.provider_url,
            cluster = %built.cluster,
            "Dubbo reference created"
        );
        references.insert(interface.clone(), built.clone());
        drop(references);
        // Freshly built references get the configured warmup delay before
        // their first call.
        let warmup = self.settings().reference_delay;
        if warmup > 0 {
            std::thread::sleep(Duration::from_millis(warmup));
        }
        built
    }

    #[cfg(test)]
    pub fn cached_references(&self) -> usize {
        self.references.read().unwrap().len()
    }
}

impl Exchanger for DubboExchanger {
    fn proto(&self) -> &'static str {
        PROTO_DUBBO
    }

    fn init(&self, config: &GatewayConfig) -> Result<(), StateError> {
        let settings = config.backend.dubbo.clone();
        info!(
            cluster = %settings.cluster,
            load_balance = %settings.load_balance,
            registry = %settings.registry.address,
            "Dubbo exchanger initializing"
        );
        self.settings.set(settings).map_err(|_| {
            StateError::gateway_internal("dubbo exchanger initialized twice")
        })
    }

    fn invoke(&self, endpoint: &Endpoint, ctx: &Context) -> Result<Value, StateError> {
        let (types, values) = resolve_arguments(&self.lookup, &endpoint.arguments, ctx)?;
        let reference = self.reference(endpoint);
        let attachments = ctx.attachments();
        if self.settings().trace_enable {
            info!(
                request_id = %ctx.request_id(),
                service = %endpoint.upstream.uri,
                method = %endpoint.upstream.method,
                arg_types = ?types,
                arg_values = ?values,
                "Dubbo generic invoke"
            );
        }
        self.invoker
            .invoke(
                &reference,
                &endpoint.upstream.method,
                &types,
                &values,
                &attachments,
            )
            .map_err(|err| {
                warn!(
                    request_id = %ctx.request_id(),
                    service = %endpoint.upstream.uri,
                    method = %endpoint.upstream.method,
                    error = %err,
                    "Dubbo invoke failed"
                );
                StateError::bad_gateway(MESSAGE_DUBBO_INVOKE).with_internal(err)
            })
    }
}
