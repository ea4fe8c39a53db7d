use super::{BackendResponse, Exchanger};
use crate::argument::{resolve_arguments, ArgumentLookup};
use crate::config::{GatewayConfig, HttpBackendConfig};
use crate::context::Context;
use crate::error::{StateError, MESSAGE_HTTP_INVOKE};
use crate::model::{Argument, ArgumentSource, Endpoint};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

pub const PROTO_HTTP: &str = "http";

/// Plain-HTTP exchanger: forwards the resolved arguments to an upstream HTTP
/// service with the configured timeout.
///
/// Argument placement follows the source kind: `body` arguments become the
/// outbound JSON body, everything else joins the query string. Context
/// attributes travel as request headers.
pub struct HttpExchanger {
    lookup: ArgumentLookup,
    settings: OnceCell<HttpBackendConfig>,
    client: OnceCell<reqwest::blocking::Client>,
}

impl HttpExchanger {
    pub fn new(lookup: ArgumentLookup) -> Self {
        Self {
            lookup,
            settings: OnceCell::new(),
            client: OnceCell::new(),
        }
    }

    fn settings(&self) -> &HttpBackendConfig {
        self.settings.get_or_init(HttpBackendConfig::default)
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, StateError> {
        let timeout = Duration::from_millis(self.settings().timeout);
        self.client.get_or_try_init(|| {
            reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| {
                    StateError::gateway_internal("http exchanger client").with_internal(err)
                })
        })
    }

    fn target_url(endpoint: &Endpoint) -> String {
        let host = endpoint.upstream.host.trim_end_matches('/');
        let uri = &endpoint.upstream.uri;
        let base = if host.contains("://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        if uri.starts_with('/') {
            format!("{base}{uri}")
        } else {
            format!("{base}/{uri}")
        }
    }

    fn split_arguments(arguments: &[Argument]) -> (Vec<&Argument>, Vec<&Argument>) {
        arguments
            .iter()
            .partition(|arg| !matches!(arg.source, ArgumentSource::Body))
    }
}

impl Exchanger for HttpExchanger {
    fn proto(&self) -> &'static str {
        PROTO_HTTP
    }

    fn init(&self, config: &GatewayConfig) -> Result<(), StateError> {
        let settings = config.backend.http.clone();
        info!(timeout_ms = settings.timeout, "Http exchanger initializing");
        self.settings
            .set(settings)
            .map_err(|_| StateError::gateway_internal("http exchanger initialized twice"))
    }

    fn invoke(&self, endpoint: &Endpoint, ctx: &Context) -> Result<Value, StateError> {
        let (query_args, body_args) = Self::split_arguments(&endpoint.arguments);

        let query_specs: Vec<Argument> = query_args.into_iter().cloned().collect();
        let (_, query_values) = resolve_arguments(&self.lookup, &query_specs, ctx)?;
        let query: Vec<(String, String)> = query_specs
            .iter()
            .zip(query_values.iter())
            .map(|(spec, value)| (spec.name.clone(), crate::model::value_to_attachment(value)))
            .collect();

        let body_specs: Vec<Argument> = body_args.into_iter().cloned().collect();
        let (_, body_values) = resolve_arguments(&self.lookup, &body_specs, ctx)?;
        let body = body_values.into_iter().next();

        let method: reqwest::Method = endpoint
            .upstream
            .method
            .to_ascii_uppercase()
            .parse()
            .unwrap_or(reqwest::Method::GET);
        let url = Self::target_url(endpoint);
        if self.settings().trace_enable {
            info!(
                request_id = %ctx.request_id(),
                method = %method,
                url = %url,
                "Http backend invoke"
            );
        }

        let mut builder = self.client()?.request(method, &url).query(&query);
        for (name, value) in ctx.attachments() {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().map_err(|err| {
            warn!(
                request_id = %ctx.request_id(),
                url = %url,
                error = %err,
                "Http backend invoke failed"
            );
            StateError::bad_gateway(MESSAGE_HTTP_INVOKE).with_internal(err)
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let bytes = response.bytes().map_err(|err| {
            StateError::bad_gateway(MESSAGE_HTTP_INVOKE).with_internal(err)
        })?;
        let body: Value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::from(String::from_utf8_lossy(&bytes).to_string()));

        Ok(serde_json::json!({
            "statusCode": status,
            "headers": headers,
            "body": body,
        }))
    }

    /// Codec from the raw wrapper produced by `invoke` to the canonical
    /// backend response.
    fn decode(&self, _ctx: &Context, raw: Value) -> Result<BackendResponse, StateError> {
        let status_code = raw
            .get("statusCode")
            .and_then(Value::as_u64)
            .unwrap_or(502) as u16;
        let headers = raw
            .get("headers")
            .and_then(Value::as_array)
            .map(|pairs| {
                pairs
                    .iter()
                    .filter_map(|pair| {
                        let name = pair.get(0)?.as_str()?;
                        let value = pair.get(1)?.as_str()?;
                        Some((name.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let body = raw.get("body").cloned().unwrap_or(Value::Null);
        Ok(BackendResponse {
            status_code,
            headers,
            body,
        })
    }
}
