mod dubbo;
mod http;

pub use dubbo::{DubboExchanger, GenericInvoker, JsonRpcInvoker, ReferenceConfig, PROTO_DUBBO};
pub use http::{HttpExchanger, PROTO_HTTP};

use crate::config::GatewayConfig;
use crate::context::Context;
use crate::error::StateError;
use serde_json::Value;

/// Canonical backend response staged onto the context after decoding.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl BackendResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            headers: Vec::new(),
            body,
        }
    }
}

/// Protocol-specific backend caller, one instance per `proto`.
///
/// `invoke` makes the protocol call and returns its raw result as JSON;
/// `decode` is the response codec turning that raw value into the canonical
/// [`BackendResponse`]; `exchange` is the standard invoke-decode-stage path
/// run at the filter chain's terminus.
pub trait Exchanger: Send + Sync {
    fn proto(&self) -> &'static str;

    /// One-time initialization during gateway startup; may fail.
    fn init(&self, _config: &GatewayConfig) -> Result<(), StateError> {
        Ok(())
    }

    fn invoke(&self, endpoint: &crate::model::Endpoint, ctx: &Context)
        -> Result<Value, StateError>;

    fn decode(&self, _ctx: &Context, raw: Value) -> Result<BackendResponse, StateError> {
        Ok(BackendResponse::ok(raw))
    }

    fn exchange(&self, ctx: &Context) -> Result<(), StateError> {
        let endpoint = ctx
            .endpoint()
            .ok_or_else(|| StateError::gateway_internal("exchange without endpoint"))?;
        let raw = self.invoke(&endpoint, ctx)?;
        let response = self.decode(ctx, raw)?;
        ctx.set_response_status(response.status_code);
        for (name, value) in response.headers {
            ctx.add_response_header(name, value);
        }
        ctx.set_response_payload(response.body);
        Ok(())
    }

    /// Release protocol resources during graceful shutdown.
    fn shutdown(&self) {}
}
