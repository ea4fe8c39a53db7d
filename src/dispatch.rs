use crate::argument::default_lookup;
use crate::codec::{JsonSerializer, SERIALIZER_DEFAULT, SERIALIZER_JSON};
use crate::config::GatewayConfig;
use crate::context::Context;
use crate::error::StateError;
use crate::exchange::{DubboExchanger, Exchanger, HttpExchanger, JsonRpcInvoker};
use crate::ext::{Extensions, ExtensionsBuilder, ServiceRegistry};
use crate::filter::{default_permission_verifier, FilterChain, PermissionFilter, TerminalFn};
use crate::registry::{fs_registry_factory, PROTO_FS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Runs the filter chain for every request, with the backend exchange as the
/// terminal step.
///
/// The chain is composed once, at construction, from the frozen extension
/// registry: global filters in order, selective filters gated per request,
/// then the proto-dispatching terminal.
pub struct Dispatcher {
    extensions: Arc<Extensions>,
    chain: FilterChain,
}

impl Dispatcher {
    pub fn new(extensions: Arc<Extensions>) -> Self {
        let chain_extensions = extensions.clone();
        let terminal: TerminalFn = Box::new(move |ctx: &Context| {
            let endpoint = ctx
                .endpoint()
                .ok_or_else(|| StateError::gateway_internal("dispatch without endpoint"))?;
            let proto = &endpoint.upstream.proto;
            let exchanger = chain_extensions.exchanger(proto).ok_or_else(|| {
                StateError::new(
                    501,
                    crate::error::ERROR_CODE_GATEWAY_INTERNAL,
                    format!("UPSTREAM:PROTO_UNKNOWN:{proto}"),
                )
            })?;
            exchanger.exchange(ctx)
        });
        let chain = FilterChain::new(
            extensions.global_filters(),
            extensions.selective_filters(),
            terminal,
        );
        Self { extensions, chain }
    }

    /// Initialize filters and exchangers, in that order. Any failure aborts
    /// startup.
    pub fn init(&self, config: &GatewayConfig) -> Result<(), StateError> {
        for filter in self
            .extensions
            .global_filters()
            .iter()
            .chain(self.extensions.selective_filters())
        {
            filter.init(config)?;
        }
        for (proto, exchanger) in self.extensions.exchangers() {
            info!(proto = %proto, "Exchanger init");
            exchanger.init(config)?;
        }
        Ok(())
    }

    pub fn dispatch(&self, ctx: &Context) -> Result<(), StateError> {
        self.chain.run(ctx)
    }

    pub fn shutdown(&self, _deadline: Duration) {
        for (proto, exchanger) in self.extensions.exchangers() {
            info!(proto = %proto, "Exchanger shutdown");
            exchanger.shutdown();
        }
    }
}

/// Register the stock extension set: JSON serializer under `default` and
/// `json`, the tree-watcher registry factory, the default argument lookup,
/// the Dubbo and HTTP exchangers, and the permission filter wired to the
/// default verifier.
pub fn register_defaults(builder: &mut ExtensionsBuilder, services: &Arc<ServiceRegistry>) {
    let lookup = default_lookup();
    builder.store_argument_lookup(lookup.clone());

    let json = Arc::new(JsonSerializer);
    builder.store_serializer(SERIALIZER_DEFAULT, json.clone());
    builder.store_serializer(SERIALIZER_JSON, json);

    builder.store_registry_factory(PROTO_FS, fs_registry_factory());

    let mut exchangers: HashMap<String, Arc<dyn Exchanger>> = HashMap::new();
    let dubbo: Arc<dyn Exchanger> = Arc::new(DubboExchanger::new(
        lookup.clone(),
        Arc::new(JsonRpcInvoker::new()),
    ));
    let http: Arc<dyn Exchanger> = Arc::new(HttpExchanger::new(lookup));
    exchangers.insert(dubbo.proto().to_string(), dubbo);
    exchangers.insert(http.proto().to_string(), http);

    builder.add_global_filter(Arc::new(PermissionFilter::new(
        default_permission_verifier(exchangers.clone()),
        services.clone(),
    )));

    for (proto, exchanger) in exchangers {
        builder.store_exchanger(proto, exchanger);
    }
}
