use super::http_server::{HttpServer, ServerHandle};
use super::service::{AppService, DebugAuth};
use crate::codec::SERIALIZER_DEFAULT;
use crate::config::GatewayConfig;
use crate::context::ContextPool;
use crate::dispatch::{register_defaults, Dispatcher};
use crate::ext::{Extensions, ExtensionsBuilder, ServiceRegistry};
use crate::filter::MetricsFilter;
use crate::model::EventType;
use crate::registry::Reconciler;
use crate::router::Router;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// The assembled gateway: extension registry, dispatcher, routing table,
/// registry reconciler, and the embedded HTTP server.
///
/// Lifecycle: `new` (registration phase) -> `init` -> `start` -> `shutdown`.
pub struct GatewayServer {
    config: GatewayConfig,
    extensions: Arc<Extensions>,
    services: Arc<ServiceRegistry>,
    router: Arc<Router>,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<ContextPool>,
    metrics: Arc<MetricsFilter>,
    visits: Arc<AtomicU64>,
    active: Arc<AtomicU64>,
    reconciler: Option<Reconciler>,
    event_threads: Vec<JoinHandle<()>>,
    server: Option<ServerHandle>,
    initialized: bool,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_registrations(config, |_| {})
    }

    /// Build the gateway with extra registrations on top of the defaults.
    /// This is the only window in which extension slots are writable; the
    /// registry freezes before `new` returns.
    pub fn with_registrations(
        config: GatewayConfig,
        customize: impl FnOnce(&mut ExtensionsBuilder),
    ) -> Self {
        let services = Arc::new(ServiceRegistry::new());
        let metrics = Arc::new(MetricsFilter::new());
        let mut builder = ExtensionsBuilder::new();
        register_defaults(&mut builder, &services);
        builder.add_global_filter(metrics.clone());
        customize(&mut builder);
        let extensions = Arc::new(builder.freeze());

        let router = Arc::new(Router::new(config.http_server.default_version.clone()));
        let dispatcher = Arc::new(Dispatcher::new(extensions.clone()));

        Self {
            config,
            extensions,
            services,
            router,
            dispatcher,
            pool: Arc::new(ContextPool::new()),
            metrics,
            visits: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicU64::new(0)),
            reconciler: None,
            event_threads: Vec::new(),
            server: None,
            initialized: false,
        }
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    pub fn services(&self) -> Arc<ServiceRegistry> {
        self.services.clone()
    }

    /// Prepare hooks, then filter and exchanger init, then the registry
    /// backends.
    pub fn init(&mut self) -> anyhow::Result<()> {
        for hook in self.extensions.prepare_hooks() {
            hook(&self.config)?;
        }
        self.dispatcher.init(&self.config)?;

        let proto = &self.config.endpoint_registry.registry_proto;
        let factory = self
            .extensions
            .registry_factory(proto)
            .ok_or_else(|| anyhow::anyhow!("no registry factory for proto `{proto}`"))?;
        self.reconciler = Some(Reconciler::new(&factory, &self.config.endpoint_registry)?);
        self.initialized = true;
        Ok(())
    }

    /// Run startup hooks, start watching the registry, and bring the HTTP
    /// server up last.
    pub fn start(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(self.initialized, "start() requires init()");
        if self.config.http_server.tls_configured() {
            // The embedded listener build is plaintext-only; refusing is
            // better than silently serving plaintext under a TLS config.
            anyhow::bail!(
                "tls-cert-file/tls-key-file configured, but the embedded listener does not \
                 terminate TLS; front the gateway with a TLS listener or swap the server seam"
            );
        }

        for hook in self.extensions.startup_hooks() {
            hook.startup()?;
        }

        let reconciler = self
            .reconciler
            .as_mut()
            .expect("reconciler built during init");
        reconciler.startup()?;
        let (endpoint_rx, service_rx) = reconciler.watch()?;

        let router = self.router.clone();
        self.event_threads.push(
            std::thread::Builder::new()
                .name("gantry-endpoint-events".into())
                .spawn(move || {
                    for event in endpoint_rx.iter() {
                        router.apply_event(event);
                    }
                    info!("Endpoint event loop stopped");
                })?,
        );
        let services = self.services.clone();
        self.event_threads.push(
            std::thread::Builder::new()
                .name("gantry-service-events".into())
                .spawn(move || {
                    for event in service_rx.iter() {
                        match event.event_type {
                            EventType::Added | EventType::Updated => {
                                info!(service_id = %event.service.id, "Backend service stored");
                                services.store(event.service);
                            }
                            EventType::Removed => {
                                info!(service_id = %event.service.id, "Backend service removed");
                                services.remove(&event.service.id);
                            }
                        }
                    }
                    info!("Service event loop stopped");
                })?,
        );

        let serializer = self
            .extensions
            .serializer(SERIALIZER_DEFAULT)
            .ok_or_else(|| anyhow::anyhow!("no default serializer registered"))?;
        let debug = self.debug_auth();
        let service = AppService {
            router: self.router.clone(),
            dispatcher: self.dispatcher.clone(),
            pool: self.pool.clone(),
            services: self.services.clone(),
            serializer,
            metrics: self.metrics.clone(),
            version_header: self.config.http_server.version_header.clone(),
            body_limit: self.config.http_server.body_limit,
            debug,
            visits: self.visits.clone(),
            active: self.active.clone(),
            started_at: Instant::now(),
        };

        let bind = self.config.http_server.bind_address();
        info!(address = %bind, "HttpServer starting");
        let handle = HttpServer(service).start(&bind)?;
        handle.wait_ready()?;
        info!(address = %handle.addr(), "HttpServer ready");
        self.server = Some(handle);
        Ok(())
    }

    fn debug_auth(&self) -> Option<DebugAuth> {
        if !self.config.http_server.debug {
            return None;
        }
        let basic = &self.config.http_server.basic_auth;
        let password = if basic.password.is_empty() {
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect()
        } else {
            basic.password.clone()
        };
        info!(
            username = %basic.username,
            password = %password,
            "Http debug feature enabled, basic-auth credentials"
        );
        Some(DebugAuth {
            username: basic.username.clone(),
            password,
        })
    }

    /// Address the server is actually bound to; only available after
    /// `start`.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.as_ref().map(|handle| handle.addr())
    }

    /// Graceful shutdown: stop accepting, drain in-flight requests within
    /// the deadline, stop the reconciler and exchangers, then run shutdown
    /// hooks in reverse registration order.
    pub fn shutdown(&mut self, deadline: Duration) {
        let started = Instant::now();
        info!("Gateway shutdown starting");
        if let Some(handle) = self.server.take() {
            handle.stop();
        }

        while self.active.load(Ordering::SeqCst) > 0 && started.elapsed() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let in_flight = self.active.load(Ordering::SeqCst);
        if in_flight > 0 {
            warn!(in_flight, "Shutdown deadline hit with requests still in flight");
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        if let Some(mut reconciler) = self.reconciler.take() {
            reconciler.shutdown(remaining);
        }
        for thread in self.event_threads.drain(..) {
            let _ = thread.join();
        }
        self.dispatcher.shutdown(remaining);
        for hook in self.extensions.shutdown_hooks().iter().rev() {
            if let Err(err) = hook.shutdown(remaining) {
                warn!(error = %err, "Shutdown hook failed");
            }
        }
        info!("Gateway shutdown complete");
    }
}
