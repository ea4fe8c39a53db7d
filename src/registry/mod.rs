mod fs;

pub use fs::{fs_registry_factory, FsRegistry, PROTO_FS};

use crate::config::{EndpointRegistryConfig, RegistryBackendConfig};
use crate::model::{EndpointEvent, ServiceEvent};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Event channel capacity. A full channel blocks the registry client thread,
/// which is the intended backpressure.
pub const EVENT_CHANNEL_CAPACITY: usize = 8;

/// Root node paths watched in the external store.
#[derive(Debug, Clone)]
pub struct RegistryRoots {
    pub endpoint_path: String,
    pub service_path: String,
}

/// One connection to an external hierarchical registry.
///
/// The contract mirrors the store's child/data listener model: `init`
/// connects and ensures the root nodes exist, `watch` installs children
/// listeners under both roots and publishes typed events for every child's
/// data changes. Implementations must drop malformed payloads with a warning
/// and isolate listener panics; neither may take the watch down.
pub trait RegistryBackend: Send {
    fn init(
        &mut self,
        id: &str,
        config: &RegistryBackendConfig,
        roots: &RegistryRoots,
    ) -> anyhow::Result<()>;

    fn watch(
        &mut self,
        endpoints: SyncSender<EndpointEvent>,
        services: SyncSender<ServiceEvent>,
    ) -> anyhow::Result<()>;

    fn startup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Tear down listeners and connections within the deadline.
    fn shutdown(&mut self, _deadline: Duration) -> anyhow::Result<()> {
        Ok(())
    }
}

pub type RegistryBackendFactory = Arc<dyn Fn() -> Box<dyn RegistryBackend> + Send + Sync>;

/// Drives the configured registry backends and owns the event channels.
///
/// Each active backend id from the configuration becomes one backend
/// instance; all of them feed the same pair of bounded channels, consumed by
/// the dispatcher's event loops.
pub struct Reconciler {
    backends: Vec<(String, Box<dyn RegistryBackend>)>,
    endpoint_tx: Option<SyncSender<EndpointEvent>>,
    service_tx: Option<SyncSender<ServiceEvent>>,
}

impl Reconciler {
    pub fn new(
        factory: &RegistryBackendFactory,
        config: &EndpointRegistryConfig,
    ) -> anyhow::Result<Self> {
        let roots = RegistryRoots {
            endpoint_path: config.endpoint_path.clone(),
            service_path: config.service_path.clone(),
        };
        anyhow::ensure!(
            !roots.endpoint_path.is_empty() && !roots.service_path.is_empty(),
            "config(endpoint-path, service-path) is empty"
        );
        let mut backends = Vec::with_capacity(config.registry_active.len());
        for id in &config.registry_active {
            let mut backend = factory();
            backend.init(id, &config.backend(id), &roots)?;
            info!(registry_id = %id, "Registry backend initialized");
            backends.push((id.clone(), backend));
        }
        Ok(Self {
            backends,
            endpoint_tx: None,
            service_tx: None,
        })
    }

    /// Install listeners on every backend and hand back the consumer ends.
    pub fn watch(&mut self) -> anyhow::Result<(Receiver<EndpointEvent>, Receiver<ServiceEvent>)> {
        let (endpoint_tx, endpoint_rx) = sync_channel(EVENT_CHANNEL_CAPACITY);
        let (service_tx, service_rx) = sync_channel(EVENT_CHANNEL_CAPACITY);
        for (id, backend) in &mut self.backends {
            info!(registry_id = %id, "Registry watch starting");
            backend.watch(endpoint_tx.clone(), service_tx.clone())?;
        }
        self.endpoint_tx = Some(endpoint_tx);
        self.service_tx = Some(service_tx);
        Ok((endpoint_rx, service_rx))
    }

    pub fn startup(&mut self) -> anyhow::Result<()> {
        for (_, backend) in &mut self.backends {
            backend.startup()?;
        }
        Ok(())
    }

    /// Close the endpoint channel first, then shut each backend down with the
    /// deadline. The channels fully close once the backends drop their sender
    /// clones, which ends the dispatcher's event loops.
    pub fn shutdown(&mut self, deadline: Duration) {
        info!("Registry reconciler shutdown");
        self.endpoint_tx.take();
        self.service_tx.take();
        for (id, backend) in &mut self.backends {
            if let Err(err) = backend.shutdown(deadline) {
                tracing::warn!(registry_id = %id, error = %err, "Registry backend shutdown failed");
            }
        }
    }
}
