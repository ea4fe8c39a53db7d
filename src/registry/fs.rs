use super::{RegistryBackend, RegistryBackendFactory, RegistryRoots};
use crate::config::RegistryBackendConfig;
use crate::model::{
    decode_endpoint, decode_service, BackendService, Endpoint, EndpointEvent, EventType,
    ServiceEvent,
};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

pub const PROTO_FS: &str = "fs";

const DEFAULT_BASE_DIR: &str = "./gantry-registry";

/// Factory registered under the `fs` proto slot.
pub fn fs_registry_factory() -> RegistryBackendFactory {
    Arc::new(|| Box::new(FsRegistry::new()))
}

/// Registry backend over a local directory tree.
///
/// The tree is the hierarchical store: `address` is the base directory, the
/// configured root paths become subdirectories, and every child file is one
/// node whose bytes are the JSON payload. File create/modify/remove map to
/// childAdded / nodeDataChanged / nodeRemoved. Installing the watch replays
/// the existing children as `Added`, the same way a children listener fires
/// for nodes already present.
///
/// Removed files no longer carry a payload, so the last good decode of every
/// path is cached to synthesize the `Removed` event.
pub struct FsRegistry {
    id: String,
    endpoint_dir: PathBuf,
    service_dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl Default for FsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FsRegistry {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            endpoint_dir: PathBuf::new(),
            service_dir: PathBuf::new(),
            watcher: None,
        }
    }

    fn scan_dir(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut found = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "Registry scan failed");
                return found;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match std::fs::read(&path) {
                Ok(bytes) => found.push((path, bytes)),
                Err(err) => warn!(path = %path.display(), error = %err, "Registry node unreadable"),
            }
        }
        found
    }
}

/// Shared listener state moved into the watcher callback.
struct Listener {
    endpoint_dir: PathBuf,
    service_dir: PathBuf,
    endpoints: SyncSender<EndpointEvent>,
    services: SyncSender<ServiceEvent>,
    known_endpoints: Mutex<HashMap<PathBuf, Endpoint>>,
    known_services: Mutex<HashMap<PathBuf, BackendService>>,
}

impl Listener {
    fn handle(&self, event: notify::Event) {
        let event_type = match event.kind {
            EventKind::Create(_) => EventType::Added,
            EventKind::Modify(_) => EventType::Updated,
            EventKind::Remove(_) => EventType::Removed,
            _ => return,
        };
        for path in event.paths {
            if path.starts_with(&self.endpoint_dir) {
                self.handle_endpoint(event_type, &path);
            } else if path.starts_with(&self.service_dir) {
                self.handle_service(event_type, &path);
            }
        }
    }

    fn handle_endpoint(&self, event_type: EventType, path: &Path) {
        let event = match event_type {
            EventType::Removed => {
                let Some(endpoint) = self.known_endpoints.lock().unwrap().remove(path) else {
                    return;
                };
                EndpointEvent {
                    event_type,
                    endpoint,
                }
            }
            _ => {
                let Ok(bytes) = std::fs::read(path) else {
                    return;
                };
                let Some(endpoint) = decode_endpoint(&bytes) else {
                    return;
                };
                self.known_endpoints
                    .lock()
                    .unwrap()
                    .insert(path.to_path_buf(), endpoint.clone());
                EndpointEvent {
                    event_type,
                    endpoint,
                }
            }
        };
        // A full channel blocks here until the dispatcher drains.
        let _ = self.endpoints.send(event);
    }

    fn handle_service(&self, event_type: EventType, path: &Path) {
        let event = match event_type {
            EventType::Removed => {
                let Some(service) = self.known_services.lock().unwrap().remove(path) else {
                    return;
                };
                ServiceEvent {
                    event_type,
                    service,
                }
            }
            _ => {
                let Ok(bytes) = std::fs::read(path) else {
                    return;
                };
                let Some(service) = decode_service(&bytes) else {
                    return;
                };
                self.known_services
                    .lock()
                    .unwrap()
                    .insert(path.to_path_buf(), service.clone());
                ServiceEvent {
                    event_type,
                    service,
                }
            }
        };
        let _ = self.services.send(event);
    }
}

impl RegistryBackend for FsRegistry {
    fn init(
        &mut self,
        id: &str,
        config: &RegistryBackendConfig,
        roots: &RegistryRoots,
    ) -> anyhow::Result<()> {
        self.id = id.to_string();
        let base = if config.address.is_empty() {
            PathBuf::from(DEFAULT_BASE_DIR)
        } else {
            PathBuf::from(&config.address)
        };
        self.endpoint_dir = base.join(roots.endpoint_path.trim_start_matches('/'));
        self.service_dir = base.join(roots.service_path.trim_start_matches('/'));
        // Ensure the root nodes exist, creating them when absent.
        std::fs::create_dir_all(&self.endpoint_dir)?;
        std::fs::create_dir_all(&self.service_dir)?;
        info!(
            registry_id = %self.id,
            endpoint_dir = %self.endpoint_dir.display(),
            service_dir = %self.service_dir.display(),
            "Registry tree ready"
        );
        Ok(())
    }

    fn watch(
        &mut self,
        endpoints: SyncSender<EndpointEvent>,
        services: SyncSender<ServiceEvent>,
    ) -> anyhow::Result<()> {
        let listener = Arc::new(Listener {
            endpoint_dir: self.endpoint_dir.clone(),
            service_dir: self.service_dir.clone(),
            endpoints,
            services,
            known_endpoints: Mutex::new(HashMap::new()),
            known_services: Mutex::new(HashMap::new()),
        });

        // Replay existing children as Added, the way a children listener
        // fires for nodes already present. The replay runs off-thread: the
        // channels are bounded and their consumers may not be draining yet
        // when watch() is called.
        let scan_listener = listener.clone();
        let (endpoint_dir, service_dir) = (self.endpoint_dir.clone(), self.service_dir.clone());
        std::thread::Builder::new()
            .name(format!("gantry-registry-scan-{}", self.id))
            .spawn(move || {
                for (path, bytes) in Self::scan_dir(&endpoint_dir) {
                    if let Some(endpoint) = decode_endpoint(&bytes) {
                        scan_listener
                            .known_endpoints
                            .lock()
                            .unwrap()
                            .insert(path, endpoint.clone());
                        let _ = scan_listener.endpoints.send(EndpointEvent {
                            event_type: EventType::Added,
                            endpoint,
                        });
                    }
                }
                for (path, bytes) in Self::scan_dir(&service_dir) {
                    if let Some(service) = decode_service(&bytes) {
                        scan_listener
                            .known_services
                            .lock()
                            .unwrap()
                            .insert(path, service.clone());
                        let _ = scan_listener.services.send(ServiceEvent {
                            event_type: EventType::Added,
                            service,
                        });
                    }
                }
            })?;

        let registry_id = self.id.clone();
        let callback_listener = listener.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(event) => {
                    // A listener panic must not take the watch thread down.
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        callback_listener.handle(event);
                    }));
                    if let Err(panic) = outcome {
                        error!(
                            registry_id = %registry_id,
                            panic = ?panic,
                            "Registry listener panicked"
                        );
                    }
                }
                Err(err) => warn!(registry_id = %registry_id, error = %err, "Registry watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&self.endpoint_dir, RecursiveMode::Recursive)?;
        watcher.watch(&self.service_dir, RecursiveMode::Recursive)?;
        self.watcher = Some(watcher);
        info!(registry_id = %self.id, "Registry listeners installed");
        Ok(())
    }

    fn shutdown(&mut self, _deadline: Duration) -> anyhow::Result<()> {
        // Dropping the watcher stops callbacks and releases the channel
        // sender clones it captured.
        self.watcher = None;
        info!(registry_id = %self.id, "Registry backend stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Reconciler, EVENT_CHANNEL_CAPACITY};
    use std::sync::mpsc::RecvTimeoutError;

    fn write_endpoint(dir: &Path, name: &str, version: &str) {
        let payload = format!(
            r#"{{"httpMethod":"GET","httpPattern":"/api/{{id}}","version":"{version}","upstream":{{"proto":"dubbo","uri":"com.X.Svc","method":"get"}}}}"#
        );
        std::fs::write(dir.join(name), payload).unwrap();
    }

    fn config_for(base: &Path) -> crate::config::EndpointRegistryConfig {
        let mut config = crate::config::EndpointRegistryConfig::default();
        config.backends.insert(
            "default".to_string(),
            RegistryBackendConfig {
                address: base.display().to_string(),
                ..RegistryBackendConfig::default()
            },
        );
        config
    }

    #[test]
    fn test_initial_scan_replays_existing_children() {
        let base = tempfile::tempdir().unwrap();
        let endpoint_dir = base.path().join("gantry-endpoint");
        std::fs::create_dir_all(&endpoint_dir).unwrap();
        write_endpoint(&endpoint_dir, "svc-a.json", "v1");

        let factory = fs_registry_factory();
        let mut reconciler = Reconciler::new(&factory, &config_for(base.path())).unwrap();
        let (endpoint_rx, _service_rx) = reconciler.watch().unwrap();

        let event = endpoint_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("initial Added event");
        assert_eq!(event.event_type, EventType::Added);
        assert_eq!(event.endpoint.version, "v1");
        reconciler.shutdown(Duration::from_secs(1));
    }

    /// Wait for the first event matching the predicate, ignoring the extra
    /// notifications platforms emit for a single filesystem operation.
    fn recv_matching(
        rx: &std::sync::mpsc::Receiver<EndpointEvent>,
        what: &str,
        pred: impl Fn(&EndpointEvent) -> bool,
    ) -> EndpointEvent {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline
                .checked_duration_since(std::time::Instant::now())
                .unwrap_or_else(|| panic!("timed out waiting for {what}"));
            let event = rx
                .recv_timeout(remaining)
                .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
            if pred(&event) {
                return event;
            }
        }
    }

    #[test]
    fn test_create_modify_remove_cycle() {
        let base = tempfile::tempdir().unwrap();
        let factory = fs_registry_factory();
        let mut reconciler = Reconciler::new(&factory, &config_for(base.path())).unwrap();
        let (endpoint_rx, _service_rx) = reconciler.watch().unwrap();
        let endpoint_dir = base.path().join("gantry-endpoint");

        write_endpoint(&endpoint_dir, "svc-b.json", "v1");
        let added = recv_matching(&endpoint_rx, "Added v1", |e| e.endpoint.version == "v1");
        assert_eq!(added.event_type, EventType::Added);

        write_endpoint(&endpoint_dir, "svc-b.json", "v2");
        let updated = recv_matching(&endpoint_rx, "Updated v2", |e| e.endpoint.version == "v2");
        assert_eq!(updated.event_type, EventType::Updated);

        std::fs::remove_file(endpoint_dir.join("svc-b.json")).unwrap();
        let removed = recv_matching(&endpoint_rx, "Removed", |e| {
            e.event_type == EventType::Removed
        });
        // The synthesized Removed event carries the last known payload.
        assert_eq!(removed.endpoint.version, "v2");
        reconciler.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let base = tempfile::tempdir().unwrap();
        let factory = fs_registry_factory();
        let mut reconciler = Reconciler::new(&factory, &config_for(base.path())).unwrap();
        let (endpoint_rx, _service_rx) = reconciler.watch().unwrap();
        let endpoint_dir = base.path().join("gantry-endpoint");

        std::fs::write(endpoint_dir.join("broken.json"), b"{not json").unwrap();
        match endpoint_rx.recv_timeout(Duration::from_millis(500)) {
            Err(RecvTimeoutError::Timeout) => {}
            other => panic!("malformed payload must not publish: {other:?}"),
        }

        // The listener stays alive after a drop.
        write_endpoint(&endpoint_dir, "good.json", "v1");
        let event = endpoint_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("listener survived malformed payload");
        assert_eq!(event.event_type, EventType::Added);
        reconciler.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_channel_capacity_is_bounded() {
        assert!(EVENT_CHANNEL_CAPACITY >= 4);
    }
}
