use crate::model::Endpoint;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Version-indexed endpoint slots behind one routing key.
///
/// Updates and lookups race by design: route events land while requests are
/// flowing. A lookup sees either the pre-update or the post-update endpoint
/// for a version, never a partial one (slots hold `Arc<Endpoint>` swapped
/// whole). The container survives the removal of its last slot so the HTTP
/// route stays registered for the process lifetime.
#[derive(Default)]
pub struct MultiVersionEndpoint {
    versions: RwLock<BTreeMap<String, Arc<Endpoint>>>,
}

impl MultiVersionEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a request's version header against the slots.
    ///
    /// An exact match wins; otherwise the default version slot answers. An
    /// empty requested version goes straight to the default slot.
    pub fn lookup(&self, requested: &str, default_version: &str) -> Option<Arc<Endpoint>> {
        let versions = self.versions.read().unwrap();
        if !requested.is_empty() {
            if let Some(found) = versions.get(requested) {
                return Some(found.clone());
            }
        }
        versions.get(default_version).cloned()
    }

    /// Replace one version slot without disturbing concurrent lookups of
    /// other versions.
    pub fn update(&self, version: &str, endpoint: Endpoint) {
        self.versions
            .write()
            .unwrap()
            .insert(version.to_string(), Arc::new(endpoint));
    }

    pub fn delete(&self, version: &str) {
        self.versions.write().unwrap().remove(version);
    }

    pub fn is_empty(&self) -> bool {
        self.versions.read().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.read().unwrap().len()
    }

    /// Read-only serializable view, version -> endpoint.
    pub fn snapshot(&self) -> BTreeMap<String, Endpoint> {
        self.versions
            .read()
            .unwrap()
            .iter()
            .map(|(v, ep)| (v.clone(), ep.as_ref().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::decode_endpoint;

    fn endpoint(version: &str) -> Endpoint {
        let mut ep = decode_endpoint(
            br#"{"httpMethod":"GET","httpPattern":"/api/{id}","upstream":{"proto":"dubbo","uri":"com.X.Svc","method":"get"}}"#,
        )
        .unwrap();
        ep.version = version.to_string();
        ep
    }

    #[test]
    fn test_lookup_exact_version() {
        let mve = MultiVersionEndpoint::new();
        mve.update("v1", endpoint("v1"));
        mve.update("v2", endpoint("v2"));
        assert_eq!(mve.lookup("v2", "v1").unwrap().version, "v2");
    }

    #[test]
    fn test_unknown_version_falls_back_to_default() {
        let mve = MultiVersionEndpoint::new();
        mve.update("v1", endpoint("v1"));
        assert_eq!(mve.lookup("v9", "v1").unwrap().version, "v1");
        assert_eq!(mve.lookup("", "v1").unwrap().version, "v1");
    }

    #[test]
    fn test_lookup_without_default_slot() {
        let mve = MultiVersionEndpoint::new();
        mve.update("v2", endpoint("v2"));
        assert!(mve.lookup("v9", "v1").is_none());
        assert!(mve.lookup("", "v1").is_none());
        assert_eq!(mve.lookup("v2", "v1").unwrap().version, "v2");
    }

    #[test]
    fn test_delete_last_slot_keeps_container() {
        let mve = MultiVersionEndpoint::new();
        mve.update("v1", endpoint("v1"));
        mve.delete("v1");
        assert!(mve.is_empty());
        assert!(mve.lookup("v1", "v1").is_none());
        // Re-population after emptying is normal operation.
        mve.update("v1", endpoint("v1"));
        assert_eq!(mve.len(), 1);
    }

    #[test]
    fn test_update_is_idempotent() {
        let mve = MultiVersionEndpoint::new();
        mve.update("v1", endpoint("v1"));
        mve.update("v1", endpoint("v1"));
        assert_eq!(mve.len(), 1);
    }

    #[test]
    fn test_concurrent_update_and_lookup() {
        let mve = Arc::new(MultiVersionEndpoint::new());
        mve.update("v1", endpoint("v1"));
        let writer = {
            let mve = mve.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    mve.update("v1", endpoint("v1"));
                }
            })
        };
        for _ in 0..500 {
            // Never null once a version was present.
            let ep = mve.lookup("v1", "v1").expect("slot must stay populated");
            assert_eq!(ep.version, "v1");
        }
        writer.join().unwrap();
    }
}
