use crate::argument::ArgumentLookup;
use crate::codec::Serializer;
use crate::config::GatewayConfig;
use crate::exchange::Exchanger;
use crate::filter::Filter;
use crate::model::BackendService;
use crate::registry::RegistryBackendFactory;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Hook run with the global configuration before anything initializes.
pub type PrepareHook = Box<dyn Fn(&GatewayConfig) -> anyhow::Result<()> + Send + Sync>;

/// Hook run once all components are initialized, just before traffic.
pub trait StartupHook: Send + Sync {
    fn startup(&self) -> anyhow::Result<()>;
}

/// Hook run during graceful shutdown, in reverse registration order.
pub trait ShutdownHook: Send + Sync {
    fn shutdown(&self, deadline: Duration) -> anyhow::Result<()>;
}

/// Mutable registration surface used during the initialization phase.
///
/// `freeze` consumes the builder and produces the immutable [`Extensions`]
/// shared behind `Arc` for the process lifetime, so every post-startup read
/// is lock-free and post-startup writes cannot be expressed at all.
#[derive(Default)]
pub struct ExtensionsBuilder {
    exchangers: HashMap<String, Arc<dyn Exchanger>>,
    serializers: HashMap<String, Arc<dyn Serializer>>,
    registry_factories: HashMap<String, RegistryBackendFactory>,
    argument_lookup: Option<ArgumentLookup>,
    global_filters: Vec<Arc<dyn Filter>>,
    selective_filters: Vec<Arc<dyn Filter>>,
    prepare_hooks: Vec<PrepareHook>,
    startup_hooks: Vec<Arc<dyn StartupHook>>,
    shutdown_hooks: Vec<Arc<dyn ShutdownHook>>,
}

impl ExtensionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_exchanger(&mut self, proto: impl Into<String>, exchanger: Arc<dyn Exchanger>) {
        self.exchangers.insert(proto.into(), exchanger);
    }

    pub fn store_serializer(&mut self, name: impl Into<String>, serializer: Arc<dyn Serializer>) {
        self.serializers.insert(name.into(), serializer);
    }

    pub fn store_registry_factory(
        &mut self,
        proto: impl Into<String>,
        factory: RegistryBackendFactory,
    ) {
        self.registry_factories.insert(proto.into(), factory);
    }

    pub fn store_argument_lookup(&mut self, lookup: ArgumentLookup) {
        self.argument_lookup = Some(lookup);
    }

    /// Applied to every request.
    pub fn add_global_filter(&mut self, filter: Arc<dyn Filter>) {
        self.global_filters.push(filter);
    }

    /// Applied when an endpoint references the filter's type id.
    pub fn add_selective_filter(&mut self, filter: Arc<dyn Filter>) {
        self.selective_filters.push(filter);
    }

    pub fn add_prepare_hook(&mut self, hook: PrepareHook) {
        self.prepare_hooks.push(hook);
    }

    pub fn add_startup_hook(&mut self, hook: Arc<dyn StartupHook>) {
        self.startup_hooks.push(hook);
    }

    pub fn add_shutdown_hook(&mut self, hook: Arc<dyn ShutdownHook>) {
        self.shutdown_hooks.push(hook);
    }

    pub fn freeze(self) -> Extensions {
        let mut global_filters = self.global_filters;
        let mut selective_filters = self.selective_filters;
        // Ascending order; sort_by_key is stable, so registration order
        // breaks ties.
        global_filters.sort_by_key(|f| f.order());
        selective_filters.sort_by_key(|f| f.order());
        Extensions {
            exchangers: self.exchangers,
            serializers: self.serializers,
            registry_factories: self.registry_factories,
            argument_lookup: self
                .argument_lookup
                .unwrap_or_else(crate::argument::default_lookup),
            global_filters,
            selective_filters,
            prepare_hooks: self.prepare_hooks,
            startup_hooks: self.startup_hooks,
            shutdown_hooks: self.shutdown_hooks,
        }
    }
}

/// Frozen process-wide extension slots.
pub struct Extensions {
    exchangers: HashMap<String, Arc<dyn Exchanger>>,
    serializers: HashMap<String, Arc<dyn Serializer>>,
    registry_factories: HashMap<String, RegistryBackendFactory>,
    argument_lookup: ArgumentLookup,
    global_filters: Vec<Arc<dyn Filter>>,
    selective_filters: Vec<Arc<dyn Filter>>,
    prepare_hooks: Vec<PrepareHook>,
    startup_hooks: Vec<Arc<dyn StartupHook>>,
    shutdown_hooks: Vec<Arc<dyn ShutdownHook>>,
}

impl Extensions {
    pub fn exchanger(&self, proto: &str) -> Option<Arc<dyn Exchanger>> {
        self.exchangers.get(proto).cloned()
    }

    pub fn exchangers(&self) -> impl Iterator<Item = (&String, &Arc<dyn Exchanger>)> {
        self.exchangers.iter()
    }

    pub fn serializer(&self, name: &str) -> Option<Arc<dyn Serializer>> {
        self.serializers.get(name).cloned()
    }

    pub fn registry_factory(&self, proto: &str) -> Option<RegistryBackendFactory> {
        self.registry_factories.get(proto).cloned()
    }

    pub fn argument_lookup(&self) -> ArgumentLookup {
        self.argument_lookup.clone()
    }

    /// Sorted by ascending order, registration order breaking ties.
    pub fn global_filters(&self) -> &[Arc<dyn Filter>] {
        &self.global_filters
    }

    pub fn selective_filters(&self) -> &[Arc<dyn Filter>] {
        &self.selective_filters
    }

    pub fn prepare_hooks(&self) -> &[PrepareHook] {
        &self.prepare_hooks
    }

    /// Defensive copy; callers iterate outside the registry.
    pub fn startup_hooks(&self) -> Vec<Arc<dyn StartupHook>> {
        self.startup_hooks.clone()
    }

    pub fn shutdown_hooks(&self) -> Vec<Arc<dyn ShutdownHook>> {
        self.shutdown_hooks.clone()
    }
}

/// Runtime store of backend services, fed by registry service events and
/// read by filters. Unlike the extension slots this map changes while
/// traffic flows, so it sits behind its own lock.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, BackendService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, service: BackendService) {
        self.services
            .write()
            .unwrap()
            .insert(service.id.clone(), service);
    }

    pub fn load(&self, id: &str) -> Option<BackendService> {
        self.services.read().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.services.write().unwrap().remove(id);
    }

    pub fn len(&self) -> usize {
        self.services.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::StateError;
    use crate::filter::NextFn;

    struct OrderedFilter(&'static str, i32);

    impl Filter for OrderedFilter {
        fn type_id(&self) -> &'static str {
            self.0
        }

        fn order(&self) -> i32 {
            self.1
        }

        fn invoke(&self, ctx: &Context, next: &NextFn) -> Result<(), StateError> {
            next(ctx)
        }
    }

    #[test]
    fn test_filters_sorted_with_stable_tie_break() {
        let mut builder = ExtensionsBuilder::new();
        builder.add_global_filter(Arc::new(OrderedFilter("late", 10)));
        builder.add_global_filter(Arc::new(OrderedFilter("tie-first", 5)));
        builder.add_global_filter(Arc::new(OrderedFilter("tie-second", 5)));
        builder.add_global_filter(Arc::new(OrderedFilter("early", -1)));
        let extensions = builder.freeze();
        let ids: Vec<&str> = extensions
            .global_filters()
            .iter()
            .map(|f| f.type_id())
            .collect();
        assert_eq!(ids, vec!["early", "tie-first", "tie-second", "late"]);
    }

    #[test]
    fn test_slot_load_miss_and_hit() {
        let mut builder = ExtensionsBuilder::new();
        builder.store_serializer("json", Arc::new(crate::codec::JsonSerializer));
        let extensions = builder.freeze();
        assert!(extensions.serializer("json").is_some());
        assert!(extensions.serializer("msgpack").is_none());
        assert!(extensions.exchanger("dubbo").is_none());
    }

    #[test]
    fn test_service_registry_round_trip() {
        let registry = ServiceRegistry::new();
        let service = crate::model::decode_service(
            br#"{"id":"svc-1","upstream":{"proto":"dubbo","uri":"com.X.Auth","method":"verify"}}"#,
        )
        .unwrap();
        registry.store(service);
        assert_eq!(registry.load("svc-1").unwrap().upstream.uri, "com.X.Auth");
        registry.remove("svc-1");
        assert!(registry.load("svc-1").is_none());
        assert!(registry.is_empty());
    }
}
