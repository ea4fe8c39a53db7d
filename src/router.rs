use crate::endpoint::MultiVersionEndpoint;
use crate::model::{EndpointEvent, EventType};
use http::Method;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

const SUPPORTED_METHODS: [Method; 8] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::HEAD,
    Method::OPTIONS,
    Method::TRACE,
];

/// Unique routing key: normalized method plus the raw path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub method: String,
    pub pattern: String,
}

/// One registered routing key with its compiled matcher and version slots.
pub struct RouteEntry {
    pub method: Method,
    pub pattern: String,
    regex: Regex,
    param_names: Vec<String>,
    pub endpoints: Arc<MultiVersionEndpoint>,
}

/// Result of matching a request path against the table.
pub struct RouteMatch {
    pub entry: Arc<RouteEntry>,
    pub path_params: HashMap<String, String>,
}

/// The gateway routing table.
///
/// Registry events create entries and mutate their version slots; requests
/// match concurrently under the read lock. An entry is compiled and
/// registered exactly once, on the first event for its key, and never
/// unregistered: deletions only empty the version slots, so the route keeps
/// answering (with a version-not-found error) for the process lifetime.
pub struct Router {
    entries: RwLock<Vec<Arc<RouteEntry>>>,
    index: RwLock<HashMap<RouteKey, Arc<RouteEntry>>>,
    default_version: String,
}

impl Router {
    pub fn new(default_version: impl Into<String>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            index: RwLock::new(HashMap::new()),
            default_version: default_version.into(),
        }
    }

    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Match a request against the registered patterns.
    pub fn route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let entries = self.entries.read().unwrap();
        for entry in entries.iter() {
            if &entry.method != method {
                continue;
            }
            let Some(captures) = entry.regex.captures(path) else {
                continue;
            };
            let mut path_params = HashMap::with_capacity(entry.param_names.len());
            for (i, name) in entry.param_names.iter().enumerate() {
                if let Some(group) = captures.get(i + 1) {
                    path_params.insert(name.clone(), group.as_str().to_string());
                }
            }
            debug!(
                method = %method,
                path = %path,
                pattern = %entry.pattern,
                "Route matched"
            );
            return Some(RouteMatch {
                entry: entry.clone(),
                path_params,
            });
        }
        debug!(method = %method, path = %path, "No route matched");
        None
    }

    /// Apply one registry event to the table. Returns false when the event
    /// was rejected (unsupported method or bad pattern).
    pub fn apply_event(&self, event: EndpointEvent) -> bool {
        let mut endpoint = event.endpoint;
        endpoint.http_method = endpoint.http_method.to_uppercase();

        let method: Method = match endpoint.http_method.parse() {
            Ok(method) if SUPPORTED_METHODS.contains(&method) => method,
            // CONNECT and anything non-canonical is refused outright.
            _ => {
                warn!(
                    http_method = %endpoint.http_method,
                    pattern = %endpoint.http_pattern,
                    "Unsupported http method, event ignored"
                );
                return false;
            }
        };

        let key = RouteKey {
            method: endpoint.http_method.clone(),
            pattern: endpoint.http_pattern.clone(),
        };
        let entry = self.entry_for(key, &method, &endpoint.http_pattern);

        let version = if endpoint.version.is_empty() {
            self.default_version.clone()
        } else {
            endpoint.version.clone()
        };
        match event.event_type {
            EventType::Added | EventType::Updated => {
                info!(
                    version = %version,
                    method = %endpoint.http_method,
                    pattern = %endpoint.http_pattern,
                    event = ?event.event_type,
                    "Endpoint slot updated"
                );
                entry.endpoints.update(&version, endpoint);
            }
            EventType::Removed => {
                info!(
                    version = %version,
                    method = %endpoint.http_method,
                    pattern = %endpoint.http_pattern,
                    "Endpoint slot removed"
                );
                entry.endpoints.delete(&version);
            }
        }
        true
    }

    /// Fetch the entry for a key, compiling and registering it on first
    /// sight.
    fn entry_for(&self, key: RouteKey, method: &Method, pattern: &str) -> Arc<RouteEntry> {
        if let Some(found) = self.index.read().unwrap().get(&key) {
            return found.clone();
        }
        let mut index = self.index.write().unwrap();
        if let Some(found) = index.get(&key) {
            return found.clone();
        }
        let (regex, param_names) = Self::path_to_regex(pattern);
        let entry = Arc::new(RouteEntry {
            method: method.clone(),
            pattern: pattern.to_string(),
            regex,
            param_names,
            endpoints: Arc::new(MultiVersionEndpoint::new()),
        });
        info!(method = %method, pattern = %pattern, "HTTP route registered");
        index.insert(key, entry.clone());
        self.entries.write().unwrap().push(entry.clone());
        entry
    }

    /// Serializable dump of the whole table for the debug surface.
    pub fn snapshot(&self) -> Value {
        let entries = self.entries.read().unwrap();
        let table: BTreeMap<String, BTreeMap<String, crate::model::Endpoint>> = entries
            .iter()
            .map(|entry| {
                (
                    format!("{} {}", entry.method, entry.pattern),
                    entry.endpoints.snapshot(),
                )
            })
            .collect();
        serde_json::to_value(table).unwrap_or(Value::Null)
    }

    /// Compile a `{name}` path template into a matcher and its parameter
    /// names.
    fn path_to_regex(path: &str) -> (Regex, Vec<String>) {
        if path == "/" {
            return (
                Regex::new(r"^/$").expect("Failed to compile path regex"),
                Vec::new(),
            );
        }

        let mut pattern = String::with_capacity(path.len() + 5);
        pattern.push('^');
        let mut param_names = Vec::with_capacity(path.matches('{').count());

        for segment in path.split('/') {
            if segment.starts_with('{') && segment.ends_with('}') {
                let name = segment
                    .trim_start_matches('{')
                    .trim_end_matches('}')
                    .to_string();
                pattern.push_str("/([^/]+)");
                param_names.push(name);
            } else if !segment.is_empty() {
                pattern.push('/');
                pattern.push_str(&regex::escape(segment));
            }
        }

        pattern.push('$');
        let regex = Regex::new(&pattern).expect("Failed to compile path regex");
        (regex, param_names)
    }
}
