use super::request::parse_request;
use super::response::{
    write_debug_payload, write_staged_response, write_state_error, write_unauthorized,
};
use crate::codec::Serializer;
use crate::context::{ContextPool, RequestReader};
use crate::dispatch::Dispatcher;
use crate::error::{StateError, ERROR_CODE_ROUTE_NOT_FOUND};
use crate::ext::ServiceRegistry;
use crate::filter::MetricsFilter;
use crate::ids::{RequestId, PROXY_REQUEST_ID};
use crate::router::{RouteMatch, Router};
use base64::{engine::general_purpose, Engine as _};
use may_minihttp::{HttpService, Request, Response};
use serde_json::Value;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Web-layer value names seeded into every routed context.
pub const WEB_VALUE_VERSION: &str = "web.request.version";
pub const WEB_VALUE_PATTERN: &str = "web.route.pattern";

/// Debug surface settings resolved at startup.
#[derive(Clone)]
pub struct DebugAuth {
    pub username: String,
    pub password: String,
}

/// The gateway's single HTTP service: matches the routing table, resolves
/// the endpoint version, runs the dispatcher chain on a pooled context, and
/// writes the staged response or the unified error body.
#[derive(Clone)]
pub struct AppService {
    pub router: Arc<Router>,
    pub dispatcher: Arc<Dispatcher>,
    pub pool: Arc<ContextPool>,
    pub services: Arc<ServiceRegistry>,
    pub serializer: Arc<dyn Serializer>,
    pub metrics: Arc<MetricsFilter>,
    pub version_header: String,
    pub body_limit: usize,
    pub debug: Option<DebugAuth>,
    pub visits: Arc<AtomicU64>,
    pub active: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl AppService {
    fn debug_authorized(&self, auth: &DebugAuth, reader: &RequestReader) -> bool {
        let Some(header) = reader.header("authorization") else {
            return false;
        };
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = general_purpose::STANDARD.decode(encoded) else {
            return false;
        };
        let Ok(credentials) = String::from_utf8(decoded) else {
            return false;
        };
        match credentials.split_once(':') {
            Some((user, pass)) => user == auth.username && pass == auth.password,
            None => false,
        }
    }

    fn serve_debug(&self, reader: &RequestReader, res: &mut Response) -> bool {
        let Some(auth) = &self.debug else {
            return false;
        };
        if !(reader.method == "GET" && reader.path.starts_with("/debug/")) {
            return false;
        }
        if !self.debug_authorized(auth, reader) {
            write_unauthorized(res);
            return true;
        }
        match reader.path.as_str() {
            "/debug/vars" => {
                let vars = serde_json::json!({
                    "HttpVisits": self.visits.load(Ordering::Relaxed),
                    "Routes": self.router.len(),
                    "BackendServices": self.services.len(),
                    "UptimeSeconds": self.started_at.elapsed().as_secs(),
                    "RequestErrors": self.metrics.error_count(),
                });
                write_debug_payload(res, 200, "application/json", vars.to_string().into_bytes());
            }
            "/debug/endpoints" => {
                let dump = self.router.snapshot();
                write_debug_payload(res, 200, "application/json", dump.to_string().into_bytes());
            }
            "/debug/metrics" => {
                write_debug_payload(
                    res,
                    200,
                    "text/plain; version=0.0.4",
                    self.metrics.render().into_bytes(),
                );
            }
            _ => {
                write_debug_payload(
                    res,
                    404,
                    "application/json",
                    Value::from("Not Found").to_string().into_bytes(),
                );
            }
        }
        true
    }

    fn handle_route(&self, matched: RouteMatch, mut reader: RequestReader, res: &mut Response) {
        let requested_version = reader
            .header(&self.version_header)
            .unwrap_or_default()
            .to_string();
        let endpoint = matched
            .entry
            .endpoints
            .lookup(&requested_version, self.router.default_version());

        reader.path_params = matched.path_params;
        reader
            .web_values
            .insert(WEB_VALUE_VERSION.to_string(), Value::from(requested_version.clone()));
        reader.web_values.insert(
            WEB_VALUE_PATTERN.to_string(),
            Value::from(matched.entry.pattern.clone()),
        );

        let request_id = RequestId::new().to_string();
        let mut ctx = self.pool.acquire();
        ctx.reattach(request_id.clone(), reader, endpoint.clone());
        ctx.set_logger(tracing::info_span!("request", request_id = %request_id));
        info!(
            request_id = %request_id,
            method = %ctx.request().method,
            uri = %ctx.request().uri,
            version = %requested_version,
            "Received request"
        );

        // The chain runs under panic recovery; a panicking filter or
        // exchanger must answer 500, never kill the server.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if endpoint.is_none() {
                return Err(StateError::version_not_found());
            }
            ctx.parse_form()?;
            self.dispatcher.dispatch(&ctx)
        }));
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                error!(
                    request_id = %request_id,
                    panic = ?panic,
                    "Request handler panicked"
                );
                Err(StateError::gateway_internal("GATEWAY:PANIC"))
            }
        };

        match result {
            Ok(()) => {
                let staging = ctx.response();
                write_staged_response(res, self.serializer.as_ref(), &staging);
            }
            Err(err) => {
                write_state_error(
                    res,
                    self.serializer.as_ref(),
                    ctx.request_id(),
                    &ctx.response_headers(),
                    &err,
                );
            }
        }
        // Runs on every path, including recovered panics.
        self.pool.release(ctx);
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        self.visits.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::SeqCst);
        let reader = parse_request(req, self.body_limit);

        if !self.serve_debug(&reader, res) {
            let method = reader.http_method();
            match self.router.route(&method, &reader.path) {
                Some(matched) => self.handle_route(matched, reader, res),
                None => {
                    // No route means no context was ever created.
                    let err = StateError::new(
                        404,
                        ERROR_CODE_ROUTE_NOT_FOUND,
                        ERROR_CODE_ROUTE_NOT_FOUND,
                    );
                    write_state_error(
                        res,
                        self.serializer.as_ref(),
                        PROXY_REQUEST_ID,
                        &[],
                        &err,
                    );
                }
            }
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
