use super::{Filter, NextFn};
use crate::config::GatewayConfig;
use crate::context::Context;
use crate::error::{StateError, ERROR_CODE_GATEWAY_INTERNAL, ERROR_CODE_PERMISSION_DENIED};
use crate::exchange::Exchanger;
use crate::ext::ServiceRegistry;
use crate::model::{BackendService, Endpoint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub const TYPE_ID_PERMISSION_FILTER: &str = "PermissionFilter";

/// Outcome reported by a permission verification service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionReport {
    pub status_code: u16,
    pub success: bool,
    pub error_code: String,
    pub message: String,
}

impl Default for PermissionReport {
    fn default() -> Self {
        Self {
            status_code: 403,
            success: false,
            error_code: String::new(),
            message: String::new(),
        }
    }
}

impl PermissionReport {
    pub fn allowed() -> Self {
        Self {
            status_code: 200,
            success: true,
            ..Self::default()
        }
    }
}

/// Verification strategy over the endpoint's permission services.
pub type PermissionVerifier =
    Arc<dyn Fn(&[BackendService], &Context) -> Result<PermissionReport, StateError> + Send + Sync>;

/// Per-request bypass predicate.
pub type PermissionSkipper = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Gate on `Endpoint.authorize`: resolves the endpoint's permission service
/// ids and asks the verifier before letting the request continue. A failed
/// report short-circuits the chain, so the backend exchanger never runs for
/// a denied request.
pub struct PermissionFilter {
    disabled: AtomicBool,
    skipper: Option<PermissionSkipper>,
    verifier: PermissionVerifier,
    services: Arc<ServiceRegistry>,
}

impl PermissionFilter {
    pub fn new(verifier: PermissionVerifier, services: Arc<ServiceRegistry>) -> Self {
        Self {
            disabled: AtomicBool::new(false),
            skipper: None,
            verifier,
            services,
        }
    }

    pub fn with_skipper(mut self, skipper: PermissionSkipper) -> Self {
        self.skipper = Some(skipper);
        self
    }

    fn resolve_services(&self, endpoint: &Endpoint) -> Result<Vec<BackendService>, StateError> {
        let ids = endpoint.permission_ids();
        let mut services = Vec::with_capacity(ids.len());
        for id in ids {
            match self.services.load(id) {
                Some(service) => services.push(service),
                None => {
                    return Err(StateError::new(
                        500,
                        ERROR_CODE_GATEWAY_INTERNAL,
                        "PERMISSION:SERVICE:NOT_FOUND",
                    )
                    .with_internal(anyhow::anyhow!("service not found, id: {id}")));
                }
            }
        }
        Ok(services)
    }
}

impl Filter for PermissionFilter {
    fn type_id(&self) -> &'static str {
        TYPE_ID_PERMISSION_FILTER
    }

    fn init(&self, _config: &GatewayConfig) -> Result<(), StateError> {
        if self.disabled.load(Ordering::Relaxed) {
            info!("Permission filter is DISABLED");
        }
        Ok(())
    }

    fn invoke(&self, ctx: &Context, next: &NextFn) -> Result<(), StateError> {
        if self.disabled.load(Ordering::Relaxed) {
            return next(ctx);
        }
        if let Some(skipper) = &self.skipper {
            if skipper(ctx) {
                return next(ctx);
            }
        }
        let Some(endpoint) = ctx.endpoint() else {
            return next(ctx);
        };
        if !endpoint.authorize {
            return next(ctx);
        }
        let services = self.resolve_services(&endpoint)?;
        if services.is_empty() {
            return next(ctx);
        }
        debug!(
            request_id = %ctx.request_id(),
            services = services.len(),
            "Permission verification"
        );
        let report = (self.verifier)(&services, ctx)?;
        if !report.success {
            return Err(StateError::new(
                ensure_status(report.status_code),
                ensure_error_code(&report.error_code),
                ensure_message(&report.message),
            ));
        }
        next(ctx)
    }
}

fn ensure_status(status: u16) -> u16 {
    if status < 100 {
        403
    } else {
        status
    }
}

fn ensure_error_code(code: &str) -> String {
    if code.is_empty() {
        ERROR_CODE_PERMISSION_DENIED.to_string()
    } else {
        code.to_string()
    }
}

fn ensure_message(message: &str) -> String {
    if message.is_empty() {
        ERROR_CODE_PERMISSION_DENIED.to_string()
    } else {
        message.to_string()
    }
}

/// Default verifier: invoke each permission service through its proto's
/// exchanger and decode the returned JSON as a [`PermissionReport`]. Every
/// service must report success.
pub fn default_permission_verifier(
    exchangers: HashMap<String, Arc<dyn Exchanger>>,
) -> PermissionVerifier {
    Arc::new(move |services, ctx| {
        for service in services {
            let exchanger = exchangers.get(&service.upstream.proto).ok_or_else(|| {
                StateError::new(500, ERROR_CODE_GATEWAY_INTERNAL, "PERMISSION:VERIFY:ERROR")
                    .with_internal(anyhow::anyhow!(
                        "no exchanger for proto `{}`",
                        service.upstream.proto
                    ))
            })?;
            let target = Endpoint::from_service(service);
            let raw = exchanger.invoke(&target, ctx)?;
            let decoded = exchanger.decode(ctx, raw)?;
            let report: PermissionReport = serde_json::from_value(decoded.body).map_err(|err| {
                StateError::new(500, ERROR_CODE_GATEWAY_INTERNAL, "PERMISSION:VERIFY:ERROR")
                    .with_internal(err)
            })?;
            if !report.success {
                return Ok(report);
            }
        }
        Ok(PermissionReport::allowed())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextPool, RequestReader};
    use crate::model::decode_endpoint;
    use std::sync::atomic::AtomicUsize;

    fn authorized_endpoint(permission: &str) -> Endpoint {
        let mut ep = decode_endpoint(
            br#"{"httpMethod":"GET","httpPattern":"/x","authorize":true,"upstream":{"proto":"dubbo","uri":"com.X.Svc","method":"get"}}"#,
        )
        .unwrap();
        ep.permission = Some(permission.to_string());
        ep
    }

    fn ctx_for(endpoint: Option<Endpoint>) -> Box<Context> {
        let pool = ContextPool::new();
        let mut ctx = pool.acquire();
        ctx.reattach(
            "perm-test".into(),
            RequestReader::default(),
            endpoint.map(Arc::new),
        );
        ctx
    }

    fn denying_verifier() -> PermissionVerifier {
        Arc::new(|_, _| {
            Ok(PermissionReport {
                status_code: 403,
                success: false,
                error_code: ERROR_CODE_PERMISSION_DENIED.to_string(),
                message: String::new(),
            })
        })
    }

    fn registry_with_service() -> Arc<ServiceRegistry> {
        let registry = Arc::new(ServiceRegistry::new());
        registry.store(
            crate::model::decode_service(
                br#"{"id":"perm-1","upstream":{"proto":"dubbo","uri":"com.X.Auth","method":"verify"}}"#,
            )
            .unwrap(),
        );
        registry
    }

    #[test]
    fn test_denial_short_circuits_with_403() {
        let filter = PermissionFilter::new(denying_verifier(), registry_with_service());
        let ctx = ctx_for(Some(authorized_endpoint("perm-1")));
        let reached = Arc::new(AtomicUsize::new(0));
        let reached_inner = reached.clone();
        let next: Box<NextFn> = Box::new(move |_| {
            reached_inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let err = filter.invoke(&ctx, &*next).unwrap_err();
        assert_eq!(err.status_code, 403);
        assert_eq!(err.error_code, ERROR_CODE_PERMISSION_DENIED);
        assert_eq!(reached.load(Ordering::SeqCst), 0, "backend must not run");
    }

    #[test]
    fn test_unauthorized_endpoint_passes_through() {
        let mut ep = authorized_endpoint("perm-1");
        ep.authorize = false;
        let filter = PermissionFilter::new(denying_verifier(), registry_with_service());
        let ctx = ctx_for(Some(ep));
        filter.invoke(&ctx, &|_| Ok(())).unwrap();
    }

    #[test]
    fn test_unknown_service_id_is_internal_error() {
        let filter = PermissionFilter::new(denying_verifier(), Arc::new(ServiceRegistry::new()));
        let ctx = ctx_for(Some(authorized_endpoint("ghost")));
        let err = filter.invoke(&ctx, &|_| Ok(())).unwrap_err();
        assert_eq!(err.status_code, 500);
        assert_eq!(err.message, "PERMISSION:SERVICE:NOT_FOUND");
    }

    #[test]
    fn test_successful_report_continues() {
        let verifier: PermissionVerifier = Arc::new(|_, _| Ok(PermissionReport::allowed()));
        let filter = PermissionFilter::new(verifier, registry_with_service());
        let ctx = ctx_for(Some(authorized_endpoint("perm-1")));
        let reached = Arc::new(AtomicUsize::new(0));
        let reached_inner = reached.clone();
        let next: Box<NextFn> = Box::new(move |_| {
            reached_inner.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        filter.invoke(&ctx, &*next).unwrap();
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_report_defaults_fill_denial_fields() {
        let verifier: PermissionVerifier = Arc::new(|_, _| {
            Ok(PermissionReport {
                status_code: 0,
                success: false,
                error_code: String::new(),
                message: String::new(),
            })
        });
        let filter = PermissionFilter::new(verifier, registry_with_service());
        let ctx = ctx_for(Some(authorized_endpoint("perm-1")));
        let err = filter.invoke(&ctx, &|_| Ok(())).unwrap_err();
        assert_eq!(err.status_code, 403);
        assert_eq!(err.error_code, ERROR_CODE_PERMISSION_DENIED);
        assert_eq!(err.message, ERROR_CODE_PERMISSION_DENIED);
    }
}
