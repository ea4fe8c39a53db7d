mod chain;
mod metrics;
mod permission;

pub use chain::{FilterChain, NextFn, TerminalFn};
pub use metrics::MetricsFilter;
pub use permission::{
    default_permission_verifier, PermissionFilter, PermissionReport, PermissionVerifier,
    TYPE_ID_PERMISSION_FILTER,
};

use crate::config::GatewayConfig;
use crate::context::Context;
use crate::error::StateError;

/// A chained request interceptor.
///
/// Filters wrap the step below them: call `next(ctx)` at most once to
/// continue, or return an error without calling it to short-circuit. Global
/// filters run on every request; selective filters run only when the
/// endpoint's filter-selection metadata names their `type_id`. Within each
/// group the order is ascending `order()`, ties broken by registration
/// order.
pub trait Filter: Send + Sync {
    /// Stable identifier endpoints use to select this filter.
    fn type_id(&self) -> &'static str;

    fn order(&self) -> i32 {
        0
    }

    /// One-time initialization during gateway startup.
    fn init(&self, _config: &GatewayConfig) -> Result<(), StateError> {
        Ok(())
    }

    fn invoke(&self, ctx: &Context, next: &NextFn) -> Result<(), StateError>;
}
