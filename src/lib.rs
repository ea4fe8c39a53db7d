pub mod argument;
pub mod cli;
pub mod codec;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod ext;
pub mod filter;
pub mod ids;
pub mod model;
pub mod registry;
pub mod router;
pub mod runtime_config;
pub mod server;

pub use config::GatewayConfig;
pub use context::{Context, ContextPool};
pub use endpoint::MultiVersionEndpoint;
pub use error::StateError;
pub use ext::{Extensions, ExtensionsBuilder, ServiceRegistry};
pub use model::{Argument, BackendService, Endpoint, EndpointEvent, EventType, ServiceEvent};
pub use router::Router;
pub use server::GatewayServer;
