mod gateway;
mod http_server;
mod request;
mod response;
mod service;

pub use gateway::{GatewayServer, SHUTDOWN_DEADLINE};
pub use http_server::{HttpServer, ServerHandle};
pub use request::{parse_cookies, parse_query_params, parse_request};
pub use response::{write_staged_response, write_state_error};
pub use service::{AppService, DebugAuth, WEB_VALUE_PATTERN, WEB_VALUE_VERSION};
