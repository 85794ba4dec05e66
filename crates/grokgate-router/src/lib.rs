mod routes;

pub use routes::{GatewayState, gateway_router};
