mod auth;
mod error_handler;

pub use auth::{DEVICE_ID_HEADER, auth_middleware, resolve_identity};
pub use error_handler::log_errors;
