pub mod health;
pub mod rest;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use rest::rest_passthrough_handler;
pub use websocket::{websocket_handler, websocket_status_handler};
