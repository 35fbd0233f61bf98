pub mod api;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod event;
pub mod payload;
pub mod prometheus;
pub mod router;
pub mod server;
pub mod sinks;
pub mod store;
pub mod time;
