pub mod auth;
pub mod encoder;
pub mod http;
pub mod relay;
pub mod server;
