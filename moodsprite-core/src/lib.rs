pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod proto;
pub mod sessions;
pub mod upstream;

pub use config::SpriteConfig;
pub use error::SpriteError;
pub use sessions::{MemorySessionStore, PgSessionStore, SessionManager, SessionStore};
pub use upstream::{
    CueSubscription, GrpcUpstream, HttpUpstream, SpriteUpstream, UpstreamError, UpstreamEvent,
};
