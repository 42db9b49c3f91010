pub mod backend;
pub mod connection_store;
pub mod dispatch;
pub mod export;
pub mod masking;
pub mod model;
pub mod notifications;
pub mod orchestrator;
pub mod schema_cache;
pub mod session;
pub mod settings;
