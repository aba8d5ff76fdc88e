pub mod application;
pub mod assets;
pub mod config;
pub mod direct_boot;
pub mod errors;
pub mod notifications;
pub mod service;
pub mod subscription;
pub mod work;

// Re-export the types callers usually need together.
pub use application::{AppContext, Platform};
pub use errors::{CoreError, ServiceError};
