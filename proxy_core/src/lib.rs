pub mod lifecycle;
pub mod platform;
pub mod storage;
pub mod utils;

// re‑export ergonomic entry points
pub use lifecycle::application::{AppContext, Platform};
pub use lifecycle::config::{CoreConfig, PackageInfo};
pub use lifecycle::service::{ServiceCommand, ServiceControl, ServiceRunner};
pub use storage::profile::Profile;
pub use storage::profile_store::ProfileStore;
