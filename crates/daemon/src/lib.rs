pub mod driver;
pub mod external;
pub mod lifecycle;
pub mod server;

pub use driver::{DriverNotifier, PluginDriver, BUILTIN_SEARCH};
pub use external::{ExternalError, ExternalPlugin};
pub use lifecycle::{Daemon, LifecycleError, PidLock};
pub use server::{router, AppState};
