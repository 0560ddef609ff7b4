//! # modhost core
//!
//! Plugin runtime for long-running host processes.
//!
//! The runtime discovers optional feature modules, resolves their
//! dependencies through a per-session service container, and drives their
//! activation and deactivation without destabilizing the host:
//!
//! - [`container`]: type-keyed service resolution, lazy exports and disposal
//! - [`session`]: one container scoped to one owning entity
//! - [`plugin`]: the plugin contract, per-plugin lifecycle and batch passes
//! - [`catalog`]: module registration, loading and discovery
//! - [`scheduler`]: host tick subscriptions, delayed tasks and time slicing
//! - [`orchestrator`]: the state machine composing all of the above
//!
//! The runtime never owns threads. It borrows the host's tick through a
//! [`scheduler::Scheduler`] and yields between slices of heavy work.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod container;
pub mod error;
pub mod guard;
pub mod locator;
pub mod orchestrator;
pub mod plugin;
pub mod scheduler;
pub mod session;

// Re-export key items for convenience
pub use catalog::{ModuleCatalog, ModuleDefinition, ModuleEvent, ModuleId, PluginExport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, HostInfo, RuntimeConfig};
pub use container::{Container, Disposable, Export, Inject, Injectable};
pub use error::{
    BootstrapError, CatalogError, ConfigError, ContainerError, Error, LocatorError, PluginError,
};
pub use locator::ServiceLocator;
pub use orchestrator::{Bootstrapper, ErrorSink, HostServices, OrchestratorState, RuntimeReport};
pub use plugin::{Plugin, PluginContainer, PluginKey, PluginMetadata, PluginSnapshot, PluginStatus};
pub use scheduler::{ManualScheduler, Scheduler, SlicePolicy, SubscriptionId, TokioScheduler};
pub use session::{OwnerId, OwnerSignal, SessionContext};

/// A type alias for Result with our error types
pub type Result<T, E = error::Error> = std::result::Result<T, E>;
