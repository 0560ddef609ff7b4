//! Error types for the modhost runtime.
//!
//! Each subsystem owns a focused error enum; [`Error`] aggregates them so
//! callers that cross subsystem boundaries can use a single `Result`.

use thiserror::Error;

use crate::catalog::ModuleId;
use crate::plugin::PluginKey;

/// Root error type for the runtime.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("Locator error: {0}")]
    Locator(#[from] LocatorError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while resolving or disposing services.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("No registration for service {type_name}{}", key_suffix(.key))]
    NotRegistered {
        type_name: &'static str,
        key: Option<String>,
    },

    #[error("Circular dependency while constructing {0}")]
    CircularDependency(&'static str),

    #[error("Failed to construct {type_name}: {message}")]
    ConstructionFailed {
        type_name: &'static str,
        message: String,
    },

    #[error("Container has been disposed")]
    Disposed,
}

fn key_suffix(key: &Option<String>) -> String {
    match key {
        Some(key) => format!(" (key '{}')", key),
        None => String::new(),
    }
}

/// Errors raised by the module catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Module {0} is not registered")]
    UnknownModule(ModuleId),

    #[error("Module {module} failed to load: {message}")]
    ModuleLoad { module: ModuleId, message: String },
}

/// Errors raised by a single plugin's lifecycle.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Activation of {0} was already attempted")]
    AlreadyAttempted(PluginKey),

    #[error("Failed to construct plugin {key}: {message}")]
    Construction { key: PluginKey, message: String },

    #[error("Plugin {key} failed to activate: {message}")]
    ActivationFailed { key: PluginKey, message: String },

    #[error("Plugin {key} failed to deactivate: {message}")]
    DeactivationFailed { key: PluginKey, message: String },

    #[error("Plugin {key} panicked: {message}")]
    Panicked { key: PluginKey, message: String },

    #[error("Session ended while {0} was activating")]
    SessionEnded(PluginKey),
}

/// Errors that abort a bootstrap attempt.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Owning entity is not observable")]
    OwnerMissing,

    #[error("Owning entity changed during bootstrap")]
    OwnerChanged,

    #[error("Module loading failed: {0}")]
    ModuleLoad(#[from] CatalogError),

    #[error("Session container error: {0}")]
    Container(#[from] ContainerError),
}

/// Errors raised by the service locator indirection.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("Service locator is not bound to a live session")]
    Unbound,

    #[error(transparent)]
    Container(#[from] ContainerError),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
