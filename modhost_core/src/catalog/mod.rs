//! Module catalog.
//!
//! Hosts describe their modules up front with [`ModuleCatalog::register_module`]:
//! each module has an identity and a loader that yields plugin exports
//! (metadata plus a lazy factory). Modules registered later are announced to
//! subscribers as [`ModuleEvent::Available`].

mod discovery;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub use discovery::{admit_exports, discover_sliced, register_exports, DiscoveryReport};

use crate::container::Container;
use crate::error::CatalogError;
use crate::guard;
use crate::plugin::{Plugin, PluginMetadata};

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Identity of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

pub type PluginFactory = Arc<dyn Fn(&Container) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync>;

/// One plugin a module offers: metadata plus a lazy factory.
#[derive(Clone)]
pub struct PluginExport {
    pub metadata: PluginMetadata,
    pub factory: PluginFactory,
}

impl PluginExport {
    pub fn new<F>(metadata: PluginMetadata, factory: F) -> Self
    where
        F: Fn(&Container) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        Self {
            metadata,
            factory: Arc::new(factory),
        }
    }
}

impl fmt::Debug for PluginExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginExport")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

pub type ModuleLoader = Arc<dyn Fn() -> anyhow::Result<Vec<PluginExport>> + Send + Sync>;

#[derive(Clone)]
pub struct ModuleDefinition {
    pub id: ModuleId,
    pub loader: ModuleLoader,
}

impl ModuleDefinition {
    pub fn new<F>(id: impl Into<ModuleId>, loader: F) -> Self
    where
        F: Fn() -> anyhow::Result<Vec<PluginExport>> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            loader: Arc::new(loader),
        }
    }

    /// A module whose loader always yields the given exports.
    pub fn with_exports(id: impl Into<ModuleId>, exports: Vec<PluginExport>) -> Self {
        Self::new(id, move || Ok(exports.clone()))
    }
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    Available(ModuleId),
}

#[derive(Default)]
struct CatalogState {
    modules: Vec<ModuleDefinition>,
    subscribers: Vec<mpsc::UnboundedSender<ModuleEvent>>,
}

/// Registry of modules known to the host.
#[derive(Default)]
pub struct ModuleCatalog {
    state: Mutex<CatalogState>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, or replace the definition with the same id, and announce it.
    pub fn register_module(&self, definition: ModuleDefinition) {
        let id = definition.id.clone();
        let mut state = self.state.lock();

        match state.modules.iter().position(|existing| existing.id == id) {
            Some(index) => state.modules[index] = definition,
            None => state.modules.push(definition),
        }

        let event = ModuleEvent::Available(id.clone());
        state
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        info!(module = %id, subscribers = state.subscribers.len(), "Module registered");
    }

    /// Receive an event for every module registered from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ModuleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscribers.push(tx);
        rx
    }

    pub fn modules(&self) -> Vec<ModuleId> {
        self.state
            .lock()
            .modules
            .iter()
            .map(|definition| definition.id.clone())
            .collect()
    }

    pub fn contains(&self, module: &ModuleId) -> bool {
        self.state.lock().modules.iter().any(|definition| &definition.id == module)
    }

    /// Run one module's loader.
    pub fn load(&self, module: &ModuleId) -> Result<Vec<PluginExport>> {
        let loader = self
            .state
            .lock()
            .modules
            .iter()
            .find(|definition| &definition.id == module)
            .map(|definition| definition.loader.clone())
            .ok_or_else(|| CatalogError::UnknownModule(module.clone()))?;

        let exports = guard::isolate(|| loader()).map_err(|failure| CatalogError::ModuleLoad {
            module: module.clone(),
            message: failure.to_string(),
        })?;
        debug!(module = %module, exports = exports.len(), "Module loaded");
        Ok(exports)
    }

    /// Load every registered module in registration order. The first failure aborts.
    pub fn load_all(&self) -> Result<Vec<(ModuleId, Vec<PluginExport>)>> {
        let modules = self.modules();
        let mut loaded = Vec::with_capacity(modules.len());
        for module in modules {
            let exports = self.load(&module)?;
            loaded.push((module, exports));
        }
        Ok(loaded)
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("modules", &self.modules())
            .finish()
    }
}
