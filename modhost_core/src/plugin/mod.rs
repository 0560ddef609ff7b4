//! Plugin contract and lifecycle.
//!
//! A discovered plugin is wrapped in a [`PluginContainer`], which owns its
//! three-state status. [`PluginSet`] is the append-only live set of one
//! session; the batch functions drive activation and deactivation over it.

mod batch;
mod container;
mod metadata;
mod set;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use batch::{
    activate_isolated, activate_sliced, activation_order, deactivate_all, deactivation_order,
    FailureReporter,
};
pub use container::{PluginContainer, PluginSnapshot};
pub use metadata::{CompatibilityCheck, PluginMetadata};
pub use set::{Admission, PluginSet};

use crate::catalog::ModuleId;

/// Entry points implemented by every plugin.
pub trait Plugin: Send + Sync {
    fn activate(&self) -> anyhow::Result<()>;

    fn deactivate(&self) -> anyhow::Result<()>;
}

/// Identity of a plugin: the module that contributed it plus its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginKey {
    pub module: ModuleId,
    pub name: String,
}

impl PluginKey {
    pub fn new(module: impl Into<ModuleId>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    NotActivated,
    Active,
    Deactivated,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginStatus::NotActivated => write!(f, "not activated"),
            PluginStatus::Active => write!(f, "active"),
            PluginStatus::Deactivated => write!(f, "deactivated"),
        }
    }
}
