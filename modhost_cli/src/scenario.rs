//! Scenario files describing a simulated host session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use modhost_core::{
    Container, ModuleDefinition, OwnerId, OwnerSignal, Plugin, PluginExport, PluginMetadata,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A scenario: when the owner shows up and which modules exist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub owner: OwnerSpec,
    pub modules: Vec<ModuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerSpec {
    pub id: u64,
    /// Delay before the owning entity becomes observable.
    pub appears_after_ms: u64,
}

impl Default for OwnerSpec {
    fn default() -> Self {
        Self {
            id: 1,
            appears_after_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSpec {
    pub id: String,
    /// Modules with a delay are registered while the session is running.
    pub arrives_after_ms: Option<u64>,
    /// Make the module loader fail.
    pub fail_load: bool,
    pub plugins: Vec<PluginSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSpec {
    pub name: String,
    pub priority: i32,
    pub menu: bool,
    /// Minimum host version, `major.minor.patch`.
    pub requires_host: Option<String>,
    /// Simulated activation work, spent on the scheduler thread.
    pub cost_ms: u64,
    pub fail_activate: bool,
    pub fail_deactivate: bool,
}

impl Default for PluginSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            priority: 0,
            menu: true,
            requires_host: None,
            cost_ms: 0,
            fail_activate: false,
            fail_deactivate: false,
        }
    }
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let scenario: Scenario = toml::from_str(&content).context("Failed to parse scenario")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for module in &self.modules {
            if module.id.trim().is_empty() {
                bail!("Every module needs an id");
            }
            for plugin in &module.plugins {
                if plugin.name.trim().is_empty() {
                    bail!("Module {} has a plugin without a name", module.id);
                }
                if let Some(version) = &plugin.requires_host {
                    parse_version(version).with_context(|| format!("Plugin {}", plugin.name))?;
                }
            }
        }
        Ok(())
    }

    /// Modules present before the host starts.
    pub fn initial_modules(&self) -> impl Iterator<Item = &ModuleSpec> {
        self.modules.iter().filter(|module| module.arrives_after_ms.is_none())
    }

    /// Modules that arrive later, with their delay.
    pub fn late_modules(&self) -> impl Iterator<Item = (Duration, &ModuleSpec)> {
        self.modules
            .iter()
            .filter_map(|module| {
                module
                    .arrives_after_ms
                    .map(|ms| (Duration::from_millis(ms), module))
            })
    }
}

impl ModuleSpec {
    pub fn definition(&self) -> anyhow::Result<ModuleDefinition> {
        if self.fail_load {
            let id = self.id.clone();
            return Ok(ModuleDefinition::new(self.id.clone(), move || {
                Err(anyhow::anyhow!("module {} is corrupt", id))
            }));
        }

        let exports = self
            .plugins
            .iter()
            .map(PluginSpec::export)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(ModuleDefinition::with_exports(self.id.clone(), exports))
    }
}

impl PluginSpec {
    pub fn export(&self) -> anyhow::Result<PluginExport> {
        let mut metadata =
            PluginMetadata::new(self.name.clone(), self.priority).with_menu(self.menu);
        if let Some(version) = &self.requires_host {
            let (major, minor, patch) = parse_version(version)?;
            metadata = metadata.requires_host(major, minor, patch);
        }

        let spec = self.clone();
        Ok(PluginExport::new(metadata, move |_: &Container| {
            debug!(plugin = %spec.name, "Constructing simulated plugin");
            Ok(Arc::new(SimulatedPlugin { spec: spec.clone() }) as Arc<dyn Plugin>)
        }))
    }
}

fn parse_version(version: &str) -> anyhow::Result<(u32, u32, u32)> {
    let parts = version
        .split('.')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid version {:?}", version))?;
    match parts.as_slice() {
        [major] => Ok((*major, 0, 0)),
        [major, minor] => Ok((*major, *minor, 0)),
        [major, minor, patch] => Ok((*major, *minor, *patch)),
        _ => bail!("Invalid version {:?}", version),
    }
}

/// Plugin whose behaviour comes from the scenario file.
struct SimulatedPlugin {
    spec: PluginSpec,
}

impl Plugin for SimulatedPlugin {
    fn activate(&self) -> anyhow::Result<()> {
        if self.spec.cost_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.spec.cost_ms));
        }
        if self.spec.fail_activate {
            bail!("{} failed to initialize", self.spec.name);
        }
        Ok(())
    }

    fn deactivate(&self) -> anyhow::Result<()> {
        if self.spec.fail_deactivate {
            bail!("{} failed to release its resources", self.spec.name);
        }
        Ok(())
    }
}

/// Owner that becomes observable at a fixed instant.
pub struct DelayedOwner {
    id: OwnerId,
    appears_at: std::time::Instant,
}

impl DelayedOwner {
    pub fn new(spec: &OwnerSpec) -> Self {
        Self {
            id: OwnerId(spec.id),
            appears_at: std::time::Instant::now() + Duration::from_millis(spec.appears_after_ms),
        }
    }
}

impl OwnerSignal for DelayedOwner {
    fn current_owner(&self) -> Option<OwnerId> {
        (std::time::Instant::now() >= self.appears_at).then_some(self.id)
    }
}
