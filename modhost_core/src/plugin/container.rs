use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{Plugin, PluginKey, PluginMetadata, PluginStatus};
use crate::catalog::ModuleId;
use crate::container::{Container, Export};
use crate::error::PluginError;
use crate::guard::{self, Failure};

#[derive(Debug)]
struct PluginState {
    status: PluginStatus,
    activation_attempted: bool,
    activation_seq: Option<u64>,
}

impl PluginState {
    fn fresh() -> Self {
        Self {
            status: PluginStatus::NotActivated,
            activation_attempted: false,
            activation_seq: None,
        }
    }
}

/// Serializable view of a plugin's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSnapshot {
    pub module: ModuleId,
    pub name: String,
    pub priority: i32,
    pub provides_menu: bool,
    pub status: PluginStatus,
    pub activation_seq: Option<u64>,
}

/// One discovered plugin: immutable metadata, a lazily built instance, and
/// its activation status.
pub struct PluginContainer {
    key: PluginKey,
    export: Export<dyn Plugin, PluginMetadata>,
    sequence: Arc<AtomicU64>,
    state: Mutex<PluginState>,
}

impl PluginContainer {
    /// Wrap an export. `sequence` numbers completed activations across the
    /// plugins of one session.
    pub fn new(export: Export<dyn Plugin, PluginMetadata>, sequence: Arc<AtomicU64>) -> Self {
        let key = PluginKey::new(export.origin(), export.metadata().name.clone());
        Self {
            key,
            export,
            sequence,
            state: Mutex::new(PluginState::fresh()),
        }
    }

    pub fn key(&self) -> &PluginKey {
        &self.key
    }

    pub fn metadata(&self) -> &PluginMetadata {
        self.export.metadata()
    }

    pub fn name(&self) -> &str {
        &self.export.metadata().name
    }

    pub fn priority(&self) -> i32 {
        self.export.metadata().priority
    }

    pub fn provides_menu(&self) -> bool {
        self.export.metadata().provides_menu
    }

    pub fn status(&self) -> PluginStatus {
        self.state.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.status() == PluginStatus::Active
    }

    /// Position in the session's completed-activation order, if it ever activated.
    pub fn activation_seq(&self) -> Option<u64> {
        self.state.lock().activation_seq
    }

    /// Whether an activation pass should pick this plugin up.
    pub fn is_eligible(&self) -> bool {
        let state = self.state.lock();
        self.provides_menu()
            && state.status == PluginStatus::NotActivated
            && !state.activation_attempted
    }

    /// Construct the instance if needed and call its activation entry point.
    ///
    /// Activation is attempted at most once until [`reset`](Self::reset).
    /// On failure the plugin stays `NotActivated`. If the session was torn
    /// down from inside the entry point, the plugin is deactivated again
    /// right away and [`PluginError::SessionEnded`] is returned.
    pub fn activate(&self, container: &Container) -> Result<(), PluginError> {
        {
            let mut state = self.state.lock();
            if state.activation_attempted || state.status != PluginStatus::NotActivated {
                return Err(PluginError::AlreadyAttempted(self.key.clone()));
            }
            state.activation_attempted = true;
        }

        let instance = self
            .export
            .value(container)
            .map_err(|err| PluginError::Construction {
                key: self.key.clone(),
                message: err.to_string(),
            })?;

        guard::isolate(|| instance.activate()).map_err(|failure| match failure {
            Failure::Panic(message) => PluginError::Panicked {
                key: self.key.clone(),
                message,
            },
            Failure::Error(message) => PluginError::ActivationFailed {
                key: self.key.clone(),
                message,
            },
        })?;

        if container.is_disposed() {
            self.state.lock().status = PluginStatus::Deactivated;
            guard::isolate(|| instance.deactivate())
                .map_err(|failure| self.deactivation_error(failure))?;
            return Err(PluginError::SessionEnded(self.key.clone()));
        }

        let mut state = self.state.lock();
        state.status = PluginStatus::Active;
        state.activation_seq = Some(self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(())
    }

    /// Call the deactivation entry point of an active plugin.
    ///
    /// The plugin ends up `Deactivated` even when its entry point fails.
    /// Inactive plugins are left untouched.
    pub fn deactivate(&self) -> Result<(), PluginError> {
        {
            let mut state = self.state.lock();
            if state.status != PluginStatus::Active {
                return Ok(());
            }
            state.status = PluginStatus::Deactivated;
        }

        let Some(instance) = self.export.get() else {
            return Ok(());
        };

        guard::isolate(|| instance.deactivate())
            .map_err(|failure| self.deactivation_error(failure))
    }

    fn deactivation_error(&self, failure: Failure) -> PluginError {
        match failure {
            Failure::Panic(message) => PluginError::Panicked {
                key: self.key.clone(),
                message,
            },
            Failure::Error(message) => PluginError::DeactivationFailed {
                key: self.key.clone(),
                message,
            },
        }
    }

    /// Return a non-active plugin to a fresh state so it can be attempted again.
    ///
    /// Returns `false` (and changes nothing) while the plugin is active.
    pub fn reset(&self) -> bool {
        let mut state = self.state.lock();
        if state.status == PluginStatus::Active {
            return false;
        }
        *state = PluginState::fresh();
        true
    }

    pub fn snapshot(&self) -> PluginSnapshot {
        let state = self.state.lock();
        let metadata = self.export.metadata();
        PluginSnapshot {
            module: self.key.module.clone(),
            name: metadata.name.clone(),
            priority: metadata.priority,
            provides_menu: metadata.provides_menu,
            status: state.status,
            activation_seq: state.activation_seq,
        }
    }
}

impl std::fmt::Debug for PluginContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContainer")
            .field("key", &self.key)
            .field("priority", &self.priority())
            .field("state", &*self.state.lock())
            .finish()
    }
}
