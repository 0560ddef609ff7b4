use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Plugin, PluginContainer, PluginKey, PluginMetadata};
use crate::catalog::ModuleId;
use crate::container::Export;

/// What happened to a candidate offered to [`PluginSet::admit`].
#[derive(Debug)]
pub enum Admission {
    /// Wrapped and appended to the live set.
    Added(Arc<PluginContainer>),
    /// Failed its compatibility check; excluded for the rest of the session.
    Excluded,
    /// Already live or already excluded.
    Known,
}

#[derive(Default)]
struct Known {
    modules: HashSet<ModuleId>,
    plugins: HashSet<PluginKey>,
    excluded: HashSet<PluginKey>,
}

/// Live plugins of one session.
///
/// Append-only: readers take a snapshot and iterate it, so an append from a
/// module arrival never invalidates a suspended batch.
#[derive(Default)]
pub struct PluginSet {
    entries: RwLock<Vec<Arc<PluginContainer>>>,
    known: RwLock<Known>,
    sequence: Arc<AtomicU64>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a module has been loaded. Returns `false` if it already was.
    pub fn mark_module(&self, module: &ModuleId) -> bool {
        self.known.write().modules.insert(module.clone())
    }

    pub fn is_known_module(&self, module: &ModuleId) -> bool {
        self.known.read().modules.contains(module)
    }

    /// Wrap `export` unless its identity was seen before or `compatible` is false.
    pub fn admit(&self, export: Export<dyn Plugin, PluginMetadata>, compatible: bool) -> Admission {
        let key = PluginKey::new(export.origin(), export.metadata().name.clone());
        let mut known = self.known.write();
        if known.plugins.contains(&key) || known.excluded.contains(&key) {
            return Admission::Known;
        }
        if !compatible {
            known.excluded.insert(key);
            return Admission::Excluded;
        }
        known.plugins.insert(key);
        drop(known);

        let plugin = Arc::new(PluginContainer::new(export, self.sequence.clone()));
        self.entries.write().push(plugin.clone());
        Admission::Added(plugin)
    }

    pub fn snapshot(&self) -> Vec<Arc<PluginContainer>> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn excluded(&self) -> Vec<PluginKey> {
        let mut excluded: Vec<PluginKey> = self.known.read().excluded.iter().cloned().collect();
        excluded.sort();
        excluded
    }

    /// Active plugins in the order their activation completed.
    pub fn active_in_order(&self) -> Vec<Arc<PluginContainer>> {
        let mut active: Vec<Arc<PluginContainer>> = self
            .snapshot()
            .into_iter()
            .filter(|plugin| plugin.is_active())
            .collect();
        active.sort_by_key(|plugin| plugin.activation_seq());
        active
    }
}
