use std::fmt;
use std::sync::Arc;

use crate::config::HostInfo;

/// Compatibility predicate evaluated once at discovery time.
pub type CompatibilityCheck = Arc<dyn Fn(&HostInfo) -> bool + Send + Sync>;

/// Declarative description of a plugin, available before it is constructed.
#[derive(Clone)]
pub struct PluginMetadata {
    pub name: String,
    pub priority: i32,
    pub provides_menu: bool,
    compatibility: CompatibilityCheck,
}

impl PluginMetadata {
    /// A menu-providing plugin compatible with every host.
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            provides_menu: true,
            compatibility: Arc::new(|_| true),
        }
    }

    pub fn with_menu(mut self, provides_menu: bool) -> Self {
        self.provides_menu = provides_menu;
        self
    }

    pub fn with_compatibility<F>(mut self, check: F) -> Self
    where
        F: Fn(&HostInfo) -> bool + Send + Sync + 'static,
    {
        self.compatibility = Arc::new(check);
        self
    }

    /// Only compatible with hosts at or above `major.minor.patch`.
    pub fn requires_host(self, major: u32, minor: u32, patch: u32) -> Self {
        self.with_compatibility(move |host| host.at_least(major, minor, patch))
    }

    pub fn is_compatible(&self, host: &HostInfo) -> bool {
        (self.compatibility)(host)
    }
}

impl fmt::Debug for PluginMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginMetadata")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("provides_menu", &self.provides_menu)
            .finish_non_exhaustive()
    }
}
