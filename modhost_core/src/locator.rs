//! Late-bound access to the live session container.
//!
//! Consumers created by the host (callback targets, UI glue) hold a
//! [`ServiceLocator`] instead of a container. The locator follows whichever
//! session is live and reports [`LocatorError::Unbound`] in between.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::container::{Container, Inject};
use crate::error::LocatorError;

pub type Result<T> = std::result::Result<T, LocatorError>;

#[derive(Debug, Default)]
pub struct ServiceLocator {
    target: RwLock<Weak<Container>>,
}

impl ServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind(&self, container: &Arc<Container>) {
        *self.target.write() = Arc::downgrade(container);
        debug!("Service locator bound");
    }

    pub(crate) fn unbind(&self) {
        *self.target.write() = Weak::new();
        debug!("Service locator unbound");
    }

    pub fn is_bound(&self) -> bool {
        self.container().is_ok()
    }

    /// Inject dependencies into an object created outside the container.
    pub fn build_up<I: Inject + ?Sized>(&self, target: &I) -> Result<()> {
        Ok(self.container()?.build_up(target)?)
    }

    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        Ok(self.container()?.get::<T>()?)
    }

    pub fn get_keyed<T: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>> {
        Ok(self.container()?.get_keyed::<T>(key)?)
    }

    pub fn get_all<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        Ok(self.container()?.resolve_all::<T>()?)
    }

    fn container(&self) -> Result<Arc<Container>> {
        self.target
            .read()
            .upgrade()
            .filter(|container| !container.is_disposed())
            .ok_or(LocatorError::Unbound)
    }
}
