use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::{Container, Frame, Result};
use crate::error::ContainerError;

type ExportFactory<T> = Box<dyn Fn(&Container) -> anyhow::Result<Arc<T>> + Send + Sync>;

struct Lazy<T: ?Sized> {
    cell: OnceCell<Arc<T>>,
    factory: ExportFactory<T>,
}

/// A lazily constructed candidate of contract `T`, described by metadata `M`.
///
/// Cloning is cheap and every clone shares the same cached value.
pub struct Export<T: ?Sized, M> {
    origin: Arc<str>,
    metadata: Arc<M>,
    lazy: Arc<Lazy<T>>,
}

impl<T: ?Sized + Send + Sync + 'static, M> Export<T, M> {
    pub(super) fn new<F>(origin: &str, metadata: M, factory: F) -> Self
    where
        F: Fn(&Container) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        Self {
            origin: Arc::from(origin),
            metadata: Arc::new(metadata),
            lazy: Arc::new(Lazy {
                cell: OnceCell::new(),
                factory: Box::new(factory),
            }),
        }
    }

    /// Identity of whatever contributed this export.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    /// Whether the value has been constructed yet.
    pub fn is_created(&self) -> bool {
        self.lazy.cell.get().is_some()
    }

    /// The cached value, without constructing it.
    pub fn get(&self) -> Option<Arc<T>> {
        self.lazy.cell.get().cloned()
    }

    /// Construct on first use, then return the cached instance.
    ///
    /// A failed construction is not cached; the next call tries again. A
    /// factory that ends up asking for its own export gets
    /// [`ContainerError::CircularDependency`].
    pub fn value(&self, container: &Container) -> Result<Arc<T>> {
        if container.is_disposed() {
            return Err(ContainerError::Disposed);
        }
        if let Some(value) = self.lazy.cell.get() {
            return Ok(value.clone());
        }
        // Checked before entering the cell, which must not be re-entered.
        let frame = Frame::Export(Arc::as_ptr(&self.lazy) as *const () as usize);
        container.construct(frame, type_name::<T>(), || {
            self.lazy
                .cell
                .get_or_try_init(|| (self.lazy.factory)(container))
                .cloned()
        })
    }
}

impl<T: ?Sized, M> Clone for Export<T, M> {
    fn clone(&self) -> Self {
        Self {
            origin: self.origin.clone(),
            metadata: self.metadata.clone(),
            lazy: self.lazy.clone(),
        }
    }
}

impl<T: ?Sized, M: fmt::Debug> fmt::Debug for Export<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Export")
            .field("origin", &self.origin)
            .field("metadata", &self.metadata)
            .field("created", &self.lazy.cell.get().is_some())
            .finish()
    }
}
