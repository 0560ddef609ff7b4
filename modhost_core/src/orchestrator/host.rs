use std::sync::Arc;

use crate::catalog::ModuleCatalog;
use crate::clock::{Clock, SystemClock};
use crate::container::Container;
use crate::scheduler::Scheduler;
use crate::session::OwnerSignal;

/// Destination for isolated failures, in addition to the log.
pub trait ErrorSink: Send + Sync {
    fn report(&self, context: &str, error: &str);
}

/// Builds the error sink during bootstrap, with the session container at hand.
pub type ErrorSinkFactory =
    Arc<dyn Fn(&Container) -> anyhow::Result<Arc<dyn ErrorSink>> + Send + Sync>;

/// Collaborators the host hands to the orchestrator.
#[derive(Clone)]
pub struct HostServices {
    pub owner: Arc<dyn OwnerSignal>,
    pub scheduler: Arc<dyn Scheduler>,
    pub clock: Arc<dyn Clock>,
    pub catalog: Arc<ModuleCatalog>,
    pub error_sink_factory: Option<ErrorSinkFactory>,
}

impl HostServices {
    /// Host services on the system clock, without an error sink.
    pub fn new(
        owner: Arc<dyn OwnerSignal>,
        scheduler: Arc<dyn Scheduler>,
        catalog: Arc<ModuleCatalog>,
    ) -> Self {
        Self {
            owner,
            scheduler,
            clock: Arc::new(SystemClock),
            catalog,
            error_sink_factory: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_error_sink<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Container) -> anyhow::Result<Arc<dyn ErrorSink>> + Send + Sync + 'static,
    {
        self.error_sink_factory = Some(Arc::new(factory));
        self
    }
}
