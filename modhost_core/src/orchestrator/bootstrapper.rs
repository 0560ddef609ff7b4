use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::host::{ErrorSink, HostServices};
use super::state::{OrchestratorState, RuntimeReport, SessionSummary};
use crate::catalog::{
    admit_exports, discover_sliced, register_exports, DiscoveryReport, ModuleEvent, ModuleId,
};
use crate::config::RuntimeConfig;
use crate::container::Container;
use crate::error::{BootstrapError, PluginError};
use crate::guard;
use crate::locator::ServiceLocator;
use crate::plugin::{
    activate_isolated, activate_sliced, activation_order, deactivate_all, FailureReporter, Plugin,
    PluginContainer, PluginKey, PluginMetadata, PluginSet, PluginSnapshot,
};
use crate::scheduler::SubscriptionId;
use crate::session::{OwnerId, SessionContext};

struct Inner {
    state: OrchestratorState,
    /// Bumped whenever a session starts or ends; stale continuations compare against it.
    generation: u64,
    session: Option<Arc<SessionContext>>,
    /// Live only while a session exists.
    plugins: Option<Arc<PluginSet>>,
    /// What the last torn-down session left behind, for reporting.
    last_plugins: Vec<PluginSnapshot>,
    last_excluded: Vec<PluginKey>,
    owner_poll: Option<SubscriptionId>,
    watcher: Option<SubscriptionId>,
    arrivals: Option<mpsc::UnboundedReceiver<ModuleEvent>>,
    sink: Option<Arc<dyn ErrorSink>>,
    bootstrap_attempts: u32,
    sessions_started: u32,
    last_error: Option<String>,
    deactivation_order: Vec<PluginKey>,
}

/// Top-level state machine of the runtime.
///
/// Waits for the owning entity, builds a session around it, discovers and
/// activates plugins in time slices, admits modules that arrive later, and
/// unwinds everything in reverse on shutdown or owner change.
///
/// Every entry point is driven by the host: [`on_activated`](Self::on_activated),
/// [`on_deactivated`](Self::on_deactivated) and the scheduler callbacks the
/// orchestrator registers. None of them ever propagates a failure.
pub struct Bootstrapper {
    config: RuntimeConfig,
    host: HostServices,
    locator: Arc<ServiceLocator>,
    inner: Mutex<Inner>,
}

impl Bootstrapper {
    pub fn new(config: RuntimeConfig, host: HostServices) -> Arc<Self> {
        Arc::new(Self {
            config,
            host,
            locator: Arc::new(ServiceLocator::new()),
            inner: Mutex::new(Inner {
                state: OrchestratorState::Idle,
                generation: 0,
                session: None,
                plugins: None,
                last_plugins: Vec::new(),
                last_excluded: Vec::new(),
                owner_poll: None,
                watcher: None,
                arrivals: None,
                sink: None,
                bootstrap_attempts: 0,
                sessions_started: 0,
                last_error: None,
                deactivation_order: Vec::new(),
            }),
        })
    }

    /// Host activation signal: start waiting for the owning entity.
    pub fn on_activated(self: &Arc<Self>) {
        guard::swallow("on_activated", || {
            {
                let mut inner = self.inner.lock();
                if inner.state != OrchestratorState::Idle {
                    debug!(state = %inner.state, "Activation signal ignored");
                    return;
                }
                inner.state = OrchestratorState::WaitingForOwner;
            }
            info!("Runtime activated, waiting for owner");
            self.start_owner_poll();
        });
    }

    /// Host deactivation signal: unwind the live session, if any, and go idle.
    pub fn on_deactivated(self: &Arc<Self>) {
        guard::swallow("on_deactivated", || {
            if self.inner.lock().state == OrchestratorState::Idle {
                return;
            }
            info!("Runtime deactivated, shutting down");
            self.teardown();
            self.inner.lock().state = OrchestratorState::Idle;
            info!("Runtime idle");
        });
    }

    pub fn state(&self) -> OrchestratorState {
        self.inner.lock().state
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn session(&self) -> Option<Arc<SessionContext>> {
        self.inner.lock().session.clone()
    }

    pub fn container(&self) -> Option<Arc<Container>> {
        self.session().map(|session| session.container().clone())
    }

    pub fn locator(&self) -> Arc<ServiceLocator> {
        self.locator.clone()
    }

    /// Plugins of the live session, in discovery order.
    ///
    /// Empty once the session is torn down; [`report`](Self::report) keeps
    /// their final state.
    pub fn plugins(&self) -> Vec<Arc<PluginContainer>> {
        let plugins = self.inner.lock().plugins.clone();
        plugins.map(|plugins| plugins.snapshot()).unwrap_or_default()
    }

    /// Active plugins in the order their activation completed.
    pub fn active_plugins(&self) -> Vec<Arc<PluginContainer>> {
        let plugins = self.inner.lock().plugins.clone();
        plugins
            .map(|plugins| plugins.active_in_order())
            .unwrap_or_default()
    }

    pub fn report(&self) -> RuntimeReport {
        let inner = self.inner.lock();
        let (plugins, excluded) = match &inner.plugins {
            Some(live) => (
                live.snapshot().iter().map(|plugin| plugin.snapshot()).collect(),
                live.excluded(),
            ),
            None => (inner.last_plugins.clone(), inner.last_excluded.clone()),
        };
        RuntimeReport {
            state: inner.state,
            session: inner.session.as_ref().map(|session| SessionSummary {
                id: session.id(),
                owner: session.owner(),
                created_at: session.created_at(),
            }),
            bootstrap_attempts: inner.bootstrap_attempts,
            sessions_started: inner.sessions_started,
            last_error: inner.last_error.clone(),
            deactivation_order: inner.deactivation_order.clone(),
            plugins,
            excluded,
        }
    }

    fn start_owner_poll(self: &Arc<Self>) {
        let this = Arc::downgrade(self);
        let id = self.host.scheduler.subscribe(Arc::new(move || {
            if let Some(this) = this.upgrade() {
                this.poll_owner();
            }
        }));

        let mut inner = self.inner.lock();
        if inner.state == OrchestratorState::WaitingForOwner && inner.owner_poll.is_none() {
            inner.owner_poll = Some(id);
        } else {
            drop(inner);
            self.host.scheduler.unsubscribe(id);
        }
    }

    fn poll_owner(self: &Arc<Self>) {
        if self.inner.lock().state != OrchestratorState::WaitingForOwner {
            return;
        }
        let Some(owner) = self.host.owner.current_owner() else {
            return;
        };

        let (poll, generation) = {
            let mut inner = self.inner.lock();
            if inner.state != OrchestratorState::WaitingForOwner {
                return;
            }
            inner.state = OrchestratorState::Bootstrapping;
            inner.generation += 1;
            (inner.owner_poll.take(), inner.generation)
        };
        if let Some(id) = poll {
            self.host.scheduler.unsubscribe(id);
        }

        info!(owner = %owner, generation, "Owner observable, scheduling bootstrap");
        let this = Arc::downgrade(self);
        self.host.scheduler.invoke_after(
            Duration::ZERO,
            Box::new(move || {
                if let Some(this) = this.upgrade() {
                    this.bootstrap(generation, owner);
                }
            }),
        );
    }

    fn bootstrap(self: &Arc<Self>, generation: u64, owner: OwnerId) {
        if !self.is_current(generation) {
            debug!(generation, "Stale bootstrap skipped");
            return;
        }
        self.inner.lock().bootstrap_attempts += 1;

        if let Err(err) = self.try_bootstrap(generation, owner) {
            self.fail_bootstrap(err);
        }
    }

    fn try_bootstrap(
        self: &Arc<Self>,
        generation: u64,
        owner: OwnerId,
    ) -> Result<(), BootstrapError> {
        match self.host.owner.current_owner() {
            None => return Err(BootstrapError::OwnerMissing),
            Some(current) if current != owner => return Err(BootstrapError::OwnerChanged),
            Some(_) => {}
        }

        // (a) session and container, self-registered.
        let session = SessionContext::new(owner)?;
        let container = session.container().clone();
        let plugins = Arc::new(PluginSet::new());
        // Opened before loading so no registration falls between the two.
        let arrivals = self.host.catalog.subscribe();
        {
            let mut inner = self.inner.lock();
            inner.session = Some(session.clone());
            inner.plugins = Some(plugins.clone());
            inner.arrivals = Some(arrivals);
            inner.deactivation_order.clear();
            inner.last_plugins.clear();
            inner.last_excluded.clear();
        }

        // (b) the orchestrator and its collaborators, for plugins to depend on.
        container.register(self.clone())?;
        container.register(self.host.catalog.clone())?;
        container.register(plugins.clone())?;
        container.register(Arc::new(self.config.clone()))?;

        // (c) error reporting; never fatal.
        self.init_error_sink(&container);

        // (d) late-bound access for consumers without a container.
        container.register(self.locator.clone())?;
        self.locator.bind(&container);

        // (e) discovery.
        for (module, exports) in self.host.catalog.load_all()? {
            plugins.mark_module(&module);
            register_exports(&container, &module, exports)?;
        }
        let candidates = container.get_exports::<dyn Plugin, PluginMetadata>()?;

        // (g) the session watcher; module arrivals wait until Running.
        self.subscribe_watcher(generation);

        info!(
            session = %session.id(),
            owner = %owner,
            candidates = candidates.len(),
            "Session built, discovering plugins"
        );

        // (f) activation is scheduled once discovery completes.
        let this = Arc::downgrade(self);
        discover_sliced(
            self.host.scheduler.clone(),
            self.host.clock.clone(),
            self.config.slice_policy(),
            self.config.host.clone(),
            candidates,
            plugins,
            self.keep_going(generation),
            move |report| {
                if let Some(this) = this.upgrade() {
                    this.discovery_finished(generation, report);
                }
            },
        );
        Ok(())
    }

    fn init_error_sink(&self, container: &Container) {
        if !self.config.error_reporting {
            return;
        }
        let Some(factory) = self.host.error_sink_factory.clone() else {
            debug!("Error reporting enabled but the host supplied no sink");
            return;
        };

        match guard::isolate(|| factory(container)) {
            Ok(sink) => {
                if let Err(err) = container.register::<dyn ErrorSink>(sink.clone()) {
                    warn!(error = %err, "Failed to register error sink");
                }
                self.inner.lock().sink = Some(sink);
                info!("Error reporting initialized");
            }
            Err(failure) => {
                warn!(
                    error = %failure,
                    "Error reporting failed to initialize, continuing without it"
                );
            }
        }
    }

    fn discovery_finished(self: &Arc<Self>, generation: u64, report: DiscoveryReport) {
        if report.stopped || !self.is_current(generation) {
            return;
        }

        let delay = self.config.activation_delay();
        let this = Arc::downgrade(self);
        self.host.scheduler.invoke_after(
            delay,
            Box::new(move || {
                if let Some(this) = this.upgrade() {
                    this.start_activation(generation);
                }
            }),
        );

        {
            let mut inner = self.inner.lock();
            inner.state = OrchestratorState::Running;
            inner.sessions_started += 1;
        }
        info!(
            generation,
            plugins = report.added,
            excluded = report.excluded,
            delay_ms = delay.as_millis() as u64,
            "Bootstrap complete, activation scheduled"
        );
    }

    fn start_activation(self: &Arc<Self>, generation: u64) {
        let Some((container, plugins)) = self.session_parts(generation) else {
            return;
        };

        activate_sliced(
            self.host.scheduler.clone(),
            self.host.clock.clone(),
            self.config.slice_policy(),
            container,
            plugins.snapshot(),
            self.keep_going(generation),
            self.reporter(),
            move |report| {
                info!(
                    generation,
                    processed = report.processed,
                    slices = report.slices,
                    outcome = ?report.outcome,
                    "Activation batch finished"
                );
            },
        );
    }

    fn subscribe_watcher(self: &Arc<Self>, generation: u64) {
        let this = Arc::downgrade(self);
        let id = self.host.scheduler.subscribe(Arc::new(move || {
            if let Some(this) = this.upgrade() {
                this.watch_session(generation);
            }
        }));

        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.watcher = Some(id);
        } else {
            drop(inner);
            self.host.scheduler.unsubscribe(id);
        }
    }

    fn watch_session(self: &Arc<Self>, generation: u64) {
        let (state, session_owner) = {
            let inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            match &inner.session {
                Some(session) => (inner.state, session.owner()),
                None => return,
            }
        };

        match self.host.owner.current_owner() {
            None => {
                info!(owner = %session_owner, "Owner disappeared, tearing down session");
                self.restart();
                return;
            }
            Some(current) if current != session_owner => {
                info!(
                    previous = %session_owner,
                    owner = %current,
                    "Owner changed, rebuilding session"
                );
                self.restart();
                return;
            }
            Some(_) => {}
        }

        if state != OrchestratorState::Running {
            return;
        }

        let modules: Vec<ModuleId> = {
            let mut inner = self.inner.lock();
            let Some(arrivals) = inner.arrivals.as_mut() else {
                return;
            };
            let mut modules = Vec::new();
            while let Ok(ModuleEvent::Available(module)) = arrivals.try_recv() {
                modules.push(module);
            }
            modules
        };

        for module in modules {
            if !self.is_current(generation) {
                break;
            }
            self.admit_module(generation, module);
        }
    }

    /// Process one late module immediately, without batching.
    fn admit_module(self: &Arc<Self>, generation: u64, module: ModuleId) {
        let Some((container, plugins)) = self.session_parts(generation) else {
            return;
        };
        if plugins.is_known_module(&module) {
            debug!(module = %module, "Module already known, ignoring announcement");
            return;
        }

        let exports = match self.host.catalog.load(&module) {
            Ok(exports) => exports,
            Err(err) => {
                error!(module = %module, error = %err, "Arrived module failed to load");
                self.forward_failure("module arrival", &err.to_string());
                return;
            }
        };
        plugins.mark_module(&module);

        let candidates = match register_exports(&container, &module, exports) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(
                    module = %module,
                    error = %err,
                    "Could not register exports of arrived module"
                );
                return;
            }
        };
        let (added, report) = admit_exports(candidates, &self.config.host, &plugins);
        info!(
            module = %module,
            added = report.added,
            excluded = report.excluded,
            "Module arrived"
        );

        let reporter = self.reporter();
        for plugin in activation_order(&added) {
            if !self.is_current(generation) {
                break;
            }
            activate_isolated(&plugin, &container, self.host.clock.as_ref(), &reporter);
        }
    }

    fn fail_bootstrap(self: &Arc<Self>, err: BootstrapError) {
        error!(fatal = true, error = %err, "Bootstrap failed");
        self.forward_failure("bootstrap", &err.to_string());
        self.inner.lock().last_error = Some(err.to_string());

        self.teardown();
        let token = {
            let mut inner = self.inner.lock();
            inner.state = OrchestratorState::WaitingForOwner;
            inner.generation
        };

        let retry = self.config.bootstrap_retry();
        info!(retry_ms = retry.as_millis() as u64, "Bootstrap will be retried");
        let this = Arc::downgrade(self);
        self.host.scheduler.invoke_after(
            retry,
            Box::new(move || {
                if let Some(this) = this.upgrade() {
                    this.resume_polling(token);
                }
            }),
        );
    }

    fn resume_polling(self: &Arc<Self>, token: u64) {
        {
            let inner = self.inner.lock();
            if inner.generation != token
                || inner.state != OrchestratorState::WaitingForOwner
                || inner.owner_poll.is_some()
            {
                return;
            }
        }
        self.start_owner_poll();
    }

    /// Tear the session down and wait for the next owner.
    fn restart(self: &Arc<Self>) {
        self.teardown();
        self.inner.lock().state = OrchestratorState::WaitingForOwner;
        self.start_owner_poll();
    }

    /// Deactivate whatever reached Active, then dispose the session.
    ///
    /// Leaves the state at ShuttingDown; callers pick the next one. Only
    /// snapshots of the plugins survive, so instances holding the
    /// orchestrator do not keep it alive.
    fn teardown(&self) {
        let (session, plugins, subscriptions, sink) = {
            let mut inner = self.inner.lock();
            inner.state = OrchestratorState::ShuttingDown;
            inner.generation += 1;
            inner.arrivals = None;
            (
                inner.session.take(),
                inner.plugins.take(),
                [inner.owner_poll.take(), inner.watcher.take()],
                inner.sink.take(),
            )
        };

        for id in subscriptions.into_iter().flatten() {
            self.host.scheduler.unsubscribe(id);
        }

        let reporter: FailureReporter = Arc::new(move |err: &PluginError| {
            if let Some(sink) = &sink {
                let message = err.to_string();
                guard::swallow("error sink", || sink.report("deactivation", &message));
            }
        });
        let (order, last_plugins, last_excluded) = match plugins {
            Some(plugins) => {
                let containers = plugins.snapshot();
                let order = deactivate_all(&containers, &reporter);
                let snapshots: Vec<PluginSnapshot> =
                    containers.iter().map(|plugin| plugin.snapshot()).collect();
                (order, snapshots, plugins.excluded())
            }
            None => Default::default(),
        };
        {
            let mut inner = self.inner.lock();
            inner.deactivation_order = order;
            inner.last_plugins = last_plugins;
            inner.last_excluded = last_excluded;
        }

        self.locator.unbind();
        if let Some(session) = session {
            session.dispose();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.inner.lock();
        inner.generation == generation
            && matches!(
                inner.state,
                OrchestratorState::Bootstrapping | OrchestratorState::Running
            )
    }

    fn session_parts(&self, generation: u64) -> Option<(Arc<Container>, Arc<PluginSet>)> {
        let inner = self.inner.lock();
        if inner.generation != generation
            || !matches!(
                inner.state,
                OrchestratorState::Bootstrapping | OrchestratorState::Running
            )
        {
            return None;
        }
        let session = inner.session.as_ref()?;
        if session.is_disposed() {
            return None;
        }
        Some((session.container().clone(), inner.plugins.clone()?))
    }

    fn keep_going(self: &Arc<Self>, generation: u64) -> impl Fn() -> bool + Send + 'static {
        let this: Weak<Self> = Arc::downgrade(self);
        move || this.upgrade().is_some_and(|this| this.is_current(generation))
    }

    fn reporter(self: &Arc<Self>) -> FailureReporter {
        let this = Arc::downgrade(self);
        Arc::new(move |err: &PluginError| {
            if let Some(this) = this.upgrade() {
                this.forward_failure("plugin", &err.to_string());
            }
        })
    }

    fn forward_failure(&self, context: &str, message: &str) {
        let sink = self.inner.lock().sink.clone();
        if let Some(sink) = sink {
            guard::swallow("error sink", || sink.report(context, message));
        }
    }
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Bootstrapper")
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("session", &inner.session.as_ref().map(|session| session.id()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModuleCatalog;
    use crate::scheduler::ManualScheduler;
    use crate::session::OwnerSignal;

    struct FixedOwner(Mutex<Option<OwnerId>>);

    impl OwnerSignal for FixedOwner {
        fn current_owner(&self) -> Option<OwnerId> {
            *self.0.lock()
        }
    }

    fn bootstrapper(owner: Option<OwnerId>) -> (Arc<Bootstrapper>, Arc<ManualScheduler>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let host = HostServices::new(
            Arc::new(FixedOwner(Mutex::new(owner))),
            scheduler.clone(),
            Arc::new(ModuleCatalog::new()),
        )
        .with_clock(scheduler.clock());
        (Bootstrapper::new(RuntimeConfig::default(), host), scheduler)
    }

    #[test]
    fn test_waits_for_owner_until_observable() {
        let (runtime, scheduler) = bootstrapper(None);
        assert_eq!(runtime.state(), OrchestratorState::Idle);

        runtime.on_activated();
        assert_eq!(runtime.state(), OrchestratorState::WaitingForOwner);
        scheduler.run_frames(5, Duration::from_millis(16));
        assert_eq!(runtime.state(), OrchestratorState::WaitingForOwner);
        assert!(runtime.session().is_none());
        assert_eq!(scheduler.subscriber_count(), 1);
    }

    #[test]
    fn test_empty_catalog_reaches_running() {
        let (runtime, scheduler) = bootstrapper(Some(OwnerId(7)));
        runtime.on_activated();
        runtime.on_activated();

        scheduler.run_frames(2, Duration::from_millis(16));
        assert_eq!(runtime.state(), OrchestratorState::Running);

        let container = runtime.container().unwrap();
        let registered = container.get::<Bootstrapper>().unwrap();
        assert!(Arc::ptr_eq(&registered, &runtime));
        assert_eq!(runtime.report().sessions_started, 1);
        drop(registered);

        runtime.on_deactivated();
        assert_eq!(runtime.state(), OrchestratorState::Idle);
        assert!(container.is_disposed());
        assert_eq!(Arc::strong_count(&runtime), 1);
        assert_eq!(scheduler.subscriber_count(), 0);
    }
}
