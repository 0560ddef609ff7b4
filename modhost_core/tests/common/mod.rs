#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use modhost_core::{
    Bootstrapper, Container, Disposable, ErrorSink, HostInfo, HostServices, ManualClock,
    ManualScheduler, ModuleCatalog, ModuleDefinition, OwnerId, OwnerSignal, Plugin, PluginExport,
    PluginMetadata, RuntimeConfig,
};
use parking_lot::Mutex;

pub const FRAME: Duration = Duration::from_millis(16);

/// Route runtime logs to the test output; `RUST_LOG=debug` shows slicing.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Owner signal the test flips by hand.
#[derive(Default)]
pub struct TestOwner(Mutex<Option<OwnerId>>);

impl TestOwner {
    pub fn set(&self, owner: Option<OwnerId>) {
        *self.0.lock() = owner;
    }
}

impl OwnerSignal for TestOwner {
    fn current_owner(&self) -> Option<OwnerId> {
        *self.0.lock()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub reports: Mutex<Vec<(String, String)>>,
}

impl ErrorSink for RecordingSink {
    fn report(&self, context: &str, error: &str) {
        self.reports.lock().push((context.to_string(), error.to_string()));
    }
}

/// One entry per activation: name, start and end in clock milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub name: String,
    pub started_ms: u128,
    pub finished_ms: u128,
}

/// Declarative description of a test plugin.
#[derive(Clone)]
pub struct TestPlugin {
    pub name: &'static str,
    pub priority: i32,
    pub menu: bool,
    pub cost: Duration,
    pub fail_activate: bool,
    pub panic_activate: bool,
    pub fail_deactivate: bool,
    pub min_host: Option<(u32, u32, u32)>,
    pub owns_resource: bool,
}

impl TestPlugin {
    pub fn new(name: &'static str, priority: i32) -> Self {
        Self {
            name,
            priority,
            menu: true,
            cost: Duration::ZERO,
            fail_activate: false,
            panic_activate: false,
            fail_deactivate: false,
            min_host: None,
            owns_resource: false,
        }
    }

    pub fn cost_ms(mut self, ms: u64) -> Self {
        self.cost = Duration::from_millis(ms);
        self
    }

    pub fn without_menu(mut self) -> Self {
        self.menu = false;
        self
    }

    pub fn failing_activation(mut self) -> Self {
        self.fail_activate = true;
        self
    }

    pub fn panicking_activation(mut self) -> Self {
        self.panic_activate = true;
        self
    }

    pub fn failing_deactivation(mut self) -> Self {
        self.fail_deactivate = true;
        self
    }

    pub fn requires_host(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.min_host = Some((major, minor, patch));
        self
    }

    pub fn owning_resource(mut self) -> Self {
        self.owns_resource = true;
        self
    }
}

struct Recorded {
    spec: TestPlugin,
    clock: Arc<ManualClock>,
    calls: Arc<Mutex<Vec<String>>>,
    timings: Arc<Mutex<Vec<Timing>>>,
}

impl Plugin for Recorded {
    fn activate(&self) -> anyhow::Result<()> {
        let started = self.clock.elapsed();
        self.clock.advance(self.spec.cost);
        self.calls.lock().push(format!("+{}", self.spec.name));
        self.timings.lock().push(Timing {
            name: self.spec.name.to_string(),
            started_ms: started.as_millis(),
            finished_ms: self.clock.elapsed().as_millis(),
        });
        if self.spec.panic_activate {
            panic!("{} exploded", self.spec.name);
        }
        if self.spec.fail_activate {
            anyhow::bail!("{} refused to activate", self.spec.name);
        }
        Ok(())
    }

    fn deactivate(&self) -> anyhow::Result<()> {
        self.calls.lock().push(format!("-{}", self.spec.name));
        if self.spec.fail_deactivate {
            anyhow::bail!("{} refused to deactivate", self.spec.name);
        }
        Ok(())
    }
}

struct Resource {
    name: &'static str,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Disposable for Resource {
    fn dispose(&self) {
        self.calls.lock().push(format!("dispose:{}", self.name));
    }
}

pub struct Harness {
    pub scheduler: Arc<ManualScheduler>,
    pub clock: Arc<ManualClock>,
    pub owner: Arc<TestOwner>,
    pub catalog: Arc<ModuleCatalog>,
    pub sink: Arc<RecordingSink>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub timings: Arc<Mutex<Vec<Timing>>>,
    pub constructed: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let scheduler = Arc::new(ManualScheduler::new());
        let clock = scheduler.clock();
        let owner = Arc::new(TestOwner::default());
        owner.set(Some(OwnerId(1)));
        Self {
            scheduler,
            clock,
            owner,
            catalog: Arc::new(ModuleCatalog::new()),
            sink: Arc::new(RecordingSink::default()),
            calls: Arc::new(Mutex::new(Vec::new())),
            timings: Arc::new(Mutex::new(Vec::new())),
            constructed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config() -> RuntimeConfig {
        RuntimeConfig {
            host: HostInfo::new("test-host", "7.2.0"),
            ..RuntimeConfig::default()
        }
    }

    pub fn runtime(&self) -> Arc<Bootstrapper> {
        self.runtime_with(Self::config())
    }

    pub fn runtime_with(&self, config: RuntimeConfig) -> Arc<Bootstrapper> {
        let sink = self.sink.clone();
        let host = HostServices::new(
            self.owner.clone(),
            self.scheduler.clone(),
            self.catalog.clone(),
        )
        .with_clock(self.clock.clone())
        .with_error_sink(move |_| Ok(sink.clone() as Arc<dyn ErrorSink>));
        Bootstrapper::new(config, host)
    }

    pub fn export(&self, spec: TestPlugin) -> PluginExport {
        let mut metadata = PluginMetadata::new(spec.name, spec.priority).with_menu(spec.menu);
        if let Some((major, minor, patch)) = spec.min_host {
            metadata = metadata.requires_host(major, minor, patch);
        }

        let clock = self.clock.clone();
        let calls = self.calls.clone();
        let timings = self.timings.clone();
        let constructed = self.constructed.clone();
        PluginExport::new(metadata, move |container: &Container| {
            // Every plugin may depend on the orchestrator and its session.
            container.get::<Bootstrapper>()?;
            container.get::<modhost_core::SessionContext>()?;
            constructed.fetch_add(1, Ordering::SeqCst);

            if spec.owns_resource {
                container.own(
                    "resource",
                    Arc::new(Resource {
                        name: spec.name,
                        calls: calls.clone(),
                    }),
                )?;
            }

            Ok(Arc::new(Recorded {
                spec: spec.clone(),
                clock: clock.clone(),
                calls: calls.clone(),
                timings: timings.clone(),
            }) as Arc<dyn Plugin>)
        })
    }

    pub fn register(&self, module: &str, plugins: Vec<TestPlugin>) {
        let exports = plugins.into_iter().map(|spec| self.export(spec)).collect();
        self.catalog
            .register_module(ModuleDefinition::with_exports(module, exports));
    }

    pub fn frames(&self, count: usize) {
        self.scheduler.run_frames(count, FRAME);
    }

    /// Run whole frames until `done` holds. Panics after `max` frames.
    pub fn run_until(&self, max: usize, mut done: impl FnMut() -> bool) {
        for _ in 0..max {
            if done() {
                return;
            }
            self.frames(1);
        }
        assert!(done(), "condition not reached within {} frames", max);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn activated(&self, name: &str) -> bool {
        self.calls().iter().any(|call| call == &format!("+{}", name))
    }

    pub fn timing(&self, name: &str) -> Option<Timing> {
        self.timings.lock().iter().find(|timing| timing.name == name).cloned()
    }
}
