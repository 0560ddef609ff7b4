use std::sync::Arc;
use std::time::Duration;

use modhost_core::{
    Bootstrapper, Container, HostServices, ModuleCatalog, ModuleDefinition, OrchestratorState,
    OwnerId, OwnerSignal, Plugin, PluginExport, PluginMetadata, RuntimeConfig, TokioScheduler,
};
use parking_lot::Mutex;
use tokio::time;

struct AlwaysOwner;

impl OwnerSignal for AlwaysOwner {
    fn current_owner(&self) -> Option<OwnerId> {
        Some(OwnerId(42))
    }
}

struct Sleepy {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl Plugin for Sleepy {
    fn activate(&self) -> anyhow::Result<()> {
        std::thread::sleep(Duration::from_millis(15));
        self.log.lock().push(format!("+{}", self.name));
        Ok(())
    }

    fn deactivate(&self) -> anyhow::Result<()> {
        self.log.lock().push(format!("-{}", self.name));
        Ok(())
    }
}

fn sleepy(name: &str, priority: i32, log: &Arc<Mutex<Vec<String>>>) -> PluginExport {
    let name = name.to_string();
    let log = log.clone();
    PluginExport::new(PluginMetadata::new(name.clone(), priority), move |_: &Container| {
        Ok(Arc::new(Sleepy {
            name: name.clone(),
            log: log.clone(),
        }) as Arc<dyn Plugin>)
    })
}

#[tokio::test]
async fn test_full_lifecycle_on_tokio_scheduler() {
    // Create a fast-ticking scheduler and a compressed slicing policy
    let (scheduler, driver) = TokioScheduler::spawn(Duration::from_millis(2));
    let log = Arc::new(Mutex::new(Vec::new()));
    let catalog = Arc::new(ModuleCatalog::new());
    catalog.register_module(ModuleDefinition::with_exports(
        "demo",
        vec![sleepy("c", 3, &log), sleepy("a", 1, &log), sleepy("b", 2, &log)],
    ));

    let config = RuntimeConfig {
        slice_threshold_ms: 20,
        slice_pause_ms: 10,
        activation_delay_ms: 5,
        tick_interval_ms: 2,
        ..RuntimeConfig::default()
    };
    let host = HostServices::new(Arc::new(AlwaysOwner), scheduler.clone(), catalog);
    let runtime = Bootstrapper::new(config, host);

    // Activate and wait for every plugin
    runtime.on_activated();
    time::timeout(Duration::from_secs(5), async {
        while runtime.active_plugins().len() < 3 {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("plugins did not activate in time");

    assert_eq!(runtime.state(), OrchestratorState::Running);
    assert_eq!(*log.lock(), vec!["+a", "+b", "+c"]);

    // Shut down
    runtime.on_deactivated();
    assert_eq!(runtime.state(), OrchestratorState::Idle);
    assert_eq!(log.lock()[3..], ["-c", "-b", "-a"].map(String::from));

    scheduler.stop();
    driver.await.unwrap();
}
