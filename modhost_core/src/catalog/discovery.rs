use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{ModuleId, PluginExport};
use crate::clock::Clock;
use crate::config::HostInfo;
use crate::container::{Container, Export};
use crate::error::ContainerError;
use crate::guard;
use crate::plugin::{Admission, Plugin, PluginContainer, PluginMetadata, PluginSet};
use crate::scheduler::{drive_sliced, Scheduler, SliceOutcome, SlicePolicy, SlicedBatch};

/// Counts from one discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub added: usize,
    pub excluded: usize,
    pub duplicates: usize,
    pub slices: u32,
    pub stopped: bool,
}

/// Add a module's exports to the session container as lazy, metadata-tagged candidates.
pub fn register_exports(
    container: &Container,
    module: &ModuleId,
    exports: Vec<PluginExport>,
) -> Result<Vec<Export<dyn Plugin, PluginMetadata>>, ContainerError> {
    exports
        .into_iter()
        .map(|export| {
            let factory = export.factory;
            container.add_export::<dyn Plugin, PluginMetadata, _>(
                module.as_str(),
                export.metadata,
                move |c| factory(c),
            )
        })
        .collect()
}

/// Filter candidates one by one, without slicing. Used for module arrivals.
pub fn admit_exports(
    candidates: Vec<Export<dyn Plugin, PluginMetadata>>,
    host: &HostInfo,
    plugins: &PluginSet,
) -> (Vec<Arc<PluginContainer>>, DiscoveryReport) {
    let mut report = DiscoveryReport::default();
    let added = candidates
        .into_iter()
        .filter_map(|candidate| admit_one(candidate, host, plugins, &mut report))
        .collect();
    (added, report)
}

/// Filter the initial candidate set as a time-sliced batch.
///
/// `done` receives the pass totals once the last candidate was handled or
/// `keep_going` returned `false`.
pub fn discover_sliced<K, D>(
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    policy: SlicePolicy,
    host: HostInfo,
    candidates: Vec<Export<dyn Plugin, PluginMetadata>>,
    plugins: Arc<PluginSet>,
    keep_going: K,
    done: D,
) where
    K: Fn() -> bool + Send + 'static,
    D: FnOnce(DiscoveryReport) + Send + 'static,
{
    debug!(candidates = candidates.len(), "Starting discovery");
    let totals = Arc::new(Mutex::new(DiscoveryReport::default()));
    let step_totals = totals.clone();

    drive_sliced(
        scheduler,
        SlicedBatch::new(candidates, policy, clock),
        move |candidate: &Export<dyn Plugin, PluginMetadata>| {
            if !keep_going() {
                return ControlFlow::Break(());
            }
            admit_one(candidate.clone(), &host, &plugins, &mut step_totals.lock());
            ControlFlow::Continue(())
        },
        move |slices| {
            let mut report = *totals.lock();
            report.slices = slices.slices;
            report.stopped = slices.outcome == SliceOutcome::Stopped;
            info!(
                added = report.added,
                excluded = report.excluded,
                slices = report.slices,
                stopped = report.stopped,
                "Discovery finished"
            );
            done(report);
        },
    );
}

fn admit_one(
    candidate: Export<dyn Plugin, PluginMetadata>,
    host: &HostInfo,
    plugins: &PluginSet,
    report: &mut DiscoveryReport,
) -> Option<Arc<PluginContainer>> {
    let name = candidate.metadata().name.clone();
    let module = candidate.origin().to_string();

    // A panicking predicate counts as incompatible.
    let compatible =
        guard::isolate(|| Ok(candidate.metadata().is_compatible(host))).unwrap_or(false);

    match plugins.admit(candidate, compatible) {
        Admission::Added(plugin) => {
            debug!(plugin = %plugin.key(), priority = plugin.priority(), "Plugin discovered");
            report.added += 1;
            Some(plugin)
        }
        Admission::Excluded => {
            warn!(
                module = %module,
                plugin = %name,
                host_version = %host.version,
                "Plugin is not compatible with this host, excluded for the session"
            );
            report.excluded += 1;
            None
        }
        Admission::Known => {
            debug!(module = %module, plugin = %name, "Plugin already known, skipping");
            report.duplicates += 1;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use std::time::Duration;

    struct Noop;

    impl Plugin for Noop {
        fn activate(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn deactivate(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn export(metadata: PluginMetadata) -> PluginExport {
        PluginExport::new(metadata, |_| Ok(Arc::new(Noop) as Arc<dyn Plugin>))
    }

    #[test]
    fn test_incompatible_plugins_are_excluded() {
        let container = Container::new();
        let plugins = PluginSet::new();
        let host = HostInfo::new("game", "7.1.0");

        let candidates = register_exports(
            &container,
            &ModuleId::from("m"),
            vec![
                export(PluginMetadata::new("a", 1)),
                export(PluginMetadata::new("b", 2).requires_host(8, 0, 0)),
                export(PluginMetadata::new("c", 3).with_compatibility(|_| panic!("bad predicate"))),
            ],
        )
        .unwrap();

        let (added, report) = admit_exports(candidates, &host, &plugins);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].name(), "a");
        assert_eq!(report.excluded, 2);
        assert_eq!(plugins.excluded().len(), 2);
    }

    #[test]
    fn test_reannounced_exports_are_duplicates() {
        let container = Container::new();
        let plugins = PluginSet::new();
        let host = HostInfo::default();
        let module = ModuleId::from("m");

        let same = || vec![export(PluginMetadata::new("a", 1))];
        let first = register_exports(&container, &module, same()).unwrap();
        let second = register_exports(&container, &module, same()).unwrap();

        assert_eq!(admit_exports(first, &host, &plugins).1.added, 1);
        let (added, report) = admit_exports(second, &host, &plugins);
        assert!(added.is_empty());
        assert_eq!(report.duplicates, 1);
        assert_eq!(plugins.len(), 1);
    }

    #[test]
    fn test_discovery_is_time_sliced() {
        let scheduler = Arc::new(ManualScheduler::new());
        let clock = scheduler.clock();
        let container = Container::new();
        let plugins = Arc::new(PluginSet::new());

        // Each compatibility check costs 40ms of host time.
        let exports: Vec<PluginExport> = (0..4)
            .map(|i| {
                let clock = clock.clone();
                export(PluginMetadata::new(format!("p{}", i), i).with_compatibility(move |_| {
                    clock.advance(Duration::from_millis(40));
                    true
                }))
            })
            .collect();
        let candidates = register_exports(&container, &ModuleId::from("m"), exports).unwrap();

        let result = Arc::new(Mutex::new(None));
        let sink = result.clone();
        discover_sliced(
            scheduler.clone(),
            clock.clone() as Arc<dyn Clock>,
            SlicePolicy::new(Duration::from_millis(50), Duration::from_millis(10)),
            HostInfo::default(),
            candidates,
            plugins.clone(),
            || true,
            move |report| *sink.lock() = Some(report),
        );

        assert_eq!(plugins.len(), 2);
        assert!(result.lock().is_none());

        scheduler.advance(Duration::from_millis(10));
        assert_eq!(plugins.len(), 4);
        let report = result.lock().unwrap();
        assert_eq!(report.added, 4);
        assert_eq!(report.slices, 2);
        assert!(!report.stopped);
    }
}
