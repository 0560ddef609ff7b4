//! Activation and deactivation passes over a set of plugins.

use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{PluginContainer, PluginKey};
use crate::clock::Clock;
use crate::container::Container;
use crate::error::PluginError;
use crate::scheduler::{drive_sliced, Scheduler, SlicePolicy, SliceReport, SlicedBatch};

/// Receives every isolated plugin failure after it has been logged.
pub type FailureReporter = Arc<dyn Fn(&PluginError) + Send + Sync>;

/// Plugins an activation pass should attempt, ascending by priority.
///
/// The sort is stable, so equal priorities keep discovery order.
pub fn activation_order(plugins: &[Arc<PluginContainer>]) -> Vec<Arc<PluginContainer>> {
    let mut eligible: Vec<Arc<PluginContainer>> = plugins
        .iter()
        .filter(|plugin| plugin.is_eligible())
        .cloned()
        .collect();
    eligible.sort_by_key(|plugin| plugin.priority());
    eligible
}

/// Active plugins, newest completed activation first.
pub fn deactivation_order(plugins: &[Arc<PluginContainer>]) -> Vec<Arc<PluginContainer>> {
    let mut active: Vec<Arc<PluginContainer>> = plugins
        .iter()
        .filter(|plugin| plugin.is_active())
        .cloned()
        .collect();
    active.sort_by_key(|plugin| std::cmp::Reverse(plugin.activation_seq()));
    active
}

/// Activate one plugin, logging and reporting any failure instead of returning it.
pub fn activate_isolated(
    plugin: &PluginContainer,
    container: &Container,
    clock: &dyn Clock,
    report: &FailureReporter,
) -> bool {
    let started = clock.now();
    let result = plugin.activate(container);
    let elapsed_ms = clock.now().saturating_duration_since(started).as_millis() as u64;

    match result {
        Ok(()) => {
            info!(
                plugin = %plugin.key(),
                priority = plugin.priority(),
                elapsed_ms,
                "Plugin activated"
            );
            true
        }
        Err(PluginError::SessionEnded(key)) => {
            info!(plugin = %key, elapsed_ms, "Session ended during activation; plugin unwound");
            false
        }
        Err(err) => {
            error!(plugin = %plugin.key(), elapsed_ms, error = %err, "Plugin activation failed");
            report(&err);
            false
        }
    }
}

/// Deactivate every active plugin in reverse completed-activation order.
///
/// A failing plugin is still marked deactivated and the pass continues.
/// Returns the keys in the order they were deactivated.
pub fn deactivate_all(
    plugins: &[Arc<PluginContainer>],
    report: &FailureReporter,
) -> Vec<PluginKey> {
    let ordered = deactivation_order(plugins);
    let mut order = Vec::with_capacity(ordered.len());

    for plugin in ordered {
        match plugin.deactivate() {
            Ok(()) => info!(plugin = %plugin.key(), "Plugin deactivated"),
            Err(err) => {
                warn!(plugin = %plugin.key(), error = %err, "Plugin deactivation failed");
                report(&err);
            }
        }
        order.push(plugin.key().clone());
    }

    order
}

/// Activate `plugins` as a time-sliced background batch.
///
/// `keep_going` is checked before every item; once it returns `false` the
/// batch stops without touching further plugins. `done` runs when the batch
/// finishes or stops.
pub fn activate_sliced<K, D>(
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    policy: SlicePolicy,
    container: Arc<Container>,
    plugins: Vec<Arc<PluginContainer>>,
    keep_going: K,
    report: FailureReporter,
    done: D,
) where
    K: Fn() -> bool + Send + 'static,
    D: FnOnce(SliceReport) + Send + 'static,
{
    let ordered = activation_order(&plugins);
    debug!(plugins = ordered.len(), "Starting activation batch");

    let batch = SlicedBatch::new(ordered, policy, clock.clone());
    drive_sliced(
        scheduler,
        batch,
        move |plugin: &Arc<PluginContainer>| {
            if !keep_going() {
                return ControlFlow::Break(());
            }
            // A plugin may have been attempted through another path meanwhile.
            if plugin.is_eligible() {
                activate_isolated(plugin, &container, clock.as_ref(), &report);
            }
            ControlFlow::Continue(())
        },
        done,
    );
}
