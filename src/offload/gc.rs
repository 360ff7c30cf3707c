//! Hook garbage collection
//!
//! Each table runs one collector task. A cycle installs pending hooks,
//! rescans flows to find which devices are still referenced, and removes
//! installed hooks nothing references. The timer mirrors delayed-work
//! scheduling: `kick` runs a cycle immediately, and a finished cycle
//! re-arms itself only while hooks remain.

use crate::offload::hooks::HOOK_PRIORITY;
use crate::offload::table::{Offload, TableKind};
use crate::types::Direction;
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Delayed-work style trigger for one table's collector task.
///
/// At most one deadline is pending at a time: `kick` pulls it to now,
/// `arm_after` sets it only when none is pending.
#[derive(Debug, Default)]
pub struct GcTimer {
    deadline: Mutex<Option<Instant>>,
    notify: Notify,
}

impl GcTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the collector as soon as possible
    pub fn kick(&self) {
        *self.deadline.lock().unwrap() = Some(Instant::now());
        self.notify.notify_one();
    }

    /// Schedule a run after `delay` unless one is already pending
    pub fn arm_after(&self, delay: std::time::Duration) {
        let mut deadline = self.deadline.lock().unwrap();
        if deadline.is_none() {
            *deadline = Some(Instant::now() + delay);
            self.notify.notify_one();
        }
    }

    /// Wait until a pending deadline expires, consuming it
    pub async fn wait(&self) {
        loop {
            let pending = *self.deadline.lock().unwrap();
            match pending {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {
                            let mut deadline = self.deadline.lock().unwrap();
                            // A kick may have moved the deadline while
                            // sleeping; only consume it if it has passed.
                            if deadline.is_some_and(|d| d <= Instant::now()) {
                                *deadline = None;
                                return;
                            }
                        }
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }
}

impl Offload {
    /// One garbage-collection cycle for the given table.
    ///
    /// Returns whether the table still has hook entries, which decides
    /// whether the periodic timer is re-armed.
    pub fn run_gc_once(&self, kind: TableKind) -> bool {
        let table = self.table(kind);

        // Install hooks admission queued. Installation blocks, so each
        // claim happens under a fresh lock acquisition.
        while let Some((ifindex, netns)) = self.hooks.claim_unregistered(kind) {
            self.deps.installer.install(netns, ifindex, HOOK_PRIORITY);
            if kind.is_hardware() {
                self.deps.hardware.bind(ifindex);
            }
            self.metrics.hooks_installed.inc();
            debug!(table = ?kind, ifindex, "installed device hook");
        }

        // Rescan flows: a hook stays only while some flow still uses its
        // device for ingress.
        self.hooks.clear_used(kind);
        table.flows().for_each(&mut |flow| {
            self.hooks.mark_used_for_flow(
                kind,
                flow.ingress_ifindex(Direction::Original),
                flow.ingress_ifindex(Direction::Reply),
            );
        });

        while let Some(hook) = self.hooks.take_removable(kind) {
            if kind.is_hardware() {
                self.deps.hardware.unbind(hook.ifindex);
            }
            self.deps.installer.uninstall(hook.netns, hook.ifindex);
            self.metrics.hooks_removed.inc();
            debug!(table = ?kind, ifindex = hook.ifindex, "removed unused device hook");
        }

        self.metrics
            .active_hooks(kind)
            .set(self.hooks.count(kind) as u64);

        self.hooks.any_active(kind)
    }

    /// Collector task body, one per table
    pub(crate) async fn gc_task(&self, kind: TableKind) {
        loop {
            self.table(kind).gc_timer.wait().await;
            if self.run_gc_once(kind) {
                self.table(kind)
                    .gc_timer
                    .arm_after(self.config.gc_period());
            }
        }
    }
}
