//! Device lifecycle events
//!
//! A departing device must lose its hooks and every flow that references
//! it before the device identity can be reused. Hook entries for the
//! device are unlinked from both tables under one lock acquisition, then
//! torn down outside it, so a concurrent GC cycle cannot tear the same
//! hook down twice.

use crate::offload::table::{Offload, TableKind};
use tracing::{debug, info};

impl Offload {
    /// Handle removal of the device with the given interface index
    pub fn device_removed(&self, ifindex: u32) {
        let detached = self.hooks.detach_device(ifindex);
        for (kind, hook) in detached {
            // Entries admission queued but GC never installed have
            // nothing to undo on the device
            if hook.registered {
                if kind.is_hardware() {
                    self.deps.hardware.unbind(hook.ifindex);
                }
                self.deps.installer.uninstall(hook.netns, hook.ifindex);
            }
            self.metrics.hooks_removed.inc();
            self.metrics
                .active_hooks(kind)
                .set(self.hooks.count(kind) as u64);
            debug!(table = ?kind, ifindex, "detached hook for departing device");
        }

        let mut purged = 0;
        for kind in TableKind::ALL {
            purged += self.table(kind).flows().purge_device(ifindex);
        }
        if purged > 0 {
            self.metrics.flows_purged.add(purged as u64);
            info!(ifindex, purged, "purged flows for departing device");
        }
    }
}
