//! Device hook registry
//!
//! Tracks which devices have (or should have) a packet interception hook
//! per offload table. Entries are created by admission and consumed by
//! the garbage collector, which installs pending hooks and removes hooks
//! no flow references anymore.
//!
//! A single mutex guards both tables' entry lists. Every method takes it
//! briefly and never calls out while holding it; callers that need to
//! perform blocking hook installation or teardown loop over
//! `claim_unregistered` / `take_removable`, acting between acquisitions.

use crate::device::NetDevice;
use crate::offload::table::TableKind;
use crate::types::NetnsId;
use std::sync::Mutex;

/// Priority at which device hooks are installed
pub const HOOK_PRIORITY: i32 = 10;

/// One device hook, present or pending, for one table
#[derive(Debug, Clone)]
pub struct HookEntry {
    pub ifindex: u32,
    pub netns: NetnsId,
    /// Hook has actually been installed on the device
    pub registered: bool,
    /// A flow referenced this device during the last GC scan
    pub used: bool,
}

/// Registry of device hooks for both offload tables
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: Mutex<[Vec<HookEntry>; 2]>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure an entry exists for the device in the given table.
    ///
    /// Returns true if a new entry was created; the caller must then kick
    /// the table's garbage collector to install it. An existing entry is
    /// marked used so the next sweep keeps it.
    pub fn ensure(&self, kind: TableKind, dev: &NetDevice) -> bool {
        let mut hooks = self.hooks.lock().unwrap();
        let list = &mut hooks[kind.index()];

        if let Some(entry) = list
            .iter_mut()
            .find(|h| h.ifindex == dev.ifindex && h.netns == dev.netns)
        {
            entry.used = true;
            return false;
        }

        list.push(HookEntry {
            ifindex: dev.ifindex,
            netns: dev.netns,
            registered: false,
            used: true,
        });
        true
    }

    /// Claim one entry that has not been installed yet, marking it
    /// registered. The caller performs the installation outside the lock.
    pub fn claim_unregistered(&self, kind: TableKind) -> Option<(u32, NetnsId)> {
        let mut hooks = self.hooks.lock().unwrap();
        let entry = hooks[kind.index()].iter_mut().find(|h| !h.registered)?;
        entry.registered = true;
        Some((entry.ifindex, entry.netns))
    }

    /// Reset the used marker on every entry ahead of a flow scan
    pub fn clear_used(&self, kind: TableKind) {
        let mut hooks = self.hooks.lock().unwrap();
        for entry in &mut hooks[kind.index()] {
            entry.used = false;
        }
    }

    /// Mark the entries for a flow's two ingress devices as used
    pub fn mark_used_for_flow(&self, kind: TableKind, ifindex0: u32, ifindex1: u32) {
        let mut hooks = self.hooks.lock().unwrap();
        for entry in &mut hooks[kind.index()] {
            if entry.ifindex == ifindex0 || entry.ifindex == ifindex1 {
                entry.used = true;
            }
        }
    }

    /// Remove and return one installed entry no flow references.
    ///
    /// Entries still pending installation are never removed here; they
    /// must be installed first so teardown has something to undo.
    pub fn take_removable(&self, kind: TableKind) -> Option<HookEntry> {
        let mut hooks = self.hooks.lock().unwrap();
        let list = &mut hooks[kind.index()];
        let pos = list.iter().position(|h| h.registered && !h.used)?;
        Some(list.swap_remove(pos))
    }

    /// Remove every entry for a departing device, across both tables,
    /// under a single lock acquisition. Teardown happens at the caller
    /// after the lock is released.
    pub fn detach_device(&self, ifindex: u32) -> Vec<(TableKind, HookEntry)> {
        let mut hooks = self.hooks.lock().unwrap();
        let mut detached = Vec::new();
        for kind in TableKind::ALL {
            let list = &mut hooks[kind.index()];
            let mut i = 0;
            while i < list.len() {
                if list[i].ifindex == ifindex {
                    detached.push((kind, list.swap_remove(i)));
                } else {
                    i += 1;
                }
            }
        }
        detached
    }

    /// Whether the table still has any hook entries
    pub fn any_active(&self, kind: TableKind) -> bool {
        !self.hooks.lock().unwrap()[kind.index()].is_empty()
    }

    pub fn count(&self, kind: TableKind) -> usize {
        self.hooks.lock().unwrap()[kind.index()].len()
    }
}
