//! Offload table pair and top-level state
//!
//! `Offload` owns one software and one hardware table, the shared hook
//! registry, and the collaborator handles everything else in the module
//! works through. Construction brings the tables up in order and rolls
//! back on failure; each table gets its own garbage-collector task.

use crate::config::OffloadConfig;
use crate::device::{Devices, HardwareOffload, HookInstaller, NetDevice, NeighborLookup, RouteLookup};
use crate::offload::flow::FlowTable;
use crate::offload::gc::GcTimer;
use crate::offload::hooks::HookRegistry;
use crate::telemetry::OffloadMetrics;
use crate::types::NetnsId;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::task::JoinHandle;

/// Which of the two offload tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Software,
    Hardware,
}

impl TableKind {
    pub const ALL: [TableKind; 2] = [TableKind::Software, TableKind::Hardware];

    pub fn index(self) -> usize {
        match self {
            TableKind::Software => 0,
            TableKind::Hardware => 1,
        }
    }

    pub fn is_hardware(self) -> bool {
        self == TableKind::Hardware
    }
}

/// One offload table: the flow engine plus its GC state
pub struct OffloadTable {
    kind: TableKind,
    flows: Arc<dyn FlowTable>,
    /// Namespace the table serves, bound lazily by the first admission
    netns: OnceLock<NetnsId>,
    pub(crate) gc_timer: GcTimer,
    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl OffloadTable {
    fn new(kind: TableKind, flows: Arc<dyn FlowTable>) -> Self {
        Self {
            kind,
            flows,
            netns: OnceLock::new(),
            gc_timer: GcTimer::new(),
            gc_task: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn flows(&self) -> &Arc<dyn FlowTable> {
        &self.flows
    }

    /// Bind the table to a namespace if it is not bound yet
    pub fn bind_netns(&self, netns: NetnsId) {
        let _ = self.netns.set(netns);
    }

    pub fn bound_netns(&self) -> Option<NetnsId> {
        self.netns.get().copied()
    }
}

/// Flow table engine factory, one engine per table
pub trait FlowTableProvider {
    fn create(&self, kind: TableKind) -> crate::Result<Arc<dyn FlowTable>>;
}

/// Collaborators the offload path reads from and calls out to
pub struct OffloadDeps {
    pub devices: Arc<dyn Devices>,
    pub routes: Arc<dyn RouteLookup>,
    pub neighbors: Arc<dyn NeighborLookup>,
    pub installer: Arc<dyn HookInstaller>,
    pub hardware: Arc<dyn HardwareOffload>,
}

/// Top-level offload state
pub struct Offload {
    tables: [OffloadTable; 2],
    pub(crate) hooks: HookRegistry,
    pub(crate) deps: OffloadDeps,
    pub(crate) metrics: Arc<OffloadMetrics>,
    pub(crate) config: OffloadConfig,
}

impl Offload {
    /// Bring up both tables. If the hardware table fails, the software
    /// table is torn down again before the error is returned.
    pub fn new(
        config: OffloadConfig,
        deps: OffloadDeps,
        provider: &dyn FlowTableProvider,
    ) -> crate::Result<Self> {
        let software = provider.create(TableKind::Software)?;
        let hardware = match provider.create(TableKind::Hardware) {
            Ok(flows) => flows,
            Err(e) => {
                drop(software);
                return Err(e);
            }
        };

        Ok(Self {
            tables: [
                OffloadTable::new(TableKind::Software, software),
                OffloadTable::new(TableKind::Hardware, hardware),
            ],
            hooks: HookRegistry::new(),
            deps,
            metrics: Arc::new(OffloadMetrics::new()),
            config,
        })
    }

    pub fn table(&self, kind: TableKind) -> &OffloadTable {
        &self.tables[kind.index()]
    }

    pub fn metrics(&self) -> &Arc<OffloadMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    /// Spawn the garbage-collector task for each table
    pub fn start(self: &Arc<Self>) {
        for kind in TableKind::ALL {
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move { this.gc_task(kind).await });
            *self.table(kind).gc_task.lock().unwrap() = Some(handle);
        }
    }

    /// Stop the garbage-collector tasks
    pub fn shutdown(&self) {
        for kind in TableKind::ALL {
            if let Some(handle) = self.table(kind).gc_task.lock().unwrap().take() {
                handle.abort();
            }
        }
    }

    /// Make sure the device has a hook entry in the given table, kicking
    /// the collector when a new one appears.
    pub(crate) fn ensure_hook(&self, kind: TableKind, dev: &NetDevice) {
        if self.hooks.ensure(kind, dev) {
            self.table(kind).gc_timer.kick();
        }
    }
}
