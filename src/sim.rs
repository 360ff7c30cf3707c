//! In-memory collaborators for tests and demos
//!
//! Small hash-map backed implementations of the device, route, neighbor,
//! hook, and flow table interfaces. They behave like their real
//! counterparts as far as the offload path can observe, and the hook and
//! hardware implementations record every call so tests can assert on
//! install and teardown ordering.

use crate::device::{
    Devices, DstEntry, HardwareOffload, HookInstaller, LinkType, NeighborLookup, NeighborState,
    NetDevice, PathKind, PathSegment, PathStack, RouteKey, RouteLookup,
};
use crate::offload::{Flow, FlowTable, FlowTableProvider, InsertError, TableKind};
use crate::types::{Direction, MacAddr, NetnsId};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, RwLock};

/// Simulated device registry with per-device forwarding paths
#[derive(Default)]
pub struct SimNet {
    devices: RwLock<HashMap<u32, Arc<NetDevice>>>,
    paths: RwLock<HashMap<u32, PathStack>>,
}

impl SimNet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, dev: NetDevice) -> Arc<NetDevice> {
        let dev = Arc::new(dev);
        self.devices
            .write()
            .unwrap()
            .insert(dev.ifindex, dev.clone());
        dev
    }

    pub fn add_ethernet(&self, ifindex: u32, name: &str, mac: MacAddr) -> Arc<NetDevice> {
        self.add_device(NetDevice {
            ifindex,
            name: name.to_string(),
            netns: 0,
            link_type: LinkType::Ethernet,
            mac,
        })
    }

    pub fn remove_device(&self, ifindex: u32) {
        self.devices.write().unwrap().remove(&ifindex);
        self.paths.write().unwrap().remove(&ifindex);
    }

    pub fn set_forward_path(&self, ifindex: u32, stack: PathStack) {
        self.paths.write().unwrap().insert(ifindex, stack);
    }
}

impl Devices for SimNet {
    fn get(&self, ifindex: u32) -> Option<Arc<NetDevice>> {
        self.devices.read().unwrap().get(&ifindex).cloned()
    }

    fn forward_path(&self, ifindex: u32, _dst_mac: MacAddr) -> Option<PathStack> {
        if let Some(stack) = self.paths.read().unwrap().get(&ifindex) {
            return Some(stack.clone());
        }
        // Devices without a configured path report themselves as the
        // only segment, like a plain physical device does
        let dev = self.devices.read().unwrap().get(&ifindex).cloned()?;
        Some(PathStack {
            segments: vec![PathSegment {
                dev,
                kind: PathKind::Ethernet,
            }],
        })
    }
}

/// Simulated routing table keyed by destination address, optionally
/// scoped to a source address
#[derive(Default)]
pub struct SimRoutes {
    routes: RwLock<HashMap<IpAddr, (Option<IpAddr>, Arc<DstEntry>)>>,
}

impl SimRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, daddr: IpAddr, ifindex: u32, xfrm: bool) {
        self.routes
            .write()
            .unwrap()
            .insert(daddr, (None, Arc::new(DstEntry { ifindex, xfrm })));
    }

    /// Add a route that only matches lookups carrying this source hint
    pub fn add_for_src(&self, daddr: IpAddr, saddr: IpAddr, ifindex: u32, xfrm: bool) {
        self.routes.write().unwrap().insert(
            daddr,
            (Some(saddr), Arc::new(DstEntry { ifindex, xfrm })),
        );
    }

    pub fn clear(&self) {
        self.routes.write().unwrap().clear();
    }
}

impl RouteLookup for SimRoutes {
    fn lookup(&self, key: &RouteKey) -> Option<Arc<DstEntry>> {
        let routes = self.routes.read().unwrap();
        let (required_src, dst) = routes.get(&key.daddr)?;
        if required_src.is_some() && key.saddr != *required_src {
            return None;
        }
        Some(dst.clone())
    }
}

/// Simulated neighbor cache keyed by next-hop address
#[derive(Default)]
pub struct SimNeighbors {
    neighbors: RwLock<HashMap<IpAddr, (MacAddr, NeighborState)>>,
}

impl SimNeighbors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, addr: IpAddr, mac: MacAddr, state: NeighborState) {
        self.neighbors.write().unwrap().insert(addr, (mac, state));
    }
}

impl NeighborLookup for SimNeighbors {
    fn lookup(&self, _dst: &DstEntry, daddr: IpAddr) -> Option<(MacAddr, NeighborState)> {
        self.neighbors.read().unwrap().get(&daddr).copied()
    }
}

/// Vec-backed flow table
pub struct MemFlowTable {
    flows: Mutex<Vec<Flow>>,
    capacity: Option<usize>,
}

impl MemFlowTable {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            flows: Mutex::new(Vec::new()),
            capacity,
        }
    }
}

impl FlowTable for MemFlowTable {
    fn insert(&self, flow: Flow) -> Result<(), InsertError> {
        let mut flows = self.flows.lock().unwrap();
        if flows
            .iter()
            .any(|f| f.tuple(Direction::Original) == flow.tuple(Direction::Original))
        {
            return Err(InsertError::Duplicate);
        }
        if self.capacity.is_some_and(|cap| flows.len() >= cap) {
            return Err(InsertError::Full);
        }
        flows.push(flow);
        Ok(())
    }

    fn for_each(&self, f: &mut dyn FnMut(&Flow)) {
        for flow in self.flows.lock().unwrap().iter() {
            f(flow);
        }
    }

    fn purge_device(&self, ifindex: u32) -> usize {
        let mut flows = self.flows.lock().unwrap();
        let before = flows.len();
        flows.retain(|flow| {
            let references = [Direction::Original, Direction::Reply].iter().any(|&dir| {
                flow.ingress_ifindex(dir) == ifindex || flow.egress_ifindex(dir) == ifindex
            });
            if references {
                flow.conn().clear_offload();
            }
            !references
        });
        before - flows.len()
    }

    fn len(&self) -> usize {
        self.flows.lock().unwrap().len()
    }
}

/// Provider handing out `MemFlowTable` engines
#[derive(Default)]
pub struct MemFlowTables {
    pub capacity: Option<usize>,
    /// Fail hardware table creation, for bring-up rollback tests
    pub fail_hardware: bool,
}

impl MemFlowTables {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlowTableProvider for MemFlowTables {
    fn create(&self, kind: TableKind) -> crate::Result<Arc<dyn FlowTable>> {
        if kind.is_hardware() && self.fail_hardware {
            return Err(crate::Error::TableSetup(
                "hardware flow table unavailable".to_string(),
            ));
        }
        Ok(Arc::new(MemFlowTable::new(self.capacity)))
    }
}

/// One recorded hook installer call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Install {
        netns: NetnsId,
        ifindex: u32,
        priority: i32,
    },
    Uninstall {
        netns: NetnsId,
        ifindex: u32,
    },
}

/// Hook installer that records every call
#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn installs(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, HookEvent::Install { .. }))
            .count()
    }

    pub fn uninstalls(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, HookEvent::Uninstall { .. }))
            .count()
    }
}

impl HookInstaller for RecordingHooks {
    fn install(&self, netns: NetnsId, ifindex: u32, priority: i32) {
        self.events.lock().unwrap().push(HookEvent::Install {
            netns,
            ifindex,
            priority,
        });
    }

    fn uninstall(&self, netns: NetnsId, ifindex: u32) {
        self.events
            .lock()
            .unwrap()
            .push(HookEvent::Uninstall { netns, ifindex });
    }
}

/// One recorded hardware offload call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwEvent {
    Bind(u32),
    Unbind(u32),
}

/// Hardware offload callback that records every call
#[derive(Default)]
pub struct RecordingHw {
    events: Mutex<Vec<HwEvent>>,
}

impl RecordingHw {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HwEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl HardwareOffload for RecordingHw {
    fn bind(&self, ifindex: u32) {
        self.events.lock().unwrap().push(HwEvent::Bind(ifindex));
    }

    fn unbind(&self, ifindex: u32) {
        self.events.lock().unwrap().push(HwEvent::Unbind(ifindex));
    }
}
