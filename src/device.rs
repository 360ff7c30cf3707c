//! Device model and collaborator interfaces
//!
//! The offload path never owns network devices, routes, or neighbor
//! caches; it consumes them through the narrow traits defined here. The
//! `sim` module provides in-memory implementations for tests and demos.

use crate::types::{MacAddr, NetnsId};
use std::net::IpAddr;
use std::sync::Arc;

/// Link-layer type of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    Loopback,
    Ppp,
    Tunnel,
    Other,
}

/// Network device descriptor
///
/// Identity is the interface index; the offload path holds devices only
/// through `Arc` and never keeps one alive past a removal event.
#[derive(Debug, Clone)]
pub struct NetDevice {
    pub ifindex: u32,
    pub name: String,
    pub netns: NetnsId,
    pub link_type: LinkType,
    pub mac: MacAddr,
}

impl NetDevice {
    /// Whether packets can be emitted directly on this device: a
    /// non-loopback ethernet device with a usable hardware address.
    pub fn is_valid_ether(&self) -> bool {
        self.link_type == LinkType::Ethernet && self.mac.is_valid()
    }
}

/// How a bridge port treats VLAN tags on the forwarding path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeVlanMode {
    /// Port adds a tag on the way through
    Tag { id: u16, proto: u16 },
    /// Port strips the most recent tag
    Untag,
    /// Hardware strips the tag on ingress; the stack entry stays
    UntagHw,
    /// Tags pass through unchanged
    Keep,
}

/// One segment of a device forwarding path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathKind {
    /// Plain ethernet device, a concrete egress candidate
    Ethernet,
    /// 802.1Q tag the packet must carry
    Vlan { id: u16, proto: u16 },
    /// PPPoE session; `remote` is the access concentrator's address
    Pppoe { session: u16, proto: u16, remote: MacAddr },
    /// Bridge port with its VLAN handling mode
    Bridge(BridgeVlanMode),
    /// Anything the fast path cannot represent
    Unsupported,
}

/// Segment of a forwarding-path stack: the device at this layer plus how
/// the packet traverses it
#[derive(Debug, Clone)]
pub struct PathSegment {
    pub dev: Arc<NetDevice>,
    pub kind: PathKind,
}

/// Ordered sequence of segments a packet traverses from a logical device
/// down to its physical egress
#[derive(Debug, Clone, Default)]
pub struct PathStack {
    pub segments: Vec<PathSegment>,
}

impl PathStack {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Device registry view
pub trait Devices: Send + Sync {
    /// Look up a device by interface index
    fn get(&self, ifindex: u32) -> Option<Arc<NetDevice>>;

    /// Report the forwarding-path stack from the given device towards
    /// `dst_mac`. None means the path cannot be determined.
    fn forward_path(&self, ifindex: u32, dst_mac: MacAddr) -> Option<PathStack>;
}

/// Routing lookup key: destination address, optional source hint, and the
/// hinted egress interface
#[derive(Debug, Clone, Copy)]
pub struct RouteKey {
    pub daddr: IpAddr,
    pub saddr: Option<IpAddr>,
    pub oif: u32,
}

/// Cached result of a routing decision
#[derive(Debug, Clone)]
pub struct DstEntry {
    /// Output device of the route
    pub ifindex: u32,
    /// Destination requires tunnel (crypto transform) encapsulation
    pub xfrm: bool,
}

/// Routing table view
pub trait RouteLookup: Send + Sync {
    fn lookup(&self, key: &RouteKey) -> Option<Arc<DstEntry>>;
}

/// Neighbor entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborState {
    /// Address resolution in progress
    Incomplete,
    /// Recently confirmed reachability
    Reachable,
    /// Reachability unknown, will probe on next use
    Stale,
}

/// Neighbor cache view
pub trait NeighborLookup: Send + Sync {
    /// Resolve the next hop towards `daddr` via the given destination
    /// entry. Implementations take a brief internal lock and release it
    /// before returning.
    fn lookup(&self, dst: &DstEntry, daddr: IpAddr) -> Option<(MacAddr, NeighborState)>;
}

/// Device-level interception point management.
///
/// Both calls may block (they touch device state), so the offload path
/// never invokes them while holding its hooks lock.
pub trait HookInstaller: Send + Sync {
    fn install(&self, netns: NetnsId, ifindex: u32, priority: i32);
    fn uninstall(&self, netns: NetnsId, ifindex: u32);
}

/// Hardware offload bind/unbind callback for the hardware table.
///
/// May block; called outside the hooks lock.
pub trait HardwareOffload: Send + Sync {
    fn bind(&self, ifindex: u32);
    fn unbind(&self, ifindex: u32);
}
