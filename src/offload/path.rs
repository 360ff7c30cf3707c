//! Forwarding-path resolver
//!
//! Computes, for each direction of a flow, the concrete output interface,
//! link-layer addressing, and the encapsulation layers (VLAN, PPPoE,
//! bridge) a packet must carry to reach its real egress device. The
//! resolver only reads cached state: a routing lookup, a neighbor-cache
//! read, and the device forwarding-path stack. Any failure leaves the
//! direction at neighbor transmit type, which the slow path handles.

use crate::conn::Connection;
use crate::device::{
    BridgeVlanMode, Devices, DstEntry, NeighborLookup, NeighborState, NetDevice, PathKind,
    RouteKey, RouteLookup,
};
use crate::types::{Direction, Family, MacAddr};
use std::sync::Arc;

/// Maximum number of encapsulation layers a flow can represent
pub const ENCAP_MAX: usize = 2;

/// How packets of one direction are emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmitType {
    /// Hand off to neighbor output; no precomputed link-layer state
    Neigh,
    /// Emit directly on the resolved device with precomputed addresses
    Direct,
    /// Destination requires a crypto transform; tunnel output handles it
    Xfrm,
}

/// One encapsulation layer: VLAN tag or PPPoE session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encap {
    pub id: u16,
    pub proto: u16,
}

/// Egress side of one direction
#[derive(Debug, Clone)]
pub struct RouteOutput {
    /// Interface packets are emitted on
    pub ifindex: u32,
    /// Physical device at the bottom of the forwarding path
    pub hw_ifindex: u32,
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
}

impl Default for RouteOutput {
    fn default() -> Self {
        Self {
            ifindex: 0,
            hw_ifindex: 0,
            src_mac: MacAddr::ZERO,
            dst_mac: MacAddr::ZERO,
        }
    }
}

/// Ingress side of one direction
#[derive(Debug, Clone, Default)]
pub struct RouteInput {
    /// Interface matching packets arrive on
    pub ifindex: u32,
    /// Encapsulation records to decode on receipt, outermost first
    pub encaps: Vec<Encap>,
    /// Bitmap of encap slots whose tag is stripped by hardware
    pub ingress_vlans: u8,
}

/// Per-direction forwarding descriptor
#[derive(Debug, Clone)]
pub struct RouteDir {
    /// Destination-cache reference from the routing lookup
    pub dst: Arc<DstEntry>,
    pub xmit: XmitType,
    pub out: RouteOutput,
    pub input: RouteInput,
}

/// Both directions' forwarding descriptors
#[derive(Debug, Clone)]
pub struct FlowRoute {
    dirs: [RouteDir; 2],
}

impl FlowRoute {
    pub fn dir(&self, dir: Direction) -> &RouteDir {
        &self.dirs[dir.index()]
    }

    fn dir_mut(&mut self, dir: Direction) -> &mut RouteDir {
        &mut self.dirs[dir.index()]
    }
}

/// Resolution failure: the routing lookup found no destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no route for {dir:?} direction")]
pub struct ResolveError {
    pub dir: Direction,
}

/// Collaborators the resolver reads from
pub struct ResolveCtx<'a> {
    pub devices: &'a dyn Devices,
    pub routes: &'a dyn RouteLookup,
    pub neighbors: &'a dyn NeighborLookup,
}

/// Resolve both directions of a flow.
///
/// `devs` is indexed by direction and holds the hinted egress device for
/// each direction on entry; the path walk replaces each entry with the
/// real egress device, which later hook maintenance must use.
pub fn resolve(
    ctx: &ResolveCtx<'_>,
    conn: &Connection,
    family: Family,
    dir: Direction,
    devs: &mut [Arc<NetDevice>; 2],
) -> Result<FlowRoute, ResolveError> {
    let first = route_dir(ctx, conn, family, dir, devs[dir.index()].ifindex)?;
    let second = route_dir(ctx, conn, family, dir.other(), devs[dir.other().index()].ifindex)?;

    let (original, reply) = match dir {
        Direction::Original => (first, second),
        Direction::Reply => (second, first),
    };
    let mut route = FlowRoute {
        dirs: [original, reply],
    };

    check_path(ctx, &mut route, conn, dir, devs);
    check_path(ctx, &mut route, conn, dir.other(), devs);

    Ok(route)
}

/// Routing lookup for one direction.
///
/// Keyed by the reverse direction's source address (where this
/// direction's packets are headed) and the hinted egress interface.
fn route_dir(
    ctx: &ResolveCtx<'_>,
    conn: &Connection,
    family: Family,
    dir: Direction,
    oif: u32,
) -> Result<RouteDir, ResolveError> {
    let reverse = conn.tuple(dir.other());
    let key = match family {
        Family::Ipv4 => RouteKey {
            daddr: reverse.src_ip,
            saddr: None,
            oif,
        },
        Family::Ipv6 => RouteKey {
            daddr: reverse.src_ip,
            saddr: Some(reverse.dst_ip),
            oif,
        },
    };

    let dst = ctx.routes.lookup(&key).ok_or(ResolveError { dir })?;
    let xmit = if dst.xfrm {
        XmitType::Xfrm
    } else {
        XmitType::Neigh
    };

    Ok(RouteDir {
        dst,
        xmit,
        out: RouteOutput::default(),
        input: RouteInput::default(),
    })
}

/// Resolve link-layer addressing and the encapsulation stack for one
/// direction, walking the egress device's forwarding path.
fn check_path(
    ctx: &ResolveCtx<'_>,
    route: &mut FlowRoute,
    conn: &Connection,
    dir: Direction,
    devs: &mut [Arc<NetDevice>; 2],
) {
    let dst = route.dir(dir).dst.clone();
    let daddr = conn.tuple(dir.other()).src_ip;

    route.dir_mut(dir.other()).input.ifindex = dst.ifindex;
    route.dir_mut(dir).out.ifindex = dst.ifindex;

    if route.dir(dir).xmit == XmitType::Xfrm {
        return;
    }

    let Some(mut dev) = ctx.devices.get(dst.ifindex) else {
        return;
    };
    if !dev.is_valid_ether() {
        return;
    }

    let Some((next_hop_mac, state)) = ctx.neighbors.lookup(&dst, daddr) else {
        return;
    };
    if state != NeighborState::Reachable {
        // Neighbor not currently valid: stay at neighbor transmit type
        // with no precomputed address.
        return;
    }
    route.dir_mut(dir).out.dst_mac = next_hop_mac;

    let Some(stack) = ctx.devices.forward_path(dev.ifindex, next_hop_mac) else {
        return;
    };
    if stack.is_empty() {
        return;
    }

    // Walk one index past the last reported segment; the sentinel index
    // yields no segment and terminates the walk.
    let mut last = false;
    for i in 0..=stack.len() {
        let Some(segment) = stack.segments.get(i) else {
            break;
        };
        dev = segment.dev.clone();

        if dev.is_valid_ether() {
            // The first concrete ethernet device on the path supplies
            // the source address and egress interface; deeper segments
            // only confirm direct transmission.
            if route.dir(dir).xmit != XmitType::Direct {
                route.dir_mut(dir).out.src_mac = dev.mac;
                route.dir_mut(dir).out.ifindex = dev.ifindex;
            }
            route.dir_mut(dir).xmit = XmitType::Direct;
        }

        let n_encaps = route.dir(dir.other()).input.encaps.len();
        match &segment.kind {
            PathKind::Vlan { id, proto } => {
                if n_encaps >= ENCAP_MAX {
                    last = true;
                } else {
                    route
                        .dir_mut(dir.other())
                        .input
                        .encaps
                        .push(Encap { id: *id, proto: *proto });
                }
            }
            PathKind::Pppoe {
                session,
                proto,
                remote,
            } => {
                if n_encaps >= ENCAP_MAX {
                    last = true;
                } else {
                    route.dir_mut(dir.other()).input.encaps.push(Encap {
                        id: *session,
                        proto: *proto,
                    });
                    // Packets must be addressed to the access concentrator
                    route.dir_mut(dir).out.dst_mac = *remote;
                }
            }
            PathKind::Bridge(mode) => match mode {
                BridgeVlanMode::Tag { id, proto } => {
                    if n_encaps >= ENCAP_MAX {
                        last = true;
                    } else {
                        route
                            .dir_mut(dir.other())
                            .input
                            .encaps
                            .push(Encap { id: *id, proto: *proto });
                    }
                }
                BridgeVlanMode::Untag => {
                    route.dir_mut(dir.other()).input.encaps.pop();
                }
                BridgeVlanMode::UntagHw => {
                    if n_encaps > 0 {
                        route.dir_mut(dir.other()).input.ingress_vlans |=
                            1 << (n_encaps - 1);
                    }
                }
                BridgeVlanMode::Keep => {}
            },
            PathKind::Ethernet | PathKind::Unsupported => {
                last = true;
            }
        }

        if last {
            break;
        }
    }

    // The deepest device visited is the physical egress for this
    // direction and the ingress for the other.
    devs[dir.other().index()] = dev.clone();
    route.dir_mut(dir).out.hw_ifindex = dev.ifindex;
    route.dir_mut(dir.other()).input.ifindex = dev.ifindex;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{ConnTuple, TransportProtocol};
    use crate::device::{LinkType, PathSegment, PathStack};
    use crate::sim::{SimNeighbors, SimNet, SimRoutes};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    const LAN_IF: u32 = 1;
    const WAN_IF: u32 = 2;

    fn client_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100))
    }

    fn server_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))
    }

    fn make_conn() -> Connection {
        Connection::new(
            ConnTuple::new(client_ip(), server_ip(), 12345, 443),
            TransportProtocol::Tcp,
        )
    }

    struct World {
        net: SimNet,
        routes: SimRoutes,
        neighbors: SimNeighbors,
    }

    impl World {
        fn new() -> Self {
            let net = SimNet::new();
            net.add_ethernet(LAN_IF, "lan0", MacAddr([0x02, 0, 0, 0, 0, 1]));
            net.add_ethernet(WAN_IF, "wan0", MacAddr([0x02, 0, 0, 0, 0, 2]));

            let routes = SimRoutes::new();
            routes.add(client_ip(), LAN_IF, false);
            routes.add(server_ip(), WAN_IF, false);

            let neighbors = SimNeighbors::new();
            neighbors.add(client_ip(), MacAddr([0x0a, 0, 0, 0, 0, 1]), NeighborState::Reachable);
            neighbors.add(server_ip(), MacAddr([0x0a, 0, 0, 0, 0, 2]), NeighborState::Reachable);

            Self {
                net,
                routes,
                neighbors,
            }
        }

        fn ctx(&self) -> ResolveCtx<'_> {
            ResolveCtx {
                devices: &self.net,
                routes: &self.routes,
                neighbors: &self.neighbors,
            }
        }

        fn devs(&self) -> [Arc<NetDevice>; 2] {
            // Original direction egresses on WAN, reply on LAN
            [self.net.get(WAN_IF).unwrap(), self.net.get(LAN_IF).unwrap()]
        }
    }

    #[test]
    fn test_resolve_direct_both_directions() {
        let world = World::new();
        let conn = make_conn();
        let mut devs = world.devs();

        let route = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap();

        let orig = route.dir(Direction::Original);
        assert_eq!(orig.xmit, XmitType::Direct);
        assert_eq!(orig.out.ifindex, WAN_IF);
        assert_eq!(orig.out.hw_ifindex, WAN_IF);
        assert_eq!(orig.out.src_mac, MacAddr([0x02, 0, 0, 0, 0, 2]));
        assert_eq!(orig.out.dst_mac, MacAddr([0x0a, 0, 0, 0, 0, 2]));
        assert_eq!(orig.input.ifindex, LAN_IF);

        let reply = route.dir(Direction::Reply);
        assert_eq!(reply.xmit, XmitType::Direct);
        assert_eq!(reply.out.ifindex, LAN_IF);
        assert_eq!(reply.input.ifindex, WAN_IF);
    }

    #[test]
    fn test_resolve_fails_without_route() {
        let world = World::new();
        world.routes.clear();
        world.routes.add(server_ip(), WAN_IF, false);

        let conn = make_conn();
        let mut devs = world.devs();

        // Reply-direction lookup (towards the client) has no route, so
        // the whole resolution aborts.
        let err = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap_err();
        assert_eq!(err.dir, Direction::Reply);
    }

    #[test]
    fn test_xfrm_destination_skips_link_layer() {
        let world = World::new();
        world.routes.clear();
        world.routes.add(client_ip(), LAN_IF, false);
        world.routes.add(server_ip(), WAN_IF, true);

        let conn = make_conn();
        let mut devs = world.devs();
        let route = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap();

        let orig = route.dir(Direction::Original);
        assert_eq!(orig.xmit, XmitType::Xfrm);
        assert_eq!(orig.out.ifindex, WAN_IF);
        // No link-layer state resolved for the tunnel direction
        assert_eq!(orig.out.dst_mac, MacAddr::ZERO);
        assert_eq!(orig.out.hw_ifindex, 0);
    }

    #[test]
    fn test_non_ethernet_egress_stays_neighbor() {
        let world = World::new();
        world.net.add_device(NetDevice {
            ifindex: 9,
            name: "ppp0".to_string(),
            netns: 0,
            link_type: LinkType::Ppp,
            mac: MacAddr::ZERO,
        });
        world.routes.clear();
        world.routes.add(client_ip(), LAN_IF, false);
        world.routes.add(server_ip(), 9, false);

        let conn = make_conn();
        let mut devs = [world.net.get(9).unwrap(), world.net.get(LAN_IF).unwrap()];
        let route = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap();

        let orig = route.dir(Direction::Original);
        assert_eq!(orig.xmit, XmitType::Neigh);
        // Only the interface index is recorded
        assert_eq!(orig.out.ifindex, 9);
        assert_eq!(orig.out.dst_mac, MacAddr::ZERO);
    }

    #[test]
    fn test_stale_neighbor_stays_neighbor_without_address() {
        let world = World::new();
        world
            .neighbors
            .add(server_ip(), MacAddr([0x0a, 0, 0, 0, 0, 2]), NeighborState::Stale);

        let conn = make_conn();
        let mut devs = world.devs();
        let route = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap();

        let orig = route.dir(Direction::Original);
        assert_eq!(orig.xmit, XmitType::Neigh);
        assert_eq!(orig.out.dst_mac, MacAddr::ZERO);
    }

    #[test]
    fn test_vlan_path_pushes_reply_encap() {
        let world = World::new();
        // WAN egress is a VLAN device on top of a physical ethernet
        let vlan_dev = world.net.add_ethernet(10, "wan0.100", MacAddr([0x02, 0, 0, 0, 1, 0]));
        let phys = world.net.get(WAN_IF).unwrap();
        world.net.set_forward_path(
            10,
            PathStack {
                segments: vec![
                    PathSegment {
                        dev: vlan_dev.clone(),
                        kind: PathKind::Vlan {
                            id: 100,
                            proto: 0x8100,
                        },
                    },
                    PathSegment {
                        dev: phys.clone(),
                        kind: PathKind::Ethernet,
                    },
                ],
            },
        );
        world.routes.clear();
        world.routes.add(client_ip(), LAN_IF, false);
        world.routes.add(server_ip(), 10, false);

        let conn = make_conn();
        let mut devs = [vlan_dev.clone(), world.net.get(LAN_IF).unwrap()];
        let route = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap();

        let orig = route.dir(Direction::Original);
        assert_eq!(orig.xmit, XmitType::Direct);
        // Emitted through the VLAN device, offloaded on the physical one
        assert_eq!(orig.out.ifindex, 10);
        assert_eq!(orig.out.src_mac, MacAddr([0x02, 0, 0, 0, 1, 0]));
        assert_eq!(orig.out.hw_ifindex, WAN_IF);

        // The reply direction must decode the tag on ingress
        let reply = route.dir(Direction::Reply);
        assert_eq!(reply.input.ifindex, WAN_IF);
        assert_eq!(
            reply.input.encaps,
            vec![Encap {
                id: 100,
                proto: 0x8100
            }]
        );

        // Hook maintenance must target the physical device
        assert_eq!(devs[Direction::Reply.index()].ifindex, WAN_IF);
    }

    #[test]
    fn test_encap_stack_never_exceeds_max_depth() {
        let world = World::new();
        let phys = world.net.get(WAN_IF).unwrap();
        let mut segments = Vec::new();
        for level in 0..4u16 {
            let dev = world.net.add_ethernet(
                20 + level as u32,
                &format!("vlan{}", level),
                MacAddr([0x02, 0, 0, 0, 2, level as u8]),
            );
            segments.push(PathSegment {
                dev,
                kind: PathKind::Vlan {
                    id: 100 + level,
                    proto: 0x8100,
                },
            });
        }
        segments.push(PathSegment {
            dev: phys,
            kind: PathKind::Ethernet,
        });
        world.net.set_forward_path(20, PathStack { segments });
        world.routes.clear();
        world.routes.add(client_ip(), LAN_IF, false);
        world.routes.add(server_ip(), 20, false);

        let conn = make_conn();
        let mut devs = [world.net.get(20).unwrap(), world.net.get(LAN_IF).unwrap()];
        let route = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap();

        let reply = route.dir(Direction::Reply);
        assert_eq!(reply.input.encaps.len(), ENCAP_MAX);
        // The walk stopped before the physical device, so the deepest
        // visited VLAN device is reported as hardware egress.
        assert_eq!(route.dir(Direction::Original).out.hw_ifindex, 21);
    }

    #[test]
    fn test_pppoe_path_overwrites_destination_mac() {
        let world = World::new();
        let pppoe_dev = world.net.add_ethernet(30, "pppoe-wan", MacAddr([0x02, 0, 0, 0, 3, 0]));
        let phys = world.net.get(WAN_IF).unwrap();
        let ac_mac = MacAddr([0x0c, 0, 0, 0, 0, 0xac]);
        world.net.set_forward_path(
            30,
            PathStack {
                segments: vec![
                    PathSegment {
                        dev: pppoe_dev.clone(),
                        kind: PathKind::Pppoe {
                            session: 0x1234,
                            proto: 0x8864,
                            remote: ac_mac,
                        },
                    },
                    PathSegment {
                        dev: phys,
                        kind: PathKind::Ethernet,
                    },
                ],
            },
        );
        world.routes.clear();
        world.routes.add(client_ip(), LAN_IF, false);
        world.routes.add(server_ip(), 30, false);

        let conn = make_conn();
        let mut devs = [pppoe_dev, world.net.get(LAN_IF).unwrap()];
        let route = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap();

        let orig = route.dir(Direction::Original);
        assert_eq!(orig.out.dst_mac, ac_mac);
        assert_eq!(
            route.dir(Direction::Reply).input.encaps,
            vec![Encap {
                id: 0x1234,
                proto: 0x8864
            }]
        );
    }

    #[test]
    fn test_bridge_untag_pops_encap() {
        let world = World::new();
        let vlan_dev = world.net.add_ethernet(40, "br0.200", MacAddr([0x02, 0, 0, 0, 4, 0]));
        let br_port = world.net.add_ethernet(41, "brport0", MacAddr([0x02, 0, 0, 0, 4, 1]));
        let phys = world.net.get(WAN_IF).unwrap();
        world.net.set_forward_path(
            40,
            PathStack {
                segments: vec![
                    PathSegment {
                        dev: vlan_dev.clone(),
                        kind: PathKind::Vlan {
                            id: 200,
                            proto: 0x8100,
                        },
                    },
                    PathSegment {
                        dev: br_port,
                        kind: PathKind::Bridge(BridgeVlanMode::Untag),
                    },
                    PathSegment {
                        dev: phys,
                        kind: PathKind::Ethernet,
                    },
                ],
            },
        );
        world.routes.clear();
        world.routes.add(client_ip(), LAN_IF, false);
        world.routes.add(server_ip(), 40, false);

        let conn = make_conn();
        let mut devs = [vlan_dev, world.net.get(LAN_IF).unwrap()];
        let route = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap();

        // Tag pushed by the VLAN segment, popped by the untagging bridge
        assert!(route.dir(Direction::Reply).input.encaps.is_empty());
        assert_eq!(route.dir(Direction::Original).out.hw_ifindex, WAN_IF);
    }

    #[test]
    fn test_bridge_untag_hw_marks_bitmap() {
        let world = World::new();
        let vlan_dev = world.net.add_ethernet(50, "br0.300", MacAddr([0x02, 0, 0, 0, 5, 0]));
        let br_port = world.net.add_ethernet(51, "brport1", MacAddr([0x02, 0, 0, 0, 5, 1]));
        let phys = world.net.get(WAN_IF).unwrap();
        world.net.set_forward_path(
            50,
            PathStack {
                segments: vec![
                    PathSegment {
                        dev: vlan_dev.clone(),
                        kind: PathKind::Vlan {
                            id: 300,
                            proto: 0x8100,
                        },
                    },
                    PathSegment {
                        dev: br_port,
                        kind: PathKind::Bridge(BridgeVlanMode::UntagHw),
                    },
                    PathSegment {
                        dev: phys,
                        kind: PathKind::Ethernet,
                    },
                ],
            },
        );
        world.routes.clear();
        world.routes.add(client_ip(), LAN_IF, false);
        world.routes.add(server_ip(), 50, false);

        let conn = make_conn();
        let mut devs = [vlan_dev, world.net.get(LAN_IF).unwrap()];
        let route = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap();

        let reply = route.dir(Direction::Reply);
        // Record stays on the stack but its slot is marked hardware-stripped
        assert_eq!(reply.input.encaps.len(), 1);
        assert_eq!(reply.input.ingress_vlans, 0b1);
    }

    #[test]
    fn test_resolve_ipv6_passes_source_hint_to_routing() {
        let world = World::new();
        let client6 = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
        let server6 = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2));

        // Both routes demand the matching source address, so a lookup
        // without the hint finds nothing.
        world.routes.clear();
        world.routes.add_for_src(client6, server6, LAN_IF, false);
        world.routes.add_for_src(server6, client6, WAN_IF, false);
        world
            .neighbors
            .add(client6, MacAddr([0x0a, 0, 0, 0, 0, 1]), NeighborState::Reachable);
        world
            .neighbors
            .add(server6, MacAddr([0x0a, 0, 0, 0, 0, 2]), NeighborState::Reachable);

        let conn = Connection::new(
            ConnTuple::new(client6, server6, 40000, 443),
            TransportProtocol::Tcp,
        );

        let mut devs = world.devs();
        let route = resolve(&world.ctx(), &conn, Family::Ipv6, Direction::Original, &mut devs)
            .unwrap();
        assert_eq!(route.dir(Direction::Original).xmit, XmitType::Direct);
        assert_eq!(route.dir(Direction::Original).out.ifindex, WAN_IF);
        assert_eq!(route.dir(Direction::Reply).out.ifindex, LAN_IF);

        // The v4 key carries no source hint and cannot match these routes
        let mut devs = world.devs();
        assert!(
            resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs).is_err()
        );
    }

    #[test]
    fn test_bridge_tag_pushes_encap() {
        let world = World::new();
        let br_dev = world.net.add_ethernet(70, "br0", MacAddr([0x02, 0, 0, 0, 7, 0]));
        let phys = world.net.get(WAN_IF).unwrap();
        world.net.set_forward_path(
            70,
            PathStack {
                segments: vec![
                    PathSegment {
                        dev: br_dev.clone(),
                        kind: PathKind::Bridge(BridgeVlanMode::Tag {
                            id: 500,
                            proto: 0x88a8,
                        }),
                    },
                    PathSegment {
                        dev: phys,
                        kind: PathKind::Ethernet,
                    },
                ],
            },
        );
        world.routes.clear();
        world.routes.add(client_ip(), LAN_IF, false);
        world.routes.add(server_ip(), 70, false);

        let conn = make_conn();
        let mut devs = [br_dev, world.net.get(LAN_IF).unwrap()];
        let route = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap();

        // The port tag must be decoded on reply ingress like a VLAN tag
        assert_eq!(
            route.dir(Direction::Reply).input.encaps,
            vec![Encap {
                id: 500,
                proto: 0x88a8
            }]
        );
        assert_eq!(route.dir(Direction::Original).out.hw_ifindex, WAN_IF);
    }

    #[test]
    fn test_terminal_vlan_segment_ends_walk_at_sentinel() {
        let world = World::new();
        // A path that ends on a VLAN segment with no physical device
        // reported after it: the tag is still pushed, and the walk ends
        // at the sentinel index past it.
        let vlan_dev = world.net.add_ethernet(60, "wan0.400", MacAddr([0x02, 0, 0, 0, 6, 0]));
        world.net.set_forward_path(
            60,
            PathStack {
                segments: vec![PathSegment {
                    dev: vlan_dev.clone(),
                    kind: PathKind::Vlan {
                        id: 400,
                        proto: 0x8100,
                    },
                }],
            },
        );
        world.routes.clear();
        world.routes.add(client_ip(), LAN_IF, false);
        world.routes.add(server_ip(), 60, false);

        let conn = make_conn();
        let mut devs = [vlan_dev, world.net.get(LAN_IF).unwrap()];
        let route = resolve(&world.ctx(), &conn, Family::Ipv4, Direction::Original, &mut devs)
            .unwrap();

        assert_eq!(route.dir(Direction::Reply).input.encaps.len(), 1);
        // The VLAN device itself is the deepest device visited
        assert_eq!(route.dir(Direction::Original).out.hw_ifindex, 60);
        assert_eq!(devs[Direction::Reply.index()].ifindex, 60);
    }
}
