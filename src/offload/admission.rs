//! Flow admission
//!
//! Evaluates a packet and its tracked connection against the offload
//! eligibility rules and, if everything holds, claims the connection,
//! resolves both forwarding paths, and inserts the flow. The packet that
//! triggered admission always continues down the normal path; only later
//! packets take the shortcut.

use crate::conn::{Connection, TransportProtocol};
use crate::offload::flow::Flow;
use crate::offload::path::{resolve, ResolveCtx};
use crate::offload::table::{Offload, TableKind};
use crate::types::{Direction, Family, NetnsId};
use std::sync::Arc;
use tracing::{debug, trace};

/// What the admission hook tells the packet pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Packet proceeds through the normal path
    Continue,
}

/// TCP header flags admission inspects
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpFlags {
    pub fin: bool,
    pub rst: bool,
}

/// Per-packet context handed to admission
#[derive(Debug, Clone)]
pub struct PacketMeta {
    pub family: Family,
    /// Packet carries an IPsec security path
    pub has_sec_path: bool,
    /// IPv4 header carries options
    pub has_ip_options: bool,
    /// TCP flags, None for non-TCP packets
    pub tcp: Option<TcpFlags>,
    /// Packet travels in the reply direction of its connection
    pub reply: bool,
    pub in_ifindex: Option<u32>,
    pub out_ifindex: Option<u32>,
    pub netns: NetnsId,
}

/// Why a packet was not offloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    SecurityPath,
    IpOptions,
    Untracked,
    UnsupportedProtocol,
    TcpNotEstablished,
    TcpFinRst,
    Helper,
    SeqAdjust,
    Unconfirmed,
    MissingDevice,
    RouteLookup,
    InsertFailed,
}

/// Result of one admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// This packet created the flow
    Offloaded,
    /// Another packet already claimed the connection
    AlreadyRequested,
    Skipped(SkipReason),
}

impl Offload {
    /// Admission hook entry point. Always lets the packet continue.
    pub fn process(&self, pkt: &PacketMeta, conn: Option<&Arc<Connection>>) -> Verdict {
        match self.try_admit(pkt, conn) {
            AdmissionOutcome::Offloaded => {
                self.metrics.flows_offloaded.inc();
                debug!("connection offloaded to fast path");
            }
            AdmissionOutcome::AlreadyRequested => {}
            AdmissionOutcome::Skipped(reason) => {
                self.metrics.admission_skipped.inc();
                match reason {
                    SkipReason::RouteLookup => self.metrics.route_failures.inc(),
                    SkipReason::InsertFailed => self.metrics.insert_failures.inc(),
                    _ => {}
                }
                trace!(?reason, "packet not offloaded");
            }
        }
        Verdict::Continue
    }

    fn try_admit(&self, pkt: &PacketMeta, conn: Option<&Arc<Connection>>) -> AdmissionOutcome {
        use AdmissionOutcome::Skipped;

        if !self.config.enabled {
            return Skipped(SkipReason::Disabled);
        }
        if pkt.has_sec_path {
            return Skipped(SkipReason::SecurityPath);
        }
        if pkt.family == Family::Ipv4 && pkt.has_ip_options {
            return Skipped(SkipReason::IpOptions);
        }

        let Some(conn) = conn else {
            return Skipped(SkipReason::Untracked);
        };

        match conn.protocol() {
            TransportProtocol::Tcp => {
                if !conn.tcp_established() {
                    return Skipped(SkipReason::TcpNotEstablished);
                }
                // A FIN or RST means the connection is on its way out
                match pkt.tcp {
                    Some(flags) if !flags.fin && !flags.rst => {}
                    _ => return Skipped(SkipReason::TcpFinRst),
                }
            }
            TransportProtocol::Udp => {}
            TransportProtocol::Other(_) => {
                return Skipped(SkipReason::UnsupportedProtocol);
            }
        }

        if conn.has_helper() {
            return Skipped(SkipReason::Helper);
        }
        if conn.seq_adjust_active() {
            return Skipped(SkipReason::SeqAdjust);
        }
        if !conn.is_confirmed() {
            return Skipped(SkipReason::Unconfirmed);
        }

        // The packet's direction decides which tuple index each device
        // hint belongs to: the output device carries this direction's
        // traffic, the input device the reverse.
        let dir = if pkt.reply {
            Direction::Reply
        } else {
            Direction::Original
        };

        let out_dev = pkt
            .out_ifindex
            .and_then(|ifindex| self.deps.devices.get(ifindex));
        let in_dev = pkt
            .in_ifindex
            .and_then(|ifindex| self.deps.devices.get(ifindex));
        let (Some(out_dev), Some(in_dev)) = (out_dev, in_dev) else {
            return Skipped(SkipReason::MissingDevice);
        };

        // Claim the connection before any allocation; losing the race
        // means another packet is already building the flow.
        if !conn.request_offload() {
            return AdmissionOutcome::AlreadyRequested;
        }

        let mut devs = [out_dev, in_dev];
        if pkt.reply {
            devs.swap(0, 1);
        }

        let ctx = ResolveCtx {
            devices: self.deps.devices.as_ref(),
            routes: self.deps.routes.as_ref(),
            neighbors: self.deps.neighbors.as_ref(),
        };
        let route = match resolve(&ctx, conn, pkt.family, dir, &mut devs) {
            Ok(route) => route,
            Err(e) => {
                conn.clear_offload();
                debug!(error = %e, "route resolution failed, releasing offload claim");
                return Skipped(SkipReason::RouteLookup);
            }
        };

        if conn.protocol() == TransportProtocol::Tcp {
            conn.set_liberal_tracking();
        }

        let kind = if self.config.hardware {
            TableKind::Hardware
        } else {
            TableKind::Software
        };
        let table = self.table(kind);

        let flow = Flow::new(Arc::clone(conn), route);
        if let Err(e) = table.flows().insert(flow) {
            conn.clear_offload();
            debug!(error = %e, "flow insertion failed, releasing offload claim");
            return Skipped(SkipReason::InsertFailed);
        }

        // Hooks go on the resolved physical devices, which may sit below
        // the hinted ones.
        self.ensure_hook(kind, &devs[0]);
        self.ensure_hook(kind, &devs[1]);
        table.bind_netns(pkt.netns);

        AdmissionOutcome::Offloaded
    }
}
