//! Flow offload fast path
//!
//! Promotes established, conntrack-confirmed connections onto a shortcut
//! forwarding path: per-packet admission creates a Flow describing both
//! directions' egress and encapsulation, device hooks feed matching
//! packets into the flow table engine, and a per-table garbage collector
//! keeps hooks alive exactly as long as flows reference their devices.

mod admission;
mod events;
mod flow;
mod gc;
mod hooks;
mod path;
mod table;

pub use admission::{AdmissionOutcome, PacketMeta, SkipReason, TcpFlags, Verdict};
pub use flow::{Flow, FlowTable, InsertError};
pub use gc::GcTimer;
pub use hooks::{HookEntry, HookRegistry, HOOK_PRIORITY};
pub use path::{
    resolve, Encap, FlowRoute, ResolveCtx, ResolveError, RouteDir, RouteInput, RouteOutput,
    XmitType, ENCAP_MAX,
};
pub use table::{FlowTableProvider, Offload, OffloadDeps, OffloadTable, TableKind};
