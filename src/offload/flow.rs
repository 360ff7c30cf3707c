//! Flow entries and the flow table interface
//!
//! A `Flow` ties a tracked connection to the forwarding descriptors the
//! resolver produced. The table engine that stores flows and matches
//! packets against them sits behind the `FlowTable` trait; the offload
//! path only inserts, iterates, and purges.

use crate::conn::{ConnTuple, Connection};
use crate::offload::path::FlowRoute;
use crate::types::Direction;
use std::sync::Arc;

/// One offloaded connection with both directions resolved
#[derive(Debug, Clone)]
pub struct Flow {
    conn: Arc<Connection>,
    route: FlowRoute,
}

impl Flow {
    pub fn new(conn: Arc<Connection>, route: FlowRoute) -> Self {
        Self { conn, route }
    }

    pub fn conn(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn tuple(&self, dir: Direction) -> &ConnTuple {
        self.conn.tuple(dir)
    }

    pub fn route(&self) -> &FlowRoute {
        &self.route
    }

    /// Physical interface packets of this direction arrive on
    pub fn ingress_ifindex(&self, dir: Direction) -> u32 {
        self.route.dir(dir).input.ifindex
    }

    /// Interface packets of this direction are emitted on
    pub fn egress_ifindex(&self, dir: Direction) -> u32 {
        self.route.dir(dir).out.ifindex
    }
}

/// Flow table insertion failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InsertError {
    #[error("flow already present")]
    Duplicate,
    #[error("flow table full")]
    Full,
}

/// Flow table engine interface
pub trait FlowTable: Send + Sync {
    /// Insert a new flow. The caller owns rollback on failure.
    fn insert(&self, flow: Flow) -> Result<(), InsertError>;

    /// Visit every live flow
    fn for_each(&self, f: &mut dyn FnMut(&Flow));

    /// Drop every flow referencing the given interface in either
    /// direction, returning how many were removed. Each dropped flow's
    /// connection has its offload claim released.
    fn purge_device(&self, ifindex: u32) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
