//! Connection-tracking record accessor
//!
//! The offload path does not own connection tracking; it only needs a
//! narrow view of a tracked connection: its two tuples, protocol state,
//! and a handful of status bits. The sticky offload bit lives here as a
//! single atomic word so admission can claim a connection with one
//! compare-and-set, independent of the rest of the record.

use crate::types::Direction;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Transport protocol of a tracked connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Other(u8),
}

impl TransportProtocol {
    /// Create protocol from IP protocol number
    pub fn from_u8(value: u8) -> Self {
        match value {
            6 => TransportProtocol::Tcp,
            17 => TransportProtocol::Udp,
            other => TransportProtocol::Other(other),
        }
    }
}

/// TCP connection state as seen by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpConnState {
    /// SYN sent, waiting for SYN-ACK
    SynSent,
    /// SYN received (simultaneous open)
    SynRecv,
    /// Connection established
    Established,
    /// FIN seen, closing
    FinWait,
    /// Both FINs seen
    TimeWait,
    /// RST seen or timeout
    Closed,
}

/// One direction's address/port description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnTuple {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl ConnTuple {
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr, src_port: u16, dst_port: u16) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
        }
    }

    /// Create the reverse tuple (swap src/dst)
    pub fn reverse(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

// Status bits. OFFLOAD is the one-shot admission bit: set exactly once per
// connection, cleared only when an offload attempt is rolled back.
const STATUS_CONFIRMED: u32 = 1 << 0;
const STATUS_SEQ_ADJUST: u32 = 1 << 1;
const STATUS_OFFLOAD: u32 = 1 << 2;

/// Per-connection TCP details
#[derive(Debug)]
struct TcpInfo {
    state: TcpConnState,
    /// Liberal sequence tracking, per direction
    liberal: [bool; 2],
}

/// Tracked connection, shared between the tracker and the offload path
#[derive(Debug)]
pub struct Connection {
    /// Tuples indexed by direction (original, reply)
    tuples: [ConnTuple; 2],
    protocol: TransportProtocol,
    has_helper: bool,
    status: AtomicU32,
    tcp: Option<Mutex<TcpInfo>>,
}

impl Connection {
    /// Create a connection from its original-direction tuple
    pub fn new(original: ConnTuple, protocol: TransportProtocol) -> Self {
        let tcp = if protocol == TransportProtocol::Tcp {
            Some(Mutex::new(TcpInfo {
                state: TcpConnState::SynSent,
                liberal: [false; 2],
            }))
        } else {
            None
        };

        Self {
            tuples: [original, original.reverse()],
            protocol,
            has_helper: false,
            status: AtomicU32::new(0),
            tcp,
        }
    }

    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// Tuple for the given direction
    pub fn tuple(&self, dir: Direction) -> &ConnTuple {
        &self.tuples[dir.index()]
    }

    /// Attach a protocol helper (set by the tracker, read-only here)
    pub fn set_helper(&mut self, attached: bool) {
        self.has_helper = attached;
    }

    pub fn has_helper(&self) -> bool {
        self.has_helper
    }

    /// Mark the connection as confirmed by the tracker
    pub fn confirm(&self) {
        self.status.fetch_or(STATUS_CONFIRMED, Ordering::Release);
    }

    pub fn is_confirmed(&self) -> bool {
        self.status.load(Ordering::Acquire) & STATUS_CONFIRMED != 0
    }

    /// Enable or disable sequence adjustment (NAT mangling)
    pub fn set_seq_adjust(&self, active: bool) {
        if active {
            self.status.fetch_or(STATUS_SEQ_ADJUST, Ordering::Release);
        } else {
            self.status.fetch_and(!STATUS_SEQ_ADJUST, Ordering::Release);
        }
    }

    pub fn seq_adjust_active(&self) -> bool {
        self.status.load(Ordering::Acquire) & STATUS_SEQ_ADJUST != 0
    }

    /// Atomically claim the connection for offload.
    ///
    /// Returns true if this caller set the bit, false if it was already
    /// set. The losing caller must not allocate any offload state.
    pub fn request_offload(&self) -> bool {
        let prev = self.status.fetch_or(STATUS_OFFLOAD, Ordering::AcqRel);
        prev & STATUS_OFFLOAD == 0
    }

    /// Roll back a failed offload attempt so a later packet may retry
    pub fn clear_offload(&self) {
        self.status.fetch_and(!STATUS_OFFLOAD, Ordering::Release);
    }

    pub fn offload_requested(&self) -> bool {
        self.status.load(Ordering::Acquire) & STATUS_OFFLOAD != 0
    }

    /// Current TCP state, None for non-TCP connections
    pub fn tcp_state(&self) -> Option<TcpConnState> {
        self.tcp.as_ref().map(|t| t.lock().unwrap().state)
    }

    pub fn set_tcp_state(&self, state: TcpConnState) {
        if let Some(tcp) = &self.tcp {
            tcp.lock().unwrap().state = state;
        }
    }

    pub fn tcp_established(&self) -> bool {
        self.tcp_state() == Some(TcpConnState::Established)
    }

    /// Mark both directions for liberal sequence tracking.
    ///
    /// The fast path cannot follow sequence numbers, so the tracker must
    /// tolerate packets it did not see once a flow is offloaded.
    pub fn set_liberal_tracking(&self) {
        if let Some(tcp) = &self.tcp {
            let mut info = tcp.lock().unwrap();
            info.liberal = [true; 2];
        }
    }

    pub fn liberal_tracking(&self, dir: Direction) -> bool {
        self.tcp
            .as_ref()
            .map(|t| t.lock().unwrap().liberal[dir.index()])
            .unwrap_or(false)
    }
}
