// BgpSim: BGP Network Simulator written in Rust
// Copyright 2022-2024 Tibor Schneider <sctibor@ethz.ch>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Module containing the fundamental identifiers, value types, and error
//! enums shared by every routing module in this crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a simulated node (sensor, sink, or anchor).
///
/// The all-ones value is reserved as the broadcast sentinel (see
/// [`NodeId::BROADCAST`]); it must never be used to identify a real node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Reserved destination meaning "every one-hop neighbor".
    pub const BROADCAST: NodeId = NodeId(u32::MAX);

    /// `true` if this id is the broadcast sentinel.
    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            write!(f, "*")
        } else {
            write!(f, "n{}", self.0)
        }
    }
}

impl From<u32> for NodeId {
    fn from(x: u32) -> Self {
        NodeId(x)
    }
}

/// The kind of a simulated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Ordinary sensor, forwards and originates data.
    Sensor,
    /// Data collection endpoint; origin of Directed Diffusion INTEREST floods.
    Sink,
    /// Passive beacon: discards every received packet by design.
    Anchor,
}

impl Default for NodeKind {
    fn default() -> Self {
        NodeKind::Sensor
    }
}

/// A 3-D position, as advertised in HELLO packets or read from a static
/// position table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// x coordinate.
    pub x: f64,
    /// y coordinate.
    pub y: f64,
    /// z coordinate.
    pub z: f64,
}

impl Position {
    /// Build a new position.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position.
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Monotonic virtual time, in the host scheduler's own units (the original
/// uses nanoseconds; we stay unit-agnostic and just require monotonicity).
pub type VirtualTime = u64;

/// Discriminant carried by every packet's common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    /// Periodic one-hop neighbor-discovery broadcast.
    Hello,
    /// Sink-originated controlled flood (Directed Diffusion).
    Interest,
    /// Application data packet.
    Data,
    /// On-demand route request (AODV).
    Rreq,
    /// On-demand route reply (AODV).
    Rrep,
    /// Topology-control broadcast forwarded only by MPRs (OLSRv2).
    Tc,
    /// Recognized but unused by every module in this suite; a module that
    /// receives one drops it as an unknown/unhandled packet type.
    Advert,
}

impl PacketType {
    /// Index into a fixed-size per-type counter array.
    pub fn counter_index(self) -> usize {
        match self {
            PacketType::Hello => 0,
            PacketType::Interest => 1,
            PacketType::Data => 2,
            PacketType::Rreq => 3,
            PacketType::Rrep => 4,
            PacketType::Tc => 5,
            PacketType::Advert => 6,
        }
    }
}

/// Number of counter slots needed to index every [`PacketType`].
pub const PACKET_TYPE_COUNT: usize = 7;

/// Aggregate counters shared by every node bound under one routing module
/// (the original's `classdata`). Folded in from each node's own counters at
/// `unbind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassStats {
    /// Packets transmitted, indexed by [`PacketType::counter_index`].
    pub packets_sent: [u64; PACKET_TYPE_COUNT],
    /// Packets received, indexed by [`PacketType::counter_index`].
    pub packets_received: [u64; PACKET_TYPE_COUNT],
    /// Number of nodes bound under this module over its lifetime.
    pub nodes_bound: u32,
    /// Slowest first-route-establishment delay observed across every node
    /// folded in so far (the original's `global_establishment_time`, a
    /// running max over each node's own `path_establishment_delay`).
    pub max_path_establishment_delay: Option<VirtualTime>,
}

impl Default for ClassStats {
    fn default() -> Self {
        Self {
            packets_sent: [0; PACKET_TYPE_COUNT],
            packets_received: [0; PACKET_TYPE_COUNT],
            nodes_bound: 0,
            max_path_establishment_delay: None,
        }
    }
}

impl ClassStats {
    /// Record one transmitted packet of type `t`.
    pub fn record_sent(&mut self, t: PacketType) {
        self.packets_sent[t.counter_index()] += 1;
    }

    /// Record one received packet of type `t`.
    pub fn record_received(&mut self, t: PacketType) {
        self.packets_received[t.counter_index()] += 1;
    }

    /// Fold a node's own per-type counters into this class total.
    pub fn fold_received(&mut self, counters: &[u32; PACKET_TYPE_COUNT]) {
        for (slot, n) in self.packets_received.iter_mut().zip(counters.iter()) {
            *slot += *n as u64;
        }
    }

    /// Fold a node's own first-route-establishment delay into the running
    /// class-wide max (`route_update_global_stats` in the original).
    pub fn fold_path_established(&mut self, delay: VirtualTime) {
        self.max_path_establishment_delay =
            Some(self.max_path_establishment_delay.map_or(delay, |cur| cur.max(delay)));
    }
}

/// Configuration error: a parameter was missing, malformed, or out of the
/// range a module accepts. Causes `bind` (or the static route/position file
/// parse it performs) to abort.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required parameter was not supplied.
    #[error("missing required parameter `{0}`")]
    MissingParameter(String),
    /// A parameter value could not be parsed as the expected type.
    #[error("parameter `{name}` has invalid value `{value}`")]
    InvalidValue {
        /// Parameter name.
        name: String,
        /// The value that failed to parse.
        value: String,
    },
    /// A parameter was parsed but falls outside its accepted range, e.g.
    /// `lqe_threshold` outside `[0, 1]`.
    #[error("parameter `{name}` value {value} is out of range: {reason}")]
    OutOfRange {
        /// Parameter name.
        name: String,
        /// The value, formatted.
        value: String,
        /// Why the value is rejected.
        reason: String,
    },
    /// A static route or position file could not be read or contained a
    /// malformed line.
    #[error("error reading `{path}` at line {line}: {reason}")]
    MalformedFile {
        /// Path of the file being parsed.
        path: String,
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        reason: String,
    },
}

/// Local, non-propagating failure of a routing-module operation.
///
/// All variants other than [`RoutingError::NoRoute`] are surfaced only as a
/// log line: the packet is silently dropped and nothing is returned upward.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// No route is known to the requested destination at `set_header` time.
    #[error("no route to destination {0}")]
    NoRoute(NodeId),
    /// The MAC layer refused to install the link-layer header.
    #[error("MAC header install failed")]
    HeaderInstallFailed,
    /// A flood packet was already seen for this (originator, target, type, seq).
    #[error("duplicate flood from {0} seq {1}")]
    DuplicateFlood(NodeId, u32),
    /// A flood packet's TTL reached zero.
    #[error("TTL exhausted")]
    TtlExhausted,
    /// The propagation-probability coin flip came up "drop".
    #[error("dropped by propagation probability")]
    ProbabilityDrop,
    /// An anchor node discards every packet it receives, by design.
    #[error("anchor node {0} discards all ingress traffic")]
    AnchorIngress(NodeId),
    /// The packet carries a `packet_type` this module does not implement.
    #[error("unknown or unhandled packet type {0:?} at {1}")]
    UnknownPacketType(PacketType, NodeId),
}
