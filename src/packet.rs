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

//! The shared data-plane header and the typed per-control-packet
//! sub-headers.
//!
//! [DESIGN NOTE] the original C source attaches named fields to a generic
//! packet object (a string-keyed field bag). We replace that with a typed
//! [`SubHeader`] enum selected by [`PacketType`](crate::types::PacketType):
//! compile-time dispatch, no runtime field lookup, and the compiler checks
//! that every module reads the sub-header shape it actually wrote.

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, NodeKind, PacketType, Position};

/// The header carried on every packet, regardless of type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonHeader {
    /// The node that most recently transmitted this packet. For a
    /// single-hop packet (HELLO) this is the true originator; for a
    /// multi-hop flood (INTEREST, RREQ, TC) every forwarder overwrites this
    /// with its own id before retransmitting, so receivers can always treat
    /// it as "the one-hop neighbor I heard this from". The flood's true
    /// originator is carried separately in the sub-header.
    pub source: NodeId,
    /// Immediate link-layer destination (set by the forwarding plane).
    pub link_dst: NodeId,
    /// Final destination; for DATA packets, may be [`NodeId::BROADCAST`] to
    /// mean "closest sink" in Directed Diffusion.
    pub end_dst: NodeId,
    /// Kind of the originating node.
    pub source_kind: NodeKind,
    /// Discriminant selecting which [`SubHeader`] variant is populated.
    pub packet_type: PacketType,
    /// Number of hops traversed so far. Only originators may transmit with
    /// `hop == 0`; every forwarder increments it before transmitting.
    pub hop: u32,
}

/// HELLO sub-header: neighbor discovery and link-quality probing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloHeader {
    /// Sender's node kind (duplicated here for protocols keyed off it).
    pub kind: NodeKind,
    /// Sender's current position.
    pub position: Position,
    /// Sender's hop-to-sink, as known to Directed Diffusion (`-1` if
    /// unknown, `0` if the sender is itself a sink). Unused by other
    /// protocols.
    pub hop_to_sink: i32,
    /// Sender's own current sink id (itself, if it is a sink).
    pub sink_id: Option<NodeId>,
    /// OLSRv2: the sender's bounded one-hop neighbor list.
    pub one_hop_neighbors: Vec<NodeId>,
}

/// INTEREST sub-header (Directed Diffusion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestHeader {
    /// Originating sink.
    pub originator: NodeId,
    /// Monotone per-sink sequence number.
    pub seq: u32,
    /// Remaining time-to-live.
    pub ttl: u32,
    /// Requested data type, opaque to the routing layer.
    pub data_type: i32,
}

/// RREQ sub-header (AODV).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RreqHeader {
    /// Node that initiated the request.
    pub originator: NodeId,
    /// The destination being searched for.
    pub target: NodeId,
    /// Per-originator monotone sequence number.
    pub seq: u32,
    /// Remaining time-to-live.
    pub ttl: u32,
    /// TTL the RREQ started with, needed to derive hop-count from TTL.
    pub ttl_max: u32,
    /// Requested data type, opaque to the routing layer.
    pub data_type: i32,
}

/// RREP sub-header (AODV).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RrepHeader {
    /// The node the RREP describes a route to (the RREQ's target).
    pub src: NodeId,
    /// The node the RREP is unicast back towards (the RREQ's originator).
    pub dst: NodeId,
    /// Sequence number of this RREP.
    pub seq: u32,
    /// Sequence number of the RREQ that triggered this RREP.
    pub seq_rreq: u32,
    /// Hop count from `src` to `dst` at the time of origination/forwarding.
    pub hop_to_dst: u32,
}

/// TC sub-header (OLSRv2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcHeader {
    /// Node that originated the TC.
    pub originator: NodeId,
    /// Per-originator monotone sequence number.
    pub seq: u32,
    /// The originator's full one-hop neighbor list.
    pub one_hop_neighbors: Vec<NodeId>,
    /// MPR set of whichever node last (re)transmitted this TC — the
    /// originator on first broadcast, overwritten with each forwarder's own
    /// MPR set on every hop so the next hop can tell whether it was
    /// selected to relay further.
    pub mpr_set: Vec<NodeId>,
}

/// DATA sub-header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataHeader {
    /// Directed Diffusion / AODV: forwarded hop-by-hop via next-hop lookups.
    NextHop,
    /// Static routing: forwarded via the configured `id dst nexthop` table.
    Static,
    /// Greedy or static geographic: forwarded via per-hop distance
    /// minimization against a destination position fixed at origination.
    Geographic {
        /// The destination's position, looked up once at origination via
        /// the location-service seam and carried unchanged thereafter.
        dst_position: Position,
    },
    /// OLSRv2: forwarded along a precomputed source route.
    SourceRouted {
        /// The full path from origin to `end_dst`, inclusive.
        path: Vec<NodeId>,
        /// Index of the next hop to advance to within `path`.
        path_index: usize,
    },
}

/// The type-specific sub-header attached to a packet, selected by
/// [`CommonHeader::packet_type`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubHeader {
    /// See [`HelloHeader`].
    Hello(HelloHeader),
    /// See [`InterestHeader`].
    Interest(InterestHeader),
    /// See [`DataHeader`].
    Data(DataHeader),
    /// See [`RreqHeader`].
    Rreq(RreqHeader),
    /// See [`RrepHeader`].
    Rrep(RrepHeader),
    /// See [`TcHeader`].
    Tc(TcHeader),
    /// Recognized but unhandled by every module in this suite.
    Advert,
}

/// A simulated packet: an opaque payload (from this crate's point of view)
/// carrying a [`CommonHeader`] and one [`SubHeader`].
///
/// Packets are owned values. Whoever currently holds one either hands it
/// upward to the application layer, moves it into a scheduled timer event
/// (transferring ownership to the future callback), passes it to
/// [`crate::scheduler::Mac::transmit`] (which takes ownership), or drops it
/// explicitly. There is no reference counting and no shared mutable packet
/// state: the single-threaded cooperative scheduling model (see
/// `SPEC_FULL.md` §5) means a packet is never aliased while mutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Data-plane header.
    pub header: CommonHeader,
    /// Type-specific sub-header.
    pub sub: SubHeader,
    /// Real (transmitted) size in bits, independent of in-memory layout, so
    /// that radio air-time is modeled correctly.
    pub real_size_bits: u64,
    /// Received power, set by the channel/MAC on reception; consumed by the
    /// link-quality estimator.
    pub rx_power: f64,
}

impl Packet {
    /// Build a new packet with the given header and sub-header, defaulting
    /// `real_size_bits` and `rx_power` (the host MAC/channel fills those in
    /// on actual transmission/reception).
    pub fn new(header: CommonHeader, sub: SubHeader) -> Self {
        Self {
            header,
            sub,
            real_size_bits: 0,
            rx_power: 0.0,
        }
    }
}
