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

//! Collaborator traits for the parts of the system that are explicitly out
//! of scope: the discrete-event scheduler, the MAC layer, and the
//! node/position/connectivity model.
//!
//! [DESIGN NOTE] the original C source reaches these through free functions
//! (`get_time()`, `scheduler_add_callback(...)`, `set_mac_header(...)`,
//! `node_get_position(...)`) provided by the host simulation kernel. We
//! model the same seam as three small traits a host implements once; the
//! routing modules in this crate are generic over them and so are
//! unit-testable standalone against the fakes in [`crate::testkit`].

use crate::packet::Packet;
use crate::types::{NodeId, NodeKind, Position, VirtualTime};

/// A timer event a routing module has asked the scheduler to deliver back
/// to [`crate::protocol::RoutingModule::handle_timer`] at a future virtual
/// time.
///
/// [DESIGN NOTE] corresponds to the original's
/// `scheduler_add_callback(time, to, from, fn, arg)` continuations; the
/// callback function pointer plus opaque `arg` is replaced by this closed,
/// typed enum, and packet-carrying variants make the ownership transfer to
/// the future callback explicit instead of passing a raw `(void *)packet`.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerEvent {
    /// Re-arm and (if still enabled) transmit the next periodic HELLO.
    Hello,
    /// Re-arm and (if still enabled) transmit the next periodic RREQ probe
    /// used to (re-)discover a route to a pending destination.
    Rreq(NodeId),
    /// Re-arm and (if still enabled) transmit the next periodic sink
    /// INTEREST flood.
    Interest,
    /// Re-arm and (if still enabled) transmit the next periodic TC.
    Tc,
    /// Rebroadcast this INTEREST after the propagation backoff, unless it
    /// has since been superseded by a fresher one in the seen-set.
    InterestRebroadcast(Packet),
    /// Rebroadcast this RREQ after the propagation backoff, unless it has
    /// since become a duplicate.
    RreqRebroadcast(Packet),
    /// Issue an intermediate-node RREP after the reply backoff, unless a
    /// fresher route or RREP has superseded it.
    RrepFromIntermediate(Packet),
}

/// Interface to the discrete-event scheduler. Deliberately out of scope to
/// implement; a host simulator provides it.
pub trait Scheduler {
    /// Current virtual time.
    fn now(&self) -> VirtualTime;

    /// Schedule `event` to be delivered to `node`'s
    /// [`crate::protocol::RoutingModule::handle_timer`] at virtual time
    /// `at`. No callback is ever explicitly canceled: a module that no
    /// longer wants a periodic timer to re-arm simply returns without
    /// scheduling the next occurrence (see `SPEC_FULL.md` §5).
    fn schedule(&mut self, at: VirtualTime, node: NodeId, event: TimerEvent);

    /// Draw a uniform random value in `[0, 1)`, used for probability-drop
    /// coin flips.
    fn uniform01(&mut self) -> f64;

    /// Draw a uniform random virtual-time jitter in `[0, backoff)`.
    fn jitter(&mut self, backoff: VirtualTime) -> VirtualTime {
        if backoff == 0 {
            0
        } else {
            (self.uniform01() * backoff as f64) as VirtualTime
        }
    }
}

/// Interface to the MAC/link layer below. Deliberately out of scope to
/// implement; a host simulator provides it.
pub trait Mac {
    /// Size, in bytes, of the lower-layer protocol headers (link-layer
    /// overhead). Queried once at `bootstrap` and cached by the routing
    /// module ("lazily discovered from MAC", `SPEC_FULL.md` §3).
    fn header_size(&self) -> u32;

    /// Install the link-layer header for `packet` (whose `header.link_dst`
    /// has already been set by the routing module). Returns an error if the
    /// MAC cannot address `packet.header.link_dst` (e.g. the next hop left
    /// radio range between route lookup and transmission).
    fn set_header(&mut self, packet: &Packet) -> Result<(), ()>;

    /// Hand the packet to the MAC for transmission. Takes ownership.
    fn transmit(&mut self, packet: Packet);
}

/// Read-only view of the local node's identity, position, and liveness,
/// and of the total node count in the simulation. Deliberately out of
/// scope to implement; a host simulator provides it.
pub trait NodeView {
    /// This node's id.
    fn id(&self) -> NodeId;
    /// This node's kind.
    fn kind(&self) -> NodeKind;
    /// This node's current position.
    fn position(&self) -> Position;
    /// Whether this node is currently alive (powered, not destroyed).
    fn is_alive(&self) -> bool;
    /// Total number of nodes known to the simulation.
    fn node_count(&self) -> usize;

    /// Location-service lookup: the current position of an arbitrary node,
    /// if known (the original's `node_get_position(id)`, generalized here
    /// from "this node" to any id). Used by the geographic routing modules
    /// to learn a destination's coordinates; other modules never call it.
    /// Defaults to `None` so collaborator fakes that don't model a location
    /// service need not implement it.
    fn position_of(&self, _id: NodeId) -> Option<Position> {
        None
    }
}
