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

//! The routing-module contract every protocol in this crate implements
//! (`SPEC_FULL.md` §6).
//!
//! [DESIGN NOTE] generalizes the teacher's `CustomProto` trait
//! (`new`/`apply_config`/`neighbor_event`/`forward`/`handle_event`) to this
//! domain's richer lifecycle: separate class-wide vs per-node state, an
//! explicit `bootstrap` that arms the first timers, and a `rx`/`handle_timer`
//! split that demultiplexes on [`PacketType`](crate::types::PacketType)
//! and [`TimerEvent`] respectively instead of a single opaque event type.

use crate::config::ParamMap;
use crate::packet::Packet;
use crate::scheduler::{Mac, NodeView, Scheduler, TimerEvent};
use crate::types::{ConfigError, NodeId, RoutingError};

/// Uniform eight-operation contract implemented by every routing module:
/// static file-driven, greedy geographic, static geographic, Directed
/// Diffusion, AODV, and OLSRv2.
pub trait RoutingModule {
    /// Class-wide state shared by every node running this module (the
    /// teacher/original's `classdata`).
    type ClassState: Default;
    /// Per-node state (the teacher/original's `nodedata`).
    type NodeState;

    /// Parse class-wide parameters and build the initial class state.
    fn init(params: &ParamMap) -> Result<Self::ClassState, ConfigError>;

    /// Tear down the class state, optionally emitting a global stats line.
    fn destroy(class: &mut Self::ClassState);

    /// Parse per-node parameters and build the initial node state.
    fn bind(
        class: &Self::ClassState,
        node: NodeId,
        params: &ParamMap,
    ) -> Result<Self::NodeState, ConfigError>;

    /// Tear down a node's state, optionally emitting a per-node stats line
    /// and folding its counters into `class`.
    fn unbind(class: &mut Self::ClassState, state: &mut Self::NodeState);

    /// Query the MAC for its header size and arm the first HELLO/RREQ/
    /// INTEREST/TC timers.
    fn bootstrap(
        state: &mut Self::NodeState,
        node: &dyn NodeView,
        mac: &mut dyn Mac,
        sched: &mut dyn Scheduler,
    );

    /// Install the data-plane header for an outgoing packet bound for
    /// `dst` (which may be [`NodeId::BROADCAST`] to mean "closest sink" in
    /// Directed Diffusion). Returns [`RoutingError::NoRoute`] if no route
    /// is known; AODV additionally self-triggers an RREQ in that case.
    fn set_header(
        state: &mut Self::NodeState,
        node: &dyn NodeView,
        sched: &mut dyn Scheduler,
        packet: &mut Packet,
        dst: NodeId,
    ) -> Result<(), RoutingError>;

    /// In-memory size of this module's data header, in bytes.
    fn header_size() -> u32;

    /// Real (wire) size of this module's data header, in bytes.
    fn header_real_size(state: &Self::NodeState) -> u32;

    /// Hand a packet with an already-installed header to the MAC.
    fn tx(state: &mut Self::NodeState, mac: &mut dyn Mac, packet: Packet) {
        mac.transmit(packet);
    }

    /// Demultiplex an incoming packet by its `packet_type` tag.
    fn rx(
        state: &mut Self::NodeState,
        node: &dyn NodeView,
        mac: &mut dyn Mac,
        sched: &mut dyn Scheduler,
        packet: Packet,
    );

    /// Handle a timer event previously scheduled by this module.
    fn handle_timer(
        state: &mut Self::NodeState,
        node: &dyn NodeView,
        mac: &mut dyn Mac,
        sched: &mut dyn Scheduler,
        event: TimerEvent,
    );
}
