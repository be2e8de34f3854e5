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

//! Static geographic routing: the same greedy forwarding rule as
//! [`crate::greedy`], but the one-hop neighbor position table is read once
//! from configuration at `bind` time instead of learned via HELLO — there is
//! no control-plane traffic at all (`SPEC_FULL.md` §4.8).
//!
//! Grounded on `geostatic.c`.

use std::collections::HashMap;

use log::{debug, warn};

use crate::config::{ParamMap, StaticGeoParams};
use crate::geo::pick_next_hop;
use crate::packet::{DataHeader, Packet, SubHeader};
use crate::protocol::RoutingModule;
use crate::scheduler::{Mac, NodeView, Scheduler, TimerEvent};
use crate::types::{
    ClassStats, ConfigError, NodeId, NodeKind, PacketType, Position, RoutingError,
    PACKET_TYPE_COUNT,
};

/// Marker type selecting the static geographic implementation of
/// [`RoutingModule`].
#[derive(Debug)]
pub struct StaticGeo;

/// Per-node static geographic state.
#[derive(Debug)]
pub struct StaticGeoNode {
    id: NodeId,
    identity_kind: NodeKind,
    /// One-hop neighbor positions, parsed once at `bind` and never
    /// refreshed.
    neighbor_positions: HashMap<NodeId, Position>,
    counters: [u32; PACKET_TYPE_COUNT],
}

/// Parse the `positions` configuration value: `id@x,y,z` entries separated
/// by `;`, e.g. `1@0,0,0;2@10,0,0`.
fn parse_positions(value: &str) -> Result<HashMap<NodeId, Position>, ConfigError> {
    let malformed = || ConfigError::InvalidValue {
        name: "positions".to_string(),
        value: value.to_string(),
    };
    let mut out = HashMap::new();
    for entry in value.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (id_s, pos_s) = entry.split_once('@').ok_or_else(malformed)?;
        let id: u32 = id_s.trim().parse().map_err(|_| malformed())?;
        let coords: Vec<&str> = pos_s.split(',').collect();
        let [x_s, y_s, z_s] = coords[..] else {
            return Err(malformed());
        };
        let x: f64 = x_s.trim().parse().map_err(|_| malformed())?;
        let y: f64 = y_s.trim().parse().map_err(|_| malformed())?;
        let z: f64 = z_s.trim().parse().map_err(|_| malformed())?;
        out.insert(NodeId(id), Position::new(x, y, z));
    }
    Ok(out)
}

impl RoutingModule for StaticGeo {
    type ClassState = ClassStats;
    type NodeState = StaticGeoNode;

    fn init(_params: &ParamMap) -> Result<Self::ClassState, ConfigError> {
        Ok(ClassStats::default())
    }

    fn destroy(class: &mut Self::ClassState) {
        debug!("staticgeo: class destroyed, {} nodes bound", class.nodes_bound);
    }

    fn bind(_class: &Self::ClassState, node: NodeId, params: &ParamMap) -> Result<Self::NodeState, ConfigError> {
        let params = StaticGeoParams::from_params(params)?;
        let neighbor_positions = parse_positions(&params.positions)?;
        Ok(StaticGeoNode {
            id: node,
            identity_kind: params.identity.node_type,
            neighbor_positions,
            counters: [0; PACKET_TYPE_COUNT],
        })
    }

    fn unbind(class: &mut Self::ClassState, state: &mut Self::NodeState) {
        class.nodes_bound += 1;
        class.fold_received(&state.counters);
        debug!("staticgeo: node {} unbound", state.id);
    }

    fn bootstrap(_state: &mut Self::NodeState, _node: &dyn NodeView, mac: &mut dyn Mac, _sched: &mut dyn Scheduler) {
        // No HELLO, no timers: neighbor positions are fixed at bind time.
        let _ = mac.header_size();
    }

    fn set_header(
        state: &mut Self::NodeState,
        node: &dyn NodeView,
        _sched: &mut dyn Scheduler,
        packet: &mut Packet,
        dst: NodeId,
    ) -> Result<(), RoutingError> {
        let dst_position = node.position_of(dst).ok_or(RoutingError::NoRoute(dst))?;
        let next_hop = pick_next_hop(&state.neighbor_positions, node.position(), dst_position)
            .ok_or(RoutingError::NoRoute(dst))?;
        packet.header.source = node.id();
        packet.header.source_kind = node.kind();
        packet.header.link_dst = next_hop;
        packet.header.end_dst = dst;
        packet.header.packet_type = PacketType::Data;
        packet.header.hop = 0;
        packet.sub = SubHeader::Data(DataHeader::Geographic { dst_position });
        Ok(())
    }

    fn header_size() -> u32 {
        std::mem::size_of::<DataHeader>() as u32
    }

    fn header_real_size(_state: &Self::NodeState) -> u32 {
        0
    }

    fn rx(
        state: &mut Self::NodeState,
        node: &dyn NodeView,
        mac: &mut dyn Mac,
        _sched: &mut dyn Scheduler,
        packet: Packet,
    ) {
        if state.identity_kind == NodeKind::Anchor {
            return;
        }
        state.counters[packet.header.packet_type.counter_index()] += 1;
        if packet.header.packet_type != PacketType::Data {
            warn!(
                "{}",
                RoutingError::UnknownPacketType(packet.header.packet_type, node.id())
            );
            return;
        }
        forward_data(state, node, mac, packet);
    }

    fn handle_timer(
        _state: &mut Self::NodeState,
        _node: &dyn NodeView,
        _mac: &mut dyn Mac,
        _sched: &mut dyn Scheduler,
        _event: TimerEvent,
    ) {
    }
}

fn forward_data(state: &mut StaticGeoNode, node: &dyn NodeView, mac: &mut dyn Mac, mut packet: Packet) {
    if packet.header.end_dst == node.id() {
        debug!("staticgeo: {} delivered DATA from {}", node.id(), packet.header.source);
        return;
    }
    let SubHeader::Data(DataHeader::Geographic { dst_position }) = packet.sub else {
        warn!(
            "{}",
            RoutingError::UnknownPacketType(packet.header.packet_type, node.id())
        );
        return;
    };
    let Some(next_hop) = pick_next_hop(&state.neighbor_positions, node.position(), dst_position) else {
        warn!("{}", RoutingError::NoRoute(packet.header.end_dst));
        return;
    };
    packet.header.source = node.id();
    packet.header.link_dst = next_hop;
    packet.header.hop += 1;
    packet.sub = SubHeader::Data(DataHeader::Geographic { dst_position });
    if mac.set_header(&packet).is_ok() {
        StaticGeo::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
}
