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

//! Greedy geographic routing: each hop forwards to whichever one-hop
//! neighbor lies closest to the destination, learning neighbor positions
//! from periodic HELLO broadcasts (`SPEC_FULL.md` §4.6).

use log::{debug, warn};

use crate::config::{GreedyParams, ParamMap};
use crate::geo::pick_next_hop;
use crate::packet::{CommonHeader, DataHeader, HelloHeader, Packet, SubHeader};
use crate::protocol::RoutingModule;
use crate::scheduler::{Mac, NodeView, Scheduler, TimerEvent};
use crate::types::{ClassStats, ConfigError, NodeId, NodeKind, PacketType, Position, RoutingError};

/// Marker type selecting the greedy geographic implementation of
/// [`RoutingModule`].
#[derive(Debug)]
pub struct Greedy;

/// Per-node greedy geographic state.
#[derive(Debug)]
pub struct GreedyNode {
    id: NodeId,
    params: GreedyParams,
    /// One-hop neighbor positions, keyed by id, last advertised via HELLO.
    neighbor_positions: std::collections::HashMap<NodeId, Position>,
    hello_fired: u32,
    counters: [u32; crate::types::PACKET_TYPE_COUNT],
}

fn count_limit_reached(fired: u32, limit: i32) -> bool {
    limit >= 0 && fired >= limit as u32
}

impl RoutingModule for Greedy {
    type ClassState = ClassStats;
    type NodeState = GreedyNode;

    fn init(_params: &ParamMap) -> Result<Self::ClassState, ConfigError> {
        Ok(ClassStats::default())
    }

    fn destroy(class: &mut Self::ClassState) {
        debug!("greedy: class destroyed, {} nodes bound", class.nodes_bound);
    }

    fn bind(_class: &Self::ClassState, node: NodeId, params: &ParamMap) -> Result<Self::NodeState, ConfigError> {
        let params = GreedyParams::from_params(params)?;
        Ok(GreedyNode {
            id: node,
            params,
            neighbor_positions: std::collections::HashMap::new(),
            hello_fired: 0,
            counters: [0; crate::types::PACKET_TYPE_COUNT],
        })
    }

    fn unbind(class: &mut Self::ClassState, state: &mut Self::NodeState) {
        class.nodes_bound += 1;
        class.fold_received(&state.counters);
        debug!("greedy: node {} unbound", state.id);
    }

    fn bootstrap(state: &mut Self::NodeState, node: &dyn NodeView, mac: &mut dyn Mac, sched: &mut dyn Scheduler) {
        let _ = mac.header_size();
        if state.params.hello.status {
            sched.schedule(state.params.hello.start, node.id(), TimerEvent::Hello);
        }
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
        if node.kind() == NodeKind::Anchor {
            return;
        }
        state.counters[packet.header.packet_type.counter_index()] += 1;
        match packet.header.packet_type {
            PacketType::Hello => {
                if let SubHeader::Hello(hello) = &packet.sub {
                    handle_hello(state, &packet.header, hello);
                }
            }
            PacketType::Data => handle_data(state, node, mac, packet),
            _ => warn!(
                "{}",
                RoutingError::UnknownPacketType(packet.header.packet_type, node.id())
            ),
        }
    }

    fn handle_timer(
        state: &mut Self::NodeState,
        node: &dyn NodeView,
        mac: &mut dyn Mac,
        sched: &mut dyn Scheduler,
        event: TimerEvent,
    ) {
        if event == TimerEvent::Hello {
            fire_hello(state, node, mac, sched);
        }
    }
}

fn fire_hello(state: &mut GreedyNode, node: &dyn NodeView, mac: &mut dyn Mac, sched: &mut dyn Scheduler) {
    if !node.is_alive() {
        return;
    }
    let header = CommonHeader {
        source: node.id(),
        link_dst: NodeId::BROADCAST,
        end_dst: NodeId::BROADCAST,
        source_kind: node.kind(),
        packet_type: PacketType::Hello,
        hop: 0,
    };
    let hello = HelloHeader {
        kind: node.kind(),
        position: node.position(),
        hop_to_sink: -1,
        sink_id: None,
        one_hop_neighbors: Vec::new(),
    };
    let mut packet = Packet::new(header, SubHeader::Hello(hello));
    packet.real_size_bits = state.params.hello_packet_real_size as u64 * 8;
    if mac.set_header(&packet).is_ok() {
        Greedy::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
    state.hello_fired += 1;
    if !count_limit_reached(state.hello_fired, state.params.hello.count_limit) {
        sched.schedule(sched.now() + state.params.hello.period, node.id(), TimerEvent::Hello);
    }
}

fn handle_hello(state: &mut GreedyNode, header: &CommonHeader, hello: &HelloHeader) {
    state.neighbor_positions.insert(header.source, hello.position);
}

fn handle_data(state: &mut GreedyNode, node: &dyn NodeView, mac: &mut dyn Mac, mut packet: Packet) {
    if packet.header.end_dst == node.id() {
        debug!("greedy: {} delivered DATA from {}", node.id(), packet.header.source);
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
        Greedy::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testkit::TestWorld;

    fn params(pairs: &[(&str, &str)]) -> ParamMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn forwards_towards_a_closer_neighbor() {
        let class = Greedy::init(&ParamMap::new()).unwrap();
        let mut world: TestWorld<Greedy> = TestWorld::new(class, 15.0, 8, 1);
        for (i, x) in [0.0, 10.0, 20.0].into_iter().enumerate() {
            world
                .add_node(
                    NodeId(i as u32),
                    NodeKind::Sensor,
                    Position::new(x, 0.0, 0.0),
                    &params(&[("hello_period", "1000")]),
                )
                .unwrap();
        }
        world.run_until(2_000);
        assert!(world.state(NodeId(0)).neighbor_positions.contains_key(&NodeId(1)));
        world.originate_data(NodeId(0), NodeId(2)).unwrap();
    }

    #[test]
    fn local_minimum_yields_no_route() {
        let positions = std::collections::HashMap::new();
        let result = pick_next_hop(&positions, Position::new(0.0, 0.0, 0.0), Position::new(10.0, 0.0, 0.0));
        assert_eq!(result, None);
    }
}
