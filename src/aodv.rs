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

//! AODV: on-demand route discovery via RREQ flood / RREP unicast reply
//! (`SPEC_FULL.md` §4.3).
//!
//! Grounded on `aodv.c` and `routing_rreq_management.c`.

use std::collections::HashMap;

use log::{debug, trace, warn};

use crate::config::AodvParams;
use crate::neighbor::NeighborTable;
use crate::packet::{CommonHeader, DataHeader, HelloHeader, Packet, RreqHeader, RrepHeader, SubHeader};
use crate::protocol::RoutingModule;
use crate::route::DestRouteTable;
use crate::scheduler::{Mac, NodeView, Scheduler, TimerEvent};
use crate::seenset::{Freshness, SeenKey, SeenSet};
use crate::types::{
    ClassStats, ConfigError, NodeId, NodeKind, PacketType, RoutingError, PACKET_TYPE_COUNT,
};

/// Marker type selecting the AODV implementation of [`RoutingModule`].
#[derive(Debug)]
pub struct Aodv;

/// Per-node AODV state.
#[derive(Debug)]
pub struct AodvNode {
    id: NodeId,
    params: AodvParams,
    neighbors: NeighborTable,
    /// Forward routes to destinations, admitted from RREP.
    routes: DestRouteTable,
    /// Reverse routes to RREQ originators, admitted from RREQ, used to
    /// unicast RREPs back.
    reverse: DestRouteTable,
    seen_rreq: SeenSet,
    mac_header_size: u32,
    next_rreq_seq: u32,
    next_rrep_seq: u32,
    hello_fired: u32,
    rreq_fired: HashMap<NodeId, u32>,
    counters: [u32; PACKET_TYPE_COUNT],
}

fn count_limit_reached(fired: u32, limit: i32) -> bool {
    limit >= 0 && fired >= limit as u32
}

impl RoutingModule for Aodv {
    type ClassState = ClassStats;
    type NodeState = AodvNode;

    fn init(_params: &crate::config::ParamMap) -> Result<Self::ClassState, ConfigError> {
        Ok(ClassStats::default())
    }

    fn destroy(class: &mut Self::ClassState) {
        debug!(
            "aodv: class destroyed, {} nodes bound, {:?} received",
            class.nodes_bound, class.packets_received
        );
    }

    fn bind(
        _class: &Self::ClassState,
        node: NodeId,
        params: &crate::config::ParamMap,
    ) -> Result<Self::NodeState, ConfigError> {
        let params = AodvParams::from_params(params)?;
        Ok(AodvNode {
            id: node,
            params,
            neighbors: NeighborTable::new(),
            routes: DestRouteTable::new(),
            reverse: DestRouteTable::new(),
            seen_rreq: SeenSet::new(),
            mac_header_size: 0,
            next_rreq_seq: 0,
            next_rrep_seq: 0,
            hello_fired: 0,
            rreq_fired: HashMap::new(),
            counters: [0; PACKET_TYPE_COUNT],
        })
    }

    fn unbind(class: &mut Self::ClassState, state: &mut Self::NodeState) {
        class.nodes_bound += 1;
        class.fold_received(&state.counters);
        debug!("aodv: node {} unbound", state.id);
    }

    fn bootstrap(
        state: &mut Self::NodeState,
        node: &dyn NodeView,
        mac: &mut dyn Mac,
        sched: &mut dyn Scheduler,
    ) {
        state.mac_header_size = mac.header_size();
        if state.params.common.hello.status {
            sched.schedule(state.params.common.hello.start, node.id(), TimerEvent::Hello);
        }
    }

    fn set_header(
        state: &mut Self::NodeState,
        node: &dyn NodeView,
        sched: &mut dyn Scheduler,
        packet: &mut Packet,
        dst: NodeId,
    ) -> Result<(), RoutingError> {
        match state.routes.get(dst) {
            Some(route) => {
                packet.header.source = node.id();
                packet.header.source_kind = node.kind();
                packet.header.link_dst = route.next_hop;
                packet.header.end_dst = dst;
                packet.header.packet_type = PacketType::Data;
                packet.header.hop = 0;
                packet.sub = SubHeader::Data(DataHeader::NextHop);
                Ok(())
            }
            None => {
                sched.schedule(sched.now(), node.id(), TimerEvent::Rreq(dst));
                Err(RoutingError::NoRoute(dst))
            }
        }
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
        sched: &mut dyn Scheduler,
        packet: Packet,
    ) {
        if node.kind() == NodeKind::Anchor {
            trace!("{}", RoutingError::AnchorIngress(node.id()));
            return;
        }
        state.counters[packet.header.packet_type.counter_index()] += 1;
        match packet.header.packet_type {
            PacketType::Hello => {
                if let SubHeader::Hello(hello) = &packet.sub {
                    handle_hello(state, sched, &packet.header, hello, packet.rx_power);
                }
            }
            PacketType::Rreq => {
                if let SubHeader::Rreq(rreq) = packet.sub.clone() {
                    handle_rreq(state, node, mac, sched, &packet.header, &rreq);
                }
            }
            PacketType::Rrep => {
                if let SubHeader::Rrep(rrep) = packet.sub.clone() {
                    handle_rrep(state, node, mac, sched, &packet.header, &rrep);
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
        match event {
            TimerEvent::Hello => fire_hello(state, node, mac, sched),
            TimerEvent::Rreq(target) => originate_rreq(state, node, mac, sched, target),
            TimerEvent::RreqRebroadcast(packet) => rebroadcast_rreq(state, mac, packet),
            TimerEvent::RrepFromIntermediate(packet) => fire_intermediate_rrep(state, mac, packet),
            _ => {}
        }
    }
}

fn fire_hello(state: &mut AodvNode, node: &dyn NodeView, mac: &mut dyn Mac, sched: &mut dyn Scheduler) {
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
    packet.real_size_bits = state.params.common.hello_packet_real_size as u64 * 8;
    if mac.set_header(&packet).is_ok() {
        Aodv::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
    state.hello_fired += 1;
    if !count_limit_reached(state.hello_fired, state.params.common.hello.count_limit) {
        sched.schedule(
            sched.now() + state.params.common.hello.period,
            node.id(),
            TimerEvent::Hello,
        );
    }
    let dead = state
        .neighbors
        .sweep(sched.now(), state.params.common.hello_timeout);
    for id in dead {
        state.routes.invalidate_via(id);
        state.reverse.invalidate_via(id);
    }
}

fn handle_hello(
    state: &mut AodvNode,
    sched: &mut dyn Scheduler,
    header: &CommonHeader,
    hello: &HelloHeader,
    rx_power: f64,
) {
    state.neighbors.observe_hello(
        header.source,
        hello.kind,
        hello.position,
        hello.hop_to_sink,
        rx_power,
        sched.now(),
        state.params.common.hello.start,
        state.params.common.hello.period,
        state.params.common.lqe.rssi_smoothing_factor,
    );
}

fn originate_rreq(state: &mut AodvNode, node: &dyn NodeView, mac: &mut dyn Mac, sched: &mut dyn Scheduler, target: NodeId) {
    if state.routes.get(target).is_some() {
        return;
    }
    let fired = state.rreq_fired.entry(target).or_insert(0);
    if count_limit_reached(*fired, state.params.rreq.count_limit) {
        return;
    }
    *fired += 1;
    let seq = state.next_rreq_seq;
    state.next_rreq_seq += 1;
    let key = SeenKey {
        originator: node.id(),
        target,
        data_type: state.params.rreq_data_type,
    };
    state.seen_rreq.record(key, seq, sched.now());
    let header = CommonHeader {
        source: node.id(),
        link_dst: NodeId::BROADCAST,
        end_dst: NodeId::BROADCAST,
        source_kind: node.kind(),
        packet_type: PacketType::Rreq,
        hop: 0,
    };
    let rreq = RreqHeader {
        originator: node.id(),
        target,
        seq,
        ttl: state.params.rreq_ttl,
        ttl_max: state.params.rreq_ttl,
        data_type: state.params.rreq_data_type,
    };
    let mut packet = Packet::new(header, SubHeader::Rreq(rreq));
    packet.real_size_bits = state.params.rreq_packet_real_size as u64 * 8;
    if mac.set_header(&packet).is_ok() {
        Aodv::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
    if state.params.rreq.status {
        sched.schedule(
            sched.now() + state.params.rreq.period,
            node.id(),
            TimerEvent::Rreq(target),
        );
    }
}

fn handle_rreq(
    state: &mut AodvNode,
    node: &dyn NodeView,
    mac: &mut dyn Mac,
    sched: &mut dyn Scheduler,
    header: &CommonHeader,
    rreq: &RreqHeader,
) {
    let key = SeenKey {
        originator: rreq.originator,
        target: rreq.target,
        data_type: rreq.data_type,
    };
    if state.seen_rreq.seen(key, rreq.seq) == Freshness::Duplicate {
        trace!("{}", RoutingError::DuplicateFlood(rreq.originator, rreq.seq));
        return;
    }
    // Recorded up front, before branching into target-reply, intermediate-RREP,
    // or forward. The cooperative single-threaded scheduler never interleaves
    // another RREQ arrival inside this call, so recording here vs. after each
    // branch's own RREP/forward is observably equivalent.
    state.seen_rreq.record(key, rreq.seq, sched.now());

    let hop_count = header.hop + 1;
    state
        .reverse
        .offer_from_rreq(rreq.originator, header.source, hop_count, rreq.seq, sched.now());

    if node.id() == rreq.target {
        reply_as_target(state, node, mac, rreq);
        return;
    }

    if let Some(route) = state.routes.get(rreq.target).cloned() {
        let rrep = RrepHeader {
            src: rreq.target,
            dst: rreq.originator,
            seq: route.seq_rrep,
            seq_rreq: rreq.seq,
            hop_to_dst: route.hop_count,
        };
        let rrep_header = CommonHeader {
            source: node.id(),
            link_dst: NodeId::BROADCAST,
            end_dst: rreq.originator,
            source_kind: node.kind(),
            packet_type: PacketType::Rrep,
            hop: route.hop_count,
        };
        let packet = Packet::new(rrep_header, SubHeader::Rrep(rrep));
        let at = sched.now() + sched.jitter(state.params.rrep_propagation_backoff);
        sched.schedule(at, node.id(), TimerEvent::RrepFromIntermediate(packet));
        return;
    }

    if rreq.ttl == 0 {
        trace!("{}", RoutingError::TtlExhausted);
        return;
    }
    if sched.uniform01() >= state.params.rreq_propagation_probability {
        trace!("{}", RoutingError::ProbabilityDrop);
        return;
    }
    let mut fwd_header = header.clone();
    fwd_header.source = node.id();
    fwd_header.hop = hop_count;
    let mut fwd_rreq = rreq.clone();
    fwd_rreq.ttl -= 1;
    let packet = Packet::new(fwd_header, SubHeader::Rreq(fwd_rreq));
    let at = sched.now() + sched.jitter(state.params.rreq_propagation_backoff);
    sched.schedule(at, node.id(), TimerEvent::RreqRebroadcast(packet));
}

fn reply_as_target(state: &mut AodvNode, node: &dyn NodeView, mac: &mut dyn Mac, rreq: &RreqHeader) {
    let Some(reverse) = state.reverse.get(rreq.originator) else {
        warn!("{}", RoutingError::NoRoute(rreq.originator));
        return;
    };
    let seq = state.next_rrep_seq;
    state.next_rrep_seq += 1;
    let header = CommonHeader {
        source: node.id(),
        link_dst: reverse.next_hop,
        end_dst: rreq.originator,
        source_kind: node.kind(),
        packet_type: PacketType::Rrep,
        hop: 0,
    };
    let rrep = RrepHeader {
        src: node.id(),
        dst: rreq.originator,
        seq,
        seq_rreq: rreq.seq,
        hop_to_dst: 0,
    };
    let mut packet = Packet::new(header, SubHeader::Rrep(rrep));
    packet.real_size_bits = state.params.rrep_packet_real_size as u64 * 8;
    if mac.set_header(&packet).is_ok() {
        Aodv::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
}

fn rebroadcast_rreq(state: &mut AodvNode, mac: &mut dyn Mac, mut packet: Packet) {
    let (originator, target, seq, data_type) = match &packet.sub {
        SubHeader::Rreq(rreq) => (rreq.originator, rreq.target, rreq.seq, rreq.data_type),
        _ => return,
    };
    if state.routes.get(target).is_some() {
        // a route surfaced while we were backing off; no need to keep flooding
        return;
    }
    let key = SeenKey {
        originator,
        target,
        data_type,
    };
    if state.seen_rreq.seen(key, seq + 1) == Freshness::Duplicate {
        return;
    }
    packet.real_size_bits = state.params.rreq_packet_real_size as u64 * 8;
    packet.header.link_dst = NodeId::BROADCAST;
    if mac.set_header(&packet).is_ok() {
        Aodv::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
}

fn fire_intermediate_rrep(state: &mut AodvNode, mac: &mut dyn Mac, mut packet: Packet) {
    let rrep = match &packet.sub {
        SubHeader::Rrep(rrep) => rrep.clone(),
        _ => return,
    };
    let Some(route) = state.routes.get(rrep.src) else {
        return;
    };
    if route.hop_count > rrep.hop_to_dst || route.seq_rrep < rrep.seq {
        // superseded by a worse or staler route since this was scheduled
        return;
    }
    let Some(reverse) = state.reverse.get(rrep.dst) else {
        return;
    };
    packet.header.link_dst = reverse.next_hop;
    packet.real_size_bits = state.params.rrep_packet_real_size as u64 * 8;
    if mac.set_header(&packet).is_ok() {
        Aodv::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
}

fn handle_rrep(
    state: &mut AodvNode,
    node: &dyn NodeView,
    mac: &mut dyn Mac,
    sched: &mut dyn Scheduler,
    header: &CommonHeader,
    rrep: &RrepHeader,
) {
    let hop_count = header.hop + 1;
    let accepted = state
        .routes
        .offer_from_rrep(rrep.src, header.source, hop_count, rrep.seq, sched.now());
    if !accepted {
        trace!("aodv: stale RREP for {} dropped at {}", rrep.src, node.id());
        return;
    }
    if node.id() == rrep.dst {
        debug!("aodv: {} established route to {}", node.id(), rrep.src);
        return;
    }
    let Some(reverse) = state.reverse.get(rrep.dst) else {
        warn!("{}", RoutingError::NoRoute(rrep.dst));
        return;
    };
    let mut fwd_header = header.clone();
    fwd_header.source = node.id();
    fwd_header.link_dst = reverse.next_hop;
    fwd_header.hop = hop_count;
    let mut fwd_rrep = rrep.clone();
    fwd_rrep.hop_to_dst = hop_count;
    let packet = Packet::new(fwd_header, SubHeader::Rrep(fwd_rrep));
    if mac.set_header(&packet).is_ok() {
        Aodv::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
}

fn handle_data(state: &mut AodvNode, node: &dyn NodeView, mac: &mut dyn Mac, mut packet: Packet) {
    packet.header.hop += 1;
    if packet.header.end_dst == node.id() {
        debug!("aodv: {} delivered DATA from {}", node.id(), packet.header.source);
        return;
    }
    let Some(route) = state.routes.get(packet.header.end_dst) else {
        warn!("{}", RoutingError::NoRoute(packet.header.end_dst));
        return;
    };
    packet.header.link_dst = route.next_hop;
    if mac.set_header(&packet).is_ok() {
        Aodv::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::ParamMap;
    use crate::testkit::TestWorld;
    use crate::types::Position;

    fn params(pairs: &[(&str, &str)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn on_demand_discovery_over_a_line() {
        let class = Aodv::init(&ParamMap::new()).unwrap();
        let mut world: TestWorld<Aodv> = TestWorld::new(class, 15.0, 8, 7);
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
        world.run_until(3_000);
        // node 2 has no route to node 0 yet; originating data triggers RREQ.
        let err = world.originate_data(NodeId(2), NodeId(0));
        assert!(err.is_err());
        world.run_until(10_000);
        assert!(world.state(NodeId(2)).routes.get(NodeId(0)).is_some());
        assert!(world.state(NodeId(0)).routes.get(NodeId(2)).is_some());
    }

    #[test]
    fn diamond_topology_suppresses_duplicate_rreq_and_rrep() {
        // A=0 broadcasts an RREQ that reaches both B=1 and C=2, which each
        // forward it on to D=3; A and D are not themselves in range, nor are
        // B and C of each other.
        let class = Aodv::init(&ParamMap::new()).unwrap();
        let mut world: TestWorld<Aodv> = TestWorld::new(class, 12.0, 8, 3);
        let backoff = [
            ("rreq_propagation_backoff", "100"),
            ("rrep_propagation_backoff", "50"),
        ];
        for (id, pos) in [
            (0u32, Position::new(0.0, 0.0, 0.0)),
            (1, Position::new(10.0, 0.0, 0.0)),
            (2, Position::new(0.0, 10.0, 0.0)),
            (3, Position::new(10.0, 10.0, 0.0)),
        ] {
            world
                .add_node(NodeId(id), NodeKind::Sensor, pos, &params(&backoff))
                .unwrap();
        }
        assert!(world.originate_data(NodeId(0), NodeId(3)).is_err());
        world.run_until(1_000);
        assert!(world.state(NodeId(0)).routes.get(NodeId(3)).is_some());
        assert_eq!(world.state(NodeId(3)).reverse.get(NodeId(0)).unwrap().hop_count, 2);
        // D replied exactly once; only one RREP, forwarded by whichever of
        // B/C first reached D, comes back to A.
        assert_eq!(
            world.state(NodeId(0)).counters[PacketType::Rrep.counter_index()],
            1
        );
    }

    #[test]
    fn duplicate_rreq_is_suppressed() {
        let mut seen = SeenSet::new();
        let key = SeenKey {
            originator: NodeId(1),
            target: NodeId(9),
            data_type: -1,
        };
        assert_eq!(seen.seen(key, 4), Freshness::Fresh);
        seen.record(key, 4, 0);
        assert_eq!(seen.seen(key, 4), Freshness::Duplicate);
        assert_eq!(seen.seen(key, 5), Freshness::Fresh);
    }
}
