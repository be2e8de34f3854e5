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

//! Directed Diffusion: sinks flood INTEREST, which both carries every node's
//! HELLO-advertised best hop-to-sink gradient and installs a gradient route
//! directly on reception, and DATA climbs the gradient one hop at a time
//! (`SPEC_FULL.md` §4.2).
//!
//! Grounded on `directed_diffusion.c`, `routing_sink_interest_management.c`
//! and `routing_routes_management.c`.

use log::{debug, trace, warn};

use crate::config::DiffusionParams;
use crate::neighbor::NeighborTable;
use crate::packet::{CommonHeader, DataHeader, HelloHeader, InterestHeader, Packet, SubHeader};
use crate::protocol::RoutingModule;
use crate::route::SinkRouteTable;
use crate::scheduler::{Mac, NodeView, Scheduler, TimerEvent};
use crate::seenset::{Freshness, SeenKey, SeenSet};
use crate::types::{
    ClassStats, ConfigError, NodeId, NodeKind, PacketType, RoutingError, VirtualTime,
    PACKET_TYPE_COUNT,
};

/// Marker type selecting the Directed Diffusion implementation of
/// [`RoutingModule`].
#[derive(Debug)]
pub struct Diffusion;

/// Per-node Directed Diffusion state.
#[derive(Debug)]
pub struct DiffusionNode {
    id: NodeId,
    params: DiffusionParams,
    neighbors: NeighborTable,
    routes: SinkRouteTable,
    seen: SeenSet,
    mac_header_size: u32,
    next_interest_seq: u32,
    hello_fired: u32,
    interest_fired: u32,
    counters: [u32; PACKET_TYPE_COUNT],
    /// Virtual time of this node's first successful sink-route install, via
    /// either HELLO gradient or INTEREST (`-1` sentinel in the original).
    path_established_at: Option<VirtualTime>,
}

fn count_limit_reached(fired: u32, limit: i32) -> bool {
    limit >= 0 && fired >= limit as u32
}

fn sink_gradient(node: &dyn NodeView, routes: &SinkRouteTable) -> (Option<NodeId>, i32) {
    if node.kind() == NodeKind::Sink {
        (Some(node.id()), 0)
    } else {
        match routes.closest() {
            Some(r) => (Some(r.sink), r.hop_to_sink as i32),
            None => (None, -1),
        }
    }
}

impl RoutingModule for Diffusion {
    type ClassState = ClassStats;
    type NodeState = DiffusionNode;

    fn init(_params: &crate::config::ParamMap) -> Result<Self::ClassState, ConfigError> {
        Ok(ClassStats::default())
    }

    fn destroy(class: &mut Self::ClassState) {
        debug!(
            "diffusion: class destroyed, {} nodes bound, {:?} received",
            class.nodes_bound, class.packets_received
        );
    }

    fn bind(
        _class: &Self::ClassState,
        node: NodeId,
        params: &crate::config::ParamMap,
    ) -> Result<Self::NodeState, ConfigError> {
        let params = DiffusionParams::from_params(params)?;
        Ok(DiffusionNode {
            id: node,
            params,
            neighbors: NeighborTable::new(),
            routes: SinkRouteTable::new(),
            seen: SeenSet::new(),
            mac_header_size: 0,
            next_interest_seq: 0,
            hello_fired: 0,
            interest_fired: 0,
            counters: [0; PACKET_TYPE_COUNT],
            path_established_at: None,
        })
    }

    fn unbind(class: &mut Self::ClassState, state: &mut Self::NodeState) {
        class.nodes_bound += 1;
        class.fold_received(&state.counters);
        if let Some(delay) = state.path_established_at {
            class.fold_path_established(delay);
        }
        debug!("diffusion: node {} unbound", state.id);
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
        if node.kind() == NodeKind::Sink && state.params.interest.status {
            sched.schedule(state.params.interest.start, node.id(), TimerEvent::Interest);
        }
    }

    fn set_header(
        state: &mut Self::NodeState,
        node: &dyn NodeView,
        _sched: &mut dyn Scheduler,
        packet: &mut Packet,
        dst: NodeId,
    ) -> Result<(), RoutingError> {
        let route = if dst.is_broadcast() {
            state.routes.closest()
        } else {
            state.routes.get(dst)
        }
        .ok_or(RoutingError::NoRoute(dst))?;
        packet.header.source = node.id();
        packet.header.source_kind = node.kind();
        packet.header.link_dst = route.next_hop;
        packet.header.end_dst = route.sink;
        packet.header.packet_type = PacketType::Data;
        packet.header.hop = 0;
        packet.sub = SubHeader::Data(DataHeader::NextHop);
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
            PacketType::Interest => {
                if let SubHeader::Interest(interest) = &packet.sub {
                    let interest = interest.clone();
                    handle_interest(state, node, sched, &packet.header.clone(), &interest);
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
            TimerEvent::Interest => fire_interest(state, node, mac, sched),
            TimerEvent::InterestRebroadcast(packet) => rebroadcast_interest(state, mac, packet),
            _ => {}
        }
    }
}

fn handle_hello(
    state: &mut DiffusionNode,
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
    let Some(sink) = hello.sink_id else { return };
    if hello.hop_to_sink < 0 {
        return;
    }
    let entry = state.neighbors.get(header.source).expect("just observed");
    if entry.lqe < state.params.common.lqe.lqe_threshold {
        return;
    }
    let was_unrouted = state.routes.closest().is_none();
    state.routes.offer(
        sink,
        header.source,
        entry.lqe,
        hello.hop_to_sink as u32 + 1,
        sched.now(),
    );
    if was_unrouted && state.path_established_at.is_none() {
        state.path_established_at = Some(sched.now());
    }
}

fn fire_hello(state: &mut DiffusionNode, node: &dyn NodeView, mac: &mut dyn Mac, sched: &mut dyn Scheduler) {
    if !node.is_alive() {
        return;
    }
    let (sink_id, hop_to_sink) = sink_gradient(node, &state.routes);
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
        hop_to_sink,
        sink_id,
        one_hop_neighbors: Vec::new(),
    };
    let mut packet = Packet::new(header, SubHeader::Hello(hello));
    packet.real_size_bits = state.params.common.hello_packet_real_size as u64 * 8;
    if mac.set_header(&packet).is_ok() {
        Diffusion::tx(state, mac, packet);
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
    }
}

fn fire_interest(state: &mut DiffusionNode, node: &dyn NodeView, mac: &mut dyn Mac, sched: &mut dyn Scheduler) {
    if !node.is_alive() {
        return;
    }
    let seq = state.next_interest_seq;
    state.next_interest_seq += 1;
    let key = SeenKey {
        originator: node.id(),
        target: node.id(),
        data_type: state.params.data_type,
    };
    state.seen.record(key, seq, sched.now());
    let header = CommonHeader {
        source: node.id(),
        link_dst: NodeId::BROADCAST,
        end_dst: NodeId::BROADCAST,
        source_kind: node.kind(),
        packet_type: PacketType::Interest,
        hop: 0,
    };
    let interest = InterestHeader {
        originator: node.id(),
        seq,
        ttl: state.params.ttl,
        data_type: state.params.data_type,
    };
    let mut packet = Packet::new(header, SubHeader::Interest(interest));
    packet.real_size_bits = state.params.interest_packet_real_size as u64 * 8;
    if mac.set_header(&packet).is_ok() {
        Diffusion::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
    state.interest_fired += 1;
    if !count_limit_reached(state.interest_fired, state.params.interest.count_limit) {
        sched.schedule(
            sched.now() + state.params.interest.period,
            node.id(),
            TimerEvent::Interest,
        );
    }
}

fn handle_interest(
    state: &mut DiffusionNode,
    node: &dyn NodeView,
    sched: &mut dyn Scheduler,
    header: &CommonHeader,
    interest: &InterestHeader,
) {
    if node.kind() == NodeKind::Sink {
        return;
    }
    // `header.hop` already carries the relaying neighbor's own distance from
    // the originator, so the receiver's is one more; no need to reconstruct
    // it from a separate initial/remaining TTL pair.
    let was_unrouted = state.routes.closest().is_none();
    state
        .routes
        .offer(interest.originator, header.source, 1.0, header.hop + 1, sched.now());
    if was_unrouted && state.path_established_at.is_none() {
        state.path_established_at = Some(sched.now());
    }
    let key = SeenKey {
        originator: interest.originator,
        target: interest.originator,
        data_type: interest.data_type,
    };
    if state.seen.seen(key, interest.seq) == Freshness::Duplicate {
        trace!(
            "{}",
            RoutingError::DuplicateFlood(interest.originator, interest.seq)
        );
        return;
    }
    state.seen.record(key, interest.seq, sched.now());
    if interest.ttl == 0 {
        trace!("{}", RoutingError::TtlExhausted);
        return;
    }
    if sched.uniform01() >= state.params.propagation_probability {
        trace!("{}", RoutingError::ProbabilityDrop);
        return;
    }
    let mut rebroadcast = header.clone();
    rebroadcast.source = node.id();
    rebroadcast.hop += 1;
    let mut next = *interest;
    next.ttl -= 1;
    let packet = Packet::new(rebroadcast, SubHeader::Interest(next));
    let at = sched.now() + sched.jitter(state.params.propagation_backoff);
    sched.schedule(at, node.id(), TimerEvent::InterestRebroadcast(packet));
}

fn rebroadcast_interest(state: &mut DiffusionNode, mac: &mut dyn Mac, mut packet: Packet) {
    let (originator, seq, data_type) = match &packet.sub {
        SubHeader::Interest(interest) => (interest.originator, interest.seq, interest.data_type),
        _ => return,
    };
    let key = SeenKey {
        originator,
        target: originator,
        data_type,
    };
    if state.seen.seen(key, seq + 1) == Freshness::Duplicate {
        // a fresher flood for this lineage arrived while this one backed off
        return;
    }
    packet.real_size_bits = state.params.interest_packet_real_size as u64 * 8;
    packet.header.link_dst = NodeId::BROADCAST;
    if mac.set_header(&packet).is_ok() {
        Diffusion::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
}

fn handle_data(state: &mut DiffusionNode, node: &dyn NodeView, mac: &mut dyn Mac, mut packet: Packet) {
    packet.header.hop += 1;
    if node.kind() == NodeKind::Sink || packet.header.end_dst == node.id() {
        debug!("diffusion: {} delivered DATA from {}", node.id(), packet.header.source);
        return;
    }
    let dst = packet.header.end_dst;
    let route = if dst.is_broadcast() {
        state.routes.closest()
    } else {
        state.routes.get(dst)
    };
    let Some(route) = route else {
        warn!("{}", RoutingError::NoRoute(dst));
        return;
    };
    packet.header.link_dst = route.next_hop;
    if mac.set_header(&packet).is_ok() {
        Diffusion::tx(state, mac, packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
}
