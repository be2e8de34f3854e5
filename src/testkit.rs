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

//! Fakes for the scheduler/MAC/node collaborators, and a small multi-node
//! harness used to drive end-to-end scenarios in tests without a real host
//! simulator.
//!
//! Grounded on the teacher's `event::queue::BasicEventQueue` /
//! `SimpleTimingModel` (`rand_queue` feature): a simple priority queue keyed
//! by virtual time, plus a source of jitter for timer backoff.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::Packet;
use crate::protocol::RoutingModule;
use crate::scheduler::{Mac, NodeView, Scheduler, TimerEvent};
use crate::types::{NodeId, NodeKind, PacketType, Position, RoutingError, VirtualTime};

/// An immutable snapshot of one node's identity, used to satisfy
/// [`NodeView`] during a single event dispatch.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    id: NodeId,
    kind: NodeKind,
    position: Position,
    alive: bool,
    node_count: usize,
    /// Shared, cheaply cloned handle onto the world's current position
    /// table, backing the [`NodeView::position_of`] location service.
    positions: Rc<RefCell<HashMap<NodeId, Position>>>,
}

impl NodeView for NodeSnapshot {
    fn id(&self) -> NodeId {
        self.id
    }
    fn kind(&self) -> NodeKind {
        self.kind
    }
    fn position(&self) -> Position {
        self.position
    }
    fn is_alive(&self) -> bool {
        self.alive
    }
    fn node_count(&self) -> usize {
        self.node_count
    }
    fn position_of(&self, id: NodeId) -> Option<Position> {
        self.positions.borrow().get(&id).copied()
    }
}

/// A [`Mac`] fake that just records transmitted packets for the harness to
/// deliver according to the world's connectivity model.
pub struct TestMacHandle<'a> {
    header_size: u32,
    fail_next: bool,
    outbox: &'a mut Vec<Packet>,
}

impl Mac for TestMacHandle<'_> {
    fn header_size(&self) -> u32 {
        self.header_size
    }

    fn set_header(&mut self, _packet: &Packet) -> Result<(), ()> {
        if self.fail_next {
            Err(())
        } else {
            Ok(())
        }
    }

    fn transmit(&mut self, packet: Packet) {
        self.outbox.push(packet);
    }
}

/// A [`Scheduler`] fake backed by a deterministic RNG and a scratch list of
/// requested timer registrations, drained by the harness after each event.
pub struct TestSchedHandle<'a> {
    now: VirtualTime,
    rng: &'a mut StdRng,
    scheduled: &'a mut Vec<(VirtualTime, NodeId, TimerEvent)>,
}

impl Scheduler for TestSchedHandle<'_> {
    fn now(&self) -> VirtualTime {
        self.now
    }

    fn schedule(&mut self, at: VirtualTime, node: NodeId, event: TimerEvent) {
        self.scheduled.push((at, node, event));
    }

    fn uniform01(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

struct Node<S> {
    kind: NodeKind,
    position: Position,
    alive: bool,
    state: S,
}

#[derive(Debug)]
enum QueueEvent {
    Timer(TimerEvent),
    Deliver(Packet),
}

struct QueueEntry {
    time: VirtualTime,
    seq: u64,
    node: NodeId,
    event: QueueEvent,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// A minimal multi-node world: fixed positions and a communication range,
/// driving instances of a single [`RoutingModule`] `M` through their
/// `bootstrap`/`rx`/`handle_timer` lifecycle.
pub struct TestWorld<M: RoutingModule> {
    class: M::ClassState,
    nodes: HashMap<NodeId, Node<M::NodeState>>,
    range: f64,
    mac_header_size: u32,
    queue: BinaryHeap<Reverse<QueueEntry>>,
    seq: u64,
    rng: StdRng,
    time: VirtualTime,
    /// Nodes whose next `set_header` MAC install should fail (used to test
    /// `HeaderInstallFailed` handling).
    pub fail_mac_once: std::collections::HashSet<NodeId>,
    positions: Rc<RefCell<HashMap<NodeId, Position>>>,
    /// `(node, hop)` for every DATA packet delivered to its final
    /// destination, in delivery order — a packet is final here the same way
    /// every engine's own `handle_data` decides it (`end_dst == node`),
    /// recorded before dispatch so `hop` is the value the module itself
    /// would see at the point it counts its own reception.
    pub delivered: Vec<(NodeId, u32)>,
}

impl<M: RoutingModule> TestWorld<M> {
    /// Build a world with the given communication range (same units as
    /// [`Position::distance`]) and a fixed RNG seed for reproducibility.
    pub fn new(class: M::ClassState, range: f64, mac_header_size: u32, seed: u64) -> Self {
        Self {
            class,
            nodes: HashMap::new(),
            range,
            mac_header_size,
            queue: BinaryHeap::new(),
            seq: 0,
            rng: StdRng::seed_from_u64(seed),
            time: 0,
            fail_mac_once: Default::default(),
            positions: Rc::new(RefCell::new(HashMap::new())),
            delivered: Vec::new(),
        }
    }

    /// Add a node, bind its module state, and bootstrap it (arming its
    /// initial timers).
    pub fn add_node(
        &mut self,
        id: NodeId,
        kind: NodeKind,
        position: Position,
        params: &crate::config::ParamMap,
    ) -> Result<(), crate::types::ConfigError> {
        let mut state = M::bind(&self.class, id, params)?;
        self.positions.borrow_mut().insert(id, position);
        let snapshot = self.snapshot(id, kind, position, true);
        let mut outbox = Vec::new();
        let mut scheduled = Vec::new();
        {
            let mut mac = TestMacHandle {
                header_size: self.mac_header_size,
                fail_next: false,
                outbox: &mut outbox,
            };
            let mut sched = TestSchedHandle {
                now: self.time,
                rng: &mut self.rng,
                scheduled: &mut scheduled,
            };
            M::bootstrap(&mut state, &snapshot, &mut mac, &mut sched);
        }
        self.nodes.insert(
            id,
            Node {
                kind,
                position,
                alive: true,
                state,
            },
        );
        self.drain(id, outbox, scheduled);
        Ok(())
    }

    /// Mutable access to a node's position (to model mobility).
    pub fn set_position(&mut self, id: NodeId, position: Position) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.position = position;
            self.positions.borrow_mut().insert(id, position);
        }
    }

    /// Mark a node dead or alive.
    pub fn set_alive(&mut self, id: NodeId, alive: bool) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.alive = alive;
        }
    }

    /// Read-only access to a node's module state.
    pub fn state(&self, id: NodeId) -> &M::NodeState {
        &self.nodes.get(&id).expect("unknown node").state
    }

    fn snapshot(&self, id: NodeId, kind: NodeKind, position: Position, alive: bool) -> NodeSnapshot {
        NodeSnapshot {
            id,
            kind,
            position,
            alive,
            node_count: self.nodes.len().max(1),
            positions: Rc::clone(&self.positions),
        }
    }

    /// Have `from` attempt to originate a DATA packet towards `dst`
    /// (`NodeId::BROADCAST` meaning "closest sink" where the module
    /// supports it). Delivers the packet through the world if a route was
    /// found.
    pub fn originate_data(&mut self, from: NodeId, dst: NodeId) -> Result<(), RoutingError> {
        use crate::packet::{CommonHeader, DataHeader, SubHeader};
        use crate::types::PacketType;

        let node = self.nodes.get(&from).expect("unknown node");
        let snapshot = self.snapshot(from, node.kind, node.position, node.alive);
        let mut header = CommonHeader {
            source: from,
            link_dst: NodeId::BROADCAST,
            end_dst: dst,
            source_kind: node.kind,
            packet_type: PacketType::Data,
            hop: 0,
        };
        let mut packet = Packet::new(header.clone(), SubHeader::Data(DataHeader::NextHop));
        let mut outbox = Vec::new();
        let mut scheduled = Vec::new();
        let result = {
            let state = &mut self.nodes.get_mut(&from).unwrap().state;
            let mut sched = TestSchedHandle {
                now: self.time,
                rng: &mut self.rng,
                scheduled: &mut scheduled,
            };
            M::set_header(state, &snapshot, &mut sched, &mut packet, dst)
        };
        header = packet.header.clone();
        self.drain(from, Vec::new(), scheduled);
        result?;
        let mut mac_outbox = Vec::new();
        {
            let state = &mut self.nodes.get_mut(&from).unwrap().state;
            let mut mac = TestMacHandle {
                header_size: self.mac_header_size,
                fail_next: false,
                outbox: &mut mac_outbox,
            };
            M::tx(state, &mut mac, Packet { header, ..packet });
        }
        outbox.append(&mut mac_outbox);
        self.drain(from, outbox, Vec::new());
        Ok(())
    }

    /// Run the event queue forward until `deadline` (inclusive).
    pub fn run_until(&mut self, deadline: VirtualTime) {
        while let Some(Reverse(entry)) = self.queue.peek() {
            if entry.time > deadline {
                break;
            }
            let Reverse(entry) = self.queue.pop().unwrap();
            self.time = entry.time;
            let Some(node) = self.nodes.get(&entry.node) else {
                continue;
            };
            if !node.alive {
                continue;
            }
            let snapshot = self.snapshot(entry.node, node.kind, node.position, node.alive);
            let fail = self.fail_mac_once.remove(&entry.node);
            if let QueueEvent::Deliver(pkt) = &entry.event {
                if pkt.header.packet_type == PacketType::Data && pkt.header.end_dst == entry.node {
                    self.delivered.push((entry.node, pkt.header.hop + 1));
                }
            }
            let mut outbox = Vec::new();
            let mut scheduled = Vec::new();
            {
                let state = &mut self.nodes.get_mut(&entry.node).unwrap().state;
                let mut mac = TestMacHandle {
                    header_size: self.mac_header_size,
                    fail_next: fail,
                    outbox: &mut outbox,
                };
                let mut sched = TestSchedHandle {
                    now: self.time,
                    rng: &mut self.rng,
                    scheduled: &mut scheduled,
                };
                match entry.event {
                    QueueEvent::Timer(ev) => {
                        M::handle_timer(state, &snapshot, &mut mac, &mut sched, ev)
                    }
                    QueueEvent::Deliver(pkt) => M::rx(state, &snapshot, &mut mac, &mut sched, pkt),
                }
            }
            self.drain(entry.node, outbox, scheduled);
        }
    }

    fn drain(
        &mut self,
        from: NodeId,
        outbox: Vec<Packet>,
        scheduled: Vec<(VirtualTime, NodeId, TimerEvent)>,
    ) {
        for (at, node, event) in scheduled {
            self.push(at, node, QueueEvent::Timer(event));
        }
        let Some(sender) = self.nodes.get(&from) else {
            return;
        };
        let sender_pos = sender.position;
        for packet in outbox {
            let link_dst = packet.header.link_dst;
            let deliver_at = self.time + 1;
            if link_dst.is_broadcast() {
                let recipients: Vec<NodeId> = self
                    .nodes
                    .iter()
                    .filter(|(id, n)| **id != from && n.alive && n.position.distance(&sender_pos) <= self.range)
                    .map(|(id, _)| *id)
                    .collect();
                for r in recipients {
                    let mut p = packet.clone();
                    p.rx_power = -sender_pos.distance(&self.nodes[&r].position);
                    self.push(deliver_at, r, QueueEvent::Deliver(p));
                }
            } else if let Some(n) = self.nodes.get(&link_dst) {
                if n.alive && n.position.distance(&sender_pos) <= self.range {
                    let mut p = packet.clone();
                    p.rx_power = -sender_pos.distance(&n.position);
                    self.push(deliver_at, link_dst, QueueEvent::Deliver(p));
                }
            }
        }
    }

    fn push(&mut self, at: VirtualTime, node: NodeId, event: QueueEvent) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Reverse(QueueEntry {
            time: at,
            seq,
            node,
            event,
        }));
    }
}
