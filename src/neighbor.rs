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

//! Neighbor table and link-quality estimator (LQE), shared by every
//! dynamic routing engine (`SPEC_FULL.md` §4.1).

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::types::{NodeId, NodeKind, Position, VirtualTime};

/// A one-hop peer and its link-quality state.
///
/// Invariants: `rx_count >= 1`, `0.0 <= lqe <= 1.0`, `last_heard` is
/// monotone non-decreasing across calls to [`NeighborTable::observe_hello`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborEntry {
    /// Neighbor's id.
    pub id: NodeId,
    /// Neighbor's kind, as last advertised.
    pub kind: NodeKind,
    /// Neighbor's position, as last advertised.
    pub position: Position,
    /// Neighbor's hop-to-sink, as last advertised (`-1` if unknown).
    pub hop_to_sink: i32,
    /// Number of HELLOs received from this neighbor.
    pub rx_count: u32,
    /// Number of HELLO slots inferred as lost.
    pub loss_count: u32,
    /// Reception-ratio link-quality estimate: `rx / (rx + loss)`.
    pub lqe: f64,
    /// Smoothed received power.
    pub smoothed_power: f64,
    /// HELLO slot number of the most recent reception.
    pub last_slot: i64,
    /// HELLO slot number of the first reception.
    pub first_slot: i64,
    /// Virtual time of the most recent reception.
    pub last_heard: VirtualTime,
    /// OLSRv2: this neighbor's own advertised one-hop list (the basis of
    /// the 2-hop view).
    pub one_hop_neighbors: Vec<NodeId>,
}

impl NeighborEntry {
    fn new(
        id: NodeId,
        kind: NodeKind,
        position: Position,
        hop_to_sink: i32,
        slot: i64,
        rx_power: f64,
        now: VirtualTime,
    ) -> Self {
        let loss_count = slot.max(0) as u32;
        Self {
            id,
            kind,
            position,
            hop_to_sink,
            rx_count: 1,
            loss_count,
            lqe: 1.0 / (1 + loss_count) as f64,
            smoothed_power: rx_power,
            last_slot: slot,
            first_slot: slot,
            last_heard: now,
            one_hop_neighbors: Vec::new(),
        }
    }
}

/// Per-node collection of one-hop peers with link-quality state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeighborTable {
    entries: HashMap<NodeId, NeighborEntry>,
}

impl NeighborTable {
    /// Create an empty neighbor table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a neighbor by id.
    pub fn get(&self, id: NodeId) -> Option<&NeighborEntry> {
        self.entries.get(&id)
    }

    /// Number of known neighbors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no neighbor is known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unordered iteration over all known neighbors.
    pub fn for_each(&self, mut visitor: impl FnMut(&NeighborEntry)) {
        for entry in self.entries.values() {
            visitor(entry);
        }
    }

    /// Ids of all known neighbors, sorted for wire-stable HELLO/TC
    /// advertisement and reproducible logs.
    pub fn ids(&self) -> Vec<NodeId> {
        self.entries.keys().copied().sorted().collect()
    }

    /// Record a HELLO reception from `src`, updating or inserting its
    /// neighbor entry. Returns the resulting entry.
    ///
    /// Slot accounting (ground truth: `routing_neighbors_management.c`):
    /// `slot = floor((now - hello_start) / hello_period)`. On update,
    /// `loss_count` absorbs every slot that elapsed since the previous
    /// reception without a HELLO (`slot_now - last_slot - 1`); on insert,
    /// `loss_count` is seeded to the insertion slot itself (every slot
    /// since `hello_start` is assumed lost).
    #[allow(clippy::too_many_arguments)]
    pub fn observe_hello(
        &mut self,
        src: NodeId,
        src_kind: NodeKind,
        src_pos: Position,
        src_hop_to_sink: i32,
        rx_power: f64,
        now: VirtualTime,
        hello_start: VirtualTime,
        hello_period: VirtualTime,
        smoothing_factor: f64,
    ) -> &NeighborEntry {
        let slot = slot_of(now, hello_start, hello_period);
        self.entries
            .entry(src)
            .and_modify(|n| {
                n.rx_count += 1;
                let gap = slot - n.last_slot - 1;
                n.loss_count += gap.max(0) as u32;
                n.lqe = n.rx_count as f64 / (n.rx_count + n.loss_count) as f64;
                n.smoothed_power =
                    smoothing_factor * n.smoothed_power + (1.0 - smoothing_factor) * rx_power;
                n.last_slot = slot;
                n.last_heard = now;
                n.kind = src_kind;
                n.position = src_pos;
                n.hop_to_sink = src_hop_to_sink;
            })
            .or_insert_with(|| {
                NeighborEntry::new(src, src_kind, src_pos, src_hop_to_sink, slot, rx_power, now)
            })
    }

    /// OLSRv2: replace the recorded one-hop list of `src` (called whenever
    /// a HELLO from `src` is processed, after [`Self::observe_hello`]).
    pub fn set_one_hop_neighbors(&mut self, src: NodeId, list: Vec<NodeId>) {
        if let Some(n) = self.entries.get_mut(&src) {
            n.one_hop_neighbors = list;
        }
    }

    /// Remove every neighbor not heard from within `timeout`, returning the
    /// ids evicted. Callers in the dynamic routing engines must follow up
    /// by invalidating routes whose next-hop is among the evicted ids.
    pub fn sweep(&mut self, now: VirtualTime, timeout: VirtualTime) -> Vec<NodeId> {
        let dead: Vec<NodeId> = self
            .entries
            .iter()
            .filter(|(_, n)| now.saturating_sub(n.last_heard) >= timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            self.entries.remove(id);
        }
        dead
    }
}

fn slot_of(now: VirtualTime, hello_start: VirtualTime, hello_period: VirtualTime) -> i64 {
    if hello_period == 0 {
        return 0;
    }
    now.saturating_sub(hello_start) as i64 / hello_period as i64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_seeds_loss_from_slot() {
        let mut t = NeighborTable::new();
        let pos = Position::new(0.0, 0.0, 0.0);
        t.observe_hello(NodeId(1), NodeKind::Sensor, pos, -1, -50.0, 5_000, 0, 1_000, 0.9);
        let n = t.get(NodeId(1)).unwrap();
        assert_eq!(n.rx_count, 1);
        assert_eq!(n.loss_count, 5);
        approx::assert_relative_eq!(n.lqe, 1.0 / 6.0, epsilon = 1e-9);
    }

    #[test]
    fn update_accounts_for_missed_slots() {
        let mut t = NeighborTable::new();
        let pos = Position::new(0.0, 0.0, 0.0);
        t.observe_hello(NodeId(1), NodeKind::Sensor, pos, -1, -50.0, 0, 0, 1_000, 0.9);
        // Two HELLO periods elapse with no reception, then one arrives.
        t.observe_hello(NodeId(1), NodeKind::Sensor, pos, -1, -50.0, 3_000, 0, 1_000, 0.9);
        let n = t.get(NodeId(1)).unwrap();
        assert_eq!(n.rx_count, 2);
        assert_eq!(n.loss_count, 2);
        approx::assert_relative_eq!(n.lqe, 2.0 / 4.0, epsilon = 1e-9);
    }

    #[test]
    fn lqe_stays_in_unit_interval() {
        let mut t = NeighborTable::new();
        let pos = Position::new(0.0, 0.0, 0.0);
        for k in 0..20 {
            t.observe_hello(
                NodeId(1),
                NodeKind::Sensor,
                pos,
                -1,
                -40.0,
                k * 1_000,
                0,
                1_000,
                0.9,
            );
            let n = t.get(NodeId(1)).unwrap();
            assert!(n.lqe >= 0.0 && n.lqe <= 1.0);
            assert!(n.rx_count >= 1);
        }
    }

    #[test]
    fn sweep_evicts_stale_neighbors() {
        let mut t = NeighborTable::new();
        let pos = Position::new(0.0, 0.0, 0.0);
        t.observe_hello(NodeId(1), NodeKind::Sensor, pos, -1, -50.0, 0, 0, 1_000, 0.9);
        assert!(t.sweep(100, 3_000).is_empty());
        let evicted = t.sweep(5_000, 3_000);
        assert_eq!(evicted, vec![NodeId(1)]);
        assert!(t.is_empty());
    }
}
