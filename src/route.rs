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

//! Route tables: the sink-oriented shape used by Directed Diffusion and the
//! destination-oriented shape used by AODV (`SPEC_FULL.md` §3, §4.3, §4.4).
//!
//! OLSRv2 keeps its own topology matrix and on-demand Dijkstra path cache
//! instead of a seq/hop route table; see [`crate::olsrv2`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, VirtualTime};

/// A sink-oriented route (Directed Diffusion): the current best next-hop
/// towards a given sink.
///
/// Invariant: among all entries installed for a given `sink`, the table
/// keeps exactly the one considered "current" — there is no "non-current"
/// entry retained alongside it. Updates are monotone in `(fewer hops, then
/// higher LQE)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRoute {
    /// The sink this route leads to.
    pub sink: NodeId,
    /// Next hop towards the sink.
    pub next_hop: NodeId,
    /// Next hop's link quality at the time of this update.
    pub next_hop_lqe: f64,
    /// Hop count to the sink via this route.
    pub hop_to_sink: u32,
    /// Virtual time of the last update.
    pub last_update: VirtualTime,
}

/// Per-sink gradient table for Directed Diffusion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SinkRouteTable {
    routes: HashMap<NodeId, SinkRoute>,
}

impl SinkRouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current route to `sink`, if any.
    pub fn get(&self, sink: NodeId) -> Option<&SinkRoute> {
        self.routes.get(&sink)
    }

    /// The route with the fewest hops among all tracked sinks (used to
    /// resolve "closest sink" data destinations); ties broken by smallest
    /// sink id.
    pub fn closest(&self) -> Option<&SinkRoute> {
        self.routes
            .values()
            .min_by_key(|r| (r.hop_to_sink, r.sink))
    }

    /// Offer a candidate update for `sink` via `next_hop`. Installs the
    /// candidate, replacing any existing route for `sink`, iff the table
    /// has no entry yet, or the candidate has fewer hops, or the hop count
    /// ties and the candidate's LQE is strictly higher. Returns `true` if
    /// the route was installed or changed.
    pub fn offer(
        &mut self,
        sink: NodeId,
        next_hop: NodeId,
        next_hop_lqe: f64,
        hop_to_sink: u32,
        now: VirtualTime,
    ) -> bool {
        let better = match self.routes.get(&sink) {
            None => true,
            Some(cur) => {
                hop_to_sink < cur.hop_to_sink
                    || (hop_to_sink == cur.hop_to_sink && next_hop_lqe > cur.next_hop_lqe)
            }
        };
        if better {
            self.routes.insert(
                sink,
                SinkRoute {
                    sink,
                    next_hop,
                    next_hop_lqe,
                    hop_to_sink,
                    last_update: now,
                },
            );
        }
        better
    }

    /// Remove every route whose next-hop is `dead`, returning the sinks
    /// affected. Called when the neighbor table evicts `dead`
    /// (`SPEC_FULL.md` §8, "neighbor timeout").
    pub fn invalidate_via(&mut self, dead: NodeId) -> Vec<NodeId> {
        let affected: Vec<NodeId> = self
            .routes
            .iter()
            .filter(|(_, r)| r.next_hop == dead)
            .map(|(sink, _)| *sink)
            .collect();
        for sink in &affected {
            self.routes.remove(sink);
        }
        affected
    }
}

/// A destination-oriented route (AODV): the current best next-hop towards
/// a given destination, gated by RREQ/RREP sequence freshness.
///
/// Invariant: an update replaces the stored entry only if
/// `seq >= stored.seq_rreq && hop_count < stored.hop_count`, or if
/// `seq > stored.seq_rreq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestRoute {
    /// Destination this route leads to.
    pub destination: NodeId,
    /// Next hop towards the destination.
    pub next_hop: NodeId,
    /// Hop count to the destination via this route.
    pub hop_count: u32,
    /// Most recent RREQ sequence number that updated this entry.
    pub seq_rreq: u32,
    /// Most recent RREP sequence number that updated this entry.
    pub seq_rrep: u32,
    /// Virtual time of the last update.
    pub last_update: VirtualTime,
}

/// Per-destination route table for AODV (and reused, with `seq_rrep`
/// unused, for AODV's reverse-route-to-originator bookkeeping).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestRouteTable {
    routes: HashMap<NodeId, DestRoute>,
}

impl DestRouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current route to `destination`, if any.
    pub fn get(&self, destination: NodeId) -> Option<&DestRoute> {
        self.routes.get(&destination)
    }

    /// Offer a candidate update for the reverse (RREQ-driven) direction:
    /// admits the update only if absent, or `seq > stored.seq_rreq`, or
    /// (`seq == stored.seq_rreq` and `hop_count < stored.hop_count`).
    /// Returns `true` if installed.
    pub fn offer_from_rreq(
        &mut self,
        destination: NodeId,
        next_hop: NodeId,
        hop_count: u32,
        seq: u32,
        now: VirtualTime,
    ) -> bool {
        self.offer_seq_gated(destination, next_hop, hop_count, seq, true, now)
    }

    /// Offer a candidate update for the forward (RREP-driven) direction:
    /// same admission rule as [`Self::offer_from_rreq`], keyed on
    /// `seq_rrep` rather than `seq_rreq`. Returns `true` if installed.
    pub fn offer_from_rrep(
        &mut self,
        destination: NodeId,
        next_hop: NodeId,
        hop_count: u32,
        seq: u32,
        now: VirtualTime,
    ) -> bool {
        self.offer_seq_gated(destination, next_hop, hop_count, seq, false, now)
    }

    fn offer_seq_gated(
        &mut self,
        destination: NodeId,
        next_hop: NodeId,
        hop_count: u32,
        seq: u32,
        via_rreq: bool,
        now: VirtualTime,
    ) -> bool {
        let admit = match self.routes.get(&destination) {
            None => true,
            Some(cur) => {
                let stored_seq = if via_rreq { cur.seq_rreq } else { cur.seq_rrep };
                seq > stored_seq || (seq == stored_seq && hop_count < cur.hop_count)
            }
        };
        if admit {
            let entry = self.routes.entry(destination).or_insert(DestRoute {
                destination,
                next_hop,
                hop_count,
                seq_rreq: 0,
                seq_rrep: 0,
                last_update: now,
            });
            entry.next_hop = next_hop;
            entry.hop_count = hop_count;
            entry.last_update = now;
            if via_rreq {
                entry.seq_rreq = seq;
            } else {
                entry.seq_rrep = seq;
            }
        }
        admit
    }

    /// Remove every route whose next-hop is `dead`, returning the
    /// destinations affected.
    pub fn invalidate_via(&mut self, dead: NodeId) -> Vec<NodeId> {
        let affected: Vec<NodeId> = self
            .routes
            .iter()
            .filter(|(_, r)| r.next_hop == dead)
            .map(|(dst, _)| *dst)
            .collect();
        for dst in &affected {
            self.routes.remove(dst);
        }
        affected
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sink_route_prefers_fewer_hops() {
        let mut t = SinkRouteTable::new();
        assert!(t.offer(NodeId(0), NodeId(1), 0.9, 3, 0));
        assert!(!t.offer(NodeId(0), NodeId(2), 0.99, 3, 1)); // tie, lower lqe: rejected
        assert!(t.offer(NodeId(0), NodeId(2), 0.99, 2, 2)); // fewer hops: accepted
        assert_eq!(t.get(NodeId(0)).unwrap().next_hop, NodeId(2));
    }

    #[test]
    fn sink_route_tie_prefers_higher_lqe() {
        let mut t = SinkRouteTable::new();
        t.offer(NodeId(0), NodeId(1), 0.5, 2, 0);
        assert!(t.offer(NodeId(0), NodeId(2), 0.8, 2, 1));
        assert_eq!(t.get(NodeId(0)).unwrap().next_hop, NodeId(2));
    }

    #[test]
    fn dest_route_seq_gates_hop_improvement() {
        let mut t = DestRouteTable::new();
        assert!(t.offer_from_rreq(NodeId(5), NodeId(1), 3, 10, 0));
        // same seq, worse hop count: rejected
        assert!(!t.offer_from_rreq(NodeId(5), NodeId(2), 4, 10, 1));
        // same seq, better hop count: accepted
        assert!(t.offer_from_rreq(NodeId(5), NodeId(2), 2, 10, 2));
        // older seq: rejected even with better hop count
        assert!(!t.offer_from_rreq(NodeId(5), NodeId(3), 1, 9, 3));
        // newer seq: accepted even with worse hop count
        assert!(t.offer_from_rreq(NodeId(5), NodeId(3), 9, 11, 4));
        assert_eq!(t.get(NodeId(5)).unwrap().next_hop, NodeId(3));
    }

    #[test]
    fn invalidate_via_removes_affected_routes_only() {
        let mut t = DestRouteTable::new();
        t.offer_from_rreq(NodeId(1), NodeId(9), 1, 1, 0);
        t.offer_from_rreq(NodeId(2), NodeId(8), 1, 1, 0);
        let affected = t.invalidate_via(NodeId(9));
        assert_eq!(affected, vec![NodeId(1)]);
        assert!(t.get(NodeId(1)).is_none());
        assert!(t.get(NodeId(2)).is_some());
    }
}
