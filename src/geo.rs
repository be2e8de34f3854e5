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

//! Greedy-forwarding geometry shared by the two position-based routing
//! modules: [`crate::greedy`] (positions learned via HELLO) and
//! [`crate::staticgeo`] (positions read once from configuration)
//! (`SPEC_FULL.md` §4.7, §4.8).

use std::collections::HashMap;

use crate::types::{NodeId, Position};

/// Among `neighbors` strictly closer to `dst_position` than `self_position`
/// is, pick the closest; ties broken by smallest id. `None` if `self` is a
/// local minimum (no neighbor makes progress towards the destination).
pub fn pick_next_hop(
    neighbors: &HashMap<NodeId, Position>,
    self_position: Position,
    dst_position: Position,
) -> Option<NodeId> {
    let self_dist = self_position.distance(&dst_position);
    let mut best: Option<(NodeId, f64)> = None;
    for (&id, pos) in neighbors {
        let d = pos.distance(&dst_position);
        if d >= self_dist {
            continue;
        }
        best = match best {
            None => Some((id, d)),
            Some((best_id, best_d)) if d < best_d || (d == best_d && id.0 < best_id.0) => {
                Some((id, d))
            }
            other => other,
        };
    }
    best.map(|(id, _)| id)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn picks_closest_strictly_better_neighbor() {
        let mut neighbors = HashMap::new();
        neighbors.insert(NodeId(1), Position::new(5.0, 0.0, 0.0));
        neighbors.insert(NodeId(2), Position::new(8.0, 0.0, 0.0));
        let dst = Position::new(10.0, 0.0, 0.0);
        let self_pos = Position::new(0.0, 0.0, 0.0);
        assert_eq!(pick_next_hop(&neighbors, self_pos, dst), Some(NodeId(2)));
    }

    #[test]
    fn ties_broken_by_smallest_id() {
        let mut neighbors = HashMap::new();
        neighbors.insert(NodeId(5), Position::new(8.0, 0.0, 0.0));
        neighbors.insert(NodeId(2), Position::new(8.0, 0.0, 0.0));
        let dst = Position::new(10.0, 0.0, 0.0);
        let self_pos = Position::new(0.0, 0.0, 0.0);
        assert_eq!(pick_next_hop(&neighbors, self_pos, dst), Some(NodeId(2)));
    }

    #[test]
    fn local_minimum_is_none() {
        let mut neighbors = HashMap::new();
        neighbors.insert(NodeId(1), Position::new(-5.0, 0.0, 0.0));
        let dst = Position::new(10.0, 0.0, 0.0);
        let self_pos = Position::new(0.0, 0.0, 0.0);
        assert_eq!(pick_next_hop(&neighbors, self_pos, dst), None);
    }
}
