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

//! Flood-suppression caches used to gate duplicate INTEREST/RREQ/RREP
//! (and, for OLSRv2, TC) forwarding (`SPEC_FULL.md` §4.2).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, VirtualTime};

/// Composite key identifying one flood lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeenKey {
    /// Node that originated the flood.
    pub originator: NodeId,
    /// The flood's target (for RREQ/RREP; `originator` again for
    /// INTEREST/TC, which have no separate target).
    pub target: NodeId,
    /// Opaque data-type tag, as carried on the flood packet.
    pub data_type: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SeenEntry {
    last_seq: u32,
    last_time: VirtualTime,
}

/// Whether a `(key, seq)` observation is fresh (no entry yet, or the
/// entry's `last_seq` is strictly older) or a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No prior entry, or the stored sequence is strictly smaller.
    Fresh,
    /// An entry exists with `last_seq >= seq`.
    Duplicate,
}

/// A small table keyed by `(originator, target, data_type)`, with at most
/// one entry per key and a non-decreasing `last_seq`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeenSet {
    entries: HashMap<SeenKey, SeenEntry>,
}

impl SeenSet {
    /// Create an empty seen-set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check freshness of `seq` for `key`, without recording it.
    pub fn seen(&self, key: SeenKey, seq: u32) -> Freshness {
        match self.entries.get(&key) {
            Some(e) if e.last_seq >= seq => Freshness::Duplicate,
            _ => Freshness::Fresh,
        }
    }

    /// Upsert the entry for `key` with `max(seq, stored_seq)` and the given
    /// time. `last_seq` is thus monotone non-decreasing.
    pub fn record(&mut self, key: SeenKey, seq: u32, now: VirtualTime) {
        self.entries
            .entry(key)
            .and_modify(|e| {
                if seq > e.last_seq {
                    e.last_seq = seq;
                }
                e.last_time = now;
            })
            .or_insert(SeenEntry {
                last_seq: seq,
                last_time: now,
            });
    }

    /// Number of tracked flood lineages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no lineage is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn key() -> SeenKey {
        SeenKey {
            originator: NodeId(1),
            target: NodeId(2),
            data_type: 0,
        }
    }

    #[test]
    fn first_observation_is_fresh() {
        let s = SeenSet::new();
        assert_eq!(s.seen(key(), 1), Freshness::Fresh);
    }

    #[test]
    fn duplicate_suppressed_after_record() {
        let mut s = SeenSet::new();
        s.record(key(), 5, 100);
        assert_eq!(s.seen(key(), 5), Freshness::Duplicate);
        assert_eq!(s.seen(key(), 4), Freshness::Duplicate);
        assert_eq!(s.seen(key(), 6), Freshness::Fresh);
    }

    #[test]
    fn last_seq_is_monotone() {
        let mut s = SeenSet::new();
        s.record(key(), 5, 0);
        s.record(key(), 3, 10);
        assert_eq!(s.seen(key(), 5), Freshness::Duplicate);
        assert_eq!(s.seen(key(), 4), Freshness::Duplicate);
    }
}
