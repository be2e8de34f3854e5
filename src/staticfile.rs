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

//! Static file-driven routing: forwarding decisions read from a
//! preconfigured `id dst nexthop` table, with no control traffic at all
//! (`SPEC_FULL.md` §4.5).

use std::collections::HashMap;
use std::fs;

use log::{debug, warn};

use crate::config::{ParamMap, StaticFileParams};
use crate::packet::{CommonHeader, DataHeader, Packet, SubHeader};
use crate::protocol::RoutingModule;
use crate::scheduler::{Mac, NodeView, Scheduler, TimerEvent};
use crate::types::{ClassStats, ConfigError, NodeId, NodeKind, RoutingError};

/// Marker type selecting the static file-driven implementation of
/// [`RoutingModule`].
#[derive(Debug)]
pub struct StaticFile;

/// Per-node static routing state.
#[derive(Debug)]
pub struct StaticFileNode {
    id: NodeId,
    identity_kind: NodeKind,
    /// `dst -> next_hop`, this node's own rows of the parsed route file.
    routes: HashMap<NodeId, NodeId>,
    counters: [u32; crate::types::PACKET_TYPE_COUNT],
}

/// Parse a route file's lines of the form `id dst nexthop`, keeping only
/// the rows whose `id` matches `self_id`.
///
/// Grounded on the original's static route-table loader
/// (`filestatic.c`): whitespace-separated columns, blank lines and
/// lines starting with `#` ignored.
fn parse_routes(path: &str, self_id: NodeId) -> Result<HashMap<NodeId, NodeId>, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::MalformedFile {
        path: path.to_string(),
        line: 0,
        reason: e.to_string(),
    })?;
    let mut routes = HashMap::new();
    for (lineno, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split_whitespace().collect();
        let malformed = || ConfigError::MalformedFile {
            path: path.to_string(),
            line: lineno + 1,
            reason: "expected `id dst nexthop`".to_string(),
        };
        let [id_s, dst_s, nexthop_s] = cols[..] else {
            return Err(malformed());
        };
        let id: u32 = id_s.parse().map_err(|_| malformed())?;
        if NodeId(id) != self_id {
            continue;
        }
        let dst: u32 = dst_s.parse().map_err(|_| malformed())?;
        let nexthop: u32 = nexthop_s.parse().map_err(|_| malformed())?;
        routes.insert(NodeId(dst), NodeId(nexthop));
    }
    Ok(routes)
}

impl RoutingModule for StaticFile {
    type ClassState = ClassStats;
    type NodeState = StaticFileNode;

    fn init(_params: &ParamMap) -> Result<Self::ClassState, ConfigError> {
        Ok(ClassStats::default())
    }

    fn destroy(class: &mut Self::ClassState) {
        debug!("staticfile: class destroyed, {} nodes bound", class.nodes_bound);
    }

    fn bind(_class: &Self::ClassState, node: NodeId, params: &ParamMap) -> Result<Self::NodeState, ConfigError> {
        let params = StaticFileParams::from_params(params)?;
        let routes = parse_routes(&params.route_file, node)?;
        Ok(StaticFileNode {
            id: node,
            identity_kind: params.identity.node_type,
            routes,
            counters: [0; crate::types::PACKET_TYPE_COUNT],
        })
    }

    fn unbind(class: &mut Self::ClassState, state: &mut Self::NodeState) {
        class.nodes_bound += 1;
        class.fold_received(&state.counters);
        debug!("staticfile: node {} unbound", state.id);
    }

    fn bootstrap(_state: &mut Self::NodeState, _node: &dyn NodeView, mac: &mut dyn Mac, _sched: &mut dyn Scheduler) {
        let _ = mac.header_size();
    }

    fn set_header(
        state: &mut Self::NodeState,
        node: &dyn NodeView,
        _sched: &mut dyn Scheduler,
        packet: &mut Packet,
        dst: NodeId,
    ) -> Result<(), RoutingError> {
        let next_hop = *state.routes.get(&dst).ok_or(RoutingError::NoRoute(dst))?;
        packet.header.source = node.id();
        packet.header.source_kind = node.kind();
        packet.header.link_dst = next_hop;
        packet.header.end_dst = dst;
        packet.header.packet_type = crate::types::PacketType::Data;
        packet.header.hop = 0;
        packet.sub = SubHeader::Data(DataHeader::Static);
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
        if packet.header.packet_type != crate::types::PacketType::Data {
            warn!(
                "{}",
                RoutingError::UnknownPacketType(packet.header.packet_type, node.id())
            );
            return;
        }
        forward_data(state, mac, packet);
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

fn forward_data(state: &mut StaticFileNode, mac: &mut dyn Mac, mut packet: Packet) {
    if packet.header.end_dst == state.id {
        debug!("staticfile: {} delivered DATA from {}", state.id, packet.header.source);
        return;
    }
    let Some(&next_hop) = state.routes.get(&packet.header.end_dst) else {
        warn!("{}", RoutingError::NoRoute(packet.header.end_dst));
        return;
    };
    packet.header.source = state.id;
    packet.header.link_dst = next_hop;
    packet.header.hop += 1;
    if mac.set_header(&packet).is_ok() {
        mac.transmit(packet);
    } else {
        warn!("{}", RoutingError::HeaderInstallFailed);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{PacketType, Position};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    /// A route file in `std::env::temp_dir()`, removed on drop.
    struct TempRouteFile(PathBuf);

    impl TempRouteFile {
        fn new(lines: &[&str]) -> Self {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!("wsn-routing-test-{}-{n}.routes", std::process::id()));
            std::fs::write(&path, lines.join("\n")).expect("write temp route file");
            Self(path)
        }

        fn as_str(&self) -> &str {
            self.0.to_str().unwrap()
        }
    }

    impl Drop for TempRouteFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn write_route_file(lines: &[&str]) -> TempRouteFile {
        TempRouteFile::new(lines)
    }

    fn params(route_file: &str) -> ParamMap {
        let mut m = ParamMap::new();
        m.insert("route_file".to_string(), route_file.to_string());
        m
    }

    #[test]
    fn parses_and_keeps_only_own_rows() {
        let file = write_route_file(&["# comment", "0 2 1", "1 2 2", ""]);
        let routes = parse_routes(file.as_str(), NodeId(0)).unwrap();
        assert_eq!(routes.get(&NodeId(2)), Some(&NodeId(1)));
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn malformed_line_is_rejected() {
        let file = write_route_file(&["0 2"]);
        let err = parse_routes(file.as_str(), NodeId(0)).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedFile { .. }));
    }

    #[test]
    fn forwards_via_configured_next_hop() {
        let file = write_route_file(&["0 2 1"]);
        let class = StaticFile::init(&ParamMap::new()).unwrap();
        let mut state = StaticFile::bind(&class, NodeId(0), &params(file.as_str())).unwrap();
        let header = CommonHeader {
            source: NodeId(0),
            link_dst: NodeId::BROADCAST,
            end_dst: NodeId(2),
            source_kind: NodeKind::Sensor,
            packet_type: PacketType::Data,
            hop: 0,
        };
        let mut packet = Packet::new(header, SubHeader::Data(DataHeader::Static));
        struct DummySched;
        impl Scheduler for DummySched {
            fn now(&self) -> crate::types::VirtualTime {
                0
            }
            fn schedule(&mut self, _at: crate::types::VirtualTime, _node: NodeId, _event: TimerEvent) {}
            fn uniform01(&mut self) -> f64 {
                0.0
            }
        }
        struct DummyNode;
        impl NodeView for DummyNode {
            fn id(&self) -> NodeId {
                NodeId(0)
            }
            fn kind(&self) -> NodeKind {
                NodeKind::Sensor
            }
            fn position(&self) -> Position {
                Position::new(0.0, 0.0, 0.0)
            }
            fn is_alive(&self) -> bool {
                true
            }
            fn node_count(&self) -> usize {
                2
            }
        }
        StaticFile::set_header(&mut state, &DummyNode, &mut DummySched, &mut packet, NodeId(2)).unwrap();
        assert_eq!(packet.header.link_dst, NodeId(1));
    }
}
