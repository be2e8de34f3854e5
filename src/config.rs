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

//! Per-node configuration parsing.
//!
//! Parameters arrive as a simple string-keyed bag — mirroring the original's
//! `param_t` list read out of a scenario file — and are turned into a
//! strongly typed, validated struct per module. A parse failure aborts
//! `bind` with a [`ConfigError`] (`SPEC_FULL.md` §6, §7).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ConfigError, NodeId, NodeKind, VirtualTime};

/// Raw per-node parameters, as handed to
/// [`crate::protocol::RoutingModule::bind`].
pub type ParamMap = BTreeMap<String, String>;

fn get<'a>(params: &'a ParamMap, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str)
}

fn parse_opt<T: std::str::FromStr>(params: &ParamMap, key: &str) -> Result<Option<T>, ConfigError> {
    match get(params, key) {
        None => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: key.to_string(),
                value: v.to_string(),
            }),
    }
}

fn parse_or<T: std::str::FromStr>(
    params: &ParamMap,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(params, key)?.unwrap_or(default))
}

fn require<T: std::str::FromStr>(params: &ParamMap, key: &str) -> Result<T, ConfigError> {
    parse_opt(params, key)?.ok_or_else(|| ConfigError::MissingParameter(key.to_string()))
}

fn in_unit_interval(name: &str, value: f64) -> Result<f64, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            name: name.to_string(),
            value: value.to_string(),
            reason: "must lie in [0, 1]".to_string(),
        })
    }
}

/// `node_type` / `sink_id`, recognized by every protocol module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// This node's kind.
    pub node_type: NodeKind,
    /// The sink id, when this node is bootstrapped knowing which sink it
    /// targets (AODV); `None` otherwise.
    pub sink_id: Option<NodeId>,
}

impl NodeIdentity {
    /// Parse `node_type` (`sensor` | `sink` | `anchor`, default `sensor`)
    /// and optional `sink_id`.
    pub fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        let node_type = match get(params, "node_type") {
            None | Some("sensor") => NodeKind::Sensor,
            Some("sink") => NodeKind::Sink,
            Some("anchor") => NodeKind::Anchor,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "node_type".to_string(),
                    value: other.to_string(),
                })
            }
        };
        let sink_id = parse_opt::<u32>(params, "sink_id")?.map(NodeId);
        Ok(Self { node_type, sink_id })
    }
}

/// Cadence parameters shared by HELLO, RREQ, INTEREST, and TC timers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimerParams {
    /// Whether the timer is armed at all.
    pub status: bool,
    /// Maximum number of firings (`-1` = unlimited).
    pub count_limit: i32,
    /// Virtual time of the first firing.
    pub start: VirtualTime,
    /// Period between firings.
    pub period: VirtualTime,
}

impl TimerParams {
    fn from_params(
        params: &ParamMap,
        prefix: &str,
        default_status: bool,
        default_period: VirtualTime,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            status: parse_or(params, &format!("{prefix}_status"), default_status)?,
            count_limit: parse_or(params, &format!("{prefix}_nbr"), -1)?,
            start: parse_or(params, &format!("{prefix}_start"), 0)?,
            period: parse_or(params, &format!("{prefix}_period"), default_period)?,
        })
    }
}

/// Link-quality estimator tuning parameters, shared by every dynamic
/// routing engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LqeParams {
    /// Number of measurements required to begin smoothing (phase 1).
    pub rssi_smoothing1_nbr: i32,
    /// Number of measurements required to fully smooth (phase 2).
    pub rssi_smoothing2_nbr: i32,
    /// Exponential smoothing factor `alpha` for received power.
    pub rssi_smoothing_factor: f64,
    /// LQE history window width.
    pub lqe_w: i32,
    /// Minimum LQE a neighbor must have for its HELLO to be admitted by the
    /// route table.
    pub lqe_threshold: f64,
}

impl LqeParams {
    fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        let lqe_threshold = in_unit_interval(
            "lqe_threshold",
            parse_or(params, "lqe_threshold", 0.8)?,
        )?;
        let rssi_smoothing_factor = in_unit_interval(
            "rssi_smoothing_factor",
            parse_or(params, "rssi_smoothing_factor", 0.9)?,
        )?;
        Ok(Self {
            rssi_smoothing1_nbr: parse_or(params, "rssi_smoothing1_nbr", 1)?,
            rssi_smoothing2_nbr: parse_or(params, "rssi_smoothing2_nbr", 8)?,
            rssi_smoothing_factor,
            lqe_w: parse_or(params, "lqe_w", 10)?,
            lqe_threshold,
        })
    }
}

fn real_size(params: &ParamMap, key: &str, default: u32) -> Result<u32, ConfigError> {
    parse_or(params, key, default)
}

/// Parameters common to Directed Diffusion, AODV, and OLSRv2: identity,
/// HELLO cadence, LQE tuning, and HELLO's real wire size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonParams {
    /// `node_type` / `sink_id`.
    pub identity: NodeIdentity,
    /// HELLO cadence.
    pub hello: TimerParams,
    /// HELLO neighbor-table eviction timeout.
    pub hello_timeout: VirtualTime,
    /// Link-quality estimator tuning.
    pub lqe: LqeParams,
    /// Real (wire) size of a HELLO packet, in bytes.
    pub hello_packet_real_size: u32,
}

impl CommonParams {
    /// Parse the parameters shared by every dynamic protocol.
    pub fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        let hello = TimerParams::from_params(params, "hello", true, 1_000_000_000)?;
        Ok(Self {
            identity: NodeIdentity::from_params(params)?,
            hello_timeout: parse_or(params, "hello_timeout", 3 * hello.period)?,
            hello,
            lqe: LqeParams::from_params(params)?,
            hello_packet_real_size: real_size(params, "hello_packet_real_size", 20)?,
        })
    }
}

/// Directed Diffusion module parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffusionParams {
    /// Parameters shared with AODV/OLSRv2.
    pub common: CommonParams,
    /// INTEREST cadence (sinks only).
    pub interest: TimerParams,
    /// Probability an intermediate sensor rebroadcasts an otherwise-valid
    /// INTEREST.
    pub propagation_probability: f64,
    /// Upper bound of the uniform rebroadcast jitter.
    pub propagation_backoff: VirtualTime,
    /// Initial TTL of sink-originated INTERESTs.
    pub ttl: u32,
    /// Opaque requested data type.
    pub data_type: i32,
    /// Real size of an INTEREST packet, in bytes.
    pub interest_packet_real_size: u32,
}

impl DiffusionParams {
    /// Parse Directed Diffusion parameters.
    pub fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        let propagation_probability = in_unit_interval(
            "sink_interest_propagation_probability",
            parse_or(params, "sink_interest_propagation_probability", 1.0)?,
        )?;
        Ok(Self {
            common: CommonParams::from_params(params)?,
            interest: TimerParams::from_params(params, "sink_interest", true, 10_000_000_000)?,
            propagation_probability,
            propagation_backoff: parse_or(
                params,
                "sink_interest_propagation_backoff",
                1_000_000_000,
            )?,
            ttl: parse_or(params, "sink_interest_ttl", 9999)?,
            data_type: parse_or(params, "sink_interest_data_type", -1)?,
            interest_packet_real_size: real_size(params, "interest_packet_real_size", 20)?,
        })
    }
}

/// AODV module parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AodvParams {
    /// Parameters shared with Directed Diffusion/OLSRv2.
    pub common: CommonParams,
    /// RREQ retry cadence (used only to bound periodic re-discovery, not
    /// to gate on-demand RREQ origination).
    pub rreq: TimerParams,
    /// Probability an intermediate sensor rebroadcasts an otherwise-valid
    /// RREQ.
    pub rreq_propagation_probability: f64,
    /// Upper bound of the uniform RREQ rebroadcast jitter.
    pub rreq_propagation_backoff: VirtualTime,
    /// Upper bound of the uniform intermediate-RREP jitter.
    pub rrep_propagation_backoff: VirtualTime,
    /// Initial TTL of originated RREQs.
    pub rreq_ttl: u32,
    /// Opaque requested data type.
    pub rreq_data_type: i32,
    /// Real size of an RREQ packet, in bytes.
    pub rreq_packet_real_size: u32,
    /// Real size of an RREP packet, in bytes.
    pub rrep_packet_real_size: u32,
}

impl AodvParams {
    /// Parse AODV parameters.
    pub fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        let rreq_propagation_probability = in_unit_interval(
            "rreq_propagation_probability",
            parse_or(params, "rreq_propagation_probability", 1.0)?,
        )?;
        Ok(Self {
            common: CommonParams::from_params(params)?,
            rreq: TimerParams::from_params(params, "rreq", false, 10_000_000_000)?,
            rreq_propagation_probability,
            rreq_propagation_backoff: parse_or(params, "rreq_propagation_backoff", 1_000_000_000)?,
            rrep_propagation_backoff: parse_or(params, "rrep_propagation_backoff", 200_000_000)?,
            rreq_ttl: parse_or(params, "rreq_ttl", 9999)?,
            rreq_data_type: parse_or(params, "rreq_data_type", -1)?,
            rreq_packet_real_size: real_size(params, "rreq_packet_real_size", 24)?,
            rrep_packet_real_size: real_size(params, "rrep_packet_real_size", 20)?,
        })
    }
}

/// OLSRv2 module parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Olsrv2Params {
    /// Parameters shared with Directed Diffusion/AODV.
    pub common: CommonParams,
    /// TC cadence.
    pub tc: TimerParams,
    /// Real size of a TC packet, in bytes.
    pub tc_packet_real_size: u32,
}

impl Olsrv2Params {
    /// Parse OLSRv2 parameters.
    pub fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        Ok(Self {
            common: CommonParams::from_params(params)?,
            tc: TimerParams::from_params(params, "tc", true, 5_000_000_000)?,
            tc_packet_real_size: real_size(params, "tc_packet_real_size", 24)?,
        })
    }
}

/// Static file-driven routing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticFileParams {
    /// This node's kind.
    pub identity: NodeIdentity,
    /// Path to the `id dst nexthop` route file.
    pub route_file: String,
}

impl StaticFileParams {
    /// Parse static-routing parameters. `route_file` is required.
    pub fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        Ok(Self {
            identity: NodeIdentity::from_params(params)?,
            route_file: require(params, "route_file")?,
        })
    }
}

/// Greedy geographic routing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreedyParams {
    /// This node's kind.
    pub identity: NodeIdentity,
    /// HELLO cadence, used only to advertise this node's own position.
    pub hello: TimerParams,
    /// Real size of a HELLO packet, in bytes.
    pub hello_packet_real_size: u32,
}

impl GreedyParams {
    /// Parse greedy-geographic parameters.
    pub fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        Ok(Self {
            identity: NodeIdentity::from_params(params)?,
            hello: TimerParams::from_params(params, "hello", true, 1_000_000_000)?,
            hello_packet_real_size: real_size(params, "hello_packet_real_size", 20)?,
        })
    }
}

/// Static geographic routing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticGeoParams {
    /// This node's kind.
    pub identity: NodeIdentity,
    /// Inline `id@x,y,z` neighbor position list, semicolon-separated.
    pub positions: String,
}

impl StaticGeoParams {
    /// Parse static-geographic parameters. `positions` is required.
    pub fn from_params(params: &ParamMap) -> Result<Self, ConfigError> {
        Ok(Self {
            identity: NodeIdentity::from_params(params)?,
            positions: require(params, "positions")?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_reference_implementation() {
        let p = AodvParams::from_params(&map(&[])).unwrap();
        assert_eq!(p.common.hello.period, 1_000_000_000);
        assert_eq!(p.common.hello_timeout, 3_000_000_000);
        assert_eq!(p.rreq_ttl, 9999);
        assert_eq!(p.rreq_propagation_backoff, 1_000_000_000);
        assert_eq!(p.rrep_propagation_backoff, 200_000_000);
        assert!((p.common.lqe.lqe_threshold - 0.8).abs() < 1e-12);
        assert!((p.common.lqe.rssi_smoothing_factor - 0.9).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_lqe_threshold_rejected() {
        let err = AodvParams::from_params(&map(&[("lqe_threshold", "1.5")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn missing_route_file_rejected() {
        let err = StaticFileParams::from_params(&map(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter(_)));
    }

    #[test]
    fn bad_node_type_rejected() {
        let err = AodvParams::from_params(&map(&[("node_type", "router")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
