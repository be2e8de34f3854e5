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

#![deny(missing_docs, missing_debug_implementations)]

//! # wsn-routing
//!
//! A pluggable suite of routing protocols for a wireless-sensor-network
//! discrete-event simulator. It does not model the scheduler, the radio/MAC
//! layer, or node mobility itself — those are the three collaborator seams
//! in [`scheduler`] that a host simulator implements once. Every protocol in
//! this crate is generic over them and is therefore unit-testable standalone
//! (see the fakes in `testkit`, used by each module's own tests).
//!
//! ## Main concepts
//!
//! [`protocol::RoutingModule`] is the uniform eight-operation contract every
//! protocol below implements, so a host can bind any of them to a node
//! without caring which one it got:
//!
//! - [`staticfile`]: routes read once from a static `id dst nexthop` file.
//! - [`greedy`]: greedy geographic forwarding, neighbor positions learned
//!   via periodic HELLO.
//! - [`staticgeo`]: greedy geographic forwarding over a position table read
//!   once from configuration; no control-plane traffic at all.
//! - [`diffusion`]: Directed Diffusion, a sink-initiated gradient flood.
//! - [`aodv`]: AODV, on-demand route discovery.
//! - [`olsrv2`]: OLSRv2, proactive link-state routing with MPR flooding.
//!
//! [`packet`] defines the wire format shared by all of them: one
//! [`packet::CommonHeader`] plus a [`packet::SubHeader`] selected by packet
//! type. [`config`] turns a node's raw string-keyed parameter bag into a
//! validated, strongly typed struct per module, failing `bind` with a
//! [`types::ConfigError`] on a bad value.
//!
//! ## Example usage
//!
//! ```
//! use wsn_routing::config::ParamMap;
//! use wsn_routing::protocol::RoutingModule;
//! use wsn_routing::staticfile::StaticFile;
//!
//! let params = ParamMap::new();
//! // `init` is called once per simulation class, `bind` once per node; a
//! // host simulator drives the remaining lifecycle (bootstrap/rx/tx/timers).
//! let class = StaticFile::init(&params);
//! assert!(class.is_ok());
//! ```

pub mod aodv;
pub mod config;
pub mod diffusion;
pub mod geo;
pub mod greedy;
pub mod neighbor;
pub mod olsrv2;
pub mod packet;
pub mod protocol;
pub mod route;
pub mod scheduler;
pub mod seenset;
pub mod staticfile;
pub mod staticgeo;
pub mod types;

#[cfg(test)]
pub(crate) mod testkit;
