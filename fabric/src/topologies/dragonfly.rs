// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Relative-wired dragonfly.
//!
//! Groups of `a = 2p` routers, a full mesh within each group, and exactly one
//! global channel between every ordered pair of groups. The wiring is
//! *relative*: the `p` global links of the router at in-group index `d` reach
//! the groups at forward offsets `d*p + 1 ..= d*p + p` from its own group,
//! whichever group that is. Both ends of every channel fall out of the same
//! local arithmetic, so routing needs no per-group tables.

use std::fmt;

use petgraph::graph::DiGraph;

use crate::config::Configuration;
use crate::error::Error;
use crate::network::{Channel, ChannelRef, Endpoint, Router};
use crate::Cycle;

/// The topology parameters, fixed once per simulation.
///
/// Routing functions receive this by reference instead of reaching for
/// process-wide state; everything here is derived from the configured `k`
/// (the processors-per-router count `p`) at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DragonflyParams {
    p: usize,
    a: usize,
    g: usize,
    radix: usize,
    routers: usize,
    nodes: usize,
    channels: usize,
    local_latency: Cycle,
    global_latency: Cycle,
}

impl DragonflyParams {
    pub fn from_config(config: &Configuration) -> Result<Self, Error> {
        // TODO: extend to n > 1 intra-group dimensions; all the port maps
        // below assume the one-dimensional group mesh
        let n = config.int("n");
        if n != 1 {
            return Err(Error::UnsupportedDimension(n));
        }
        let p = config.int("k");
        if p <= 0 {
            return Err(Error::InvalidParameter("k", p));
        }
        let local_latency = config.int("local_latency");
        if local_latency < 0 {
            return Err(Error::InvalidParameter("local_latency", local_latency));
        }
        let global_latency = config.int("global_latency");
        if global_latency < 0 {
            return Err(Error::InvalidParameter("global_latency", global_latency));
        }

        let p = p as usize;
        let a = 2 * p;
        let g = a * p + 1;
        let radix = 4 * p - 1;
        let routers = a * g;
        Ok(Self {
            p,
            a,
            g,
            radix,
            routers,
            nodes: a * p * g,
            channels: routers * (radix - p),
            local_latency: local_latency as Cycle,
            global_latency: global_latency as Cycle,
        })
    }

    /// Processors attached to each router.
    pub fn p(&self) -> usize {
        self.p
    }

    /// Routers per group.
    pub fn a(&self) -> usize {
        self.a
    }

    pub fn groups(&self) -> usize {
        self.g
    }

    pub fn radix(&self) -> usize {
        self.radix
    }

    pub fn num_routers(&self) -> usize {
        self.routers
    }

    /// Terminals in the whole network.
    pub fn num_nodes(&self) -> usize {
        self.nodes
    }

    pub fn num_channels(&self) -> usize {
        self.channels
    }

    /// Non-terminal channels per router: `2p - 1` local plus `p` global.
    pub fn ports_per_router(&self) -> usize {
        self.radix - self.p
    }

    pub fn local_latency(&self) -> Cycle {
        self.local_latency
    }

    pub fn global_latency(&self) -> Cycle {
        self.global_latency
    }

    pub fn group_of(&self, router: usize) -> usize {
        router / self.a
    }

    /// In-group index of a router.
    pub fn local_index(&self, router: usize) -> usize {
        router % self.a
    }

    pub fn group_of_node(&self, node: usize) -> usize {
        node / (self.a * self.p)
    }

    pub fn router_of_node(&self, node: usize) -> usize {
        node / self.p
    }

    /// Forward distance from one group to another along the group ring.
    pub fn group_distance(&self, from: usize, to: usize) -> usize {
        (to + self.g - from) % self.g
    }

    /// Output ports at or past `p + a - 1` leave the group.
    pub fn is_global_output(&self, port: usize) -> bool {
        port >= self.p + self.a - 1
    }

    /// The output port at `router` toward terminal `dest`.
    ///
    /// Terminal ports come first, then the `2p - 1` in-group ports (the
    /// router's own slot is absent from that list), then the `p` global
    /// ports.
    pub fn route_port(&self, router: usize, dest: usize) -> usize {
        let grp = self.group_of(router);
        let dest_grp = self.group_of_node(dest);
        let dist = self.group_distance(grp, dest_grp);

        // in-group index of the router to leave the group from, or of the
        // router hosting the destination
        let target = if dest_grp == grp {
            (dest % (self.a * self.p)) / self.p
        } else {
            (dist - 1) / self.p
        };
        let my = self.local_index(router);

        if self.router_of_node(dest) == router {
            // last hop: down to the terminal
            dest % self.p
        } else if target == my && dest_grp != grp {
            // this router owns the global link for the remaining distance
            self.p + (self.a - 1) + (dist - 1) % self.p
        } else if my < target {
            self.p + target - 1
        } else {
            self.p + target
        }
    }

    /// Minimal router-to-router hop count between two terminals; at most 3.
    pub fn hop_count(&self, src: usize, dest: usize) -> usize {
        let src_grp = self.group_of_node(src);
        let dest_grp = self.group_of_node(dest);
        if src_grp == dest_grp {
            return if self.router_of_node(src) == self.router_of_node(dest) {
                0
            } else {
                1
            };
        }
        let dist = self.group_distance(src_grp, dest_grp);
        let depart = src_grp * self.a + (dist - 1) / self.p;
        let arrive = dest_grp * self.a + (self.g - dist - 1) / self.p;
        let src_hop = (self.router_of_node(src) != depart) as usize;
        let dest_hop = (self.router_of_node(dest) != arrive) as usize;
        src_hop + 1 + dest_hop
    }
}

/// The built network: routers wired to channels in the canonical order.
pub struct DragonflyRelative {
    name: String,
    params: DragonflyParams,
    routers: Vec<Router>,
    chan: Vec<Channel>,
    inject: Vec<Channel>,
    eject: Vec<Channel>,
}

impl DragonflyRelative {
    pub fn new(config: &Configuration, name: &str) -> Result<Self, Error> {
        let params = DragonflyParams::from_config(config)?;
        let mut net = Self {
            name: name.to_string(),
            params,
            routers: (0..params.num_routers())
                .map(|r| Router::new(r, format!("router_{}", r)))
                .collect(),
            chan: vec![Channel::new(0); params.num_channels()],
            inject: vec![Channel::new(0); params.num_nodes()],
            eject: vec![Channel::new(0); params.num_nodes()],
        };
        net.build()?;
        Ok(net)
    }

    fn build(&mut self) -> Result<(), Error> {
        let p = self.params.p();
        let a = self.params.a();
        let g = self.params.groups();
        let q = self.params.ports_per_router();

        log::info!(
            "{}: building relative dragonfly: {} groups x {} routers, {} terminals, radix {}",
            self.name,
            g,
            a,
            self.params.num_nodes(),
            self.params.radix()
        );
        log::debug!(
            "{}: {} channels, {} per router",
            self.name,
            self.params.num_channels(),
            q
        );

        for node in 0..self.params.num_routers() {
            let grp = self.params.group_of(node);
            let d = self.params.local_index(node);

            // terminal channels come first on both sides
            for cnt in 0..p {
                self.add_input(node, ChannelRef::Inject(p * node + cnt))?;
            }
            for cnt in 0..p {
                self.add_output(node, ChannelRef::Eject(p * node + cnt))?;
            }

            // in-group outputs, then the global ones; a router's channel
            // block starts at q * node
            for cnt in 0..(2 * p - 1) {
                let output = q * node + cnt;
                self.chan[output].set_latency(self.params.local_latency());
                self.add_output(node, ChannelRef::Internal(output))?;
            }
            for cnt in 0..p {
                let output = q * node + (2 * p - 1) + cnt;
                self.chan[output].set_latency(self.params.global_latency());
                self.add_output(node, ChannelRef::Internal(output))?;
            }

            // in-group inputs: local port c receives from the in-group peer
            // c (when c < d) or c + 1, through that peer's output toward d
            for cnt in 0..(2 * p - 1) {
                let base = (grp * q * a) as i64;
                let input = if cnt < d {
                    base - ((d - cnt) * q) as i64 + (d * q) as i64 + d as i64 - 1
                } else {
                    base + (d * q) as i64 + ((cnt - d + 1) * q) as i64 + d as i64
                };
                if input < 0 || input as usize >= self.chan.len() {
                    return Err(Error::InvalidChannel {
                        router: node,
                        index: input,
                    });
                }
                self.add_input(node, ChannelRef::Internal(input as usize))?;
            }

            // global inputs: the reverse companion of each global output.
            // our output cnt reaches to_group; the link coming back from
            // to_group departs the router there whose forward distance to us
            // is g - dist
            for cnt in 0..p {
                let to_group = (grp + d * p + cnt + 1) % g;
                let to_port = (grp + g - to_group) % g - 1;
                let router_offset = to_port / p;
                let port_offset = to_port % p;
                let input = to_group * q * a + router_offset * q + (2 * p - 1) + port_offset;
                self.add_input(node, ChannelRef::Internal(input))?;
            }
        }
        Ok(())
    }

    fn add_output(&mut self, node: usize, channel: ChannelRef) -> Result<(), Error> {
        let endpoint = Endpoint {
            router: node,
            port: self.routers[node].num_outputs(),
        };
        let bound = match channel {
            ChannelRef::Inject(_) => false,
            ChannelRef::Eject(index) => self.eject[index].bind_source(endpoint),
            ChannelRef::Internal(index) => self.chan[index].bind_source(endpoint),
        };
        if !bound {
            return Err(Error::DuplicateChannelEndpoint {
                channel,
                router: node,
            });
        }
        self.routers[node].add_output(channel);
        Ok(())
    }

    fn add_input(&mut self, node: usize, channel: ChannelRef) -> Result<(), Error> {
        let endpoint = Endpoint {
            router: node,
            port: self.routers[node].num_inputs(),
        };
        let bound = match channel {
            ChannelRef::Eject(_) => false,
            ChannelRef::Inject(index) => self.inject[index].bind_destination(endpoint),
            ChannelRef::Internal(index) => self.chan[index].bind_destination(endpoint),
        };
        if !bound {
            return Err(Error::DuplicateChannelEndpoint {
                channel,
                router: node,
            });
        }
        self.routers[node].add_input(channel);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &DragonflyParams {
        &self.params
    }

    pub fn router(&self, id: usize) -> &Router {
        &self.routers[id]
    }

    pub fn routers(&self) -> impl Iterator<Item = &Router> {
        self.routers.iter()
    }

    pub fn channel(&self, index: usize) -> &Channel {
        &self.chan[index]
    }

    pub fn inject_channel(&self, index: usize) -> &Channel {
        &self.inject[index]
    }

    pub fn eject_channel(&self, index: usize) -> &Channel {
        &self.eject[index]
    }

    /// Follow an internal output port to the endpoint it feeds.
    pub fn downstream(&self, router: usize, port: usize) -> Option<Endpoint> {
        match self.routers[router].output(port) {
            ChannelRef::Internal(index) => self.chan[index].destination(),
            _ => None,
        }
    }

    /// Ideal throughput per terminal, in flits per cycle.
    pub fn capacity(&self) -> f64 {
        self.params.radix() as f64 / 8.0
    }

    /// Fault-injection hook; this topology does not implement any faults.
    pub fn insert_random_faults(&mut self, _config: &Configuration) {}

    /// Router-level connectivity with channel latencies as edge weights.
    pub fn graph(&self) -> DiGraph<usize, Cycle> {
        let mut graph = DiGraph::new();
        let nodes: Vec<_> = (0..self.routers.len()).map(|r| graph.add_node(r)).collect();
        for chan in &self.chan {
            if let (Some(src), Some(dst)) = (chan.source(), chan.destination()) {
                graph.add_edge(nodes[src.router], nodes[dst.router], chan.latency());
            }
        }
        graph
    }
}

impl fmt::Display for DragonflyRelative {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}: relative dragonfly", self.name)?;
        writeln!(f, " processors per router = {}", self.params.p())?;
        writeln!(f, " router radix = {}", self.params.radix())?;
        writeln!(
            f,
            " routers = {} in {} groups of {}",
            self.params.num_routers(),
            self.params.groups(),
            self.params.a()
        )?;
        writeln!(f, " terminals = {}", self.params.num_nodes())?;
        write!(f, " channels = {}", self.params.num_channels())
    }
}
