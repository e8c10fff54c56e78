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

//! Building blocks shared by the topology builders: channels, routers, and
//! the router-side contract the routing functions consume.

use crate::Cycle;

/// A router-side attachment point of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub router: usize,
    pub port: usize,
}

/// One direction of a link, together with its paired credit channel.
///
/// Data flits and returning credits always share the same latency, so a
/// single record stands for both. Terminal channels keep the endpoint on
/// the processor side unbound.
#[derive(Clone, Debug)]
pub struct Channel {
    latency: Cycle,
    src: Option<Endpoint>,
    dst: Option<Endpoint>,
}

impl Channel {
    pub fn new(latency: Cycle) -> Self {
        Self {
            latency,
            src: None,
            dst: None,
        }
    }

    pub fn latency(&self) -> Cycle {
        self.latency
    }

    pub fn set_latency(&mut self, latency: Cycle) {
        self.latency = latency;
    }

    pub fn source(&self) -> Option<Endpoint> {
        self.src
    }

    pub fn destination(&self) -> Option<Endpoint> {
        self.dst
    }

    /// Record the sending side; false if some router already claimed it.
    pub(crate) fn bind_source(&mut self, endpoint: Endpoint) -> bool {
        if self.src.is_some() {
            return false;
        }
        self.src = Some(endpoint);
        true
    }

    /// Record the receiving side; false if some router already claimed it.
    pub(crate) fn bind_destination(&mut self, endpoint: Endpoint) -> bool {
        if self.dst.is_some() {
            return false;
        }
        self.dst = Some(endpoint);
        true
    }
}

/// Which channel array a router port is wired to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelRef {
    /// terminal injection channel
    Inject(usize),
    /// terminal ejection channel
    Eject(usize),
    /// router-to-router channel
    Internal(usize),
}

pub struct Router {
    id: usize,
    name: String,
    inputs: Vec<ChannelRef>,
    outputs: Vec<ChannelRef>,
}

impl Router {
    pub(crate) fn new(id: usize, name: String) -> Self {
        Self {
            id,
            name,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&self, port: usize) -> ChannelRef {
        self.inputs[port]
    }

    pub fn output(&self, port: usize) -> ChannelRef {
        self.outputs[port]
    }

    pub fn inputs(&self) -> impl Iterator<Item = ChannelRef> + '_ {
        self.inputs.iter().copied()
    }

    pub fn outputs(&self) -> impl Iterator<Item = ChannelRef> + '_ {
        self.outputs.iter().copied()
    }

    pub(crate) fn add_input(&mut self, channel: ChannelRef) {
        self.inputs.push(channel);
    }

    pub(crate) fn add_output(&mut self, channel: ChannelRef) {
        self.outputs.push(channel);
    }
}

/// What a routing function may ask of the router it runs on.
///
/// `used_credit` reports the occupancy of the downstream buffer behind an
/// output port; adaptive routing reads it as queue pressure. Implementations
/// may return a negative value for ports without credit tracking, which the
/// consumers clamp to zero.
pub trait RouterView {
    fn id(&self) -> usize;
    fn full_name(&self) -> &str;
    fn used_credit(&self, out_port: usize) -> i64;
}
