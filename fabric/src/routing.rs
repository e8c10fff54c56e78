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

//! Routing functions for the relative dragonfly.
//!
//! Both functions are deadlock-free through datelines: crossing a global
//! channel advances the flit's phase, phases map one-to-one onto ascending
//! VCs, and phases never move backward. Reordering or reusing VCs across
//! phases would reintroduce the cycles the datelines break.

use rand::{Rng, RngCore};

use crate::error::Error;
use crate::flit::Flit;
use crate::network::RouterView;
use crate::topologies::dragonfly::DragonflyParams;

/// Bias toward minimal routing in UGAL's congestion comparison; a negative
/// value would bias toward non-minimal routes instead.
const ADAPTIVE_THRESHOLD: i64 = 30;

/// An admissible output: a port and an inclusive VC range.
///
/// `port` is `None` while the flit is still at its source terminal and any
/// injection port will do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputRange {
    pub port: Option<usize>,
    pub vc_start: usize,
    pub vc_end: usize,
}

/// The set of `(port, VC range)` pairs a routing function reports back.
#[derive(Clone, Debug, Default)]
pub struct OutputSet {
    ranges: Vec<OutputRange>,
}

impl OutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn add_range(&mut self, port: Option<usize>, vc_start: usize, vc_end: usize) {
        debug_assert!(vc_start <= vc_end);
        self.ranges.push(OutputRange {
            port,
            vc_start,
            vc_end,
        });
    }

    pub fn ranges(&self) -> &[OutputRange] {
        &self.ranges
    }
}

/// Everything a routing function needs beyond the router it runs on.
pub struct RoutingContext<'a> {
    pub topo: &'a DragonflyParams,
    pub num_vcs: usize,
}

pub type RoutingFn = fn(
    &RoutingContext,
    &dyn RouterView,
    &mut Flit,
    usize,
    &mut OutputSet,
    bool,
    &mut dyn RngCore,
);

/// Look up a routing function by its configuration name.
pub fn find_routing_function(name: &str) -> Result<RoutingFn, Error> {
    match name {
        "min_dragonflyrelative" => Ok(minimal_route as RoutingFn),
        "ugal_dragonflyrelative" => Ok(ugal_route as RoutingFn),
        other => Err(Error::UnknownRoutingFunction(other.to_string())),
    }
}

/// Shortest-path routing: at most one local, one global, and one local hop.
///
/// Two VCs suffice for deadlock freedom; a flit moves to VC 1 once it has
/// crossed the global dateline, or immediately if it is injected in its
/// destination group.
pub fn minimal_route(
    ctx: &RoutingContext,
    router: &dyn RouterView,
    f: &mut Flit,
    in_channel: usize,
    outputs: &mut OutputSet,
    inject: bool,
    rng: &mut dyn RngCore,
) {
    outputs.clear();
    if inject {
        let vc = rng.gen_range(0..ctx.num_vcs);
        outputs.add_range(None, vc, vc);
        return;
    }

    let topo = ctx.topo;
    let rid = router.id();
    let grp = topo.group_of(rid);
    let dest_grp = topo.group_of_node(f.dest);

    // fresh from a processor
    if in_channel < topo.p() {
        f.ph = if dest_grp == grp { 1 } else { 0 };
    }

    let out_port = topo.route_port(rid, f.dest);
    if topo.is_global_output(out_port) {
        f.ph = 1;
    }
    let out_vc = f.ph;

    if f.watch {
        log::debug!(
            "{} | flit {} through output port {}, VC {}",
            router.full_name(),
            f.id,
            out_port,
            out_vc
        );
    }
    outputs.add_range(Some(out_port), out_vc, out_vc);
}

/// Universal globally-adaptive load-balanced routing.
///
/// At the source router the flit either takes the minimal route or detours
/// through a random intermediate terminal, depending on the queue pressure
/// of the two candidate output ports. Three phases, three VCs: 0 toward the
/// intermediate, 1 toward the destination, 2 after the global dateline.
pub fn ugal_route(
    ctx: &RoutingContext,
    router: &dyn RouterView,
    f: &mut Flit,
    in_channel: usize,
    outputs: &mut OutputSet,
    inject: bool,
    rng: &mut dyn RngCore,
) {
    assert_eq!(ctx.num_vcs, 3, "ugal routing needs 3 VCs for deadlock freedom");
    outputs.clear();
    if inject {
        let vc = rng.gen_range(0..ctx.num_vcs);
        outputs.add_range(None, vc, vc);
        return;
    }

    let topo = ctx.topo;
    let rid = router.id();
    let grp = topo.group_of(rid);
    let dest_grp = topo.group_of_node(f.dest);

    // at the source router, make the adaptive decision
    if in_channel < topo.p() {
        if dest_grp == grp {
            f.ph = 2;
        } else {
            f.intm = rng.gen_range(0..topo.num_nodes());
            let intm_grp = topo.group_of_node(f.intm);
            if f.watch {
                log::debug!(
                    "{} | flit {} picked intermediate {} in group {}",
                    router.full_name(),
                    f.id,
                    f.intm,
                    intm_grp
                );
            }
            if intm_grp == grp {
                f.ph = 1;
            } else {
                let min_port = topo.route_port(rid, f.dest);
                let min_queue = router.used_credit(min_port).max(0);
                let nonmin_port = topo.route_port(rid, f.intm);
                let nonmin_queue = router.used_credit(nonmin_port).max(0);
                f.ph = if min_queue <= 2 * nonmin_queue + ADAPTIVE_THRESHOLD {
                    1
                } else {
                    0
                };
                if f.watch {
                    log::debug!(
                        "{} | flit {} goes {} (min queue {}, nonmin queue {})",
                        router.full_name(),
                        f.id,
                        if f.ph == 1 { "minimal" } else { "non-minimal" },
                        min_queue,
                        nonmin_queue
                    );
                }
            }
        }
    }

    // the detour ends at the intermediate's router
    if f.ph == 0 && rid == topo.router_of_node(f.intm) {
        f.ph = 1;
    }

    let out_port = match f.ph {
        0 => topo.route_port(rid, f.intm),
        1 | 2 => topo.route_port(rid, f.dest),
        ph => unreachable!("invalid routing phase {}", ph),
    };

    // global dateline
    if f.ph == 1 && topo.is_global_output(out_port) {
        f.ph = 2;
    }

    outputs.add_range(Some(out_port), f.ph, f.ph);
}
