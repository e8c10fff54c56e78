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

//! Build a relative dragonfly and trace random packets through its wiring.
//!
//! Each packet is walked hop by hop with the selected routing function, so a
//! run doubles as an end-to-end check that the port arithmetic and the
//! channel wiring agree with each other.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use structopt::StructOpt;

use fabric::{
    find_routing_function, Configuration, DragonflyRelative, Flit, OutputSet, RouterView,
    RoutingContext,
};

#[derive(StructOpt)]
#[structopt(name = "dfsim", about = "Relative-dragonfly topology and routing explorer")]
struct Arguments {
    /// YAML configuration overriding the built-in defaults
    #[structopt(short, long)]
    config: Option<String>,
    /// processors per router (overrides the configured k)
    #[structopt(short, long)]
    k: Option<i64>,
    /// routing function; defaults to the configured routing_function
    #[structopt(short, long)]
    routing: Option<String>,
    /// number of random packets to trace
    #[structopt(short, long, default_value = "1000")]
    packets: usize,
    /// PRNG seed, so runs are reproducible
    #[structopt(short, long, default_value = "1")]
    seed: u64,
}

/// A router that reports idle output queues; packets traced through an
/// unloaded network always take the minimal path under UGAL.
struct IdleRouter<'a> {
    net: &'a DragonflyRelative,
    id: usize,
}

impl RouterView for IdleRouter<'_> {
    fn id(&self) -> usize {
        self.id
    }

    fn full_name(&self) -> &str {
        self.net.router(self.id).name()
    }

    fn used_credit(&self, _out_port: usize) -> i64 {
        0
    }
}

fn main() {
    env_logger::init();
    let args = Arguments::from_args();

    let mut config = match &args.config {
        Some(file_name) => Configuration::from_file(file_name).unwrap_or_else(|e| {
            eprintln!("{}", e);
            std::process::exit(1);
        }),
        None => Configuration::default(),
    };
    if let Some(k) = args.k {
        config.set_int("k", k);
    }
    let routing_name = args
        .routing
        .unwrap_or_else(|| config.str("routing_function").to_string());

    let net = DragonflyRelative::new(&config, "network").unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });
    println!("{}", net);
    println!(" capacity = {:.3} flits/cycle/terminal", net.capacity());

    let route = find_routing_function(&routing_name).unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });
    let ctx = RoutingContext {
        topo: net.params(),
        num_vcs: config.int("num_vcs") as usize,
    };

    let mut rng = Pcg64::seed_from_u64(args.seed);
    let nodes = net.params().num_nodes();
    let p = net.params().p();
    let mut outputs = OutputSet::new();
    let mut hops_seen = vec![0usize; 8];

    for id in 0..args.packets {
        let src = rng.gen_range(0..nodes);
        let mut dest = rng.gen_range(0..nodes);
        while dest == src {
            dest = rng.gen_range(0..nodes);
        }

        let mut f = Flit::single(id as u64, 0);
        f.src = src;
        f.dest = dest;

        let mut rid = src / p;
        let mut in_channel = src % p;
        let mut hops = 0;
        loop {
            let view = IdleRouter { net: &net, id: rid };
            route(&ctx, &view, &mut f, in_channel, &mut outputs, false, &mut rng);
            let range = outputs.ranges()[0];
            let port = range.port.expect("transit flits always have a port");
            if port < p {
                assert_eq!(rid, dest / p, "packet {} ejected at the wrong router", id);
                break;
            }
            let next = net
                .downstream(rid, port)
                .expect("internal output ports are always wired");
            log::trace!(
                "packet {}: router {} port {} -> router {} (VC {})",
                id,
                rid,
                port,
                next.router,
                range.vc_start
            );
            rid = next.router;
            in_channel = next.port;
            hops += 1;
            assert!(hops < hops_seen.len(), "packet {} is looping", id);
        }
        hops_seen[hops] += 1;
    }

    println!(" traced {} packets with {}:", args.packets, routing_name);
    for (hops, count) in hops_seen.iter().enumerate().filter(|(_, &count)| count > 0) {
        println!("  {} hops: {}", hops, count);
    }
}
