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

use bencher::Bencher;
use bencher::{benchmark_group, benchmark_main};

use fabric::{BufferState, Configuration, Credit, Cycle, Flit};

// single-flit packets per benchmark iteration
const PACKETS: usize = 10_000;
const VCS: usize = 4;

fn config(policy: &str) -> Configuration {
    let mut config = Configuration::default();
    config.set_str("buffer_policy", policy);
    config.set_int("num_vcs", VCS as i64);
    config.set_int("vc_buf_size", 8);
    config
}

fn send_credit_roundtrip(bench: &mut Bencher, policy: &str) {
    let config = config(policy);
    let mut buf = BufferState::new(&config, "bench").unwrap();
    bench.iter(|| {
        for id in 0..PACKETS {
            let vc = id % VCS;
            let now = id as Cycle;
            buf.take_buffer(vc);
            buf.sending_flit(&Flit::single(id as u64, vc), now);
            buf.process_credit(&Credit::for_vc(vc), now + 20);
        }
    });
}

fn private(bench: &mut Bencher) {
    send_credit_roundtrip(bench, "private");
}

fn shared(bench: &mut Bencher) {
    send_credit_roundtrip(bench, "shared");
}

fn feedback(bench: &mut Bencher) {
    send_credit_roundtrip(bench, "feedback");
}

benchmark_group!(benches, private, shared, feedback);
benchmark_main!(benches);
