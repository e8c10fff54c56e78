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

//! The units moved by the network: flits outbound, credits returning.

use std::collections::BTreeSet;

/// A flow-control digit, the smallest unit a channel moves in one cycle.
///
/// The buffer mirror treats flits as read-only. The routing functions may
/// write `ph` (the route phase) and `intm` (the UGAL intermediate terminal);
/// everything else is fixed at injection.
#[derive(Clone, Debug, Default)]
pub struct Flit {
    pub id: u64,
    /// packet id; all flits of a packet share it
    pub pid: u64,
    pub vc: usize,
    /// traffic class
    pub cl: usize,
    pub head: bool,
    pub tail: bool,
    pub src: usize,
    pub dest: usize,
    /// route phase tag, advanced by the routing functions
    pub ph: usize,
    /// intermediate terminal for non-minimal routes
    pub intm: usize,
    /// emit per-hop diagnostics for this flit
    pub watch: bool,
}

impl Flit {
    /// A one-flit packet on `vc`: head and tail in the same flit.
    pub fn single(id: u64, vc: usize) -> Self {
        Self {
            id,
            pid: id,
            vc,
            head: true,
            tail: true,
            ..Self::default()
        }
    }

    /// A body flit on `vc`.
    pub fn body(id: u64, vc: usize) -> Self {
        Self {
            id,
            pid: id,
            vc,
            ..Self::default()
        }
    }

    /// The closing flit of a packet on `vc`.
    pub fn tail(id: u64, vc: usize) -> Self {
        Self {
            id,
            pid: id,
            vc,
            tail: true,
            ..Self::default()
        }
    }
}

/// A credit message: each named VC freed one slot in the downstream buffer.
#[derive(Clone, Debug, Default)]
pub struct Credit {
    vcs: BTreeSet<usize>,
}

impl Credit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_vc(vc: usize) -> Self {
        let mut credit = Self::default();
        credit.register(vc);
        credit
    }

    pub fn register(&mut self, vc: usize) {
        self.vcs.insert(vc);
    }

    pub fn vcs(&self) -> impl Iterator<Item = usize> + '_ {
        self.vcs.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.vcs.is_empty()
    }
}
