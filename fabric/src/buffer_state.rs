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

//! Mirror of the buffer state of the next router down the channel.
//!
//! One instance sits on the sending side of every output link and tracks how
//! much of the downstream input buffer is in use: flits sent increase the
//! occupancy, credits flowing back decrease it. Admission and capacity
//! decisions are delegated to the buffer policy selected at construction.
//!
//! Within a simulation cycle the driver delivers credits before it sends
//! flits, and the VC allocator calls [`BufferState::take_buffer`] before the
//! first flit of a packet goes out.

use std::collections::VecDeque;
use std::fmt;

use crate::config::Configuration;
use crate::error::{fatal, Error};
use crate::flit::{Credit, Flit};
use crate::Cycle;

mod policy;

use policy::BufferPolicy;

/// Point-in-time view of the per-VC counters, handed to policy callbacks.
///
/// Policies never hold a reference back to their owner; they see exactly the
/// state that exists at the instant the owning operation consults them.
#[derive(Clone, Copy)]
pub(crate) struct VcView<'a> {
    vc_occupancy: &'a [usize],
    in_use: &'a [bool],
}

impl<'a> VcView<'a> {
    pub(crate) fn occupancy(&self, vc: usize) -> usize {
        self.vc_occupancy[vc]
    }

    pub(crate) fn is_available(&self, vc: usize) -> bool {
        !self.in_use[vc]
    }

    pub(crate) fn is_empty(&self, vc: usize) -> bool {
        self.vc_occupancy[vc] == 0
    }
}

#[derive(Debug)]
pub struct BufferState {
    name: String,
    vcs: usize,
    size: usize,
    wait_for_tail_credit: bool,
    occupancy: usize,
    vc_occupancy: Vec<usize>,
    in_use: Vec<bool>,
    tail_sent: Vec<bool>,
    last_id: Vec<Option<u64>>,
    last_pid: Vec<Option<u64>>,
    classes: usize,
    outstanding_classes: Vec<VecDeque<usize>>,
    class_occupancy: Vec<usize>,
    policy: BufferPolicy,
}

impl BufferState {
    pub fn new(config: &Configuration, name: &str) -> Result<Self, Error> {
        let vcs = config.int("num_vcs");
        if vcs <= 0 {
            return Err(Error::InvalidBufferConfig(format!(
                "num_vcs must be positive, got {}",
                vcs
            )));
        }
        let vcs = vcs as usize;

        let mut size = config.int("buf_size");
        if size < 0 {
            size = vcs as i64 * config.int("vc_buf_size");
        }
        if size <= 0 {
            return Err(Error::InvalidBufferConfig(format!(
                "buffer size must be positive, got {}",
                size
            )));
        }

        let policy = BufferPolicy::new(config)?;

        let classes = config.int("classes").max(0) as usize;

        Ok(Self {
            name: name.to_string(),
            vcs,
            size: size as usize,
            wait_for_tail_credit: config.bool("wait_for_tail_credit"),
            occupancy: 0,
            vc_occupancy: vec![0; vcs],
            in_use: vec![false; vcs],
            tail_sent: vec![false; vcs],
            last_id: vec![None; vcs],
            last_pid: vec![None; vcs],
            classes,
            outstanding_classes: vec![VecDeque::new(); vcs],
            class_occupancy: vec![0; classes],
            policy,
        })
    }

    /// Account for a flit leaving on this link toward the downstream buffer.
    pub fn sending_flit(&mut self, f: &Flit, now: Cycle) {
        let vc = f.vc;
        if vc >= self.vcs {
            fatal(
                &self.name,
                format!("flit {} names VC {} outside [0, {})", f.id, vc, self.vcs),
            );
        }

        self.occupancy += 1;
        if self.occupancy > self.size {
            fatal(&self.name, "buffer overflow");
        }

        self.vc_occupancy[vc] += 1;

        let view = VcView {
            vc_occupancy: &self.vc_occupancy,
            in_use: &self.in_use,
        };
        self.policy.sending_flit(&view, f, now, &self.name);

        if self.classes > 0 {
            if f.cl >= self.classes {
                fatal(
                    &self.name,
                    format!("flit {} carries unknown class {}", f.id, f.cl),
                );
            }
            self.outstanding_classes[vc].push_back(f.cl);
            self.class_occupancy[f.cl] += 1;
        }

        if f.tail {
            self.tail_sent[vc] = true;
            if !self.wait_for_tail_credit {
                if !self.in_use[vc] {
                    fatal(
                        &self.name,
                        format!("tail flit {} sent on VC {} that was never taken", f.id, vc),
                    );
                }
                self.in_use[vc] = false;
            }
        }
        self.last_id[vc] = Some(f.id);
        self.last_pid[vc] = Some(f.pid);
    }

    /// Account for a credit returning from the downstream router.
    pub fn process_credit(&mut self, c: &Credit, now: Cycle) {
        for vc in c.vcs() {
            if vc >= self.vcs {
                fatal(
                    &self.name,
                    format!("credit names VC {} outside [0, {})", vc, self.vcs),
                );
            }
            if self.wait_for_tail_credit && !self.in_use[vc] {
                fatal(&self.name, format!("received credit for idle VC {}", vc));
            }

            self.occupancy = match self.occupancy.checked_sub(1) {
                Some(n) => n,
                None => fatal(&self.name, "buffer occupancy fell below zero"),
            };
            self.vc_occupancy[vc] = match self.vc_occupancy[vc].checked_sub(1) {
                Some(n) => n,
                None => fatal(
                    &self.name,
                    format!("buffer occupancy fell below zero for VC {}", vc),
                ),
            };

            if self.wait_for_tail_credit && self.vc_occupancy[vc] == 0 && self.tail_sent[vc] {
                debug_assert!(self.in_use[vc]);
                self.in_use[vc] = false;
            }

            if self.classes > 0 {
                let cl = match self.outstanding_classes[vc].pop_front() {
                    Some(cl) => cl,
                    None => fatal(
                        &self.name,
                        format!("credit for VC {} with no class outstanding", vc),
                    ),
                };
                self.class_occupancy[cl] = match self.class_occupancy[cl].checked_sub(1) {
                    Some(n) => n,
                    None => fatal(
                        &self.name,
                        format!("class occupancy fell below zero for class {}", cl),
                    ),
                };
            }

            let view = VcView {
                vc_occupancy: &self.vc_occupancy,
                in_use: &self.in_use,
            };
            self.policy.free_slot_for(&view, vc, now, &self.name);
        }
    }

    /// Allocate `vc` to a new packet.
    pub fn take_buffer(&mut self, vc: usize) {
        if vc >= self.vcs {
            fatal(
                &self.name,
                format!("cannot take VC {} outside [0, {})", vc, self.vcs),
            );
        }
        if self.in_use[vc] {
            fatal(&self.name, format!("buffer taken while in use for VC {}", vc));
        }
        self.in_use[vc] = true;
        self.tail_sent[vc] = false;
        self.policy.take_buffer(vc, &self.name);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn vcs(&self) -> usize {
        self.vcs
    }

    /// Flits outstanding toward the downstream buffer, across all VCs.
    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    pub fn occupancy_for(&self, vc: usize) -> usize {
        self.vc_occupancy[vc]
    }

    pub fn is_full_for(&self, vc: usize) -> bool {
        let view = VcView {
            vc_occupancy: &self.vc_occupancy,
            in_use: &self.in_use,
        };
        self.policy.is_full_for(&view, vc)
    }

    pub fn has_credit_for(&self, vc: usize) -> bool {
        !self.is_full_for(vc)
    }

    pub fn is_available_for(&self, vc: usize) -> bool {
        !self.in_use[vc]
    }

    pub fn is_empty_for(&self, vc: usize) -> bool {
        self.vc_occupancy[vc] == 0
    }

    pub fn class_occupancy(&self, cl: usize) -> usize {
        self.class_occupancy[cl]
    }

    pub fn last_id_for(&self, vc: usize) -> Option<u64> {
        self.last_id[vc]
    }

    pub fn last_pid_for(&self, vc: usize) -> Option<u64> {
        self.last_pid[vc]
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{} :", self.name)?;
        writeln!(f, " occupied = {}", self.occupancy)?;
        for vc in 0..self.vcs {
            writeln!(
                f,
                "  VC {}: in_use = {}, tail_sent = {}, occupied = {}",
                vc, self.in_use[vc], self.tail_sent[vc], self.vc_occupancy[vc]
            )?;
        }
        Ok(())
    }
}
