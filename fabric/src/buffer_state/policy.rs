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

//! Admission and capacity policies for the downstream buffer mirror.
//!
//! All seven policies answer the same four questions: a VC was allocated
//! (`take_buffer`), a flit left (`sending_flit`), a slot came back
//! (`free_slot_for`), and is there room for one more (`is_full_for`). The
//! set is closed; which policy runs is fixed at construction by the
//! `buffer_policy` key.

use std::collections::VecDeque;

use crate::config::Configuration;
use crate::error::{fatal, Error};
use crate::flit::Flit;
use crate::Cycle;

use super::VcView;

#[derive(Debug)]
pub(crate) enum BufferPolicy {
    Private(PrivatePolicy),
    Shared(SharedPolicy),
    Limited(LimitedPolicy),
    DynamicLimited(LimitedPolicy),
    ShiftingDynamicLimited(LimitedPolicy),
    Feedback(FeedbackPolicy),
    SimpleFeedback(SimpleFeedbackPolicy),
}

impl BufferPolicy {
    pub(crate) fn new(config: &Configuration) -> Result<Self, Error> {
        match config.str("buffer_policy") {
            "private" => Ok(Self::Private(PrivatePolicy::new(config)?)),
            "shared" => Ok(Self::Shared(SharedPolicy::new(config)?)),
            "limited" => Ok(Self::Limited(LimitedPolicy::new(config)?)),
            "dynamic" => Ok(Self::DynamicLimited(LimitedPolicy::new_dynamic(config)?)),
            "shifting" => Ok(Self::ShiftingDynamicLimited(LimitedPolicy::new_dynamic(
                config,
            )?)),
            "feedback" => Ok(Self::Feedback(FeedbackPolicy::new(config)?)),
            "simplefeedback" => Ok(Self::SimpleFeedback(SimpleFeedbackPolicy::new(config)?)),
            other => Err(Error::UnknownBufferPolicy(other.to_string())),
        }
    }

    pub(crate) fn take_buffer(&mut self, _vc: usize, module: &str) {
        match self {
            Self::Private(_) | Self::Shared(_) | Self::Feedback(_) | Self::SimpleFeedback(_) => {}
            Self::Limited(p) => p.take_buffer(module),
            Self::DynamicLimited(p) => {
                p.take_buffer(module);
                p.recompute_divided(module);
            }
            Self::ShiftingDynamicLimited(p) => {
                p.take_buffer(module);
                p.recompute_shifted(module);
            }
        }
    }

    pub(crate) fn sending_flit(&mut self, view: &VcView, f: &Flit, now: Cycle, module: &str) {
        match self {
            Self::Private(p) => p.sending_flit(view, f, module),
            Self::Shared(p) => p.sending_flit(f, module),
            Self::Limited(p) => p.sending_flit(f, module),
            Self::DynamicLimited(p) => {
                p.sending_flit(f, module);
                if f.tail && p.active_vcs > 0 {
                    p.recompute_divided(module);
                }
            }
            Self::ShiftingDynamicLimited(p) => {
                p.sending_flit(f, module);
                if f.tail && p.active_vcs > 0 {
                    p.recompute_shifted(module);
                }
            }
            Self::Feedback(p) => p.sending_flit(f, now, module),
            Self::SimpleFeedback(p) => p.sending_flit(view, f, now, module),
        }
    }

    pub(crate) fn free_slot_for(&mut self, view: &VcView, vc: usize, now: Cycle, module: &str) {
        match self {
            Self::Private(_) => {}
            Self::Shared(p) => p.free_slot_for(view, vc, module),
            Self::Limited(p) | Self::DynamicLimited(p) | Self::ShiftingDynamicLimited(p) => {
                p.shared.free_slot_for(view, vc, module)
            }
            Self::Feedback(p) => p.free_slot_for(view, vc, now, module),
            Self::SimpleFeedback(p) => p.free_slot_for(view, vc, now, module),
        }
    }

    pub(crate) fn is_full_for(&self, view: &VcView, vc: usize) -> bool {
        match self {
            Self::Private(p) => p.is_full_for(view, vc),
            Self::Shared(p) => p.is_full_for(vc),
            Self::Limited(p) | Self::DynamicLimited(p) | Self::ShiftingDynamicLimited(p) => {
                p.is_full_for(view, vc)
            }
            Self::Feedback(p) => p.is_full_for(view, vc),
            Self::SimpleFeedback(p) => p.feedback.is_full_for(view, vc),
        }
    }
}

/// Fixed per-VC partitions; one VC can never starve another.
#[derive(Debug)]
pub(crate) struct PrivatePolicy {
    vc_buf_size: usize,
}

impl PrivatePolicy {
    fn new(config: &Configuration) -> Result<Self, Error> {
        let vcs = config.int("num_vcs");
        let buf_size = config.int("buf_size");
        let vc_buf_size = if buf_size <= 0 {
            config.int("vc_buf_size")
        } else {
            buf_size / vcs
        };
        if vc_buf_size <= 0 {
            return Err(Error::InvalidBufferConfig(format!(
                "per-VC buffer size must be positive, got {}",
                vc_buf_size
            )));
        }
        Ok(Self {
            vc_buf_size: vc_buf_size as usize,
        })
    }

    fn sending_flit(&self, view: &VcView, f: &Flit, module: &str) {
        if view.occupancy(f.vc) > self.vc_buf_size {
            fatal(module, format!("buffer overflow for VC {}", f.vc));
        }
    }

    fn is_full_for(&self, view: &VcView, vc: usize) -> bool {
        view.occupancy(vc) >= self.vc_buf_size
    }
}

/// Private buckets backed by a common overflow pool.
///
/// Each VC maps to one of the buckets; flits past the bucket's capacity spill
/// into the shared pool. When a credit arrives for a VC that is still
/// allocated but has nothing outstanding, the freed slot is reserved for that
/// VC instead of being returned to the pool: the packet's tail is still on
/// its way, and the downstream slot is spoken for.
#[derive(Debug)]
pub(crate) struct SharedPolicy {
    buf_size: usize,
    shared_buf_size: usize,
    shared_buf_occupancy: usize,
    private_buf_size: Vec<usize>,
    private_buf_occupancy: Vec<usize>,
    private_buf_vc_map: Vec<usize>,
    reserved_slots: Vec<usize>,
}

impl SharedPolicy {
    fn new(config: &Configuration) -> Result<Self, Error> {
        let vcs = config.int("num_vcs");
        if vcs <= 0 {
            return Err(Error::InvalidBufferConfig(format!(
                "num_vcs must be positive, got {}",
                vcs
            )));
        }
        let vcs = vcs as usize;

        let mut num_private_bufs = config.int("private_bufs");
        if num_private_bufs < 0 {
            num_private_bufs = vcs as i64;
        } else if num_private_bufs == 0 {
            num_private_bufs = 1;
        }
        let bufs = num_private_bufs as usize;

        let mut buf_size = config.int("buf_size");
        if buf_size < 0 {
            buf_size = vcs as i64 * config.int("vc_buf_size");
        }
        if buf_size <= 0 {
            return Err(Error::InvalidBufferConfig(format!(
                "buffer size must be positive, got {}",
                buf_size
            )));
        }
        let buf_size = buf_size as usize;

        let mut sizes = config.int_list("private_buf_size");
        if sizes.is_empty() {
            let size = config.int("private_buf_size");
            sizes.push(if size < 0 {
                (buf_size / bufs) as i64
            } else {
                size
            });
        }
        if let Some(&last) = sizes.last() {
            sizes.resize(bufs, last);
        }
        if sizes.iter().any(|&s| s < 0) {
            return Err(Error::InvalidBufferConfig(
                "private buffer sizes must be non-negative".to_string(),
            ));
        }
        let private_buf_size: Vec<usize> = sizes.iter().map(|&s| s as usize).collect();

        let mut start_vc = config.int_list("private_buf_start_vc");
        if start_vc.is_empty() {
            let start = config.int("private_buf_start_vc");
            if start < 0 {
                start_vc = (0..bufs).map(|i| (i * vcs / bufs) as i64).collect();
            } else {
                start_vc.push(start);
            }
        }
        let mut end_vc = config.int_list("private_buf_end_vc");
        if end_vc.is_empty() {
            let end = config.int("private_buf_end_vc");
            if end < 0 {
                end_vc = (0..bufs).map(|i| ((i + 1) * vcs / bufs) as i64 - 1).collect();
            } else {
                end_vc.push(end);
            }
        }
        if start_vc.len() < bufs || end_vc.len() < bufs {
            return Err(Error::InvalidBufferConfig(format!(
                "VC ranges must name all {} private buffers",
                bufs
            )));
        }

        let mut private_buf_vc_map = vec![usize::MAX; vcs];
        let mut shared = buf_size as i64;
        for i in 0..bufs {
            shared -= private_buf_size[i] as i64;
            let (start, end) = (start_vc[i], end_vc[i]);
            if start > end || start < 0 || end >= vcs as i64 {
                return Err(Error::InvalidBufferConfig(format!(
                    "buffer {} covers invalid VC range [{}, {}]",
                    i, start, end
                )));
            }
            for vc in start as usize..=end as usize {
                if private_buf_vc_map[vc] != usize::MAX {
                    return Err(Error::InvalidBufferConfig(format!(
                        "VC {} mapped to more than one private buffer",
                        vc
                    )));
                }
                private_buf_vc_map[vc] = i;
            }
        }
        if shared < 0 {
            return Err(Error::InvalidBufferConfig(format!(
                "private buffers exceed the total buffer space of {}",
                buf_size
            )));
        }
        if let Some(vc) = private_buf_vc_map.iter().position(|&b| b == usize::MAX) {
            return Err(Error::InvalidBufferConfig(format!(
                "VC {} not mapped to any private buffer",
                vc
            )));
        }

        Ok(Self {
            buf_size,
            shared_buf_size: shared as usize,
            shared_buf_occupancy: 0,
            private_buf_occupancy: vec![0; bufs],
            private_buf_size,
            private_buf_vc_map,
            reserved_slots: vec![0; vcs],
        })
    }

    fn process_free_slot(&mut self, vc: usize, module: &str) {
        let i = self.private_buf_vc_map[vc];
        self.private_buf_occupancy[i] = match self.private_buf_occupancy[i].checked_sub(1) {
            Some(n) => n,
            None => fatal(
                module,
                format!("private buffer occupancy fell below zero for buffer {}", i),
            ),
        };
        if self.private_buf_occupancy[i] >= self.private_buf_size[i] {
            self.shared_buf_occupancy = match self.shared_buf_occupancy.checked_sub(1) {
                Some(n) => n,
                None => fatal(module, "shared buffer occupancy fell below zero"),
            };
        }
    }

    fn sending_flit(&mut self, f: &Flit, module: &str) {
        let vc = f.vc;
        if self.reserved_slots[vc] > 0 {
            self.reserved_slots[vc] -= 1;
        } else {
            let i = self.private_buf_vc_map[vc];
            self.private_buf_occupancy[i] += 1;
            if self.private_buf_occupancy[i] > self.private_buf_size[i] {
                self.shared_buf_occupancy += 1;
                if self.shared_buf_occupancy > self.shared_buf_size {
                    fatal(module, "shared buffer overflow");
                }
            }
        }
        if f.tail {
            while self.reserved_slots[vc] > 0 {
                self.reserved_slots[vc] -= 1;
                self.process_free_slot(vc, module);
            }
        }
    }

    fn free_slot_for(&mut self, view: &VcView, vc: usize, module: &str) {
        if !view.is_available(vc) && view.is_empty(vc) {
            self.reserved_slots[vc] += 1;
        } else {
            self.process_free_slot(vc, module);
        }
    }

    fn is_full_for(&self, vc: usize) -> bool {
        let i = self.private_buf_vc_map[vc];
        self.reserved_slots[vc] == 0
            && self.private_buf_occupancy[i] >= self.private_buf_size[i]
            && self.shared_buf_occupancy >= self.shared_buf_size
    }
}

/// Shared pool plus a cap on how many slots one VC may hold at once.
///
/// The `dynamic` and `shifting` variants reuse this state and recompute the
/// cap whenever the number of active VCs changes: `dynamic` divides the
/// buffer evenly, `shifting` halves it once per doubling.
#[derive(Debug)]
pub(crate) struct LimitedPolicy {
    shared: SharedPolicy,
    vcs: usize,
    active_vcs: usize,
    max_held_slots: usize,
}

impl LimitedPolicy {
    fn new(config: &Configuration) -> Result<Self, Error> {
        let shared = SharedPolicy::new(config)?;
        let vcs = config.int("num_vcs") as usize;
        let mut max_held_slots = config.int("max_held_slots");
        if max_held_slots < 0 {
            max_held_slots = shared.buf_size as i64;
        }
        Ok(Self {
            vcs,
            active_vcs: 0,
            max_held_slots: max_held_slots as usize,
            shared,
        })
    }

    fn new_dynamic(config: &Configuration) -> Result<Self, Error> {
        let mut policy = Self::new(config)?;
        policy.max_held_slots = policy.shared.buf_size;
        Ok(policy)
    }

    fn take_buffer(&mut self, module: &str) {
        self.active_vcs += 1;
        if self.active_vcs > self.vcs {
            fatal(module, "number of active VCs is too large");
        }
    }

    fn sending_flit(&mut self, f: &Flit, module: &str) {
        self.shared.sending_flit(f, module);
        if f.tail {
            self.active_vcs = match self.active_vcs.checked_sub(1) {
                Some(n) => n,
                None => fatal(module, "number of active VCs fell below zero"),
            };
        }
    }

    fn recompute_divided(&mut self, module: &str) {
        debug_assert!(self.active_vcs > 0);
        self.max_held_slots = self.shared.buf_size / self.active_vcs;
        if self.max_held_slots == 0 {
            fatal(module, "per-VC slot limit fell to zero");
        }
    }

    fn recompute_shifted(&mut self, module: &str) {
        debug_assert!(self.active_vcs > 0);
        let mut i = self.active_vcs - 1;
        let mut slots = self.shared.buf_size;
        while i != 0 {
            slots >>= 1;
            i >>= 1;
        }
        if slots == 0 {
            fatal(module, "per-VC slot limit fell to zero");
        }
        self.max_held_slots = slots;
    }

    fn is_full_for(&self, view: &VcView, vc: usize) -> bool {
        self.shared.is_full_for(vc) || view.occupancy(vc) >= self.max_held_slots
    }
}

/// Shared pool steered by measured round-trip times.
///
/// Every sent flit records its departure cycle; the matching credit closes
/// the loop and feeds an exponential moving average. A VC whose average RTT
/// exceeds the observed physical minimum is congested downstream, so its
/// occupancy limit shrinks by one slot per cycle of excess; a VC at the
/// minimum gets the full doubled-minimum window.
#[derive(Debug)]
pub(crate) struct FeedbackPolicy {
    shared: SharedPolicy,
    occupancy_limit: Vec<usize>,
    round_trip_time: Vec<Option<Cycle>>,
    flit_sent_time: Vec<VecDeque<Cycle>>,
    min_round_trip_time: Option<Cycle>,
    aging_scale: u32,
    offset: i64,
    total_mapped_size: usize,
}

impl FeedbackPolicy {
    fn new(config: &Configuration) -> Result<Self, Error> {
        let shared = SharedPolicy::new(config)?;
        let vcs = config.int("num_vcs") as usize;
        let aging_scale = config.int("feedback_aging_scale");
        if aging_scale < 0 {
            return Err(Error::InvalidParameter(
                "feedback_aging_scale",
                aging_scale,
            ));
        }
        let buf_size = shared.buf_size;
        Ok(Self {
            occupancy_limit: vec![buf_size; vcs],
            round_trip_time: vec![None; vcs],
            flit_sent_time: vec![VecDeque::new(); vcs],
            min_round_trip_time: None,
            aging_scale: aging_scale as u32,
            offset: config.int("feedback_offset"),
            total_mapped_size: buf_size * vcs,
            shared,
        })
    }

    fn sending_flit(&mut self, f: &Flit, now: Cycle, module: &str) {
        self.shared.sending_flit(f, module);
        self.flit_sent_time[f.vc].push_back(now);
    }

    fn free_slot_for(&mut self, view: &VcView, vc: usize, now: Cycle, module: &str) {
        self.shared.free_slot_for(view, vc, module);
        self.update_estimates(vc, now, module);
    }

    fn update_estimates(&mut self, vc: usize, now: Cycle, module: &str) {
        let sent = match self.flit_sent_time[vc].pop_front() {
            Some(t) => t,
            None => fatal(module, format!("credit for VC {} with no flit in flight", vc)),
        };
        let last_rtt = now - sent;

        // the physical minimum could be derived from the channel latencies,
        // but detecting it on the fly also covers mixed-length channels
        let min_rtt = match self.min_round_trip_time {
            Some(min) if last_rtt >= min => min,
            _ => {
                log::trace!(
                    "{}: minimum round trip time is now {} cycles",
                    module,
                    last_rtt
                );
                self.min_round_trip_time = Some(last_rtt);
                last_rtt
            }
        };

        let rtt = match self.round_trip_time[vc] {
            None => last_rtt,
            Some(rtt) => ((rtt << self.aging_scale) + last_rtt - rtt) >> self.aging_scale,
        };
        self.round_trip_time[vc] = Some(rtt);

        // one slot less for every cycle the average exceeds the minimum
        self.total_mapped_size -= self.occupancy_limit[vc];
        let limit = (2 * min_rtt as i64 - rtt as i64 + self.offset).max(1) as usize;
        self.occupancy_limit[vc] = limit;
        self.total_mapped_size += limit;
        log::trace!(
            "{}: occupancy limit for VC {} is {} slots, {} mapped in total",
            module,
            vc,
            limit,
            self.total_mapped_size
        );
    }

    fn is_full_for(&self, view: &VcView, vc: usize) -> bool {
        self.shared.is_full_for(vc) || view.occupancy(vc) >= self.occupancy_limit[vc]
    }
}

/// Feedback measured with one probe flit per VC instead of all of them.
///
/// Only the probe's departure time is recorded; `pending_credits` counts the
/// non-probe flits that were already in flight when the probe left, so the
/// probe's own credit can be recognized when it returns.
#[derive(Debug)]
pub(crate) struct SimpleFeedbackPolicy {
    feedback: FeedbackPolicy,
    pending_credits: Vec<usize>,
}

impl SimpleFeedbackPolicy {
    fn new(config: &Configuration) -> Result<Self, Error> {
        let feedback = FeedbackPolicy::new(config)?;
        let vcs = config.int("num_vcs") as usize;
        Ok(Self {
            feedback,
            pending_credits: vec![0; vcs],
        })
    }

    fn sending_flit(&mut self, view: &VcView, f: &Flit, now: Cycle, module: &str) {
        let vc = f.vc;
        if self.feedback.flit_sent_time[vc].is_empty() {
            // no probe outstanding: this flit becomes one
            self.pending_credits[vc] = view.occupancy(vc) - 1;
            log::trace!(
                "{}: probe flit {} for VC {}, {} non-probe flits in flight",
                module,
                f.id,
                vc,
                self.pending_credits[vc]
            );
            self.feedback.sending_flit(f, now, module);
            return;
        }
        self.feedback.shared.sending_flit(f, module);
    }

    fn free_slot_for(&mut self, view: &VcView, vc: usize, now: Cycle, module: &str) {
        if !self.feedback.flit_sent_time[vc].is_empty() && self.pending_credits[vc] == 0 {
            // this credit answers the probe
            self.feedback.free_slot_for(view, vc, now, module);
            return;
        }
        if self.pending_credits[vc] > 0 {
            debug_assert!(!self.feedback.flit_sent_time[vc].is_empty());
            self.pending_credits[vc] -= 1;
        }
        self.feedback.shared.free_slot_for(view, vc, module);
    }
}

#[cfg(test)]
mod tests {
    use super::super::BufferState;
    use super::*;
    use crate::flit::Credit;

    fn config(policy: &str) -> Configuration {
        let mut config = Configuration::default();
        config.set_str("buffer_policy", policy);
        config
    }

    fn shared_config() -> Configuration {
        // two size-2 buckets out of 8 slots total, so the pool holds 4
        let mut cfg = config("shared");
        cfg.set_int("num_vcs", 2);
        cfg.set_int("buf_size", 8);
        cfg.set_int("private_bufs", 2);
        cfg.set_int("private_buf_size", 2);
        cfg
    }

    fn shared_of(buf: &BufferState) -> &SharedPolicy {
        match &buf.policy {
            BufferPolicy::Shared(p) => p,
            _ => panic!("expected a shared policy"),
        }
    }

    fn limited_of(buf: &BufferState) -> &LimitedPolicy {
        match &buf.policy {
            BufferPolicy::Limited(p)
            | BufferPolicy::DynamicLimited(p)
            | BufferPolicy::ShiftingDynamicLimited(p) => p,
            _ => panic!("expected a limited policy"),
        }
    }

    fn feedback_of(buf: &BufferState) -> &FeedbackPolicy {
        match &buf.policy {
            BufferPolicy::Feedback(p) => p,
            BufferPolicy::SimpleFeedback(p) => &p.feedback,
            _ => panic!("expected a feedback policy"),
        }
    }

    /// `Σ min(bucket occupancy, bucket size) + pool occupancy` counts every
    /// downstream slot exactly once, reservations included.
    fn assert_shared_conservation(buf: &BufferState) {
        let p = shared_of(buf);
        let held: usize = p
            .private_buf_occupancy
            .iter()
            .zip(p.private_buf_size.iter())
            .map(|(&occ, &size)| occ.min(size))
            .sum();
        let reserved: usize = p.reserved_slots.iter().sum();
        assert_eq!(held + p.shared_buf_occupancy, buf.occupancy() + reserved);
        assert!(held + p.shared_buf_occupancy <= p.buf_size);
    }

    #[test]
    fn shared_pool_fills_after_the_bucket() {
        let _logger = env_logger::builder().try_init();
        let mut buf = BufferState::new(&shared_config(), "buf").unwrap();

        buf.take_buffer(0);
        buf.sending_flit(&Flit::body(0, 0), 0);
        buf.sending_flit(&Flit::body(1, 0), 1);
        // bucket 0 full, pool untouched
        assert_eq!(shared_of(&buf).shared_buf_occupancy, 0);
        assert!(!buf.is_full_for(0));

        buf.sending_flit(&Flit::body(2, 0), 2);
        assert_eq!(shared_of(&buf).shared_buf_occupancy, 1);

        for id in 3..6 {
            buf.sending_flit(&Flit::body(id, 0), id as Cycle);
            assert_shared_conservation(&buf);
        }
        // pool exhausted: VC 0 is full, VC 1 still has its own bucket
        assert_eq!(shared_of(&buf).shared_buf_occupancy, 4);
        assert!(buf.is_full_for(0));
        assert!(!buf.is_full_for(1));

        buf.process_credit(&Credit::for_vc(0), 10);
        assert!(!buf.is_full_for(0));
        assert_eq!(shared_of(&buf).shared_buf_occupancy, 3);
        assert_shared_conservation(&buf);
    }

    #[test]
    #[should_panic(expected = "shared buffer overflow")]
    fn overflowing_the_pool_is_fatal() {
        let mut buf = BufferState::new(&shared_config(), "buf").unwrap();
        buf.take_buffer(0);
        for id in 0..7 {
            buf.sending_flit(&Flit::body(id, 0), id as Cycle);
        }
    }

    #[test]
    fn early_credits_become_reserved_slots() {
        let mut buf = BufferState::new(&shared_config(), "buf").unwrap();

        buf.take_buffer(0);
        buf.sending_flit(&Flit::body(0, 0), 0);
        // the credit beats the tail: the VC is still allocated but empty,
        // so the slot is earmarked rather than freed
        buf.process_credit(&Credit::for_vc(0), 5);
        assert_eq!(shared_of(&buf).reserved_slots[0], 1);
        assert_eq!(shared_of(&buf).private_buf_occupancy[0], 1);
        assert!(!buf.is_full_for(0));
        assert_shared_conservation(&buf);

        // the tail consumes the reservation instead of a fresh slot
        buf.sending_flit(&Flit::tail(1, 0), 6);
        assert_eq!(shared_of(&buf).reserved_slots[0], 0);
        assert_eq!(shared_of(&buf).private_buf_occupancy[0], 1);
        assert_shared_conservation(&buf);

        buf.process_credit(&Credit::for_vc(0), 10);
        assert_eq!(shared_of(&buf).private_buf_occupancy[0], 0);
        assert_eq!(buf.occupancy(), 0);
        assert_shared_conservation(&buf);
    }

    #[test]
    fn limited_policy_caps_a_single_vc() {
        let mut cfg = shared_config();
        cfg.set_str("buffer_policy", "limited");
        cfg.set_int("max_held_slots", 3);
        let mut buf = BufferState::new(&cfg, "buf").unwrap();

        buf.take_buffer(0);
        assert_eq!(limited_of(&buf).active_vcs, 1);
        for id in 0..3 {
            buf.sending_flit(&Flit::body(id, 0), id as Cycle);
        }
        // three slots held: at the cap even though the pool has room
        assert!(buf.is_full_for(0));
        assert!(!shared_of_limited_full(&buf, 0));

        buf.process_credit(&Credit::for_vc(0), 10);
        assert!(!buf.is_full_for(0));

        buf.sending_flit(&Flit::tail(3, 0), 11);
        assert_eq!(limited_of(&buf).active_vcs, 0);
    }

    fn shared_of_limited_full(buf: &BufferState, vc: usize) -> bool {
        limited_of(buf).shared.is_full_for(vc)
    }

    #[test]
    fn dynamic_limit_divides_by_active_vcs() {
        let mut cfg = shared_config();
        cfg.set_str("buffer_policy", "dynamic");
        cfg.set_int("num_vcs", 4);
        cfg.set_int("private_bufs", 4);
        cfg.set_int("private_buf_size", 1);
        let mut buf = BufferState::new(&cfg, "buf").unwrap();

        assert_eq!(limited_of(&buf).max_held_slots, 8);
        buf.take_buffer(0);
        assert_eq!(limited_of(&buf).max_held_slots, 8);
        buf.take_buffer(1);
        assert_eq!(limited_of(&buf).max_held_slots, 4);
        buf.take_buffer(2);
        assert_eq!(limited_of(&buf).max_held_slots, 2);

        // a tail hands its share back
        buf.sending_flit(&Flit::tail(0, 2), 0);
        assert_eq!(limited_of(&buf).active_vcs, 2);
        assert_eq!(limited_of(&buf).max_held_slots, 4);
        buf.process_credit(&Credit::for_vc(2), 20);
    }

    #[test]
    fn shifting_limit_halves_per_doubling() {
        let mut cfg = shared_config();
        cfg.set_str("buffer_policy", "shifting");
        cfg.set_int("num_vcs", 4);
        cfg.set_int("private_bufs", 4);
        cfg.set_int("private_buf_size", 1);
        let mut buf = BufferState::new(&cfg, "buf").unwrap();

        buf.take_buffer(0);
        assert_eq!(limited_of(&buf).max_held_slots, 8);
        buf.take_buffer(1);
        assert_eq!(limited_of(&buf).max_held_slots, 4);
        // the third VC starts the next halving step
        buf.take_buffer(2);
        assert_eq!(limited_of(&buf).max_held_slots, 2);
        buf.take_buffer(3);
        assert_eq!(limited_of(&buf).max_held_slots, 2);
    }

    fn feedback_config() -> Configuration {
        let mut cfg = config("feedback");
        cfg.set_int("num_vcs", 2);
        cfg.set_int("vc_buf_size", 8);
        cfg.set_int("feedback_aging_scale", 4);
        cfg.set_int("feedback_offset", 0);
        cfg
    }

    fn assert_mapped_size(buf: &BufferState) {
        let p = feedback_of(buf);
        assert_eq!(
            p.total_mapped_size,
            p.occupancy_limit.iter().sum::<usize>()
        );
        assert!(p.occupancy_limit.iter().all(|&limit| limit >= 1));
    }

    #[test]
    fn feedback_tracks_round_trip_times() {
        let _logger = env_logger::builder().try_init();
        let mut buf = BufferState::new(&feedback_config(), "buf").unwrap();
        assert_eq!(feedback_of(&buf).total_mapped_size, 32);

        buf.take_buffer(0);
        buf.sending_flit(&Flit::body(0, 0), 0);
        buf.process_credit(&Credit::for_vc(0), 20);
        // first sample seeds both the minimum and the average
        assert_eq!(feedback_of(&buf).min_round_trip_time, Some(20));
        assert_eq!(feedback_of(&buf).round_trip_time[0], Some(20));
        assert_eq!(feedback_of(&buf).occupancy_limit[0], 20);
        assert_mapped_size(&buf);

        buf.sending_flit(&Flit::body(1, 0), 100);
        buf.process_credit(&Credit::for_vc(0), 130);
        // 30-cycle sample ages in sixteenths: ((20<<4)+30-20)>>4 == 20
        assert_eq!(feedback_of(&buf).min_round_trip_time, Some(20));
        assert_eq!(feedback_of(&buf).round_trip_time[0], Some(20));
        assert_eq!(feedback_of(&buf).occupancy_limit[0], 20);
        assert_mapped_size(&buf);

        buf.sending_flit(&Flit::body(2, 0), 200);
        buf.process_credit(&Credit::for_vc(0), 210);
        // a faster probe lowers the minimum, and the stale average pushes
        // the limit to its floor: 2*10 - 19 = 1
        assert_eq!(feedback_of(&buf).min_round_trip_time, Some(10));
        assert_eq!(feedback_of(&buf).round_trip_time[0], Some(19));
        assert_eq!(feedback_of(&buf).occupancy_limit[0], 1);
        assert_mapped_size(&buf);
    }

    #[test]
    fn feedback_minimum_never_increases() {
        let mut buf = BufferState::new(&feedback_config(), "buf").unwrap();
        buf.take_buffer(0);
        let mut now = 0;
        let mut last_min = usize::MAX;
        for (id, rtt) in [30usize, 25, 40, 12, 60, 12].iter().enumerate() {
            buf.sending_flit(&Flit::body(id as u64, 0), now);
            now += rtt;
            buf.process_credit(&Credit::for_vc(0), now);
            let min = feedback_of(&buf).min_round_trip_time.unwrap();
            assert!(min <= last_min);
            last_min = min;
            assert_mapped_size(&buf);
        }
        assert_eq!(last_min, 12);
    }

    #[test]
    fn feedback_limit_throttles_admission() {
        let mut buf = BufferState::new(&feedback_config(), "buf").unwrap();
        buf.take_buffer(0);
        buf.sending_flit(&Flit::body(0, 0), 0);
        buf.process_credit(&Credit::for_vc(0), 2);
        // limit is 2*2 - 2 = 2: one more flit reaches it
        buf.sending_flit(&Flit::body(1, 0), 10);
        assert!(!buf.is_full_for(0));
        buf.sending_flit(&Flit::body(2, 0), 11);
        assert!(buf.is_full_for(0));
        assert!(!buf.is_full_for(1));
    }

    #[test]
    fn simple_feedback_samples_only_the_probe() {
        let _logger = env_logger::builder().try_init();
        let mut cfg = feedback_config();
        cfg.set_str("buffer_policy", "simplefeedback");
        let mut buf = BufferState::new(&cfg, "buf").unwrap();

        let pending = |buf: &BufferState| match &buf.policy {
            BufferPolicy::SimpleFeedback(p) => p.pending_credits[0],
            _ => panic!("expected simplefeedback"),
        };
        let samples = |buf: &BufferState| feedback_of(buf).flit_sent_time[0].len();

        buf.take_buffer(0);
        // A is the probe; B and C travel unsampled
        buf.sending_flit(&Flit::body(0, 0), 0);
        assert_eq!((samples(&buf), pending(&buf)), (1, 0));
        buf.sending_flit(&Flit::body(1, 0), 1);
        buf.sending_flit(&Flit::body(2, 0), 2);
        assert_eq!((samples(&buf), pending(&buf)), (1, 0));

        // A's credit closes the probe loop
        buf.process_credit(&Credit::for_vc(0), 20);
        assert_eq!(samples(&buf), 0);
        assert_eq!(feedback_of(&buf).round_trip_time[0], Some(20));

        // D becomes the next probe, with B and C still in flight ahead of it
        buf.sending_flit(&Flit::body(3, 0), 30);
        assert_eq!((samples(&buf), pending(&buf)), (1, 2));

        // B's and C's credits drain the pending count without sampling
        buf.process_credit(&Credit::for_vc(0), 31);
        assert_eq!((samples(&buf), pending(&buf)), (1, 1));
        buf.process_credit(&Credit::for_vc(0), 32);
        assert_eq!((samples(&buf), pending(&buf)), (1, 0));
        assert_eq!(feedback_of(&buf).round_trip_time[0], Some(20));

        // D's own credit is the one that updates the estimate
        buf.process_credit(&Credit::for_vc(0), 40);
        assert_eq!(samples(&buf), 0);
        assert_eq!(feedback_of(&buf).round_trip_time[0], Some(19));
        assert_mapped_size(&buf);
    }

    #[test]
    fn contradictory_vc_ranges_are_rejected() {
        let mut cfg = shared_config();
        cfg.set_int_list("private_buf_start_vc", &[0, 0]);
        cfg.set_int_list("private_buf_end_vc", &[1, 1]);
        match BufferState::new(&cfg, "buf") {
            Err(Error::InvalidBufferConfig(msg)) => {
                assert!(msg.contains("more than one private buffer"))
            }
            other => panic!("expected an invalid config error, got {:?}", other.err()),
        }
    }

    #[test]
    fn oversized_private_buffers_are_rejected() {
        let mut cfg = shared_config();
        cfg.set_int("private_buf_size", 5);
        assert!(matches!(
            BufferState::new(&cfg, "buf"),
            Err(Error::InvalidBufferConfig(_))
        ));
    }
}
