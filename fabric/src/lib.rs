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

//! Cycle-accurate interconnection-network simulation building blocks.
//!
//! Two loosely coupled subsystems share configuration but no state: the
//! downstream buffer mirror ([`BufferState`] and its capacity policies),
//! and the relative-dragonfly topology builder with its routing functions.
//! The simulation driver that steps them cycle by cycle lives outside this
//! crate; it owns the clock and the ordering of credit delivery, routing,
//! allocation, and flit transmission.

mod buffer_state;
mod config;
mod error;
mod flit;
mod network;
mod routing;
pub mod topologies;

// Public types
// type to use for simulation time, in cycles
pub type Cycle = usize;

pub use crate::buffer_state::BufferState;
pub use crate::config::{Configuration, ParamValue};
pub use crate::error::Error;
pub use crate::flit::{Credit, Flit};
pub use crate::network::{Channel, ChannelRef, Endpoint, Router, RouterView};
pub use crate::routing::{
    find_routing_function, minimal_route, ugal_route, OutputRange, OutputSet, RoutingContext,
    RoutingFn,
};
pub use crate::topologies::{DragonflyParams, DragonflyRelative};
