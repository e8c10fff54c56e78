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

use std::fmt;

use crate::network::ChannelRef;

/// Construction-time failures: bad configuration or inconsistent wiring.
///
/// Runtime contract violations (counter underflow, buffer overflow, credits
/// for idle VCs) never reach this type; they go through [`fatal`] instead.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    UnknownParameter(String),
    UnknownBufferPolicy(String),
    UnknownRoutingFunction(String),
    InvalidBufferConfig(String),
    InvalidParameter(&'static str, i64),
    UnsupportedDimension(i64),
    InvalidChannel { router: usize, index: i64 },
    DuplicateChannelEndpoint { channel: ChannelRef, router: usize },
    ConfigFormat(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownParameter(key) => {
                write!(f, "ERROR: unknown configuration parameter {}", key)
            }
            Self::UnknownBufferPolicy(name) => {
                write!(f, "ERROR: unknown buffer policy {}", name)
            }
            Self::UnknownRoutingFunction(name) => {
                write!(f, "ERROR: unknown routing function {}", name)
            }
            Self::InvalidBufferConfig(what) => write!(f, "ERROR: {}", what),
            Self::InvalidParameter(key, value) => {
                write!(f, "ERROR: invalid value {} for parameter {}", value, key)
            }
            Self::UnsupportedDimension(n) => {
                write!(
                    f,
                    "ERROR: only one intra-group dimension is supported, got n = {}",
                    n
                )
            }
            Self::InvalidChannel { router, index } => {
                write!(
                    f,
                    "ERROR: channel index {} computed for router {} is out of range",
                    index, router
                )
            }
            Self::DuplicateChannelEndpoint { channel, router } => {
                write!(
                    f,
                    "ERROR: channel {:?} bound a second time at router {}",
                    channel, router
                )
            }
            Self::ConfigFormat(what) => write!(f, "ERROR: {}", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// Central sink for broken runtime invariants.
///
/// The simulator's contract is fail-stop: an inconsistent buffer mirror can
/// only produce wrong results, so the offense is recorded with the module's
/// name and the simulation is aborted on the spot.
pub(crate) fn fatal(module: &str, msg: impl AsRef<str>) -> ! {
    let msg = msg.as_ref();
    log::error!("{}: {}", module, msg);
    panic!("{}: {}", module, msg)
}
