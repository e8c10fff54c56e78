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

//! String-keyed simulation parameters.
//!
//! Every recognized key carries a default, so components can read their
//! parameters unconditionally; a YAML file (or programmatic assignment)
//! overrides individual entries. Keys that the store has never heard of are
//! a construction error rather than a silent typo.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::Error;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    IntList(Vec<i64>),
    Str(String),
}

#[derive(Clone, Debug)]
pub struct Configuration {
    values: BTreeMap<String, ParamValue>,
}

impl Default for Configuration {
    fn default() -> Self {
        let ints: &[(&str, i64)] = &[
            ("num_vcs", 3),
            ("buf_size", -1),
            ("vc_buf_size", 8),
            ("wait_for_tail_credit", 0),
            ("private_bufs", -1),
            ("private_buf_size", -1),
            ("private_buf_start_vc", -1),
            ("private_buf_end_vc", -1),
            ("max_held_slots", -1),
            ("feedback_aging_scale", 16),
            ("feedback_offset", 0),
            ("k", 2),
            ("n", 1),
            ("classes", 1),
            ("local_latency", 10),
            ("global_latency", 100),
        ];
        let mut values = BTreeMap::new();
        for (key, value) in ints {
            values.insert(key.to_string(), ParamValue::Int(*value));
        }
        values.insert(
            "buffer_policy".to_string(),
            ParamValue::Str("private".to_string()),
        );
        values.insert(
            "routing_function".to_string(),
            ParamValue::Str("min_dragonflyrelative".to_string()),
        );
        Self { values }
    }
}

impl Configuration {
    /// Defaults overridden by a YAML mapping.
    pub fn from_str(text: &str) -> Result<Self, Error> {
        let overrides: BTreeMap<String, ParamValue> =
            serde_yaml::from_str(text).map_err(|e| Error::ConfigFormat(e.to_string()))?;
        let mut config = Self::default();
        config.merge(overrides)?;
        Ok(config)
    }

    /// Defaults overridden by a YAML file.
    pub fn from_file(file_name: &str) -> Result<Self, Error> {
        let file = File::open(Path::new(file_name))
            .map_err(|e| Error::ConfigFormat(format!("{}: {}", file_name, e)))?;
        let overrides: BTreeMap<String, ParamValue> =
            serde_yaml::from_reader(BufReader::new(file))
                .map_err(|e| Error::ConfigFormat(format!("{}: {}", file_name, e)))?;
        let mut config = Self::default();
        config.merge(overrides)?;
        Ok(config)
    }

    fn merge(&mut self, overrides: BTreeMap<String, ParamValue>) -> Result<(), Error> {
        for (key, value) in overrides {
            if !self.values.contains_key(&key) {
                return Err(Error::UnknownParameter(key));
            }
            self.values.insert(key, value);
        }
        Ok(())
    }

    pub fn int(&self, key: &str) -> i64 {
        match self.values.get(key) {
            Some(ParamValue::Int(value)) => *value,
            Some(other) => panic!("parameter {} is not an integer: {:?}", key, other),
            None => panic!("unknown parameter {}", key),
        }
    }

    pub fn str(&self, key: &str) -> &str {
        match self.values.get(key) {
            Some(ParamValue::Str(value)) => value,
            Some(other) => panic!("parameter {} is not a string: {:?}", key, other),
            None => panic!("unknown parameter {}", key),
        }
    }

    /// The list stored under `key`, or empty if the key holds a scalar.
    ///
    /// Callers that accept both shapes probe the list first and fall back to
    /// [`Configuration::int`], the way the per-bucket buffer sizes do.
    pub fn int_list(&self, key: &str) -> Vec<i64> {
        match self.values.get(key) {
            Some(ParamValue::IntList(values)) => values.clone(),
            Some(_) => Vec::new(),
            None => panic!("unknown parameter {}", key),
        }
    }

    pub fn bool(&self, key: &str) -> bool {
        self.int(key) != 0
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.assign(key, ParamValue::Int(value));
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.assign(key, ParamValue::Str(value.to_string()));
    }

    pub fn set_int_list(&mut self, key: &str, values: &[i64]) {
        self.assign(key, ParamValue::IntList(values.to_vec()));
    }

    fn assign(&mut self, key: &str, value: ParamValue) {
        assert!(
            self.values.contains_key(key),
            "unknown parameter {}",
            key
        );
        self.values.insert(key.to_string(), value);
    }
}
