// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Splitter configuration

use crate::error::{Result, SplitterError};

/// Default per-partition flush threshold, in rows.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Configuration for a shuffle splitter.
///
/// The key and projection lists are carried as comma-separated column-index
/// strings, a minimal textual encoding chosen for cross-runtime portability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitterOptions {
    /// Number of output partitions (must be at least 1).
    pub partition_nums: usize,
    /// Row-count threshold at which a partition buffer is emitted.
    pub buffer_size: usize,
    /// Encoded partition-key description, strategy specific.
    ///
    /// Hash partitioning reads a comma-separated list of key column indices.
    /// Range partitioning reads `"<key column>;<b0,b1,...>"` where the bounds
    /// are `partition_nums - 1` ascending upper bounds.
    pub exprs_buffer: String,
    /// Comma-separated list of column indices retained in output. When empty,
    /// all columns pass through identity-mapped.
    pub schema_buffer: String,
}

impl Default for SplitterOptions {
    fn default() -> Self {
        Self {
            partition_nums: 1,
            buffer_size: DEFAULT_BUFFER_SIZE,
            exprs_buffer: String::new(),
            schema_buffer: String::new(),
        }
    }
}

/// Parses a comma-separated list of column indices.
///
/// An empty input yields an empty list; any malformed token is a
/// configuration error.
pub(crate) fn parse_index_list(list: &str) -> Result<Vec<usize>> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }
    list.split(',')
        .map(|token| {
            token.trim().parse::<usize>().map_err(|_| {
                SplitterError::Configuration(format!(
                    "malformed column index: {token:?}"
                ))
            })
        })
        .collect()
}

/// Parses a comma-separated list of signed 64-bit range bounds.
pub(crate) fn parse_bound_list(list: &str) -> Result<Vec<i64>> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }
    list.split(',')
        .map(|token| {
            token.trim().parse::<i64>().map_err(|_| {
                SplitterError::Configuration(format!(
                    "malformed range bound: {token:?}"
                ))
            })
        })
        .collect()
}
