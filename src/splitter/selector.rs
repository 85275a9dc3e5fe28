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

//! Partition assignment strategies.
//!
//! Each strategy maps one record batch to a [`PartitionInfo`] describing how
//! the batch's rows are grouped and ordered by destination partition. The
//! strategies are pure apart from the state they carry across calls (the
//! round-robin row counter), so the orchestrator can drive any of them
//! through the common [`SelectorBuilder`] trait.

use ahash::RandomState;
use datafusion::arrow::array::{Array, Int64Array};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::DataType;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::hash_utils::create_hashes;

use crate::config::{parse_bound_list, parse_index_list};
use crate::error::{Result, SplitterError};

/// Describes, for one batch, how its rows are grouped by destination
/// partition.
///
/// `partition_start_points` is a CSR-style boundary array of length
/// `partition_num + 1`: the row indices for partition `j` occupy
/// `partition_selector[partition_start_points[j]..partition_start_points[j + 1]]`.
/// The selector is a permutation of `0..num_rows`, grouped contiguously by
/// partition and preserving arrival order within each group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    /// Number of output partitions.
    pub partition_num: usize,
    /// Group boundaries into `partition_selector`, starting at 0 and ending
    /// at the batch's row count.
    pub partition_start_points: Vec<usize>,
    /// Row indices grouped contiguously by destination partition.
    pub partition_selector: Vec<u32>,
}

impl PartitionInfo {
    /// Builds the grouped selector from per-row partition ids with a counting
    /// sort: count per partition, prefix-sum into group ends, then a reverse
    /// fill so that intra-partition order follows arrival order.
    pub(crate) fn from_partition_ids(
        partition_ids: &[usize],
        partition_num: usize,
    ) -> Self {
        let num_rows = partition_ids.len();

        let mut partition_counters = vec![0usize; partition_num];
        for pid in partition_ids {
            partition_counters[*pid] += 1;
        }

        let mut partition_ends = partition_counters;
        let mut accum = 0;
        for end in partition_ends.iter_mut() {
            *end += accum;
            accum = *end;
        }

        let mut partition_selector = vec![0u32; num_rows];
        for (index, pid) in partition_ids.iter().enumerate().rev() {
            partition_ends[*pid] -= 1;
            partition_selector[partition_ends[*pid]] = index as u32;
        }

        // after the fill the ends have become the starts
        let mut partition_start_points = partition_ends;
        partition_start_points.push(num_rows);

        Self {
            partition_num,
            partition_start_points,
            partition_selector,
        }
    }
}

/// Computes the partition assignment for record batches.
pub trait SelectorBuilder {
    /// Computes the partition assignment for one batch.
    fn build(&mut self, batch: &RecordBatch) -> Result<PartitionInfo>;
}

/// Assigns rows to partitions in round-robin order.
///
/// The row counter persists across batches, so consecutive single-row batches
/// cycle through the partitions. Also serves the degenerate single-partition
/// mode with `partition_nums` forced to 1.
#[derive(Debug)]
pub struct RoundRobinSelectorBuilder {
    partition_nums: usize,
    pid_counter: usize,
}

impl RoundRobinSelectorBuilder {
    /// Creates a round-robin strategy over `partition_nums` partitions.
    pub fn new(partition_nums: usize) -> Self {
        Self {
            partition_nums,
            pid_counter: 0,
        }
    }
}

impl SelectorBuilder for RoundRobinSelectorBuilder {
    fn build(&mut self, batch: &RecordBatch) -> Result<PartitionInfo> {
        let mut partition_ids = Vec::with_capacity(batch.num_rows());
        for _ in 0..batch.num_rows() {
            partition_ids.push(self.pid_counter);
            self.pid_counter = (self.pid_counter + 1) % self.partition_nums;
        }
        Ok(PartitionInfo::from_partition_ids(
            &partition_ids,
            self.partition_nums,
        ))
    }
}

/// Assigns rows to partitions by a 64-bit hash of the designated key columns.
///
/// The hash state is seeded with fixed values so that identical key values
/// always land in the same partition, which downstream shuffle joins and
/// aggregations rely on.
#[derive(Debug)]
pub struct HashSelectorBuilder {
    partition_nums: usize,
    hash_fields: Vec<usize>,
    random_state: RandomState,
    hashes_buffer: Vec<u64>,
}

impl HashSelectorBuilder {
    /// Creates a hash strategy keyed on `hash_fields` column indices.
    pub fn new(partition_nums: usize, hash_fields: Vec<usize>) -> Self {
        Self {
            partition_nums,
            hash_fields,
            random_state: RandomState::with_seeds(42, 42, 42, 42),
            hashes_buffer: Vec::new(),
        }
    }
}

impl SelectorBuilder for HashSelectorBuilder {
    fn build(&mut self, batch: &RecordBatch) -> Result<PartitionInfo> {
        let mut arrays = Vec::with_capacity(self.hash_fields.len());
        for field in &self.hash_fields {
            if *field >= batch.num_columns() {
                return Err(SplitterError::Configuration(format!(
                    "hash key column {field} out of range for block with {} columns",
                    batch.num_columns()
                )));
            }
            arrays.push(batch.column(*field).clone());
        }

        self.hashes_buffer.clear();
        self.hashes_buffer.resize(batch.num_rows(), 0);
        create_hashes(&arrays, &self.random_state, &mut self.hashes_buffer)?;

        let partition_ids = self
            .hashes_buffer
            .iter()
            .map(|hash| (hash % self.partition_nums as u64) as usize)
            .collect::<Vec<_>>();
        Ok(PartitionInfo::from_partition_ids(
            &partition_ids,
            self.partition_nums,
        ))
    }
}

/// Assigns rows to partitions by comparing a key column against a set of
/// ascending partition bounds.
///
/// Partition `j` holds rows whose key is at most `bounds[j]`; rows above the
/// last bound clamp to the last partition and null keys clamp to the first.
#[derive(Debug)]
pub struct RangeSelectorBuilder {
    partition_nums: usize,
    key_field: usize,
    bounds: Vec<i64>,
}

impl RangeSelectorBuilder {
    /// Parses the `"<key column>;<b0,b1,...>"` encoding and creates a range
    /// strategy over `partition_nums` partitions.
    pub fn try_new(exprs_buffer: &str, partition_nums: usize) -> Result<Self> {
        if partition_nums == 0 {
            return Err(SplitterError::Configuration(
                "range partitioning requires at least one partition".to_owned(),
            ));
        }
        let (fields, bounds) = exprs_buffer.split_once(';').ok_or_else(|| {
            SplitterError::Configuration(format!(
                "range partitioning expects \"<key column>;<bounds>\", got {exprs_buffer:?}"
            ))
        })?;

        let key_fields = parse_index_list(fields)?;
        if key_fields.len() != 1 {
            return Err(SplitterError::Configuration(format!(
                "range partitioning requires exactly one key column, got {}",
                key_fields.len()
            )));
        }
        let key_field = key_fields[0];

        let bounds = parse_bound_list(bounds)?;
        if bounds.len() + 1 != partition_nums {
            return Err(SplitterError::Configuration(format!(
                "range partitioning over {partition_nums} partitions requires {} bounds, got {}",
                partition_nums - 1,
                bounds.len()
            )));
        }
        if !bounds.windows(2).all(|pair| pair[0] <= pair[1]) {
            return Err(SplitterError::Configuration(
                "range partition bounds must be ascending".to_owned(),
            ));
        }

        Ok(Self {
            partition_nums,
            key_field,
            bounds,
        })
    }
}

impl SelectorBuilder for RangeSelectorBuilder {
    fn build(&mut self, batch: &RecordBatch) -> Result<PartitionInfo> {
        if self.key_field >= batch.num_columns() {
            return Err(SplitterError::Configuration(format!(
                "range key column {} out of range for block with {} columns",
                self.key_field,
                batch.num_columns()
            )));
        }

        let keys = cast(batch.column(self.key_field), &DataType::Int64)?;
        let keys = keys.as_any().downcast_ref::<Int64Array>().ok_or_else(|| {
            SplitterError::Internal(
                "range key column did not cast to Int64".to_owned(),
            )
        })?;

        let mut partition_ids = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let pid = if keys.is_null(row) {
                0
            } else {
                let key = keys.value(row);
                self.bounds.partition_point(|bound| *bound < key)
            };
            partition_ids.push(pid.min(self.partition_nums - 1));
        }
        Ok(PartitionInfo::from_partition_ids(
            &partition_ids,
            self.partition_nums,
        ))
    }
}
