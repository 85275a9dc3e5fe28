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

//! Shuffle splitter engine.
//!
//! The splitter pulls record batches from an upstream [`BlockSource`],
//! assigns each row to one of N output partitions with a pluggable strategy,
//! scatters rows column-wise into per-partition buffers, and exposes filled
//! buffers to a downstream consumer through a blocking pull iterator
//! (`has_next` / `next` / `next_partition_id`).
//!
//! All work happens synchronously inside the iterator calls on whichever
//! thread the consumer drives; buffered rows are bounded by
//! `buffer_size * partition_nums` at any time.

mod buffer;
mod selector;

pub use buffer::ColumnsBuffer;
pub use selector::{
    HashSelectorBuilder, PartitionInfo, RangeSelectorBuilder,
    RoundRobinSelectorBuilder, SelectorBuilder,
};

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use datafusion::arrow::datatypes::{Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use log::debug;

use crate::config::{parse_index_list, SplitterOptions};
use crate::error::{Result, SplitterError};

/// Capability of the upstream block producer.
///
/// The splitter owns the boxed source for its whole lifetime and invokes it
/// synchronously; the calls may block. Producer failures propagate unchanged
/// to the downstream consumer, retries belong to the producer.
pub trait BlockSource {
    /// Returns whether another block is available.
    fn has_next(&mut self) -> Result<bool>;

    /// Returns the next block. Must only be called after `has_next` returned
    /// true.
    fn next(&mut self) -> Result<RecordBatch>;
}

/// In-memory [`BlockSource`] over a fixed list of blocks.
#[derive(Debug)]
pub struct MemoryBlockSource {
    blocks: VecDeque<RecordBatch>,
}

impl MemoryBlockSource {
    /// Creates a source yielding `blocks` in order.
    pub fn new(blocks: Vec<RecordBatch>) -> Self {
        Self {
            blocks: blocks.into(),
        }
    }
}

impl BlockSource for MemoryBlockSource {
    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.blocks.is_empty())
    }

    fn next(&mut self) -> Result<RecordBatch> {
        self.blocks.pop_front().ok_or_else(|| {
            SplitterError::General("memory block source is exhausted".to_owned())
        })
    }
}

/// One emitted block together with the partition it belongs to.
#[derive(Debug)]
struct OutputEntry {
    partition_id: usize,
    block: RecordBatch,
}

impl PartialEq for OutputEntry {
    fn eq(&self, other: &Self) -> bool {
        self.partition_id == other.partition_id
    }
}

impl Eq for OutputEntry {}

impl PartialOrd for OutputEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OutputEntry {
    // BinaryHeap is a max-heap; the reversed comparison yields a stable
    // ascending partition-id emission order.
    fn cmp(&self, other: &Self) -> Ordering {
        other.partition_id.cmp(&self.partition_id)
    }
}

/// Pull-based shuffle partitioner over a stream of record batches.
///
/// Constructed with a strategy short name (`"rr"`, `"hash"`, `"single"`, or
/// `"range"`) and driven through `has_next` / `next`:
///
/// - `has_next` pulls and scatters upstream blocks until at least one
///   partition buffer has crossed the flush threshold, flushing every
///   remainder once the upstream is exhausted, and reports whether an output
///   block is pending;
/// - `next` hands the pending block's ownership to the caller, exactly once
///   per true `has_next`;
/// - `next_partition_id` names the partition of the pending block.
///
/// Emitted blocks are ordered by ascending partition id within each drain
/// cycle, so downstream shuffle files are laid out deterministically.
pub struct ShuffleSplitter {
    options: SplitterOptions,
    input: Box<dyn BlockSource>,
    selector_builder: Box<dyn SelectorBuilder>,
    partition_buffer: Vec<ColumnsBuffer>,
    output_buffer: BinaryHeap<OutputEntry>,
    /// Output schema, fixed from the first non-empty block
    output_header: Option<SchemaRef>,
    /// Columns retained in output; empty until resolved (identity-mapped
    /// when no projection list was configured)
    output_columns_indices: Vec<usize>,
    next_partition_id: usize,
    input_exhausted: bool,
}

impl std::fmt::Debug for ShuffleSplitter {
    // the boxed source and strategy are opaque, so only the observable
    // splitter state is formatted
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ShuffleSplitter")
            .field("options", &self.options)
            .field("partition_buffers", &self.partition_buffer.len())
            .field("pending_outputs", &self.output_buffer.len())
            .field("output_header", &self.output_header)
            .field("next_partition_id", &self.next_partition_id)
            .field("input_exhausted", &self.input_exhausted)
            .finish_non_exhaustive()
    }
}

impl ShuffleSplitter {
    /// Creates a splitter for the given strategy short name.
    ///
    /// `"single"` is round-robin with `partition_nums` forced to 1. Unknown
    /// names and malformed index lists fail with a configuration error.
    pub fn try_new(
        short_name: &str,
        mut options: SplitterOptions,
        input: Box<dyn BlockSource>,
    ) -> Result<Self> {
        if options.partition_nums == 0 {
            return Err(SplitterError::Configuration(
                "partition_nums must be at least 1".to_owned(),
            ));
        }
        if options.buffer_size == 0 {
            return Err(SplitterError::Configuration(
                "buffer_size must be at least 1".to_owned(),
            ));
        }

        let selector_builder: Box<dyn SelectorBuilder> = match short_name {
            "rr" => Box::new(RoundRobinSelectorBuilder::new(options.partition_nums)),
            "single" => {
                options.partition_nums = 1;
                Box::new(RoundRobinSelectorBuilder::new(1))
            }
            "hash" => {
                let hash_fields = parse_index_list(&options.exprs_buffer)?;
                if hash_fields.is_empty() {
                    return Err(SplitterError::Configuration(
                        "hash partitioning requires at least one key column"
                            .to_owned(),
                    ));
                }
                Box::new(HashSelectorBuilder::new(
                    options.partition_nums,
                    hash_fields,
                ))
            }
            "range" => Box::new(RangeSelectorBuilder::try_new(
                &options.exprs_buffer,
                options.partition_nums,
            )?),
            other => {
                return Err(SplitterError::Configuration(format!(
                    "unsupported splitter: {other}"
                )))
            }
        };

        let output_columns_indices = parse_index_list(&options.schema_buffer)?;
        let partition_buffer = (0..options.partition_nums)
            .map(|_| ColumnsBuffer::new())
            .collect();

        Ok(Self {
            options,
            input,
            selector_builder,
            partition_buffer,
            output_buffer: BinaryHeap::new(),
            output_header: None,
            output_columns_indices,
            next_partition_id: 0,
            input_exhausted: false,
        })
    }

    /// Returns whether an output block is pending, pulling and scattering
    /// upstream blocks as needed.
    ///
    /// Once the upstream is exhausted every non-empty partition buffer is
    /// flushed and the upstream is never polled again; after the queue
    /// empties the splitter is terminal and this returns false forever.
    pub fn has_next(&mut self) -> Result<bool> {
        while self.output_buffer.is_empty() {
            if !self.input_exhausted && self.input.has_next()? {
                let block = self.input.next()?;
                self.split(&block)?;
            } else {
                if !self.input_exhausted {
                    self.input_exhausted = true;
                    debug!("input exhausted, flushing partition buffers");
                }
                for partition_id in 0..self.options.partition_nums {
                    if self.partition_buffer[partition_id].size() > 0 {
                        let block =
                            self.partition_buffer[partition_id].release_columns()?;
                        self.output_buffer.push(OutputEntry {
                            partition_id,
                            block,
                        });
                    }
                }
                break;
            }
        }
        if let Some(top) = self.output_buffer.peek() {
            self.next_partition_id = top.partition_id;
        }
        Ok(!self.output_buffer.is_empty())
    }

    /// Hands ownership of the pending block to the caller.
    ///
    /// Must be called exactly once per true `has_next` result.
    pub fn next(&mut self) -> Result<RecordBatch> {
        match self.output_buffer.pop() {
            Some(entry) => Ok(entry.block),
            None => Err(SplitterError::Internal(
                "next() called with no pending output block".to_owned(),
            )),
        }
    }

    /// Returns the partition id of the block most recently made pending by a
    /// true-returning `has_next`.
    pub fn next_partition_id(&self) -> usize {
        self.next_partition_id
    }

    /// Returns the output schema, once fixed from the first non-empty block.
    pub fn output_schema(&self) -> Option<SchemaRef> {
        self.output_header.clone()
    }

    /// Scatters one block into the partition buffers and drains every buffer
    /// that crossed the flush threshold into the output queue.
    fn split(&mut self, block: &RecordBatch) -> Result<()> {
        if block.num_rows() == 0 {
            return Ok(());
        }

        if self.output_header.is_none() {
            self.resolve_output_header(block)?;
        }
        let header = self.output_header.clone().ok_or_else(|| {
            SplitterError::Internal("output header not resolved".to_owned())
        })?;

        let partition_info = self.selector_builder.build(block)?;

        let columns = self
            .output_columns_indices
            .iter()
            .map(|index| block.column(*index).clone())
            .collect::<Vec<_>>();
        let out_block = RecordBatch::try_new(header, columns)?;

        for column_index in 0..out_block.num_columns() {
            for partition_id in 0..partition_info.partition_num {
                let from = partition_info.partition_start_points[partition_id];
                let length =
                    partition_info.partition_start_points[partition_id + 1] - from;
                if length == 0 {
                    continue;
                }
                self.partition_buffer[partition_id].append_selective(
                    column_index,
                    &out_block,
                    &partition_info.partition_selector,
                    from,
                    length,
                )?;
            }
        }

        for partition_id in 0..self.options.partition_nums {
            if self.partition_buffer[partition_id].size() >= self.options.buffer_size
            {
                let released = self.partition_buffer[partition_id].release_columns()?;
                debug!(
                    "emitting {} buffered rows for partition {partition_id}",
                    released.num_rows()
                );
                self.output_buffer.push(OutputEntry {
                    partition_id,
                    block: released,
                });
            }
        }
        Ok(())
    }

    /// Fixes the output schema from the first non-empty block and the
    /// configured projection, identity-mapping all columns when no
    /// projection list was supplied.
    fn resolve_output_header(&mut self, block: &RecordBatch) -> Result<()> {
        if self.output_columns_indices.is_empty() {
            self.output_columns_indices = (0..block.num_columns()).collect();
            self.output_header = Some(block.schema());
            return Ok(());
        }
        let schema = block.schema();
        let mut fields = Vec::with_capacity(self.output_columns_indices.len());
        for index in &self.output_columns_indices {
            if *index >= block.num_columns() {
                return Err(SplitterError::Configuration(format!(
                    "output column {index} out of range for block with {} columns",
                    block.num_columns()
                )));
            }
            fields.push(schema.field(*index).clone());
        }
        self.output_header = Some(Arc::new(Schema::new(fields)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::Int32Array;
    use datafusion::arrow::datatypes::{DataType, Field};

    fn test_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)]))
    }

    fn create_block(values: Vec<i32>) -> RecordBatch {
        RecordBatch::try_new(test_schema(), vec![Arc::new(Int32Array::from(values))])
            .unwrap()
    }

    fn rr_splitter(
        partition_nums: usize,
        buffer_size: usize,
        blocks: Vec<RecordBatch>,
    ) -> ShuffleSplitter {
        let options = SplitterOptions {
            partition_nums,
            buffer_size,
            ..Default::default()
        };
        ShuffleSplitter::try_new(
            "rr",
            options,
            Box::new(MemoryBlockSource::new(blocks)),
        )
        .unwrap()
    }

    fn column_values(block: &RecordBatch) -> Vec<i32> {
        block
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn test_unknown_strategy_fails_construction() {
        let e = ShuffleSplitter::try_new(
            "zip",
            SplitterOptions::default(),
            Box::new(MemoryBlockSource::new(vec![])),
        )
        .unwrap_err();
        assert!(matches!(e, SplitterError::Configuration(_)));
    }

    #[test]
    fn test_malformed_schema_buffer_fails_construction() {
        let options = SplitterOptions {
            schema_buffer: "0,oops".to_owned(),
            ..Default::default()
        };
        let e = ShuffleSplitter::try_new(
            "rr",
            options,
            Box::new(MemoryBlockSource::new(vec![])),
        )
        .unwrap_err();
        assert!(matches!(e, SplitterError::Configuration(_)));
    }

    #[test]
    fn test_zero_partitions_fails_construction() {
        for short_name in ["rr", "hash", "range", "single"] {
            let options = SplitterOptions {
                partition_nums: 0,
                exprs_buffer: "0;".to_owned(),
                ..Default::default()
            };
            let e = ShuffleSplitter::try_new(
                short_name,
                options,
                Box::new(MemoryBlockSource::new(vec![])),
            )
            .unwrap_err();
            assert!(matches!(e, SplitterError::Configuration(_)));
        }
    }

    #[test]
    fn test_zero_buffer_size_fails_construction() {
        let options = SplitterOptions {
            partition_nums: 2,
            buffer_size: 0,
            ..Default::default()
        };
        let e = ShuffleSplitter::try_new(
            "rr",
            options,
            Box::new(MemoryBlockSource::new(vec![])),
        )
        .unwrap_err();
        assert!(matches!(e, SplitterError::Configuration(_)));
    }

    #[test]
    fn test_single_forces_one_partition() {
        let options = SplitterOptions {
            partition_nums: 16,
            buffer_size: 100,
            ..Default::default()
        };
        let mut splitter = ShuffleSplitter::try_new(
            "single",
            options,
            Box::new(MemoryBlockSource::new(vec![create_block(vec![1, 2, 3])])),
        )
        .unwrap();

        assert!(splitter.has_next().unwrap());
        assert_eq!(splitter.next_partition_id(), 0);
        assert_eq!(column_values(&splitter.next().unwrap()), vec![1, 2, 3]);
        assert!(!splitter.has_next().unwrap());
    }

    #[test]
    fn test_buffer_flush_threshold() {
        // buffer_size 4: three rows per partition stay buffered, the fourth
        // triggers exactly one emission of 4 rows
        let blocks = (0..8).map(|i| create_block(vec![i])).collect();
        let mut splitter = rr_splitter(2, 4, blocks);

        assert!(splitter.has_next().unwrap());
        assert_eq!(splitter.next_partition_id(), 0);
        assert_eq!(column_values(&splitter.next().unwrap()), vec![0, 2, 4, 6]);

        assert!(splitter.has_next().unwrap());
        assert_eq!(splitter.next_partition_id(), 1);
        assert_eq!(column_values(&splitter.next().unwrap()), vec![1, 3, 5, 7]);

        assert!(!splitter.has_next().unwrap());
    }

    #[test]
    fn test_end_of_input_flushes_remainders() {
        // 3 rows over 2 partitions with a high threshold: nothing flushes
        // until the upstream is exhausted, then both remainders are emitted
        // in ascending partition order
        let mut splitter = rr_splitter(2, 100, vec![create_block(vec![1, 2, 3])]);

        assert!(splitter.has_next().unwrap());
        assert_eq!(splitter.next_partition_id(), 0);
        assert_eq!(column_values(&splitter.next().unwrap()), vec![1, 3]);

        assert!(splitter.has_next().unwrap());
        assert_eq!(splitter.next_partition_id(), 1);
        assert_eq!(column_values(&splitter.next().unwrap()), vec![2]);

        // terminal once drained
        assert!(!splitter.has_next().unwrap());
        assert!(!splitter.has_next().unwrap());
    }

    #[test]
    fn test_empty_blocks_are_no_ops() {
        let blocks = vec![
            create_block(vec![]),
            create_block(vec![5]),
            create_block(vec![]),
        ];
        let mut splitter = rr_splitter(2, 100, blocks);

        assert!(splitter.has_next().unwrap());
        assert_eq!(splitter.next_partition_id(), 0);
        assert_eq!(column_values(&splitter.next().unwrap()), vec![5]);
        assert!(!splitter.has_next().unwrap());
    }

    #[test]
    fn test_only_empty_blocks_yield_no_output() {
        let blocks = vec![create_block(vec![]), create_block(vec![])];
        let mut splitter = rr_splitter(2, 4, blocks);
        assert!(!splitter.has_next().unwrap());
        // schema inference never ran
        assert!(splitter.output_schema().is_none());
    }

    #[test]
    fn test_next_without_has_next_is_an_error() {
        let mut splitter = rr_splitter(2, 4, vec![]);
        assert!(matches!(
            splitter.next(),
            Err(SplitterError::Internal(_))
        ));
    }

    #[test]
    fn test_projection_fixes_output_schema() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Int32, false),
        ]));
        let block = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![1, 2])),
                Arc::new(Int32Array::from(vec![10, 20])),
            ],
        )
        .unwrap();

        let options = SplitterOptions {
            partition_nums: 1,
            buffer_size: 1,
            schema_buffer: "1".to_owned(),
            ..Default::default()
        };
        let mut splitter = ShuffleSplitter::try_new(
            "rr",
            options,
            Box::new(MemoryBlockSource::new(vec![block])),
        )
        .unwrap();

        assert!(splitter.has_next().unwrap());
        let out = splitter.next().unwrap();
        assert_eq!(out.num_columns(), 1);
        assert_eq!(out.schema().field(0).name(), "b");
        assert_eq!(column_values(&out), vec![10, 20]);
    }

    #[test]
    fn test_upstream_error_propagates() {
        struct FailingSource;
        impl BlockSource for FailingSource {
            fn has_next(&mut self) -> Result<bool> {
                Ok(true)
            }
            fn next(&mut self) -> Result<RecordBatch> {
                Err(SplitterError::General("producer failed".to_owned()))
            }
        }

        let mut splitter = ShuffleSplitter::try_new(
            "rr",
            SplitterOptions::default(),
            Box::new(FailingSource),
        )
        .unwrap();
        assert!(matches!(
            splitter.has_next(),
            Err(SplitterError::General(_))
        ));
    }
}
