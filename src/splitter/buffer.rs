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

//! Per-partition column accumulator.
//!
//! Each output partition has a buffer that accumulates selectively copied
//! column chunks until the orchestrator drains it into a standalone block.

use datafusion::arrow::array::{Array, ArrayRef, UInt32Array};
use datafusion::arrow::compute::{concat, take};
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;

use crate::error::{Result, SplitterError};

/// Accumulates rows for a single output partition, column by column.
///
/// All columns always hold the same number of rows once a scatter pass has
/// appended every column consistently. The schema is captured from the first
/// appended block and retained across drains.
#[derive(Debug, Default)]
pub struct ColumnsBuffer {
    /// Schema of accumulated blocks, captured on first append
    schema: Option<SchemaRef>,
    /// Accumulated chunks, one list per column
    chunks: Vec<Vec<ArrayRef>>,
    /// Accumulated row count
    rows: usize,
}

impl ColumnsBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the accumulated row count.
    pub fn size(&self) -> usize {
        self.rows
    }

    /// Appends `length` rows of `block`'s column at `column_index`, reading
    /// the row indices `selector[from..from + length]`.
    ///
    /// The copy is columnar: the selected rows are gathered in one `take`
    /// call rather than row by row. The row counter advances when column 0 is
    /// appended, so a scatter pass must append every column of a segment.
    pub fn append_selective(
        &mut self,
        column_index: usize,
        block: &RecordBatch,
        selector: &[u32],
        from: usize,
        length: usize,
    ) -> Result<()> {
        if self.schema.is_none() {
            self.schema = Some(block.schema());
            self.chunks = vec![Vec::new(); block.num_columns()];
        }

        let indices = UInt32Array::from(selector[from..from + length].to_vec());
        let chunk = take(block.column(column_index).as_ref(), &indices, None)?;
        self.chunks[column_index].push(chunk);
        if column_index == 0 {
            self.rows += length;
        }
        Ok(())
    }

    /// Hands over the accumulated columns as a new standalone block and
    /// resets the buffer to empty, retaining the schema for reuse.
    ///
    /// Precondition: `size() > 0`; callers must check before draining.
    pub fn release_columns(&mut self) -> Result<RecordBatch> {
        let schema = self.schema.clone().ok_or_else(|| {
            SplitterError::Internal(
                "released a columns buffer that was never appended to".to_owned(),
            )
        })?;

        let mut columns = Vec::with_capacity(self.chunks.len());
        for chunk in self.chunks.iter_mut() {
            let parts = chunk.iter().map(|c| c.as_ref()).collect::<Vec<&dyn Array>>();
            columns.push(concat(&parts)?);
            chunk.clear();
        }
        self.rows = 0;
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}
