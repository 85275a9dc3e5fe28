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

//! Splitter error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    result,
};

use datafusion::arrow::error::ArrowError;
use datafusion::error::DataFusionError;

/// Result type alias for splitter operations.
pub type Result<T> = result::Result<T, SplitterError>;

/// Error types for shuffle splitting.
#[derive(Debug)]
pub enum SplitterError {
    /// General error with a descriptive message.
    General(String),
    /// Internal error indicating a bug or unexpected state.
    Internal(String),
    /// Configuration error with invalid settings.
    Configuration(String),
    /// Error from Arrow operations.
    ArrowError(Box<ArrowError>),
    /// Error from DataFusion operations.
    DataFusionError(Box<DataFusionError>),
}

/// Creates a general splitter error from a string message.
pub fn splitter_error(message: &str) -> SplitterError {
    SplitterError::General(message.to_owned())
}

impl From<String> for SplitterError {
    fn from(e: String) -> Self {
        SplitterError::General(e)
    }
}

impl From<ArrowError> for SplitterError {
    fn from(e: ArrowError) -> Self {
        match e {
            ArrowError::ExternalError(e)
                if e.downcast_ref::<SplitterError>().is_some() =>
            {
                *e.downcast::<SplitterError>().unwrap()
            }
            ArrowError::ExternalError(e)
                if e.downcast_ref::<DataFusionError>().is_some() =>
            {
                SplitterError::DataFusionError(Box::new(
                    *e.downcast::<DataFusionError>().unwrap(),
                ))
            }
            other => SplitterError::ArrowError(Box::new(other)),
        }
    }
}

impl From<DataFusionError> for SplitterError {
    fn from(e: DataFusionError) -> Self {
        match e {
            DataFusionError::ArrowError(e, _) => Self::from(e),
            _ => SplitterError::DataFusionError(Box::new(e)),
        }
    }
}

impl Display for SplitterError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SplitterError::General(desc) => write!(f, "General error: {desc}"),
            SplitterError::Internal(desc) => {
                write!(f, "Internal splitter error: {desc}")
            }
            SplitterError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
            SplitterError::ArrowError(desc) => write!(f, "Arrow error: {desc}"),
            SplitterError::DataFusionError(desc) => {
                write!(f, "DataFusion error: {desc}")
            }
        }
    }
}

impl Error for SplitterError {}
