// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Run-level error types.
//!
//! Only problems detected before any session is dispatched are surfaced as
//! errors. Everything that goes wrong on a single host is captured in that
//! host's [`ResultEntry`](crate::executor::ResultEntry) instead.

use thiserror::Error;

/// Fatal configuration errors that abort a run before dispatch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Host resolution produced zero hosts
    #[error("no hosts specified; use -H, --host-file or --group to select targets")]
    EmptyHostList,

    /// Parallelism must be at least one
    #[error("invalid parallelism {0}: at least one session must be allowed to run")]
    InvalidParallelism(usize),

    /// The operation descriptor is malformed
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// An output directory could not be prepared
    #[error("output directory '{path}' is not usable: {reason}")]
    OutputDirectory { path: String, reason: String },

    /// A host string could not be parsed
    #[error("invalid host '{input}': {reason}")]
    HostParse { input: String, reason: String },

    /// A host file could not be read
    #[error("failed to read host file '{path}': {reason}")]
    HostFile { path: String, reason: String },

    /// `--group` named a group the configuration file does not define
    #[error("host group '{0}' is not defined in the configuration file")]
    UnknownGroup(String),

    /// `--host-regexp` is not a valid regular expression
    #[error("invalid host pattern '{pattern}': {reason}")]
    InvalidHostPattern { pattern: String, reason: String },

    /// `--extra-args` could not be split into words
    #[error("invalid extra arguments '{input}': {reason}")]
    InvalidExtraArgs { input: String, reason: String },
}

impl ConfigError {
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }
}
