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

use anyhow::Result;

use super::{execute_run, RunParams};
use crate::executor::{Operation, OperationDescriptor};

/// Send `signal` to every process matching `pattern` on every host.
///
/// A host where nothing matched reports a remote failure (pkill exits 1).
pub async fn kill_processes(params: RunParams, pattern: String, signal: String) -> Result<i32> {
    let descriptor =
        OperationDescriptor::new(Operation::Kill { pattern, signal }, params.options.clone());
    execute_run(params, descriptor).await
}
