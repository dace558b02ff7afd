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

use anyhow::{Context, Result};
use std::path::PathBuf;

use super::{execute_run, RunParams};
use crate::executor::{Operation, OperationDescriptor};

/// Copy `remote` from every host to `<local_dir>/<host>/<local>`.
pub async fn download_files(
    params: RunParams,
    remote: String,
    local: String,
    local_dir: Option<PathBuf>,
    recursive: bool,
) -> Result<i32> {
    if let Some(dir) = &local_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let operation = Operation::CopyFrom {
        remote,
        local,
        local_dir,
        recursive,
    };
    let descriptor = OperationDescriptor::new(operation, params.options.clone());
    execute_run(params, descriptor).await
}
