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

use anyhow::{bail, Result};
use std::path::PathBuf;

use super::{execute_run, RunParams};
use crate::executor::{Operation, OperationDescriptor};

/// Split `local... remote` into the operation.
pub fn build_operation(paths: &[String], recursive: bool) -> Result<Operation> {
    let Some((remote, sources)) = paths.split_last() else {
        bail!("upload needs at least one local path and a remote destination");
    };
    if sources.is_empty() {
        bail!("upload needs at least one local path before the remote destination");
    }
    for source in sources {
        if !std::path::Path::new(source).exists() {
            bail!("local path {source} does not exist");
        }
    }
    Ok(Operation::CopyTo {
        sources: sources.iter().map(PathBuf::from).collect(),
        remote: remote.clone(),
        recursive,
    })
}

pub async fn upload_files(params: RunParams, paths: &[String], recursive: bool) -> Result<i32> {
    let operation = build_operation(paths, recursive)?;
    let descriptor = OperationDescriptor::new(operation, params.options.clone());
    execute_run(params, descriptor).await
}
