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

//! Parallel dispatch engine: admission, per-host supervision and result
//! aggregation.

mod capture;
mod coordinator;
mod limiter;
mod output_mode;
mod result;
mod session;

pub mod exit_strategy;
pub mod launcher;
pub mod observer;
pub mod operation;
pub mod output_sync;

pub use capture::{CapturedStream, RollingBuffer, DEFAULT_CAPTURE_LIMIT};
pub use coordinator::{RunConfig, RunCoordinator, DEFAULT_TERMINATION_GRACE};
pub use exit_strategy::ExitCodeStrategy;
pub use launcher::{LaunchContext, SessionLauncher};
pub use limiter::{Admission, ConcurrencyLimiter};
pub use observer::{NoopObserver, ObserverChain, RunObserver};
pub use operation::{Operation, OperationDescriptor, SessionOptions, DEFAULT_KILL_SIGNAL};
pub use output_mode::{is_tty, should_use_colors, OutputMode};
pub use result::{OutcomeKind, ResultEntry, ResultSet, RunSummary, TimeoutScope};
pub use session::{RunCancellation, SessionState};
