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

//! Per-session output capture.
//!
//! Each stream is pumped into a bounded in-memory buffer as it arrives, and
//! optionally mirrored to a per-host file and echoed to the terminal. Because
//! the buffer is shared with the supervisor rather than owned by the pump,
//! whatever arrived before a timeout or kill is still available afterwards.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

use super::output_sync::{EchoTarget, NodeOutputWriter};

/// Default in-memory limit per stream (10 MiB).
pub const DEFAULT_CAPTURE_LIMIT: usize = 10 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 8192;

/// A buffer that keeps at most `limit` of the most recent bytes.
#[derive(Debug)]
pub struct RollingBuffer {
    data: Vec<u8>,
    limit: usize,
    total_bytes: usize,
    dropped: usize,
}

impl RollingBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            total_bytes: 0,
            dropped: 0,
        }
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.total_bytes += chunk.len();
        self.data.extend_from_slice(chunk);

        if self.data.len() > self.limit {
            let overflow = self.data.len() - self.limit;
            if self.dropped == 0 {
                tracing::warn!(
                    "Captured output exceeded {} bytes; keeping the most recent data",
                    self.limit
                );
            }
            self.dropped += overflow;
            self.data.drain(..overflow);
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Captured contents of one stream once the session has resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedStream {
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Bytes produced by the process, including any that were dropped.
    pub total_bytes: usize,
    /// Bytes discarded from the front of the buffer.
    pub dropped: usize,
    /// Per-host file the stream was also written to.
    pub path: Option<PathBuf>,
}

impl CapturedStream {
    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Shared handle to a stream being captured.
#[derive(Debug, Clone)]
pub struct StreamCapture {
    buffer: Arc<Mutex<RollingBuffer>>,
    path: Option<PathBuf>,
}

impl StreamCapture {
    pub fn new(limit: usize, path: Option<PathBuf>) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(RollingBuffer::new(limit))),
            path,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RollingBuffer> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, chunk: &[u8]) {
        self.lock().append(chunk);
    }

    /// Copy out what has been captured so far.
    pub fn snapshot(&self) -> CapturedStream {
        let buffer = self.lock();
        CapturedStream {
            data: buffer.as_slice().to_vec(),
            total_bytes: buffer.total_bytes(),
            dropped: buffer.dropped(),
            path: self.path.clone(),
        }
    }

    /// Start copying `reader` into this capture until EOF.
    ///
    /// The file named by `path` is created first. If that fails the error is
    /// logged and capture continues in memory only.
    pub fn spawn_pump<R>(&self, reader: R, echo: Option<(String, EchoTarget)>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let capture = self.clone();
        tokio::spawn(async move { capture.pump(reader, echo).await })
    }

    async fn pump<R>(self, mut reader: R, echo: Option<(String, EchoTarget)>)
    where
        R: AsyncRead + Unpin,
    {
        let mut file = match &self.path {
            Some(path) => match tokio::fs::File::create(path).await {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::error!("Failed to create output file {}: {e}", path.display());
                    None
                }
            },
            None => None,
        };
        let mut echo = echo.map(|(label, target)| NodeOutputWriter::new(&label, target));

        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("Output stream closed with error: {e}");
                    break;
                }
            };
            let bytes = &chunk[..n];
            self.append(bytes);

            if let Some(f) = file.as_mut() {
                if let Err(e) = f.write_all(bytes).await {
                    tracing::error!("Failed to write output file: {e}");
                    file = None;
                }
            }
            if let Some(writer) = echo.as_mut() {
                let _ = writer.feed(bytes);
            }
        }

        if let Some(mut f) = file {
            let _ = f.flush().await;
        }
        if let Some(mut writer) = echo {
            let _ = writer.finish();
        }
    }
}
