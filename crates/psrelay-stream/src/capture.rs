// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Debug capture and stream digest.
//
// The capture file receives a copy of every byte forwarded to the relay, so
// a job can be inspected without the consumer. The digest fingerprints the
// same bytes for the job summary.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use psrelay_core::error::{RelayError, Result};
use psrelay_core::types::JobId;

/// Path of the capture file of `job_id` for the configured base path.
pub fn capture_file_path(base: &Path, job_id: JobId) -> PathBuf {
    PathBuf::from(format!("{}_{job_id}.txt", base.display()))
}

/// Binary copy of a job's forwarded stream.
#[derive(Debug)]
pub struct DebugCapture {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    written: u64,
}

impl DebugCapture {
    /// Create (or truncate) the capture file of `job_id`.
    pub async fn create(base: &Path, job_id: JobId) -> Result<Self> {
        let path = capture_file_path(base, job_id);
        let file = File::create(&path)
            .await
            .map_err(|e| RelayError::Capture(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "debug capture opened");
        Ok(Self {
            path,
            file: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Append `bytes`. The first failure closes the capture for good.
    pub async fn write(&mut self, bytes: &[u8]) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        match file.write_all(bytes).await {
            Ok(()) => self.written += bytes.len() as u64,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "debug capture disabled after write error");
                self.file = None;
            }
        }
    }

    /// Flush and close the file. Safe to call more than once.
    pub async fn finish(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| RelayError::Capture(format!("{}: {e}", self.path.display())))?;
            debug!(path = %self.path.display(), bytes = self.written, "debug capture closed");
        }
        Ok(())
    }
}

/// SHA-256 and length of a byte stream fed in pieces.
#[derive(Debug, Clone, Default)]
pub struct StreamDigest {
    hasher: Sha256,
    bytes: u64,
}

impl StreamDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.bytes += bytes.len() as u64;
    }

    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Lowercase hex digest of everything fed so far.
    pub fn hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}
