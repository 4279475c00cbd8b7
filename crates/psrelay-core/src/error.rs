// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for psrelay.

use thiserror::Error;

/// Top-level error type for all psrelay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    // -- Settings --
    #[error("settings error: {0}")]
    Settings(String),

    // -- Consumer process / channel --
    #[error("consumer launch failed: {0}")]
    Launch(String),

    #[error("access to relay channel {0} denied")]
    AccessDenied(String),

    #[error("relay channel not reachable after {secs}s")]
    ConnectTimeout { secs: u64 },

    #[error("relay channel is not connected")]
    NotConnected,

    #[error("relay transport error {code}: {message}")]
    Transport { code: u32, message: String },

    // -- Markers / sentinel --
    #[error("marker template error: {0}")]
    Template(String),

    #[error("sentinel pattern must not be empty")]
    EmptyPattern,

    // -- Debug capture --
    #[error("debug capture failed: {0}")]
    Capture(String),

    // -- Plumbing --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RelayError>;
