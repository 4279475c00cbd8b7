// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// psrelay core: types, error definitions, and settings shared across all crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{RelaySettings, SettingsScope, SettingsStore};
pub use error::RelayError;
pub use types::*;
