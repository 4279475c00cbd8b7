// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Replay scripts.
//
// A script is the host side of one job written down: the structural events
// and output buffers in the order the host would deliver them.
//
//   {
//     "job_id": 12345678,
//     "steps": [
//       {"event": 2},
//       {"output": "%!PS-Adobe-3.0\r\n"},
//       {"output_file": "page1.ps"},
//       {"event": 19}
//     ]
//   }

use std::path::{Path, PathBuf};

use serde::Deserialize;

use psrelay_core::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// A structural event id.
    Event(u32),
    /// Output text delivered as is.
    Output(String),
    /// Output read from a file, relative to the script.
    OutputFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub job_id: Option<u32>,
    pub steps: Vec<Step>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let mut script: Script = serde_json::from_str(&data)?;
        script.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(script)
    }

    /// Resolve a step's file path against the script's directory.
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.base_dir.join(file)
        }
    }
}
