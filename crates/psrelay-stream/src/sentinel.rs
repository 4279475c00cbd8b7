// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Streaming sentinel matcher.
//
// Recognises the end-of-stream sentinel in a byte stream that arrives in
// arbitrary chunks. The search is one logical scan over the concatenation of
// every chunk fed so far: the automaton cursor is carried from one `feed`
// call to the next, so a sentinel split across chunks is still found.
//
// The automaton is the optimised Knuth-Morris-Pratt table: when the byte
// after a border equals the byte after the current prefix, the entry
// inherits the border's own fallback, so runs of repeated bytes never cause
// a chain of redundant comparisons.

use psrelay_core::error::{RelayError, Result};

/// Incremental matcher for one fixed pattern.
#[derive(Debug, Clone)]
pub struct SentinelMatcher {
    pattern: Vec<u8>,
    /// `failure[i]` is where the cursor falls back after a mismatch at
    /// `pattern[i]`; `-1` means "restart past the current byte".
    /// Length is `pattern.len() + 1`.
    failure: Vec<isize>,
    /// Length of the pattern prefix matched so far.
    state: usize,
}

impl SentinelMatcher {
    /// Build the automaton for `pattern`.
    pub fn new(pattern: impl Into<Vec<u8>>) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(RelayError::EmptyPattern);
        }
        let failure = build_failure(&pattern);
        Ok(Self {
            pattern,
            failure,
            state: 0,
        })
    }

    /// Scan `chunk`, continuing from wherever the previous call left off.
    ///
    /// Returns the chunk-relative offset one past the end of the first match
    /// completed inside this chunk. Scanning stops there: bytes after the
    /// offset are not inspected and the cursor is left at the border of the
    /// whole pattern.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<usize> {
        let m = self.pattern.len() as isize;
        let mut i = self.state as isize;

        for (k, &byte) in chunk.iter().enumerate() {
            while i > -1 && self.pattern[i as usize] != byte {
                i = self.failure[i as usize];
            }
            i += 1;
            if i >= m {
                self.state = self.border();
                return Some(k + 1);
            }
        }

        self.state = i as usize;
        None
    }

    /// Number of pattern bytes currently matched.
    pub fn state(&self) -> usize {
        self.state
    }

    /// Bytes of the pattern matched so far (for diagnostics).
    pub fn matched_prefix(&self) -> &[u8] {
        &self.pattern[..self.state]
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    /// Length of the longest proper border of the whole pattern. This is
    /// the cursor position right after a match.
    pub fn border(&self) -> usize {
        // failure[m] is never -1: the last step of the build always stores a j >= 0.
        self.failure[self.pattern.len()].max(0) as usize
    }

    /// Forget any partial match.
    pub fn reset(&mut self) {
        self.state = 0;
    }
}

/// Optimised KMP failure table of length `pattern.len() + 1`.
fn build_failure(pattern: &[u8]) -> Vec<isize> {
    let m = pattern.len();
    let mut failure = vec![0isize; m + 1];
    failure[0] = -1;

    let mut i = 0usize;
    let mut j: isize = -1;
    while i < m {
        while j > -1 && pattern[i] != pattern[j as usize] {
            j = failure[j as usize];
        }
        i += 1;
        j += 1;
        if i < m && pattern[i] == pattern[j as usize] {
            failure[i] = failure[j as usize];
        } else {
            failure[i] = j;
        }
    }
    failure
}
