// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job trace: the logging collaborator a job reports into.
//
// A trace is a nested log: sections are entered and left around each host
// callback, and lines, variables and errors land in the innermost open
// section. Nothing in the job depends on what the trace does with them.

use std::fmt::Display;

use tracing::{Level, Span, debug, error, span};

use psrelay_core::types::JobId;

/// Logical role of whoever is driving the trace.
///
/// Lines carry the role's prefix so caller-side and background output can be
/// told apart in one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceRole {
    /// The host thread delivering callbacks.
    Caller,
    /// Helper work done on behalf of the caller (relay I/O, settings fetches).
    Background,
}

impl TraceRole {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Background => "bg",
        }
    }
}

/// Sink for a job's nested diagnostic output.
pub trait JobTrace: Send {
    /// Open a section and return its depth (1 for the outermost).
    fn enter_section(&mut self, label: &str) -> usize;

    /// Close every section at `depth` and below.
    fn exit_section(&mut self, depth: usize);

    /// Record a named value.
    fn var(&mut self, name: &str, value: &dyn Display);

    /// Record a free-text line.
    fn line(&mut self, text: &str);

    /// Record a failure.
    fn error(&mut self, text: &str, err: &dyn std::error::Error);
}

/// [`JobTrace`] backed by `tracing`.
///
/// Sections become spans; lines become events parented to the innermost
/// open span, so a subscriber shows them nested the same way.
#[derive(Debug)]
pub struct TracingTrace {
    role: TraceRole,
    job_id: Option<JobId>,
    sections: Vec<Span>,
}

impl TracingTrace {
    pub fn new(role: TraceRole) -> Self {
        Self {
            role,
            job_id: None,
            sections: Vec::new(),
        }
    }

    /// Tag every section with `job_id`.
    pub fn for_job(role: TraceRole, job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            ..Self::new(role)
        }
    }

    pub fn role(&self) -> TraceRole {
        self.role
    }

    pub fn depth(&self) -> usize {
        self.sections.len()
    }

    fn current(&self) -> Option<&Span> {
        self.sections.last()
    }
}

impl JobTrace for TracingTrace {
    fn enter_section(&mut self, label: &str) -> usize {
        let role = self.role.prefix();
        let job_id = self.job_id.map(|id| id.get());
        let section = match self.current() {
            Some(parent) => span!(parent: parent, Level::DEBUG, "section", role, label, job_id),
            None => span!(Level::DEBUG, "section", role, label, job_id),
        };
        self.sections.push(section);
        self.sections.len()
    }

    fn exit_section(&mut self, depth: usize) {
        self.sections.truncate(depth.saturating_sub(1));
    }

    fn var(&mut self, name: &str, value: &dyn Display) {
        let role = self.role.prefix();
        match self.current() {
            Some(section) => debug!(parent: section, role, name, value = %value),
            None => debug!(role, name, value = %value),
        }
    }

    fn line(&mut self, text: &str) {
        let role = self.role.prefix();
        match self.current() {
            Some(section) => debug!(parent: section, role, "{text}"),
            None => debug!(role, "{text}"),
        }
    }

    fn error(&mut self, text: &str, err: &dyn std::error::Error) {
        let role = self.role.prefix();
        match self.current() {
            Some(section) => error!(parent: section, role, error = %err, "{text}"),
            None => error!(role, error = %err, "{text}"),
        }
    }
}
