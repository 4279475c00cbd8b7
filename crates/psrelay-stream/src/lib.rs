// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// psrelay stream: marks structural points of a job's PostScript stream,
// watches the stream for the termination sentinel, and relays it to an
// out-of-process consumer. This crate sits between the host driver's
// callbacks and the consumer's byte pipe.

pub mod capture;
pub mod catalog;
pub mod job;
pub mod launch;
pub mod marker;
pub mod relay;
pub mod sentinel;
pub mod trace;

pub use catalog::MarkerCatalog;
pub use job::{JobController, JobSummary, MarkerRoute, SpoolBuffer, SpoolSink, StartOptions};
pub use launch::{LocalPipeConnector, TokioLauncher};
pub use relay::RelayChannel;
pub use sentinel::SentinelMatcher;
pub use trace::{JobTrace, TraceRole, TracingTrace};
