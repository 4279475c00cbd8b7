// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the psrelay marker injector.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Smallest driver job id (inclusive).
pub const JOB_ID_MIN: u32 = 10_000_000;
/// Largest driver job id (exclusive).
pub const JOB_ID_MAX: u32 = 99_999_999;

/// Transport code for "the peer closed its end of the pipe".
///
/// Matches the Win32 `ERROR_NO_DATA` value the consumer side produces when
/// it tears the pipe down on purpose; on Unix `EPIPE` is mapped onto it.
pub const PEER_CLOSED_CODE: u32 = 232;
/// Generic write fault, used when the transport gives no better code.
pub const WRITE_FAULT_CODE: u32 = 29;
/// Default code reported by a forced test failure.
pub const BAD_PIPE_CODE: u32 = 230;

/// Correlation id of one print job, always eight decimal digits.
///
/// Embedded in every marker and passed to the relay consumer on its command
/// line. Uniqueness is probabilistic: the id is a hint for the consumer, not
/// a security token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(u32);

impl JobId {
    /// Draw a fresh id from a time-seeded generator.
    pub fn generate() -> Self {
        let seed = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        let mut rng = StdRng::seed_from_u64(seed);
        Self(rng.random_range(JOB_ID_MIN..JOB_ID_MAX))
    }

    /// Wrap an existing id. Returns `None` unless it has exactly eight digits.
    pub fn from_raw(raw: u32) -> Option<Self> {
        (JOB_ID_MIN..=JOB_ID_MAX).contains(&raw).then_some(Self(raw))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Printer names at or above this many characters are not searched.
pub const PRINTER_NAME_LIMIT: usize = 270;
/// A parameter id has more than this many digits.
pub const PARAMETER_ID_MIN_DIGITS: usize = 11;

/// Document parameter id carried in the printer name.
///
/// Print-to-file jobs name their target after a parameter file, e.g.
/// `LParam_1252400638494244396315693_MapId.txt`. The id is the last run of
/// at least eleven digits ending before the name's final three characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterId(String);

impl ParameterId {
    /// Extract the id from a printer or output name, `None` if it has none.
    pub fn from_printer_name(name: &str) -> Option<Self> {
        let chars: Vec<char> = name.chars().collect();
        if chars.is_empty() || chars.len() >= PRINTER_NAME_LIMIT {
            return None;
        }

        let mut end = chars.len().saturating_sub(3);
        while end > 0 && !chars[end - 1].is_ascii_digit() {
            end -= 1;
        }
        let mut start = end;
        while start > 0 && chars[start - 1].is_ascii_digit() {
            start -= 1;
        }

        let digits = end - start;
        (digits >= PARAMETER_ID_MIN_DIGITS && digits < PRINTER_NAME_LIMIT)
            .then(|| Self(chars[start..end].iter().collect()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParameterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a structural callback point in the rendered document.
///
/// Numbering follows the host driver's injection-point ids (1..=201).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u32);

impl EventId {
    pub const BEGIN_STREAM: Self = Self(1);
    pub const PS_ADOBE: Self = Self(2);
    pub const PAGES_AT_END: Self = Self(3);
    pub const PAGES: Self = Self(4);
    pub const DOC_NEEDED_RES: Self = Self(5);
    pub const DOC_SUPPLIED_RES: Self = Self(6);
    pub const PAGE_ORDER: Self = Self(7);
    pub const ORIENTATION: Self = Self(8);
    pub const BOUNDING_BOX: Self = Self(9);
    pub const DOCUMENT_PROCESS_COLORS: Self = Self(10);
    pub const COMMENTS: Self = Self(11);
    pub const BEGIN_DEFAULTS: Self = Self(12);
    pub const END_DEFAULTS: Self = Self(13);
    pub const BEGIN_PROLOG: Self = Self(14);
    pub const END_PROLOG: Self = Self(15);
    pub const BEGIN_SETUP: Self = Self(16);
    pub const END_SETUP: Self = Self(17);
    pub const TRAILER: Self = Self(18);
    pub const EOF: Self = Self(19);
    pub const END_STREAM: Self = Self(20);
    pub const DOCUMENT_PROCESS_COLORS_AT_END: Self = Self(21);
    pub const PAGE_NUMBER: Self = Self(100);
    pub const BEGIN_PAGE_SETUP: Self = Self(101);
    pub const END_PAGE_SETUP: Self = Self(102);
    pub const PAGE_TRAILER: Self = Self(103);
    pub const PLATE_COLOR: Self = Self(104);
    pub const SHOW_PAGE: Self = Self(105);
    pub const PAGE_BBOX: Self = Self(106);
    pub const END_PAGE_COMMENTS: Self = Self(107);
    pub const VM_SAVE: Self = Self(200);
    pub const VM_RESTORE: Self = Self(201);

    /// Highest id the host is known to deliver.
    pub const MAX: Self = Self(201);
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether this system may add a marker at a structural point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectPolicy {
    /// A marker may be added at this point.
    Inject,
    /// The upstream's own output for this point must pass through untouched.
    Replace,
}

/// Lifecycle of the relay channel of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    NotStarted,
    Launching,
    Connecting,
    Connected,
    Closed,
    Failed,
}

impl ConnectionState {
    /// No further transitions happen from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// What `onStructuralEvent` reports back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// A marker of `bytes` length was produced and delivered.
    Injected { bytes: usize },
    /// The upstream supplies the content for this point; nothing was written.
    NotHandled,
    /// Markers are not permitted yet (or any more); nothing was written.
    Suppressed,
    /// The job was cancelled or its relay broke earlier.
    Aborted { code: u32 },
    /// Forced test failure, or the host refused the marker bytes.
    Failed { code: u32 },
}

impl CommandOutcome {
    /// Whether the host should treat the callback as successful.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Injected { .. } | Self::Suppressed)
    }
}

/// Classification of a failed write on the relay channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportFailure {
    /// The consumer closed its end on purpose: the job is cancelled.
    PeerClosed,
    /// Anything else: the relay is broken for the rest of the job.
    Fatal { code: u32 },
}

impl TransportFailure {
    /// Classify an I/O error raised while writing to the channel.
    pub fn classify(err: &std::io::Error) -> Self {
        Self::classify_raw_first(err, cfg!(windows))
    }

    /// With `raw_first`, an OS code decides on its own and only
    /// [`PEER_CLOSED_CODE`] cancels. Windows reports both `ERROR_BROKEN_PIPE`
    /// (109) and `ERROR_NO_DATA` (232) as `BrokenPipe`, only the latter is a
    /// deliberate close.
    fn classify_raw_first(err: &std::io::Error, raw_first: bool) -> Self {
        match err.raw_os_error() {
            Some(code) if code as u32 == PEER_CLOSED_CODE => Self::PeerClosed,
            Some(code) if raw_first && code > 0 => Self::Fatal { code: code as u32 },
            _ if err.kind() == std::io::ErrorKind::BrokenPipe => Self::PeerClosed,
            Some(code) if code > 0 => Self::Fatal { code: code as u32 },
            _ => Self::Fatal {
                code: WRITE_FAULT_CODE,
            },
        }
    }

    /// Numeric code surfaced to the host.
    pub fn code(&self) -> u32 {
        match self {
            Self::PeerClosed => PEER_CLOSED_CODE,
            Self::Fatal { code } => *code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn generated_job_ids_have_eight_digits() {
        for _ in 0..32 {
            let id = JobId::generate();
            assert_eq!(id.to_string().len(), 8);
            assert!(JobId::from_raw(id.get()).is_some());
        }
    }

    #[test]
    fn from_raw_rejects_short_and_long_ids() {
        assert!(JobId::from_raw(9_999_999).is_none());
        assert!(JobId::from_raw(100_000_000).is_none());
        assert_eq!(JobId::from_raw(12_345_678).map(|id| id.to_string()), Some("12345678".into()));
    }

    #[test]
    fn broken_pipe_is_peer_closed() {
        let err = io::Error::from(io::ErrorKind::BrokenPipe);
        assert_eq!(TransportFailure::classify(&err), TransportFailure::PeerClosed);
        assert_eq!(TransportFailure::PeerClosed.code(), PEER_CLOSED_CODE);
    }

    #[test]
    fn raw_peer_closed_code_is_peer_closed() {
        let err = io::Error::from_raw_os_error(PEER_CLOSED_CODE as i32);
        assert_eq!(TransportFailure::classify(&err), TransportFailure::PeerClosed);
    }

    #[test]
    fn windows_broken_pipe_code_is_fatal() {
        // ERROR_BROKEN_PIPE is not the consumer's deliberate close.
        let err = io::Error::from_raw_os_error(109);
        assert_eq!(
            TransportFailure::classify_raw_first(&err, true),
            TransportFailure::Fatal { code: 109 }
        );
        let no_data = io::Error::from_raw_os_error(PEER_CLOSED_CODE as i32);
        assert_eq!(
            TransportFailure::classify_raw_first(&no_data, true),
            TransportFailure::PeerClosed
        );
    }

    #[test]
    fn broken_pipe_kind_without_code_is_peer_closed_everywhere() {
        let err = io::Error::from(io::ErrorKind::BrokenPipe);
        assert_eq!(TransportFailure::classify_raw_first(&err, true), TransportFailure::PeerClosed);
        assert_eq!(TransportFailure::classify_raw_first(&err, false), TransportFailure::PeerClosed);
    }

    #[cfg(unix)]
    #[test]
    fn unix_epipe_is_peer_closed() {
        let err = io::Error::from_raw_os_error(32);
        assert_eq!(TransportFailure::classify(&err), TransportFailure::PeerClosed);
    }

    #[test]
    fn parameter_id_from_map_file_name() {
        let id = ParameterId::from_printer_name(r"C:\jobs\LParam_1252400638494244396315693_MapId.txt");
        assert_eq!(id.as_ref().map(ParameterId::as_str), Some("1252400638494244396315693"));
    }

    #[test]
    fn short_digit_runs_are_not_parameter_ids() {
        assert_eq!(ParameterId::from_printer_name("UniLogoPrint 2"), None);
        assert_eq!(ParameterId::from_printer_name("Printer 1234567890 (A4)"), None);
        assert_eq!(ParameterId::from_printer_name(""), None);
        // Digits in the last three characters never count.
        assert_eq!(ParameterId::from_printer_name("Queue_12345678901"), None);
        assert_eq!(
            ParameterId::from_printer_name("Queue_12345678901abc").map(|id| id.to_string()),
            Some("12345678901".into())
        );
    }

    #[test]
    fn other_errors_are_fatal() {
        let err = io::Error::other("disk on fire");
        assert_eq!(
            TransportFailure::classify(&err),
            TransportFailure::Fatal {
                code: WRITE_FAULT_CODE
            }
        );
    }

    #[test]
    fn terminal_connection_states() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
    }
}
