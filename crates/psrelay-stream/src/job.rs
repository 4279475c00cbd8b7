// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job controller: drives one print job from start to teardown.
//
// The host calls `on_structural_event` at each structural point of the
// document and `on_output_bytes` with every rendered buffer. Markers are
// produced for injectable points; the output is scanned for the job's
// sentinel while it is forwarded to the relay, and the sentinel ends the job.
//
// Relay problems never surface as errors here. They are absorbed into
// `CommandOutcome`s so the host's own state machine is never disturbed.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use psrelay_core::config::RelaySettings;
use psrelay_core::error::{RelayError, Result};
use psrelay_core::types::{
    CommandOutcome, ConnectionState, EventId, JobId, ParameterId, TransportFailure,
    WRITE_FAULT_CODE,
};

use crate::capture::{DebugCapture, StreamDigest};
use crate::catalog::MarkerCatalog;
use crate::launch::{LaunchSpec, PipeConnector, PipeWriter, ProcessLauncher};
use crate::marker::MarkerBuilder;
use crate::relay::{ConnectPolicy, RelayChannel};
use crate::sentinel::SentinelMatcher;
use crate::trace::JobTrace;

/// The host side of a spool-routed job.
pub trait SpoolSink: Send {
    /// Append `bytes` to the upstream stream, returning how many were
    /// accepted. Spooled markers come back through `on_output_bytes`.
    fn write_spool(&mut self, bytes: &[u8]) -> std::io::Result<usize>;

    /// Write `bytes` straight to the host's own output (the print-to-file
    /// target), bypassing the scanned stream.
    fn write_host_output(&mut self, bytes: &[u8]) -> std::io::Result<usize>;
}

/// In-memory spool shared between a job and whoever plays the host.
#[derive(Debug, Clone, Default)]
pub struct SpoolBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
    host: Arc<Mutex<Vec<u8>>>,
}

impl SpoolBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything spooled so far.
    pub fn take(&self) -> Vec<u8> {
        drain(&self.inner)
    }

    /// Remove and return everything written to the host's output so far.
    pub fn take_host_output(&self) -> Vec<u8> {
        drain(&self.host)
    }
}

fn drain(buf: &Mutex<Vec<u8>>) -> Vec<u8> {
    buf.lock()
        .map(|mut buf| std::mem::take(&mut *buf))
        .unwrap_or_default()
}

fn append(buf: &Mutex<Vec<u8>>, bytes: &[u8]) -> std::io::Result<usize> {
    let mut buf = buf
        .lock()
        .map_err(|_| std::io::Error::other("spool buffer poisoned"))?;
    buf.extend_from_slice(bytes);
    Ok(bytes.len())
}

impl SpoolSink for SpoolBuffer {
    fn write_spool(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        append(&self.inner, bytes)
    }

    fn write_host_output(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        append(&self.host, bytes)
    }
}

/// Where markers go once built.
pub enum MarkerRoute {
    /// Into the host's output. The marker reaches the relay when the host
    /// hands it back through `on_output_bytes`.
    Spool(Box<dyn SpoolSink>),
    /// Straight into the scanned relay stream.
    Relay,
}

impl std::fmt::Debug for MarkerRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spool(_) => f.write_str("Spool"),
            Self::Relay => f.write_str("Relay"),
        }
    }
}

/// Per-job flags and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: JobId,
    /// Incremented once per begin-page-setup event.
    pub page_number: u32,
    /// Output is scanned and forwarded until the sentinel is seen.
    pub streaming: bool,
    pub cancelled: bool,
    pub transport_error: bool,
    pub seen_first_milestone: bool,
    pub seen_terminal_milestone: bool,
    pub fail_target: Option<EventId>,
    pub fail_code: u32,
    /// Parameter id taken from the printer name, if it carried one.
    pub parameter_id: Option<ParameterId>,
    /// No output buffer has arrived yet.
    pub awaiting_first_output: bool,
    pub torn_down: bool,
}

impl JobState {
    fn new(job_id: JobId, settings: &RelaySettings) -> Self {
        Self {
            job_id,
            page_number: 0,
            streaming: true,
            cancelled: false,
            transport_error: false,
            seen_first_milestone: false,
            seen_terminal_milestone: false,
            fail_target: settings.inject_to_fail,
            fail_code: settings.inject_to_fail_code,
            parameter_id: None,
            awaiting_first_output: true,
            torn_down: false,
        }
    }

    /// Markers are allowed strictly after the first milestone and up to
    /// and including the terminal one.
    pub fn markers_permitted(&self) -> bool {
        self.seen_first_milestone && !self.seen_terminal_milestone
    }

    fn is_aborted(&self) -> bool {
        self.cancelled || self.transport_error
    }
}

/// Outcome of a whole job, produced at teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub pages: u32,
    /// Bytes of the pre-termination stream (sentinel included).
    pub forwarded_bytes: u64,
    /// SHA-256 of those bytes, lowercase hex.
    pub sha256: String,
    pub sentinel_seen: bool,
    pub cancelled: bool,
    pub transport_error: bool,
    pub last_error: u32,
    /// Channel state after teardown, always `Closed`.
    pub relay_state: ConnectionState,
    /// The channel had failed (launch, connect or write) before teardown.
    pub relay_failed: bool,
}

/// How the consumer should be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    pub run_as_interactive_user: bool,
    pub show_console: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            run_as_interactive_user: true,
            show_console: false,
        }
    }
}

/// Drives one job end to end. Never reused for a second job.
pub struct JobController {
    state: JobState,
    settings: RelaySettings,
    catalog: MarkerCatalog,
    markers: MarkerBuilder,
    matcher: SentinelMatcher,
    relay: RelayChannel,
    route: MarkerRoute,
    capture: Option<DebugCapture>,
    digest: StreamDigest,
    sentinel_seen: bool,
    trace: Box<dyn JobTrace>,
    summary: Option<JobSummary>,
}

impl JobController {
    /// Prepare a job. Nothing is launched until [`JobController::start`].
    pub fn new(
        settings: RelaySettings,
        job_id: JobId,
        route: MarkerRoute,
        mut trace: Box<dyn JobTrace>,
    ) -> Result<Self> {
        let markers = MarkerBuilder::new(&settings, job_id)?;
        let sentinel = markers.sentinel();
        let matcher = SentinelMatcher::new(sentinel.as_bytes())?;

        trace.var("job_id", &job_id);
        trace.var("sentinel", &sentinel.trim_end());
        if settings.pad_char_count > 0 {
            trace.var("pad_char_count", &settings.pad_char_count);
        }
        if let Some(target) = settings.inject_to_fail {
            trace.line(&format!(
                "event {target} will fail with code {} (test hook)",
                settings.inject_to_fail_code
            ));
        }

        Ok(Self {
            state: JobState::new(job_id, &settings),
            settings,
            catalog: MarkerCatalog::standard(),
            markers,
            matcher,
            relay: RelayChannel::new(),
            route,
            capture: None,
            digest: StreamDigest::new(),
            sentinel_seen: false,
            trace,
            summary: None,
        })
    }

    /// Take the parameter id for the set-parameter-id marker from the
    /// printer or output name.
    pub fn with_printer_name(mut self, printer_name: &str) -> Self {
        self.state.parameter_id = ParameterId::from_printer_name(printer_name);
        match &self.state.parameter_id {
            Some(id) => self.trace.var("parameter_id", id),
            None => self.trace.line("printer name carries no parameter id"),
        }
        self
    }

    pub fn job_id(&self) -> JobId {
        self.state.job_id
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn relay(&self) -> &RelayChannel {
        &self.relay
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn sentinel(&self) -> &[u8] {
        self.matcher.pattern()
    }

    /// Open the debug capture and bring up the relay.
    ///
    /// Every failure here degrades the job instead of failing it: without a
    /// consumer the job still runs, its bytes just go nowhere.
    pub async fn start(
        &mut self,
        launcher: &dyn ProcessLauncher,
        connector: &dyn PipeConnector,
        options: StartOptions,
    ) -> ConnectionState {
        let depth = self.trace.enter_section("start job");
        self.open_capture().await;

        match self.settings.consumer_path.clone() {
            None => {
                self.trace.line("no relay consumer configured, bytes are not relayed");
            }
            Some(executable) => {
                let mut spec = LaunchSpec::new(executable, self.state.job_id);
                spec.run_as_interactive_user = options.run_as_interactive_user;
                spec.show_console = options.show_console;
                self.trace.var("channel", &spec.channel);

                let policy = ConnectPolicy::from_secs(self.settings.connect_timeout_secs);
                let outcome = match self.relay.launch(launcher, &spec).await {
                    Ok(()) => self.relay.connect(connector, policy).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = outcome {
                    self.trace.error("relay unavailable, continuing without it", &e);
                }
            }
        }

        let state = self.relay.state();
        self.trace.var("relay_state", &format_args!("{state:?}"));
        self.trace.exit_section(depth);
        info!(job_id = %self.state.job_id, ?state, "job started");
        state
    }

    /// Relay into an already open pipe instead of launching a consumer.
    pub async fn start_with_pipe(&mut self, writer: PipeWriter) -> Result<()> {
        self.open_capture().await;
        self.relay.attach(writer)?;
        info!(job_id = %self.state.job_id, "job started on attached pipe");
        Ok(())
    }

    async fn open_capture(&mut self) {
        let Some(base) = self.settings.capture_path.clone() else {
            return;
        };
        match DebugCapture::create(&base, self.state.job_id).await {
            Ok(capture) => {
                self.trace.var("capture", &capture.path().display());
                self.capture = Some(capture);
            }
            Err(e) => self.trace.error("debug capture unavailable", &e),
        }
    }

    /// Handle one structural callback.
    pub async fn on_structural_event(&mut self, event: EventId) -> CommandOutcome {
        let class = self.catalog.classify(event);
        let label = class.display_name.map_or_else(|| format!("event {event}"), str::to_owned);
        let depth = self.trace.enter_section(&label);

        let outcome = self.handle_event(event, class.display_name, class.is_inject()).await;

        self.trace.var("outcome", &format_args!("{outcome:?}"));
        self.trace.exit_section(depth);
        debug!(job_id = %self.state.job_id, %event, ?outcome, "structural event");
        outcome
    }

    async fn handle_event(
        &mut self,
        event: EventId,
        name: Option<&'static str>,
        inject: bool,
    ) -> CommandOutcome {
        // Decided before this event's own milestone flag flips.
        let permitted = self.state.markers_permitted();

        match event {
            EventId::BEGIN_PAGE_SETUP => {
                self.state.page_number += 1;
                self.trace.var("page", &self.state.page_number);
            }
            EventId::PS_ADOBE => self.state.seen_first_milestone = true,
            EventId::EOF => self.state.seen_terminal_milestone = true,
            _ => {}
        }

        if self.state.fail_target == Some(event) {
            self.trace.line("forced failure (test hook)");
            return CommandOutcome::Failed {
                code: self.state.fail_code,
            };
        }
        if !permitted {
            self.trace.line("no markers before the first or after the terminal milestone");
            return CommandOutcome::Suppressed;
        }
        if self.state.is_aborted() {
            self.trace.line("job is aborted, marker dropped");
            return CommandOutcome::Aborted {
                code: self.relay.last_error(),
            };
        }
        let Some(name) = name.filter(|_| inject) else {
            return CommandOutcome::NotHandled;
        };
        if self.state.torn_down {
            self.trace.line("job is torn down, marker dropped");
            return CommandOutcome::Suppressed;
        }

        let marker = match event {
            EventId::COMMENTS => {
                let parameter_id = self.state.parameter_id.as_ref().map(ParameterId::as_str);
                let mut text = self.markers.set_param_id(parameter_id);
                text.push_str(&self.markers.pad_block());
                text
            }
            EventId::EOF => self.markers.sentinel(),
            _ => self.markers.structural(name, self.state.page_number),
        };
        self.trace.var("marker", &marker.trim_end());
        self.deliver_marker(marker.as_bytes()).await
    }

    async fn deliver_marker(&mut self, marker: &[u8]) -> CommandOutcome {
        if let MarkerRoute::Spool(sink) = &mut self.route {
            return match sink.write_spool(marker) {
                Ok(n) if n == marker.len() => CommandOutcome::Injected { bytes: n },
                Ok(n) => {
                    warn!(written = n, expected = marker.len(), "spool accepted a partial marker");
                    CommandOutcome::Failed {
                        code: WRITE_FAULT_CODE,
                    }
                }
                Err(e) => {
                    self.trace.error("spool refused the marker", &e);
                    CommandOutcome::Failed {
                        code: e
                            .raw_os_error()
                            .filter(|c| *c > 0)
                            .map_or(WRITE_FAULT_CODE, |c| c as u32),
                    }
                }
            };
        }

        self.forward(marker).await;
        if self.state.is_aborted() {
            CommandOutcome::Aborted {
                code: self.relay.last_error(),
            }
        } else {
            CommandOutcome::Injected {
                bytes: marker.len(),
            }
        }
    }

    /// Handle one output buffer. Always reports the whole buffer as taken.
    pub async fn on_output_bytes(&mut self, buffer: &[u8]) -> usize {
        if !buffer.is_empty() {
            if self.state.awaiting_first_output {
                self.state.awaiting_first_output = false;
                self.write_job_id_to_host();
            }
            self.forward(buffer).await;
        }
        buffer.len()
    }

    /// Without a parameter id the job id goes to the host's own output once,
    /// so a print-to-file target can be matched to its job.
    fn write_job_id_to_host(&mut self) {
        if self.state.parameter_id.is_some() {
            return;
        }
        let line = self.markers.job_id_line();
        let MarkerRoute::Spool(sink) = &mut self.route else {
            self.trace.line("no host output, job id not written");
            return;
        };
        match sink.write_host_output(line.as_bytes()) {
            Ok(_) => self.trace.line("wrote job id to host output"),
            Err(e) => self.trace.error("writing job id to host output failed", &e),
        }
    }

    /// Scan `bytes` for the sentinel and pass the pre-termination part on.
    async fn forward(&mut self, bytes: &[u8]) {
        if !self.state.streaming {
            return;
        }

        let end = self.matcher.feed(bytes);
        let payload = &bytes[..end.unwrap_or(bytes.len())];

        if let Some(capture) = self.capture.as_mut() {
            capture.write(payload).await;
        }
        self.digest.update(payload);

        if !self.state.is_aborted() {
            let report = self.relay.send(payload).await;
            match report.failure {
                Some(TransportFailure::PeerClosed) => {
                    self.trace.line("consumer closed the pipe, job is cancelled");
                    self.state.cancelled = true;
                }
                Some(TransportFailure::Fatal { code }) => {
                    let err = RelayError::Transport {
                        code,
                        message: format!("{} of {} bytes written", report.written, payload.len()),
                    };
                    self.trace.error("relay write failed, job is aborted", &err);
                    self.state.transport_error = true;
                }
                None => {}
            }
        }

        if let Some(end) = end {
            self.trace.line("sentinel found, end of stream");
            self.trace.var("discarded", &(bytes.len() - end));
            self.sentinel_seen = true;
            self.state.streaming = false;
            self.teardown().await;
        }
    }

    /// Close the relay and the capture. Later calls return the same summary.
    pub async fn teardown(&mut self) -> JobSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }

        self.state.streaming = false;
        let relay_failed = self.relay.state() == ConnectionState::Failed;
        self.relay.close().await;
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.finish().await {
                self.trace.error("closing debug capture failed", &e);
            }
        }
        self.state.torn_down = true;

        let summary = JobSummary {
            job_id: self.state.job_id,
            pages: self.state.page_number,
            forwarded_bytes: self.digest.len(),
            sha256: self.digest.hex(),
            sentinel_seen: self.sentinel_seen,
            cancelled: self.state.cancelled,
            transport_error: self.state.transport_error,
            last_error: self.relay.last_error(),
            relay_state: self.relay.state(),
            relay_failed,
        };
        info!(
            job_id = %summary.job_id,
            pages = summary.pages,
            bytes = summary.forwarded_bytes,
            cancelled = summary.cancelled,
            transport_error = summary.transport_error,
            "job torn down"
        );
        self.summary = Some(summary.clone());
        summary
    }

    /// Summary of a torn-down job.
    pub fn summary(&self) -> Option<&JobSummary> {
        self.summary.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{TraceRole, TracingTrace};

    fn job(route: MarkerRoute, settings: RelaySettings) -> JobController {
        let job_id = JobId::from_raw(12_345_678).unwrap();
        let trace = Box::new(TracingTrace::for_job(TraceRole::Caller, job_id));
        JobController::new(settings, job_id, route, trace).unwrap()
    }

    #[tokio::test]
    async fn markers_wait_for_first_milestone() {
        let spool = SpoolBuffer::new();
        let mut job = job(MarkerRoute::Spool(Box::new(spool.clone())), RelaySettings::default());

        assert_eq!(
            job.on_structural_event(EventId::BEGIN_STREAM).await,
            CommandOutcome::Suppressed
        );
        // The first milestone itself is not marked.
        assert_eq!(
            job.on_structural_event(EventId::PS_ADOBE).await,
            CommandOutcome::Suppressed
        );
        assert!(spool.take().is_empty());

        let outcome = job.on_structural_event(EventId::BEGIN_PROLOG).await;
        assert!(matches!(outcome, CommandOutcome::Injected { .. }));
        assert_eq!(
            spool.take(),
            b"%%UCSLogoPrint PSINJECT_BEGINPROLOG(0) [12345678]\r\n"
        );
    }

    #[tokio::test]
    async fn replace_points_are_not_handled() {
        let spool = SpoolBuffer::new();
        let mut job = job(MarkerRoute::Spool(Box::new(spool.clone())), RelaySettings::default());
        job.on_structural_event(EventId::PS_ADOBE).await;

        assert_eq!(
            job.on_structural_event(EventId::BOUNDING_BOX).await,
            CommandOutcome::NotHandled
        );
        assert_eq!(
            job.on_structural_event(EventId(150)).await,
            CommandOutcome::NotHandled
        );
        assert!(spool.take().is_empty());
    }

    #[tokio::test]
    async fn page_number_advances_before_marking() {
        let spool = SpoolBuffer::new();
        let mut job = job(MarkerRoute::Spool(Box::new(spool.clone())), RelaySettings::default());
        job.on_structural_event(EventId::PS_ADOBE).await;
        job.on_structural_event(EventId::BEGIN_PAGE_SETUP).await;
        job.on_structural_event(EventId::BEGIN_PAGE_SETUP).await;
        spool.take();

        job.on_structural_event(EventId::BEGIN_PAGE_SETUP).await;
        assert_eq!(job.state().page_number, 3);
        assert_eq!(
            spool.take(),
            b"%%UCSLogoPrint PSINJECT_BEGINPAGESETUP(3) [12345678]\r\n"
        );
    }

    #[tokio::test]
    async fn page_counts_even_outside_the_milestone_window() {
        let mut job = job(MarkerRoute::Relay, RelaySettings::default());
        assert_eq!(
            job.on_structural_event(EventId::BEGIN_PAGE_SETUP).await,
            CommandOutcome::Suppressed
        );
        assert_eq!(job.state().page_number, 1);
    }

    #[tokio::test]
    async fn eof_carries_the_sentinel_and_closes_the_window() {
        let spool = SpoolBuffer::new();
        let mut job = job(MarkerRoute::Spool(Box::new(spool.clone())), RelaySettings::default());
        job.on_structural_event(EventId::PS_ADOBE).await;

        let outcome = job.on_structural_event(EventId::EOF).await;
        let sentinel = spool.take();
        assert_eq!(sentinel, job.sentinel());
        assert_eq!(outcome, CommandOutcome::Injected { bytes: sentinel.len() });

        assert_eq!(
            job.on_structural_event(EventId::END_STREAM).await,
            CommandOutcome::Suppressed
        );
    }

    #[tokio::test]
    async fn comments_get_set_param_and_pad_block() {
        let spool = SpoolBuffer::new();
        let settings = RelaySettings {
            pad_char_count: 45,
            ..RelaySettings::default()
        };
        let mut job = job(MarkerRoute::Spool(Box::new(spool.clone())), settings);
        job.on_structural_event(EventId::PS_ADOBE).await;
        job.on_structural_event(EventId::COMMENTS).await;

        let expected = format!(
            "%%UCSLogoPrint SetParameterId() [12345678]\r\n{}",
            "%%UCSLogoPrint PAD\r\n".repeat(2)
        );
        assert_eq!(spool.take(), expected.as_bytes());
    }

    #[tokio::test]
    async fn forced_failure_wins_over_suppression() {
        let settings = RelaySettings {
            inject_to_fail: Some(EventId::BEGIN_STREAM),
            inject_to_fail_code: 5,
            ..RelaySettings::default()
        };
        let mut job = job(MarkerRoute::Relay, settings);
        assert_eq!(
            job.on_structural_event(EventId::BEGIN_STREAM).await,
            CommandOutcome::Failed { code: 5 }
        );
        assert_eq!(
            job.on_structural_event(EventId::END_STREAM).await,
            CommandOutcome::Suppressed
        );
    }

    struct RefusingSpool;

    impl SpoolSink for RefusingSpool {
        fn write_spool(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("spool full"))
        }

        fn write_host_output(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("spool full"))
        }
    }

    #[tokio::test]
    async fn refused_spool_write_fails_the_callback() {
        let mut job = job(MarkerRoute::Spool(Box::new(RefusingSpool)), RelaySettings::default());
        job.on_structural_event(EventId::PS_ADOBE).await;
        assert_eq!(
            job.on_structural_event(EventId::TRAILER).await,
            CommandOutcome::Failed {
                code: WRITE_FAULT_CODE
            }
        );
    }

    #[tokio::test]
    async fn output_is_always_fully_accepted() {
        let mut job = job(MarkerRoute::Relay, RelaySettings::default());
        assert_eq!(job.on_output_bytes(b"%!PS-Adobe-3.0\r\n").await, 16);
        assert_eq!(job.on_output_bytes(b"").await, 0);
        assert!(job.state().streaming);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let mut job = job(MarkerRoute::Relay, RelaySettings::default());
        job.on_output_bytes(b"hello").await;
        let first = job.teardown().await;
        let second = job.teardown().await;
        assert_eq!(first, second);
        assert_eq!(first.forwarded_bytes, 5);
        assert!(!first.sentinel_seen);
        assert!(job.state().torn_down);

        // Nothing is scanned once torn down.
        job.on_output_bytes(b"more").await;
        assert_eq!(job.summary().map(|s| s.forwarded_bytes), Some(5));
    }

    #[tokio::test]
    async fn no_markers_after_early_teardown() {
        let mut relayed = job(MarkerRoute::Relay, RelaySettings::default());
        let spool = SpoolBuffer::new();
        let mut job = job(MarkerRoute::Spool(Box::new(spool.clone())), RelaySettings::default());
        job.on_structural_event(EventId::PS_ADOBE).await;
        job.teardown().await;

        assert_eq!(
            job.on_structural_event(EventId::BEGIN_PROLOG).await,
            CommandOutcome::Suppressed
        );
        assert_eq!(
            job.on_structural_event(EventId::BOUNDING_BOX).await,
            CommandOutcome::NotHandled
        );
        assert!(spool.take().is_empty());

        relayed.on_structural_event(EventId::PS_ADOBE).await;
        relayed.teardown().await;
        assert_eq!(
            relayed.on_structural_event(EventId::BEGIN_SETUP).await,
            CommandOutcome::Suppressed
        );
    }

    #[tokio::test]
    async fn printer_name_fills_the_set_param_marker() {
        let spool = SpoolBuffer::new();
        let mut job = job(MarkerRoute::Spool(Box::new(spool.clone())), RelaySettings::default())
            .with_printer_name("LParam_1252400638494244396315693_MapId.txt");
        job.on_structural_event(EventId::PS_ADOBE).await;
        job.on_structural_event(EventId::COMMENTS).await;
        assert_eq!(
            spool.take(),
            b"%%UCSLogoPrint SetParameterId(1252400638494244396315693) [12345678]\r\n"
        );

        // The id identifies the job, so the host output gets no job id line.
        job.on_output_bytes(b"%!PS\r\n").await;
        assert!(spool.take_host_output().is_empty());
    }

    #[tokio::test]
    async fn job_id_goes_to_host_output_once() {
        let spool = SpoolBuffer::new();
        let mut job = job(MarkerRoute::Spool(Box::new(spool.clone())), RelaySettings::default())
            .with_printer_name("UniLogoPrint 2");
        assert!(job.state().parameter_id.is_none());

        job.on_output_bytes(b"").await;
        assert!(spool.take_host_output().is_empty());

        job.on_output_bytes(b"%!PS-Adobe-3.0\r\n").await;
        job.on_output_bytes(b"showpage\r\n").await;
        assert_eq!(spool.take_host_output(), b"12345678\r\n");
        // The job id line is not part of the scanned stream.
        assert!(spool.take().is_empty());
        assert_eq!(job.teardown().await.forwarded_bytes, 26);
    }
}
