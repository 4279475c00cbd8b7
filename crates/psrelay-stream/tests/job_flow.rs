// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end job flows: structural events and output buffers driven through
// a JobController into a fake consumer pipe.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use psrelay_core::config::RelaySettings;
use psrelay_core::error::{RelayError, Result};
use psrelay_core::types::{
    CommandOutcome, ConnectionState, EventId, JobId, PEER_CLOSED_CODE, WRITE_FAULT_CODE,
};
use psrelay_stream::capture::StreamDigest;
use psrelay_stream::launch::{
    ChannelName, ConsumerProcess, LaunchSpec, PipeConnector, PipeWriter, ProcessLauncher,
};
use psrelay_stream::{JobController, MarkerRoute, SpoolBuffer, StartOptions, TraceRole, TracingTrace};

// ---------------------------------------------------------------------------
// Fake collaborators
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Mode {
    /// Accept at most this many bytes per write.
    Trickle(usize),
    /// Fail every write with this error kind.
    Fail(io::ErrorKind),
}

#[derive(Clone)]
struct FakePipe {
    mode: Mode,
    received: Arc<Mutex<Vec<u8>>>,
}

impl FakePipe {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }
}

impl AsyncWrite for FakePipe {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.mode {
            Mode::Trickle(step) => {
                let n = buf.len().min(step);
                self.received.lock().unwrap().extend_from_slice(&buf[..n]);
                Poll::Ready(Ok(n))
            }
            Mode::Fail(kind) => Poll::Ready(Err(io::Error::from(kind))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Records launches; optionally fails them.
#[derive(Default)]
struct FakeLauncher {
    fail: bool,
    launched: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ConsumerProcess> {
        self.launched.lock().unwrap().push(spec.args());
        if self.fail {
            Err(RelayError::Launch("no such consumer".into()))
        } else {
            Ok(ConsumerProcess::detached(Some(4242)))
        }
    }
}

/// Hands out one prepared pipe.
struct FakeConnector {
    pipe: Mutex<Option<FakePipe>>,
}

impl FakeConnector {
    fn new(pipe: &FakePipe) -> Self {
        Self {
            pipe: Mutex::new(Some(pipe.clone())),
        }
    }
}

#[async_trait]
impl PipeConnector for FakeConnector {
    async fn connect(&self, _: &ChannelName) -> io::Result<PipeWriter> {
        match self.pipe.lock().unwrap().take() {
            Some(pipe) => Ok(Box::new(pipe)),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }
}

/// Fails every attempt with the same error.
struct Unreachable {
    kind: io::ErrorKind,
    attempts: Mutex<u32>,
}

impl Unreachable {
    fn new(kind: io::ErrorKind) -> Self {
        Self {
            kind,
            attempts: Mutex::new(0),
        }
    }
}

#[async_trait]
impl PipeConnector for Unreachable {
    async fn connect(&self, _: &ChannelName) -> io::Result<PipeWriter> {
        *self.attempts.lock().unwrap() += 1;
        Err(io::Error::from(self.kind))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const JOB: u32 = 12_345_678;

fn consumer_settings() -> RelaySettings {
    RelaySettings {
        consumer_path: Some(PathBuf::from("/opt/psrelay/consumer")),
        connect_timeout_secs: 1,
        ..RelaySettings::default()
    }
}

fn controller(settings: RelaySettings, route: MarkerRoute) -> JobController {
    let job_id = JobId::from_raw(JOB).unwrap();
    let trace = Box::new(TracingTrace::for_job(TraceRole::Caller, job_id));
    JobController::new(settings, job_id, route, trace).unwrap()
}

async fn started(
    settings: RelaySettings,
    route: MarkerRoute,
    pipe: &FakePipe,
) -> JobController {
    let mut job = controller(settings, route);
    let launcher = FakeLauncher::default();
    let state = job
        .start(&launcher, &FakeConnector::new(pipe), StartOptions::default())
        .await;
    assert_eq!(state, ConnectionState::Connected);
    job
}

fn digest_of(bytes: &[u8]) -> String {
    let mut digest = StreamDigest::new();
    digest.update(bytes);
    digest.hex()
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn relay_route_full_job() {
    let pipe = FakePipe::new(Mode::Trickle(5));
    let mut job = started(consumer_settings(), MarkerRoute::Relay, &pipe).await;

    assert_eq!(job.on_structural_event(EventId::BEGIN_STREAM).await, CommandOutcome::Suppressed);
    assert_eq!(job.on_output_bytes(b"%!PS-Adobe-3.0\r\n").await, 16);
    assert_eq!(job.on_structural_event(EventId::PS_ADOBE).await, CommandOutcome::Suppressed);
    assert!(job.on_structural_event(EventId::COMMENTS).await.is_success());
    assert_eq!(job.on_structural_event(EventId::PAGES).await, CommandOutcome::NotHandled);
    assert!(job.on_structural_event(EventId::BEGIN_PAGE_SETUP).await.is_success());
    job.on_output_bytes(b"0 0 moveto showpage\r\n").await;
    assert!(job.on_structural_event(EventId::EOF).await.is_success());

    // The sentinel went through the relay route and ended the job.
    assert!(!job.state().streaming);
    let summary = job.summary().cloned().unwrap();
    assert!(summary.sentinel_seen);
    assert_eq!(summary.relay_state, ConnectionState::Closed);
    assert!(!summary.relay_failed);

    // Late bytes are accepted but go nowhere.
    assert_eq!(job.on_output_bytes(b"%%Trailer\r\n").await, 11);

    let expected = [
        "%!PS-Adobe-3.0\r\n",
        "%%UCSLogoPrint SetParameterId() [12345678]\r\n",
        "%%UCSLogoPrint PSINJECT_BEGINPAGESETUP(1) [12345678]\r\n",
        "0 0 moveto showpage\r\n",
        "%%UCSLogoPrint PSINJECT_ENDSTREAM() [12345678]\r\n",
    ]
    .concat();
    assert_eq!(pipe.received(), expected.as_bytes());
    assert_eq!(summary.forwarded_bytes, expected.len() as u64);
    assert_eq!(summary.sha256, digest_of(expected.as_bytes()));
    assert_eq!(summary.pages, 1);
}

#[tokio::test]
async fn spool_route_sentinel_straddles_buffers() {
    let pipe = FakePipe::new(Mode::Trickle(64));
    let spool = SpoolBuffer::new();
    let mut job = started(
        consumer_settings(),
        MarkerRoute::Spool(Box::new(spool.clone())),
        &pipe,
    )
    .await;

    job.on_structural_event(EventId::PS_ADOBE).await;
    job.on_output_bytes(b"%!PS-Adobe-3.0\r\n").await;
    job.on_structural_event(EventId::BEGIN_PAGE_SETUP).await;
    let page_marker = spool.take();
    job.on_output_bytes(&page_marker).await;
    job.on_output_bytes(b"showpage\r\n").await;

    job.on_structural_event(EventId::EOF).await;
    let mut tail = spool.take();
    assert_eq!(tail, job.sentinel());
    tail.extend_from_slice(b"XYZ");

    // The host delivers the sentinel split in three awkward pieces.
    let (a, rest) = tail.split_at(3);
    let (b, c) = rest.split_at(rest.len() - 5);
    job.on_output_bytes(a).await;
    job.on_output_bytes(b).await;
    assert!(job.state().streaming);
    assert_eq!(job.on_output_bytes(c).await, c.len());
    assert!(!job.state().streaming);

    let received = pipe.received();
    assert!(received.ends_with(job.sentinel()));
    assert!(!received.ends_with(b"XYZ"));
    let summary = job.teardown().await;
    assert!(summary.sentinel_seen);
    assert_eq!(summary.forwarded_bytes, received.len() as u64);
}

#[tokio::test]
async fn peer_close_cancels_the_job() {
    let pipe = FakePipe::new(Mode::Fail(io::ErrorKind::BrokenPipe));
    let mut job = started(consumer_settings(), MarkerRoute::Relay, &pipe).await;

    job.on_structural_event(EventId::PS_ADOBE).await;
    assert_eq!(job.on_output_bytes(b"%!PS\r\n").await, 6);
    assert!(job.state().cancelled);
    assert!(!job.state().transport_error);

    assert_eq!(
        job.on_structural_event(EventId::BEGIN_SETUP).await,
        CommandOutcome::Aborted {
            code: PEER_CLOSED_CODE
        }
    );
    // Cancellation is reported before the policy is looked at.
    assert_eq!(
        job.on_structural_event(EventId::ORIENTATION).await,
        CommandOutcome::Aborted {
            code: PEER_CLOSED_CODE
        }
    );
    assert_eq!(job.on_output_bytes(b"more").await, 4);
    let summary = job.teardown().await;
    assert!(summary.cancelled);
    assert_eq!(summary.last_error, PEER_CLOSED_CODE);
}

#[tokio::test]
async fn transport_error_aborts_relay_work() {
    let pipe = FakePipe::new(Mode::Fail(io::ErrorKind::Other));
    let mut job = started(consumer_settings(), MarkerRoute::Relay, &pipe).await;

    job.on_structural_event(EventId::PS_ADOBE).await;
    let outcome = job.on_structural_event(EventId::BEGIN_PROLOG).await;
    assert_eq!(
        outcome,
        CommandOutcome::Aborted {
            code: WRITE_FAULT_CODE
        }
    );
    assert!(job.state().transport_error);
    assert!(!job.state().cancelled);
    assert_eq!(job.relay().state(), ConnectionState::Failed);
}

#[tokio::test]
async fn launch_failure_degrades_to_no_relay() {
    let mut job = controller(consumer_settings(), MarkerRoute::Relay);
    let launcher = FakeLauncher {
        fail: true,
        ..FakeLauncher::default()
    };
    let pipe = FakePipe::new(Mode::Trickle(8));
    let state = job
        .start(&launcher, &FakeConnector::new(&pipe), StartOptions::default())
        .await;
    assert_eq!(state, ConnectionState::Failed);

    job.on_structural_event(EventId::PS_ADOBE).await;
    assert!(matches!(
        job.on_structural_event(EventId::BEGIN_SETUP).await,
        CommandOutcome::Injected { .. }
    ));
    job.on_structural_event(EventId::EOF).await;
    let summary = job.teardown().await;
    assert!(summary.sentinel_seen);
    assert!(!summary.cancelled && !summary.transport_error);
    assert!(summary.relay_failed);
    assert_eq!(summary.relay_state, ConnectionState::Closed);
    assert!(pipe.received().is_empty());
}

#[tokio::test]
async fn unreachable_consumer_degrades_to_no_relay() {
    for kind in [io::ErrorKind::PermissionDenied, io::ErrorKind::NotFound] {
        let mut job = controller(consumer_settings(), MarkerRoute::Relay);
        let connector = Unreachable::new(kind);
        let state = job
            .start(&FakeLauncher::default(), &connector, StartOptions::default())
            .await;
        assert_eq!(state, ConnectionState::Failed, "{kind:?}");
        if kind == io::ErrorKind::PermissionDenied {
            assert_eq!(*connector.attempts.lock().unwrap(), 1);
        } else {
            assert!(*connector.attempts.lock().unwrap() > 1);
        }

        job.on_structural_event(EventId::PS_ADOBE).await;
        assert!(matches!(
            job.on_structural_event(EventId::BEGIN_SETUP).await,
            CommandOutcome::Injected { .. }
        ));
        assert_eq!(job.on_output_bytes(b"showpage\r\n").await, 10);
        assert!(matches!(
            job.on_structural_event(EventId::EOF).await,
            CommandOutcome::Injected { .. }
        ));

        let summary = job.teardown().await;
        assert!(summary.sentinel_seen);
        assert!(summary.relay_failed);
        assert!(!summary.cancelled && !summary.transport_error);
    }
}

#[tokio::test]
async fn consumer_gets_channel_pid_and_job_on_its_command_line() {
    let mut job = controller(consumer_settings(), MarkerRoute::Relay);
    let launcher = FakeLauncher::default();
    let pipe = FakePipe::new(Mode::Trickle(8));
    job.start(&launcher, &FakeConnector::new(&pipe), StartOptions::default())
        .await;

    let launched = launcher.launched.lock().unwrap();
    let args = &launched[0];
    assert!(args[0].starts_with("UniLogoPrintSpooler_"));
    assert_eq!(args[1], std::process::id().to_string());
    assert_eq!(args[2], JOB.to_string());
}

#[tokio::test]
async fn no_consumer_configured_leaves_relay_unstarted() {
    let mut job = controller(RelaySettings::default(), MarkerRoute::Relay);
    let launcher = FakeLauncher::default();
    let pipe = FakePipe::new(Mode::Trickle(8));
    let state = job
        .start(&launcher, &FakeConnector::new(&pipe), StartOptions::default())
        .await;
    assert_eq!(state, ConnectionState::NotStarted);
    assert!(launcher.launched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn capture_file_mirrors_forwarded_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("driver");
    let settings = RelaySettings {
        capture_path: Some(base.clone()),
        ..consumer_settings()
    };
    let pipe = FakePipe::new(Mode::Trickle(1024));
    let mut job = started(settings, MarkerRoute::Relay, &pipe).await;

    job.on_structural_event(EventId::PS_ADOBE).await;
    job.on_output_bytes(b"%!PS-Adobe-3.0\r\n").await;
    job.on_structural_event(EventId::EOF).await;

    let captured = std::fs::read(dir.path().join(format!("driver_{JOB}.txt"))).unwrap();
    assert_eq!(captured, pipe.received());
}
