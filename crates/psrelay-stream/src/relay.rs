// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Relay channel: the byte pipe to one job's consumer.
//
// NotStarted -> Launching -> Connecting -> Connected, ending in Closed or
// Failed. The first write failure is final: a peer-closed pipe cancels the
// job, anything else is a transport error, and every later send is a no-op
// reporting that same failure.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use psrelay_core::error::{RelayError, Result};
use psrelay_core::types::{ConnectionState, TransportFailure};

use crate::launch::{
    ChannelName, ConsumerProcess, LaunchSpec, PipeConnector, PipeWriter, ProcessLauncher,
};

/// Interval between connection attempts.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// How long and how often to try reaching the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub timeout: Duration,
    pub retry_interval: Duration,
}

impl ConnectPolicy {
    pub fn from_secs(secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(secs),
            retry_interval: CONNECT_RETRY_INTERVAL,
        }
    }
}

/// Result of one [`RelayChannel::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Bytes the transport accepted.
    pub written: usize,
    /// The channel's failure, if it has one (new or carried over).
    pub failure: Option<TransportFailure>,
}

impl SendReport {
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

/// Byte pipe to the relay consumer of one job.
pub struct RelayChannel {
    state: ConnectionState,
    last_error: u32,
    failure: Option<TransportFailure>,
    channel: Option<ChannelName>,
    process: Option<ConsumerProcess>,
    writer: Option<PipeWriter>,
}

impl std::fmt::Debug for RelayChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayChannel")
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .field("failure", &self.failure)
            .field("channel", &self.channel)
            .field("process", &self.process)
            .field("writer", &self.writer.is_some())
            .finish()
    }
}

impl Default for RelayChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayChannel {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::NotStarted,
            last_error: 0,
            failure: None,
            channel: None,
            process: None,
            writer: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Code of the last transport failure, 0 when none.
    pub fn last_error(&self) -> u32 {
        self.last_error
    }

    pub fn failure(&self) -> Option<TransportFailure> {
        self.failure
    }

    /// The consumer closed the pipe.
    pub fn is_cancelled(&self) -> bool {
        self.failure == Some(TransportFailure::PeerClosed)
    }

    /// The pipe broke for any other reason.
    pub fn has_transport_error(&self) -> bool {
        matches!(self.failure, Some(TransportFailure::Fatal { .. }))
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Start the consumer described by `spec`.
    #[instrument(skip_all, fields(exe = %spec.executable.display(), channel = %spec.channel))]
    pub async fn launch(&mut self, launcher: &dyn ProcessLauncher, spec: &LaunchSpec) -> Result<()> {
        if self.state != ConnectionState::NotStarted {
            return Err(RelayError::Launch(format!(
                "channel already started (state {:?})",
                self.state
            )));
        }
        self.state = ConnectionState::Launching;

        match launcher.launch(spec).await {
            Ok(process) => {
                debug!(pid = ?process.pid(), "consumer started");
                self.process = Some(process);
                self.channel = Some(spec.channel.clone());
                self.state = ConnectionState::Connecting;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "consumer launch failed");
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    /// Open the consumer's pipe, retrying until `policy.timeout` elapses.
    ///
    /// Access denied is terminal at once; every other error is retried.
    #[instrument(skip_all, fields(timeout_secs = policy.timeout.as_secs()))]
    pub async fn connect(&mut self, connector: &dyn PipeConnector, policy: ConnectPolicy) -> Result<()> {
        let channel = match (&self.state, &self.channel) {
            (ConnectionState::Connecting, Some(channel)) => channel.clone(),
            _ => return Err(RelayError::NotConnected),
        };

        let deadline = Instant::now() + policy.timeout;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match connector.connect(&channel).await {
                Ok(writer) => {
                    info!(%channel, attempts, "relay channel connected");
                    self.writer = Some(writer);
                    self.state = ConnectionState::Connected;
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    warn!(%channel, "access to relay channel denied");
                    self.state = ConnectionState::Failed;
                    return Err(RelayError::AccessDenied(channel.to_string()));
                }
                Err(e) => {
                    debug!(%channel, attempts, error = %e, "relay channel not ready");
                }
            }

            if Instant::now() + policy.retry_interval > deadline {
                warn!(%channel, attempts, "relay channel connect timed out");
                self.state = ConnectionState::Failed;
                return Err(RelayError::ConnectTimeout {
                    secs: policy.timeout.as_secs(),
                });
            }
            tokio::time::sleep(policy.retry_interval).await;
        }
    }

    /// Use an already open pipe.
    pub fn attach(&mut self, writer: PipeWriter) -> Result<()> {
        if self.state.is_terminal() || self.state == ConnectionState::Connected {
            return Err(RelayError::Transport {
                code: self.last_error,
                message: format!("cannot attach a pipe in state {:?}", self.state),
            });
        }
        self.writer = Some(writer);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Write all of `bytes`, looping over partial writes.
    ///
    /// Without a connected pipe nothing is written and no failure is
    /// reported. After a failure every call reports it again.
    pub async fn send(&mut self, bytes: &[u8]) -> SendReport {
        if let Some(failure) = self.failure {
            return SendReport {
                written: 0,
                failure: Some(failure),
            };
        }
        let Some(writer) = self.writer.as_mut() else {
            return SendReport {
                written: 0,
                failure: None,
            };
        };

        let mut written = 0;
        let mut error = None;
        while written < bytes.len() {
            match writer.write(&bytes[written..]).await {
                Ok(0) => {
                    error = Some(std::io::Error::from(std::io::ErrorKind::WriteZero));
                    break;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }
        match error {
            Some(e) => self.fail(written, bytes.len(), &e),
            None => SendReport {
                written,
                failure: None,
            },
        }
    }

    fn fail(&mut self, written: usize, total: usize, err: &std::io::Error) -> SendReport {
        let failure = TransportFailure::classify(err);
        match failure {
            TransportFailure::PeerClosed => {
                info!(written, total, "consumer closed the relay channel, job is cancelled");
                self.state = ConnectionState::Closed;
            }
            TransportFailure::Fatal { code } => {
                warn!(code, written, total, error = %err, "relay write failed");
                self.state = ConnectionState::Failed;
            }
        }
        self.failure = Some(failure);
        self.last_error = failure.code();
        self.writer = None;
        SendReport {
            written,
            failure: Some(failure),
        }
    }

    /// Flush and release the pipe and the consumer handle, ending in
    /// `Closed` from any state. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush().await {
                debug!(error = %e, "flush on close failed");
            }
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "shutdown on close failed");
            }
        }
        if let Some(mut process) = self.process.take() {
            process.release();
        }
        // A failure stays recorded in `failure` and `last_error`.
        self.state = ConnectionState::Closed;
    }
}
