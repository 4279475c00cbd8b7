// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Relay consumer launching and pipe connecting.
//
// The consumer is started with `<exe> <channel> <callerPid> <jobId>` and is
// expected to expose a byte pipe under the channel name. On Unix the channel
// is a socket in the temp directory; on Windows it is a named pipe.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWrite;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use psrelay_core::error::{RelayError, Result};
use psrelay_core::types::JobId;

/// Fixed leading part of every channel name.
pub const CHANNEL_PREFIX: &str = "UniLogoPrintSpooler";

/// Write half of a connected relay pipe.
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Name of one consumer's pipe: prefix, caller pid and launch time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(pid: u32, at: DateTime<Utc>) -> Self {
        Self(format!("{CHANNEL_PREFIX}_{pid}_{}", at.timestamp()))
    }

    /// Channel for a consumer launched now by this process.
    pub fn for_current_process() -> Self {
        Self::new(std::process::id(), Utc::now())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem address of the pipe.
    pub fn endpoint(&self) -> PathBuf {
        if cfg!(windows) {
            PathBuf::from(format!(r"\\.\pipe\{}", self.0))
        } else {
            std::env::temp_dir().join(format!("{}.sock", self.0))
        }
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to start one consumer.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub channel: ChannelName,
    pub caller_pid: u32,
    pub job_id: JobId,
    /// Start the consumer as the interactively logged-in user if possible.
    pub run_as_interactive_user: bool,
    /// Give the consumer a visible console (inherited stdio).
    pub show_console: bool,
}

impl LaunchSpec {
    pub fn new(executable: impl Into<PathBuf>, job_id: JobId) -> Self {
        Self {
            executable: executable.into(),
            channel: ChannelName::for_current_process(),
            caller_pid: std::process::id(),
            job_id,
            run_as_interactive_user: true,
            show_console: false,
        }
    }

    /// Command-line arguments after the executable.
    pub fn args(&self) -> Vec<String> {
        vec![
            self.channel.to_string(),
            self.caller_pid.to_string(),
            self.job_id.to_string(),
        ]
    }
}

/// Handle on a started consumer.
///
/// Releasing the handle does not stop the consumer; it ends on its own once
/// the pipe is closed.
#[derive(Debug, Default)]
pub struct ConsumerProcess {
    pid: Option<u32>,
    child: Option<Child>,
}

impl ConsumerProcess {
    pub fn from_child(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Some(child),
        }
    }

    /// A consumer this process holds no handle on.
    pub fn detached(pid: Option<u32>) -> Self {
        Self { pid, child: None }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Drop the process handle.
    pub fn release(&mut self) {
        if self.child.take().is_some() {
            debug!(pid = ?self.pid, "consumer handle released");
        }
    }
}

/// Starts relay consumers.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ConsumerProcess>;
}

/// Opens the write half of a consumer's pipe.
#[async_trait]
pub trait PipeConnector: Send + Sync {
    /// One connection attempt. Errors are raw so the caller can tell
    /// "not there yet" from "access denied".
    async fn connect(&self, channel: &ChannelName) -> std::io::Result<PipeWriter>;
}

/// Credentials of the interactively logged-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractiveUser {
    pub uid: u32,
    pub gid: Option<u32>,
}

impl InteractiveUser {
    /// Resolve from the environment of an elevated caller.
    ///
    /// `sudo` leaves `SUDO_UID`/`SUDO_GID`, `pkexec` leaves `PKEXEC_UID`.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let parse = |key: &str| var(key).and_then(|v| v.trim().parse::<u32>().ok());
        if let Some(uid) = parse("SUDO_UID") {
            return Some(Self {
                uid,
                gid: parse("SUDO_GID"),
            });
        }
        parse("PKEXEC_UID").map(|uid| Self { uid, gid: None })
    }
}

/// Launches consumers with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioLauncher;

impl TokioLauncher {
    fn command(spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(&spec.executable);
        cmd.args(spec.args());
        if spec.show_console {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            #[cfg(windows)]
            {
                const CREATE_NO_WINDOW: u32 = 0x0800_0000;
                cmd.creation_flags(CREATE_NO_WINDOW);
            }
        }
        cmd
    }
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ConsumerProcess> {
        info!(
            exe = %spec.executable.display(),
            channel = %spec.channel,
            job_id = %spec.job_id,
            "launching relay consumer"
        );

        #[cfg(unix)]
        if spec.run_as_interactive_user {
            if let Some(user) = InteractiveUser::from_env() {
                let mut cmd = Self::command(spec);
                cmd.uid(user.uid);
                if let Some(gid) = user.gid {
                    cmd.gid(gid);
                }
                match cmd.spawn() {
                    Ok(child) => return Ok(ConsumerProcess::from_child(child)),
                    Err(e) => warn!(
                        uid = user.uid,
                        error = %e,
                        "cannot launch as interactive user, using caller credentials"
                    ),
                }
            } else {
                debug!("no interactive user known, using caller credentials");
            }
        }

        let child = Self::command(spec).spawn().map_err(|e| {
            RelayError::Launch(format!("{}: {e}", spec.executable.display()))
        })?;
        Ok(ConsumerProcess::from_child(child))
    }
}

/// Connects to the consumer's pipe on the local machine.
#[derive(Debug, Clone, Default)]
pub struct LocalPipeConnector;

#[async_trait]
impl PipeConnector for LocalPipeConnector {
    #[cfg(unix)]
    async fn connect(&self, channel: &ChannelName) -> std::io::Result<PipeWriter> {
        let stream = tokio::net::UnixStream::connect(channel.endpoint()).await?;
        Ok(Box::new(stream))
    }

    #[cfg(windows)]
    async fn connect(&self, channel: &ChannelName) -> std::io::Result<PipeWriter> {
        use tokio::net::windows::named_pipe::ClientOptions;
        let client = ClientOptions::new().read(false).open(channel.endpoint())?;
        Ok(Box::new(client))
    }
}
