// SPDX-License-Identifier: GPL-3.0-only

//! Bounded execution of external tools
//!
//! Every privileged step (mount, btrfs, rsync) is a child process that is fully
//! awaited before the next step runs. Output is captured so failures carry the
//! tool's own diagnostics, and each wait is bounded: a hung tool is sent
//! SIGTERM, then SIGKILL after [`TERMINATE_GRACE`].

use std::ffi::{OsStr, OsString};
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::{Result, SysError};

/// How long a timed-out child gets between SIGTERM and SIGKILL.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

/// An external command line, built up argument by argument.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Human-readable command line used in logs and error messages.
    pub fn render(&self) -> String {
        let mut rendered = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }

    /// Run to completion, failing on a non-zero exit or when `timeout` elapses.
    pub fn run(&self, timeout: Duration) -> Result<CommandOutcome> {
        let command = self.render();
        debug!(%command, "running external command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| match error.kind() {
                io::ErrorKind::NotFound => SysError::CommandNotFound(command.clone()),
                _ => SysError::Io(error),
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let Some(status) = wait_bounded(&mut child, timeout)? else {
            warn!(%command, timeout_secs = timeout.as_secs(), "command timed out, terminating");
            terminate(&mut child, &command);
            // Pipe readers are left detached: a grandchild may still hold the pipes open.
            return Err(SysError::CommandTimeout { command, timeout });
        };

        let outcome = CommandOutcome {
            command,
            stdout: collect(stdout),
            stderr: collect(stderr),
        };

        if !status.success() {
            warn!(
                command = %outcome.command,
                code = ?status.code(),
                stderr = %outcome.stderr.trim(),
                "command failed"
            );
            return Err(SysError::CommandFailed {
                command: outcome.command,
                code: status.code(),
                stderr: outcome.stderr,
            });
        }

        Ok(outcome)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn wait_bounded(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn terminate(child: &mut Child, command: &str) {
    if let Ok(raw) = i32::try_from(child.id()) {
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => {
                if matches!(wait_bounded(child, TERMINATE_GRACE), Ok(Some(_))) {
                    return;
                }
            }
            Err(nix::Error::ESRCH) => {
                let _ = child.wait();
                return;
            }
            Err(error) => debug!(%command, %error, "SIGTERM failed"),
        }
    }

    warn!(%command, "escalating to SIGKILL");
    if let Err(error) = child.kill() {
        debug!(%command, %error, "SIGKILL failed");
    }
    let _ = child.wait();
}
