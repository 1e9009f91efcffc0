// src/process.rs

//! Subprocess supervision shared by fetchers and build adapters
//!
//! Every child runs in its own process group so that killing it on timeout
//! or cancellation also takes down whatever it spawned (compilers under
//! `make`, `git-remote-https` under `git`). Output is drained on background
//! threads so a chatty child cannot block on a full pipe while we poll.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How often a running child is checked for timeout and cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captured result of a finished subprocess
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Stdout followed by stderr, for logs and error reports
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Run `cmd` to completion, honouring `timeout` and `cancel`
///
/// A non-zero exit is not an error here; callers decide what it means for
/// their stage. Timeouts surface as [`Error::Timeout`] and cancellation as
/// [`Error::Cancelled`], in both cases after the process group was killed.
pub fn run(
    mut cmd: Command,
    stage: &str,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<ProcessOutput> {
    cancel.check(stage)?;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    debug!("Running {:?}", cmd);
    let mut child = cmd.spawn().map_err(|e| {
        Error::IoError(format!(
            "Failed to spawn '{}' for {}: {}",
            cmd.get_program().to_string_lossy(),
            stage,
            e
        ))
    })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match supervise(&mut child, stage, timeout, cancel) {
        Ok(status) => status,
        Err(e) => {
            // Readers finish once the group is gone and the pipes close
            let _ = collect(stdout);
            let _ = collect(stderr);
            return Err(e);
        }
    };

    Ok(ProcessOutput {
        status: status.code(),
        success: status.success(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn supervise(
    child: &mut Child,
    stage: &str,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<ExitStatus> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            warn!("Cancelling {} (pid {})", stage, child.id());
            kill_group(child);
            return Err(Error::Cancelled(stage.to_string()));
        }
        if let Some(limit) = timeout
            && started.elapsed() >= limit
        {
            warn!("{} exceeded {:?}, killing pid {}", stage, limit, child.id());
            kill_group(child);
            return Err(Error::Timeout {
                stage: stage.to_string(),
                after: limit,
            });
        }
    }
}

/// Kill the child's whole process group and reap it
fn kill_group(child: &mut Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        debug!("killpg {} failed: {}, killing child only", pgid, e);
        let _ = child.kill();
    }
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
