//! Stopping external capture processes.
//!
//! A recorder is asked to exit with SIGINT so it can finalize its output.
//! If it ignores that, it is escalated to SIGTERM and then SIGKILL. A
//! process that survives all of it is reported as runaway.

use crate::config::LadderConfig;
use crate::error::Error;
use anyhow::Result;
use log::{debug, warn};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
}

/// The part of a child process the ladder needs
pub trait ChildProcess: Send {
    fn id(&self) -> Option<u32>;

    fn signal(&mut self, signal: Signal) -> Result<()>;

    fn has_exited(&mut self) -> Result<bool>;
}

impl ChildProcess for tokio::process::Child {
    fn id(&self) -> Option<u32> {
        tokio::process::Child::id(self)
    }

    fn signal(&mut self, signal: Signal) -> Result<()> {
        if signal == Signal::Kill {
            self.start_kill()
                .map_err(|e| Error::Recording(format!("Failed to kill process: {}", e)))?;
            return Ok(());
        }

        // Already reaped
        let Some(pid) = tokio::process::Child::id(self) else {
            return Ok(());
        };

        send_signal(pid, signal)
    }

    fn has_exited(&mut self) -> Result<bool> {
        let status = self
            .try_wait()
            .map_err(|e| Error::Recording(format!("Failed to poll process: {}", e)))?;
        Ok(status.is_some())
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let signum = match signal {
        Signal::Interrupt => libc::SIGINT,
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };

    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(pid as libc::pid_t, signum) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: exited between the liveness check and the signal
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(Error::Recording(format!("Failed to signal process {}: {}", pid, err)).into());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(pid: u32, _signal: Signal) -> Result<()> {
    Err(Error::Recording(format!("Cannot signal process {} on this platform", pid)).into())
}

/// Escalation timings, all measured from the first interrupt
#[derive(Debug, Clone, Copy)]
pub struct TerminationLadder {
    pub poll_interval: Duration,
    pub terminate_after: Duration,
    pub kill_after: Duration,
    pub give_up_after: Duration,
}

impl Default for TerminationLadder {
    fn default() -> Self {
        Self::from(&LadderConfig::default())
    }
}

impl From<&LadderConfig> for TerminationLadder {
    fn from(config: &LadderConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            terminate_after: Duration::from_secs(config.terminate_after_secs),
            kill_after: Duration::from_secs(config.kill_after_secs),
            give_up_after: Duration::from_secs(config.give_up_after_secs),
        }
    }
}

impl TerminationLadder {
    /// Interrupt the process and wait for it to exit, escalating as needed.
    /// Each signal is sent at most once.
    pub async fn run<P: ChildProcess + ?Sized>(&self, process: &mut P) -> Result<()> {
        let pid = process.id();
        if process.has_exited()? {
            return Ok(());
        }

        let started = Instant::now();
        debug!("Interrupting process {:?}", pid);
        process.signal(Signal::Interrupt)?;

        let mut terminated = false;
        let mut killed = false;

        loop {
            if process.has_exited()? {
                debug!("Process {:?} exited after {:?}", pid, started.elapsed());
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed >= self.give_up_after {
                return Err(Error::RunawayProcess(format!(
                    "Process {:?} still running {}s after interrupt",
                    pid,
                    elapsed.as_secs()
                ))
                .into());
            }

            if !killed && elapsed >= self.kill_after {
                warn!("Process {:?} ignored SIGTERM, sending SIGKILL", pid);
                process.signal(Signal::Kill)?;
                killed = true;
            } else if !terminated && elapsed >= self.terminate_after {
                warn!("Process {:?} ignored SIGINT, sending SIGTERM", pid);
                process.signal(Signal::Terminate)?;
                terminated = true;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
