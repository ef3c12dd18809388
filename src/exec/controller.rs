// src/exec/controller.rs

//! Process-group signalling.
//!
//! Every transfer is spawned as the leader of its own process group, so the
//! group ID equals the child's PID and signalling the group reaches every
//! helper the tool forked. Tests can swap in their own controller.

use std::fmt::Debug;

use crate::errors::Result;

/// What happened when a signal was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// The group no longer exists; the goal of the signal is already met.
    AlreadyGone,
}

pub trait ProcessController: Send + Sync + Debug {
    /// Ask the group to exit.
    fn terminate(&self, pgid: u32) -> Result<SignalOutcome>;

    /// Force the group to exit.
    fn kill(&self, pgid: u32) -> Result<SignalOutcome>;

    /// Freeze the group. `Unsupported` where the platform has no such notion.
    fn suspend(&self, pgid: u32) -> Result<SignalOutcome>;

    fn resume(&self, pgid: u32) -> Result<SignalOutcome>;

    fn supports_pause(&self) -> bool;
}

#[cfg(unix)]
pub use unix::SignalController;

#[cfg(unix)]
mod unix {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;
    use tracing::debug;

    use super::{ProcessController, SignalOutcome};
    use crate::errors::{FerrymanError, Result};

    /// `killpg(2)` based controller.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SignalController;

    impl SignalController {
        fn send(&self, pgid: u32, signal: Signal) -> Result<SignalOutcome> {
            let raw = i32::try_from(pgid).map_err(|_| {
                FerrymanError::Other(anyhow::anyhow!("process group id out of range: {pgid}"))
            })?;
            match killpg(Pid::from_raw(raw), signal) {
                Ok(()) => {
                    debug!(pgid, ?signal, "signal delivered to process group");
                    Ok(SignalOutcome::Delivered)
                }
                Err(Errno::ESRCH) => Ok(SignalOutcome::AlreadyGone),
                Err(e) => Err(FerrymanError::Other(anyhow::anyhow!(
                    "sending {signal:?} to process group {pgid}: {e}"
                ))),
            }
        }
    }

    impl ProcessController for SignalController {
        fn terminate(&self, pgid: u32) -> Result<SignalOutcome> {
            self.send(pgid, Signal::SIGTERM)
        }

        fn kill(&self, pgid: u32) -> Result<SignalOutcome> {
            self.send(pgid, Signal::SIGKILL)
        }

        fn suspend(&self, pgid: u32) -> Result<SignalOutcome> {
            self.send(pgid, Signal::SIGSTOP)
        }

        fn resume(&self, pgid: u32) -> Result<SignalOutcome> {
            self.send(pgid, Signal::SIGCONT)
        }

        fn supports_pause(&self) -> bool {
            true
        }
    }
}

#[cfg(not(unix))]
pub use portable::SignalController;

#[cfg(not(unix))]
mod portable {
    use std::process::{Command, Stdio};

    use super::{ProcessController, SignalOutcome};
    use crate::errors::{FerrymanError, Result};

    /// Tree termination through `taskkill`; no suspend/resume.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SignalController;

    impl SignalController {
        fn taskkill(&self, pid: u32, force: bool) -> Result<SignalOutcome> {
            let mut cmd = Command::new("taskkill");
            cmd.arg("/PID").arg(pid.to_string()).arg("/T");
            if force {
                cmd.arg("/F");
            }
            let status = cmd
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()?;
            // taskkill exits 128 when the PID is unknown.
            match status.code() {
                Some(0) => Ok(SignalOutcome::Delivered),
                Some(128) => Ok(SignalOutcome::AlreadyGone),
                other => Err(FerrymanError::Other(anyhow::anyhow!(
                    "taskkill for pid {pid} exited with {other:?}"
                ))),
            }
        }
    }

    impl ProcessController for SignalController {
        fn terminate(&self, pgid: u32) -> Result<SignalOutcome> {
            self.taskkill(pgid, false)
        }

        fn kill(&self, pgid: u32) -> Result<SignalOutcome> {
            self.taskkill(pgid, true)
        }

        fn suspend(&self, _pgid: u32) -> Result<SignalOutcome> {
            Err(FerrymanError::Unsupported(
                "pause is not supported on this platform".to_string(),
            ))
        }

        fn resume(&self, _pgid: u32) -> Result<SignalOutcome> {
            Err(FerrymanError::Unsupported(
                "resume is not supported on this platform".to_string(),
            ))
        }

        fn supports_pause(&self) -> bool {
            false
        }
    }
}
