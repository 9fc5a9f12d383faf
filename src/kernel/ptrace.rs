//! ptrace-based attach and stop classification.
//!
//! The target attaches itself with `PTRACE_TRACEME` right before exec, so
//! the first event the supervisor sees is the post-exec SIGTRAP stop of the
//! root tracee. Every signal the target receives afterwards stops it first,
//! which is where crashes and timer expiries are recognised.

use crate::config::types::{FuzzError, Result, RunConfig};
use crate::core::types::{Disposition, Outcome, RunResult, TraceSubsystem};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::path::{Path, PathBuf};

const YAMA_PTRACE_SCOPE: &str = "/proc/sys/kernel/yama/ptrace_scope";
// Scope 3 forbids every form of attach, PTRACE_TRACEME included.
const YAMA_NO_ATTACH: u32 = 3;

#[derive(Debug)]
pub struct PtraceTracer {
    scope_path: PathBuf,
}

impl Default for PtraceTracer {
    fn default() -> Self {
        Self {
            scope_path: PathBuf::from(YAMA_PTRACE_SCOPE),
        }
    }
}

impl PtraceTracer {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_scope_path(path: &Path) -> Self {
        Self {
            scope_path: path.to_path_buf(),
        }
    }

    fn read_yama_scope(path: &Path) -> Result<Option<u32>> {
        match std::fs::read_to_string(path) {
            Ok(raw) => raw.trim().parse::<u32>().map(Some).map_err(|e| {
                FuzzError::Trace(format!("unparsable {}: {:?} ({})", path.display(), raw, e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resume a stopped tracee, optionally delivering `signal`.
    fn resume(pid: Pid, signal: Option<Signal>) -> Result<Disposition> {
        match ptrace::cont(pid, signal) {
            Ok(()) => Ok(Disposition::Resumed),
            // Gone already; its exit is the next wait event.
            Err(Errno::ESRCH) => {
                log::debug!("ptrace: pid {} vanished before resume", pid);
                Ok(Disposition::Resumed)
            }
            Err(e) => Err(FuzzError::Trace(format!(
                "ptrace(PTRACE_CONT, {}, {:?}) failed: {}",
                pid, signal, e
            ))),
        }
    }

    fn on_stop(
        config: &RunConfig,
        pid: Pid,
        sig: Signal,
        result: &mut RunResult,
    ) -> Result<Disposition> {
        let signo = sig as i32;

        if sig == Signal::SIGTRAP {
            return Self::resume(pid, None);
        }

        if config.trace.is_crash_signal(signo) {
            if result.is_root(pid) && !result.outcome.is_sticky() {
                log::debug!("ptrace: pid {} crashed with {}", pid, sig);
                result.outcome = Outcome::Crashed { signal: signo };
            }
            // Deliver it so the target dies the way it would untraced.
            return Self::resume(pid, Some(sig));
        }

        if config.trace.is_timeout_signal(signo) {
            if result.is_root(pid) && !result.outcome.is_sticky() {
                log::debug!("ptrace: pid {} timed out ({})", pid, sig);
                result.outcome = Outcome::TimedOut { signal: signo };
            }
            return match signal::kill(pid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => Ok(Disposition::Resumed),
                Err(e) => Err(FuzzError::Trace(format!(
                    "kill({}, SIGKILL) after timeout failed: {}",
                    pid, e
                ))),
            };
        }

        Self::resume(pid, Some(sig))
    }
}

impl TraceSubsystem for PtraceTracer {
    fn prepare(&mut self, _config: &RunConfig) -> Result<()> {
        match Self::read_yama_scope(&self.scope_path)? {
            Some(scope) if scope >= YAMA_NO_ATTACH => Err(FuzzError::Trace(format!(
                "{} is {}; ptrace attach is disabled on this host",
                self.scope_path.display(),
                scope
            ))),
            Some(scope) => {
                log::debug!("ptrace: yama scope {}", scope);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn enable(&mut self, _config: &RunConfig) -> Result<()> {
        ptrace::traceme().map_err(|e| FuzzError::Setup(format!("ptrace(PTRACE_TRACEME) failed: {e}")))
    }

    fn classify(
        &mut self,
        config: &RunConfig,
        pid: Pid,
        status: WaitStatus,
        result: &mut RunResult,
    ) -> Result<Disposition> {
        if result.pid.is_none() {
            result.pid = Some(pid.as_raw());
        }

        match status {
            WaitStatus::Exited(_, code) => {
                if !result.is_root(pid) {
                    return Ok(Disposition::Resumed);
                }
                if !result.outcome.is_sticky() {
                    result.outcome = Outcome::Exited { code };
                }
                Ok(Disposition::Final)
            }
            WaitStatus::Signaled(_, sig, _) => {
                if !result.is_root(pid) {
                    return Ok(Disposition::Resumed);
                }
                if !result.outcome.is_sticky() {
                    let signo = sig as i32;
                    result.outcome = if config.trace.is_crash_signal(signo) {
                        Outcome::Crashed { signal: signo }
                    } else if config.trace.is_timeout_signal(signo) {
                        Outcome::TimedOut { signal: signo }
                    } else {
                        Outcome::Signaled { signal: signo }
                    };
                }
                Ok(Disposition::Final)
            }
            WaitStatus::Stopped(_, sig) => Self::on_stop(config, pid, sig, result),
            WaitStatus::PtraceEvent(..) | WaitStatus::PtraceSyscall(_) => Self::resume(pid, None),
            WaitStatus::Continued(_) | WaitStatus::StillAlive => Ok(Disposition::Resumed),
        }
    }
}
