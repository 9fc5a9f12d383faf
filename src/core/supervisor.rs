//! Reap loop for one run.
//!
//! The loop waits for any child event, arms the perf counters on the first
//! event that carries a pid and hands every event to the classifier until it
//! reports the run final. Counters are harvested exactly once, at the end.

use crate::config::types::{FuzzError, Result, RunConfig};
use crate::core::types::{Disposition, PerfSubsystem, RunResult, TraceSubsystem};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Source of child state changes.
pub trait WaitSource {
    /// Block until some child changes state.
    fn wait_any(&mut self) -> nix::Result<WaitStatus>;
}

/// Waits on the real process table: every child, every thread, stops included.
#[derive(Debug, Default)]
pub struct KernelWaiter;

impl KernelWaiter {
    pub fn new() -> Self {
        Self
    }
}

impl WaitSource for KernelWaiter {
    fn wait_any(&mut self) -> nix::Result<WaitStatus> {
        let flags = WaitPidFlag::__WALL | WaitPidFlag::__WNOTHREAD | WaitPidFlag::WUNTRACED;
        waitpid(Option::<Pid>::None, Some(flags))
    }
}

enum State {
    Waiting,
    Classifying(Pid, WaitStatus),
    Done,
}

fn arm_perf<P>(perf: &mut P, pid: Pid, config: &RunConfig) -> Result<P::Handle>
where
    P: PerfSubsystem + ?Sized,
{
    perf.enable(pid, config).map_err(|e| match e {
        FuzzError::PerfInit(_) => e,
        other => FuzzError::PerfInit(other.to_string()),
    })
}

/// Supervise one run until the classifier reports it final.
///
/// Returns `Ok(())` once the counters are harvested into `result`. Waits that
/// fail transiently or carry no pid are retried; `ECHILD` means nothing is
/// left to supervise and ends the loop with [`FuzzError::NoChildren`].
pub fn supervise<T, P, W>(
    config: &RunConfig,
    result: &mut RunResult,
    tracer: &mut T,
    perf: &mut P,
    waiter: &mut W,
) -> Result<()>
where
    T: TraceSubsystem + ?Sized,
    P: PerfSubsystem + ?Sized,
    W: WaitSource + ?Sized,
{
    let mut counters: Option<P::Handle> = None;
    let mut state = State::Waiting;

    loop {
        state = match state {
            State::Waiting => match waiter.wait_any() {
                Ok(status) => match status.pid() {
                    Some(pid) => State::Classifying(pid, status),
                    None => {
                        log::trace!("supervise: wait returned {:?}, no event yet", status);
                        State::Waiting
                    }
                },
                Err(Errno::ECHILD) => return Err(FuzzError::NoChildren),
                Err(e) => {
                    log::trace!("supervise: wait failed ({}), retrying", e);
                    State::Waiting
                }
            },
            State::Classifying(pid, status) => {
                if counters.is_none() {
                    counters = Some(arm_perf(perf, pid, config)?);
                    log::debug!("supervise: perf armed for pid {}", pid);
                }

                log::debug!("supervise: pid {} {:?}", pid, status);
                result.events += 1;
                match tracer.classify(config, pid, status, result)? {
                    Disposition::Final => {
                        if let Some(handle) = counters.take() {
                            perf.harvest(config, result, handle)?;
                        }
                        State::Done
                    }
                    Disposition::Resumed => State::Waiting,
                }
            }
            State::Done => {
                log::debug!("supervise: run final, outcome {:?}", result.outcome);
                return Ok(());
            }
        };
    }
}
