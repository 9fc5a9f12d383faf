//! One fuzzing iteration: fork, launch the target in the child, supervise it
//! from the parent.

use crate::config::types::{FuzzError, Result, RunConfig};
use crate::core::supervisor::{supervise, KernelWaiter};
use crate::core::types::{PerfSubsystem, RunResult, TraceSubsystem};
use crate::exec::launcher::launch;
use crate::kernel::stdio::StdioRedirector;
use crate::kernel::sys::LinuxSys;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult, Pid};
use std::path::Path;
use std::time::Instant;

/// Exit status of a child whose pre-exec chain or exec failed, as a shell
/// reports a command found but not executable.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 126;

/// Run the configured command once against `file_path` and classify it.
pub fn run_candidate<T, P>(
    config: &RunConfig,
    file_path: &Path,
    tracer: &mut T,
    perf: &mut P,
) -> Result<RunResult>
where
    T: TraceSubsystem,
    P: PerfSubsystem,
{
    let started = Instant::now();

    // Safety: the child only runs the launch chain and then execs or _exits.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            let mut sys = LinuxSys::new();
            let mut stdio = StdioRedirector::new();
            match launch(config, &mut sys, &mut stdio, tracer, file_path) {
                Ok(never) => match never {},
                Err(_) => unsafe { libc::_exit(LAUNCH_FAILURE_EXIT_CODE) },
            }
        }
        Ok(ForkResult::Parent { child }) => {
            log::debug!("worker: pid {} running {}", child, file_path.display());

            let mut result = RunResult::new();
            let supervised = supervise(config, &mut result, tracer, perf, &mut KernelWaiter::new());
            result.wall_time_ms = started.elapsed().as_millis() as u64;

            if let Err(e) = supervised {
                reap_abandoned(child);
                return Err(e);
            }
            log::info!(
                "worker: {} -> {:?} in {}ms",
                file_path.display(),
                result.outcome,
                result.wall_time_ms
            );
            Ok(result)
        }
        Err(e) => Err(FuzzError::Setup(format!("fork failed: {e}"))),
    }
}

fn reap_abandoned(child: Pid) {
    match signal::kill(child, Signal::SIGKILL) {
        Ok(()) => {
            if let Err(e) = waitpid(child, None) {
                log::debug!("worker: reaping abandoned pid {} failed: {}", child, e);
            }
        }
        Err(e) => log::debug!("worker: pid {} already gone: {}", child, e),
    }
}
