use crate::config::types::{Result, RunConfig};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

/// Terminal classification of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Not classified yet
    #[default]
    Pending,
    /// Root tracee exited normally
    Exited { code: i32 },
    /// Root tracee was killed by a signal that is neither a crash nor a timeout
    Signaled { signal: i32 },
    /// Root tracee stopped on a crash signal attributable to the input
    Crashed { signal: i32 },
    /// Root tracee hit one of the launch-time timers or the CPU limit
    TimedOut { signal: i32 },
}

impl Outcome {
    /// Crash and timeout verdicts outrank the exit status observed afterwards.
    pub fn is_sticky(&self) -> bool {
        matches!(self, Self::Crashed { .. } | Self::TimedOut { .. })
    }
}

/// Counter values read back from the perf subsystem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub instructions: u64,
    pub branches: u64,
}

/// Per-run result record.
///
/// Created fresh by the caller for every run and passed by `&mut` through
/// every collaborator that writes to it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Root tracee, recorded on the first classified event
    pub pid: Option<i32>,
    pub outcome: Outcome,
    /// Number of wait events handed to the classifier
    pub events: u64,
    pub coverage: Coverage,
    /// Wall time from fork to final classification
    pub wall_time_ms: u64,
}

impl RunResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_root(&self, pid: Pid) -> bool {
        self.pid == Some(pid.as_raw())
    }
}

/// What the classifier decided about one wait event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The run reached its terminal outcome; supervision ends.
    Final,
    /// Intermediate stop. The classifier has already resumed (or killed) the
    /// tracee before returning this; the reap loop never resumes on its own.
    Resumed,
}

/// Tracer attach and stop classification.
pub trait TraceSubsystem {
    /// One-time preparation, called once per worker before any run.
    fn prepare(&mut self, config: &RunConfig) -> Result<()>;

    /// Per-run attach; runs in the forked child right before exec.
    fn enable(&mut self, config: &RunConfig) -> Result<()>;

    /// Classify one wait event. Must resume the tracee before returning
    /// [`Disposition::Resumed`].
    fn classify(
        &mut self,
        config: &RunConfig,
        pid: Pid,
        status: WaitStatus,
        result: &mut RunResult,
    ) -> Result<Disposition>;
}

/// Performance-counter coverage feedback.
pub trait PerfSubsystem {
    /// Live counters for one run.
    type Handle;

    /// Arm counters for `pid`. Called exactly once per run.
    fn enable(&mut self, pid: Pid, config: &RunConfig) -> Result<Self::Handle>;

    /// Read the counters into `result`, consuming the handle.
    fn harvest(
        &mut self,
        config: &RunConfig,
        result: &mut RunResult,
        handle: Self::Handle,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_crash_and_timeout_are_sticky() {
        assert!(Outcome::Crashed { signal: 11 }.is_sticky());
        assert!(Outcome::TimedOut { signal: 27 }.is_sticky());
        assert!(!Outcome::Exited { code: 0 }.is_sticky());
        assert!(!Outcome::Signaled { signal: 9 }.is_sticky());
        assert!(!Outcome::Pending.is_sticky());
    }

    #[test]
    fn result_serializes_with_tagged_outcome() {
        let result = RunResult {
            pid: Some(42),
            outcome: Outcome::Crashed { signal: 11 },
            events: 3,
            coverage: Coverage {
                instructions: 1000,
                branches: 200,
            },
            wall_time_ms: 5,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"]["kind"], "crashed");
        assert_eq!(json["outcome"]["signal"], 11);
        assert_eq!(json["coverage"]["branches"], 200);
    }

    #[test]
    fn root_pid_matches_recorded_pid_only() {
        let mut result = RunResult::new();
        assert!(!result.is_root(Pid::from_raw(42)));
        result.pid = Some(42);
        assert!(result.is_root(Pid::from_raw(42)));
        assert!(!result.is_root(Pid::from_raw(43)));
    }
}
