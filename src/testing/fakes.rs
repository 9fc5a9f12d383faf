//! Recording stand-ins for the OS and the collaborator subsystems.
//!
//! All fakes of one test share a [`CallLog`], so assertions can check the
//! exact interleaving of launch steps or supervision events.

use crate::config::types::{FuzzError, Result, RunConfig};
use crate::core::supervisor::WaitSource;
use crate::core::types::{Disposition, PerfSubsystem, RunResult, TraceSubsystem};
use crate::kernel::stdio::StdioControl;
use crate::kernel::sys::{ChildSys, IntervalTimer, Limit};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    SetEnv(String, String),
    ParentDeathSignal(Signal),
    DisableAslr,
    Timer(IntervalTimer, Duration),
    Rlimit(Limit, u64, u64),
    NullifyStdio,
    RedirectStdin(PathBuf),
    RestoreStdio,
    TraceEnable,
    Exec(Vec<String>),
    TracePrepare,
    Wait,
    Classify(i32),
    PerfEnable(i32),
    Harvest,
}

#[derive(Clone, Debug, Default)]
pub struct CallLog(Rc<RefCell<Vec<Call>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.borrow().iter().filter(|c| pred(c)).count()
    }

    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.0.borrow().iter().position(pred)
    }
}

type FailWhen = Box<dyn Fn(&Call) -> bool>;

fn injected(call: &Call) -> FuzzError {
    FuzzError::Setup(format!("injected failure at {call:?}"))
}

/// [`ChildSys`] that records every call and never replaces the image.
pub struct RecordingSys {
    log: CallLog,
    fail_when: Option<FailWhen>,
}

impl RecordingSys {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            fail_when: None,
        }
    }

    pub fn failing_when(log: &CallLog, pred: impl Fn(&Call) -> bool + 'static) -> Self {
        Self {
            log: log.clone(),
            fail_when: Some(Box::new(pred)),
        }
    }

    fn record(&mut self, call: Call) -> Result<()> {
        let fail = self.fail_when.as_ref().is_some_and(|pred| pred(&call));
        self.log.push(call.clone());
        if fail {
            return Err(injected(&call));
        }
        Ok(())
    }
}

impl ChildSys for RecordingSys {
    fn set_env(&mut self, key: &str, value: &str) -> Result<()> {
        self.record(Call::SetEnv(key.to_string(), value.to_string()))
    }

    fn set_parent_death_signal(&mut self, signal: Signal) -> Result<()> {
        self.record(Call::ParentDeathSignal(signal))
    }

    fn disable_aslr(&mut self) -> Result<()> {
        self.record(Call::DisableAslr)
    }

    fn set_interval_timer(&mut self, timer: IntervalTimer, period: Duration) -> Result<()> {
        self.record(Call::Timer(timer, period))
    }

    fn set_rlimit(&mut self, limit: Limit, soft: u64, hard: u64) -> Result<()> {
        self.record(Call::Rlimit(limit, soft, hard))
    }

    fn exec(&mut self, argv: &[CString]) -> Result<Infallible> {
        let args = argv
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        self.log.push(Call::Exec(args));
        Err(FuzzError::Exec(format!("execvp: {}", Errno::ENOENT)))
    }
}

pub struct RecordingStdio {
    log: CallLog,
    pub fail_nullify: bool,
    pub fail_stdin: bool,
}

impl RecordingStdio {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            fail_nullify: false,
            fail_stdin: false,
        }
    }
}

impl StdioControl for RecordingStdio {
    fn nullify(&mut self) -> Result<()> {
        self.log.push(Call::NullifyStdio);
        if self.fail_nullify {
            return Err(injected(&Call::NullifyStdio));
        }
        Ok(())
    }

    fn redirect_stdin(&mut self, path: &Path) -> Result<()> {
        let call = Call::RedirectStdin(path.to_path_buf());
        self.log.push(call.clone());
        if self.fail_stdin {
            return Err(injected(&call));
        }
        Ok(())
    }

    fn restore(&mut self) {
        self.log.push(Call::RestoreStdio);
    }
}

/// Tracer whose classifier replays a fixed list of dispositions.
pub struct ScriptedTracer {
    log: CallLog,
    script: VecDeque<Result<Disposition>>,
    pub fail_enable: bool,
    pub fail_prepare: bool,
}

impl ScriptedTracer {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            script: VecDeque::new(),
            fail_enable: false,
            fail_prepare: false,
        }
    }

    pub fn with_script(log: &CallLog, script: Vec<Result<Disposition>>) -> Self {
        Self {
            script: script.into(),
            ..Self::new(log)
        }
    }
}

impl TraceSubsystem for ScriptedTracer {
    fn prepare(&mut self, _config: &RunConfig) -> Result<()> {
        self.log.push(Call::TracePrepare);
        if self.fail_prepare {
            return Err(FuzzError::Trace("injected prepare failure".to_string()));
        }
        Ok(())
    }

    fn enable(&mut self, _config: &RunConfig) -> Result<()> {
        self.log.push(Call::TraceEnable);
        if self.fail_enable {
            return Err(injected(&Call::TraceEnable));
        }
        Ok(())
    }

    fn classify(
        &mut self,
        _config: &RunConfig,
        pid: Pid,
        _status: WaitStatus,
        _result: &mut RunResult,
    ) -> Result<Disposition> {
        self.log.push(Call::Classify(pid.as_raw()));
        self.script
            .pop_front()
            .unwrap_or(Err(FuzzError::Trace("classifier script exhausted".to_string())))
    }
}

pub struct CountingPerf {
    log: CallLog,
    pub fail_enable: bool,
    pub coverage: u64,
}

impl CountingPerf {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            fail_enable: false,
            coverage: 0,
        }
    }
}

impl PerfSubsystem for CountingPerf {
    type Handle = i32;

    fn enable(&mut self, pid: Pid, _config: &RunConfig) -> Result<i32> {
        self.log.push(Call::PerfEnable(pid.as_raw()));
        if self.fail_enable {
            return Err(FuzzError::PerfInit("injected perf failure".to_string()));
        }
        Ok(pid.as_raw())
    }

    fn harvest(&mut self, _config: &RunConfig, result: &mut RunResult, _handle: i32) -> Result<()> {
        self.log.push(Call::Harvest);
        result.coverage.instructions = self.coverage;
        Ok(())
    }
}

/// Wait source replaying scripted results, then reporting ECHILD.
pub struct ScriptedWaiter {
    log: CallLog,
    script: VecDeque<nix::Result<WaitStatus>>,
}

impl ScriptedWaiter {
    pub fn new(log: &CallLog, script: Vec<nix::Result<WaitStatus>>) -> Self {
        Self {
            log: log.clone(),
            script: script.into(),
        }
    }
}

impl WaitSource for ScriptedWaiter {
    fn wait_any(&mut self) -> nix::Result<WaitStatus> {
        self.log.push(Call::Wait);
        self.script.pop_front().unwrap_or(Err(Errno::ECHILD))
    }
}
