//! OS calls made by the launch chain in the forked child.
//!
//! Everything the pre-exec chain changes about the process goes through
//! [`ChildSys`], so each step can be exercised against a recording fake
//! without touching the test process itself.

use crate::config::types::{FuzzError, Result};
use nix::sys::signal::Signal;
use std::convert::Infallible;
use std::ffi::CString;
use std::time::Duration;

/// Interval timers armed before exec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntervalTimer {
    /// `ITIMER_PROF`: counts user+system CPU time, delivers SIGPROF
    Prof,
    /// `ITIMER_REAL`: counts wall-clock time, delivers SIGALRM
    Real,
}

/// Resource limits applied before exec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Limit {
    /// `RLIMIT_CPU`, seconds
    Cpu,
    /// `RLIMIT_AS`, bytes
    AddressSpace,
}

impl Limit {
    pub fn name(self) -> &'static str {
        match self {
            Self::Cpu => "RLIMIT_CPU",
            Self::AddressSpace => "RLIMIT_AS",
        }
    }
}

pub trait ChildSys {
    fn set_env(&mut self, key: &str, value: &str) -> Result<()>;

    fn set_parent_death_signal(&mut self, signal: Signal) -> Result<()>;

    fn disable_aslr(&mut self) -> Result<()>;

    /// Arm a recurring timer whose first expiry and period are both `period`.
    fn set_interval_timer(&mut self, timer: IntervalTimer, period: Duration) -> Result<()>;

    fn set_rlimit(&mut self, limit: Limit, soft: u64, hard: u64) -> Result<()>;

    /// Replace the process image. Only returns on failure.
    fn exec(&mut self, argv: &[CString]) -> Result<Infallible>;
}

/// [`ChildSys`] backed by the real Linux syscalls.
#[derive(Debug, Default)]
pub struct LinuxSys;

impl LinuxSys {
    pub fn new() -> Self {
        Self
    }
}

fn setup_error(what: &str, err: impl std::fmt::Display) -> FuzzError {
    FuzzError::Setup(format!("{what} failed: {err}"))
}

impl ChildSys for LinuxSys {
    fn set_env(&mut self, key: &str, value: &str) -> Result<()> {
        let key_c = CString::new(key)
            .map_err(|_| FuzzError::Config(format!("environment key contains NUL byte: {key}")))?;
        let value_c = CString::new(value).map_err(|_| {
            FuzzError::Config(format!("environment value for {key} contains NUL byte"))
        })?;

        // The child is single threaded between fork and exec.
        let rc = unsafe { libc::setenv(key_c.as_ptr(), value_c.as_ptr(), 1) };
        if rc != 0 {
            return Err(setup_error(
                &format!("setenv({key}={value})"),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    fn set_parent_death_signal(&mut self, signal: Signal) -> Result<()> {
        nix::sys::prctl::set_pdeathsig(signal)
            .map_err(|e| setup_error(&format!("prctl(PR_SET_PDEATHSIG, {signal})"), e))
    }

    fn disable_aslr(&mut self) -> Result<()> {
        use nix::sys::personality::{self, Persona};

        let current = personality::get().map_err(|e| setup_error("personality(query)", e))?;
        personality::set(current | Persona::ADDR_NO_RANDOMIZE)
            .map_err(|e| setup_error("personality(ADDR_NO_RANDOMIZE)", e))?;
        Ok(())
    }

    fn set_interval_timer(&mut self, timer: IntervalTimer, period: Duration) -> Result<()> {
        let tv = libc::timeval {
            tv_sec: period.as_secs() as libc::time_t,
            tv_usec: period.subsec_micros() as libc::suseconds_t,
        };
        let spec = libc::itimerval {
            it_interval: tv,
            it_value: tv,
        };

        let (which, name) = match timer {
            IntervalTimer::Prof => (libc::ITIMER_PROF, "setitimer(ITIMER_PROF)"),
            IntervalTimer::Real => (libc::ITIMER_REAL, "setitimer(ITIMER_REAL)"),
        };

        let rc = unsafe { libc::setitimer(which, &spec, std::ptr::null_mut()) };
        if rc != 0 {
            return Err(setup_error(name, std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn set_rlimit(&mut self, limit: Limit, soft: u64, hard: u64) -> Result<()> {
        use nix::sys::resource::{setrlimit, Resource};

        let resource = match limit {
            Limit::Cpu => Resource::RLIMIT_CPU,
            Limit::AddressSpace => Resource::RLIMIT_AS,
        };
        setrlimit(resource, soft as libc::rlim_t, hard as libc::rlim_t).map_err(|e| {
            FuzzError::Setup(format!(
                "setrlimit({}={}, hard={}) failed: {}",
                limit.name(),
                soft,
                hard,
                e
            ))
        })
    }

    fn exec(&mut self, argv: &[CString]) -> Result<Infallible> {
        let program = argv
            .first()
            .ok_or_else(|| FuzzError::Config("empty argv for exec".to_string()))?;
        nix::unistd::execvp(program.as_c_str(), argv)
            .map_err(|e| FuzzError::Exec(format!("execvp({:?}) failed: {}", program, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_names_match_kernel_constants() {
        assert_eq!(Limit::Cpu.name(), "RLIMIT_CPU");
        assert_eq!(Limit::AddressSpace.name(), "RLIMIT_AS");
    }

    #[test]
    fn set_env_rejects_nul_bytes_before_any_syscall() {
        let mut sys = LinuxSys::new();
        assert!(matches!(
            sys.set_env("BAD\0KEY", "1"),
            Err(FuzzError::Config(_))
        ));
        assert!(matches!(
            sys.set_env("FUZZVISOR_TEST_KEY", "a\0b"),
            Err(FuzzError::Config(_))
        ));
    }

    #[test]
    fn exec_with_empty_argv_is_a_config_error() {
        let mut sys = LinuxSys::new();
        assert!(matches!(sys.exec(&[]), Err(FuzzError::Config(_))));
    }

    #[test]
    fn exec_of_missing_binary_reports_exec_error() {
        let mut sys = LinuxSys::new();
        let argv = vec![CString::new("/nonexistent/fuzzvisor-target-12345").unwrap()];
        match sys.exec(&argv) {
            Err(FuzzError::Exec(msg)) => assert!(msg.contains("execvp")),
            other => panic!("expected exec error, got {other:?}"),
        }
    }
}
