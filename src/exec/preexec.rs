//! Type-state pre-exec chain for the forked child.
//!
//! The setup sequence is fixed:
//! 1. heap-check and sanitizer environment
//! 2. prctl(PR_SET_PDEATHSIG, SIGKILL)
//! 3. personality(ADDR_NO_RANDOMIZE)
//! 4. argv build from the command template
//! 5. ITIMER_PROF (T), ITIMER_REAL (2T), RLIMIT_CPU (2T)
//! 6. RLIMIT_AS (advisory)
//! 7. stdio to /dev/null
//! 8. stdin from the candidate file
//! 9. tracer attach
//! 10. exec
//!
//! Each step consumes the previous state and returns exactly one next state
//! on success, so the order cannot drift. Only `Launch<ExecReady>` can exec.
//!
//! ```no_run
//! use fuzzvisor::config::types::RunConfig;
//! use fuzzvisor::exec::preexec::Launch;
//! use fuzzvisor::kernel::ptrace::PtraceTracer;
//! use fuzzvisor::kernel::stdio::StdioRedirector;
//! use fuzzvisor::kernel::sys::LinuxSys;
//! use std::path::Path;
//!
//! let config = RunConfig::new(vec!["./target".into(), "@@".into()]);
//! let (mut sys, mut stdio, mut tracer) = (LinuxSys::new(), StdioRedirector::new(), PtraceTracer::new());
//! let input = Path::new("/tmp/in1");
//! let err = Launch::new(&config, &mut sys, &mut stdio)
//!     .harden_env().unwrap()
//!     .set_parent_death_signal().unwrap()
//!     .disable_aslr().unwrap()
//!     .build_argv(input).unwrap()
//!     .arm_time_limits().unwrap()
//!     .limit_address_space()
//!     .setup_stdio(input).unwrap()
//!     .enable_tracing(&mut tracer).unwrap()
//!     .exec()
//!     .unwrap_err();
//! eprintln!("exec failed: {err}");
//! ```
//!
//! Exec straight from a fresh child does not compile:
//!
//! ```compile_fail
//! use fuzzvisor::config::types::RunConfig;
//! use fuzzvisor::exec::preexec::Launch;
//! use fuzzvisor::kernel::stdio::StdioRedirector;
//! use fuzzvisor::kernel::sys::LinuxSys;
//!
//! let config = RunConfig::default();
//! let (mut sys, mut stdio) = (LinuxSys::new(), StdioRedirector::new());
//! let _ = Launch::new(&config, &mut sys, &mut stdio).exec();
//! ```
//!
//! Neither does skipping the time bounds:
//!
//! ```compile_fail
//! use fuzzvisor::config::types::RunConfig;
//! use fuzzvisor::exec::preexec::Launch;
//! use fuzzvisor::kernel::stdio::StdioRedirector;
//! use fuzzvisor::kernel::sys::LinuxSys;
//! use std::path::Path;
//!
//! let config = RunConfig::default();
//! let (mut sys, mut stdio) = (LinuxSys::new(), StdioRedirector::new());
//! let _ = Launch::new(&config, &mut sys, &mut stdio)
//!     .harden_env().unwrap()
//!     .set_parent_death_signal().unwrap()
//!     .disable_aslr().unwrap()
//!     .build_argv(Path::new("/tmp/in1")).unwrap()
//!     .limit_address_space();
//! ```
//!
//! Or touching stdio before the argument vector exists:
//!
//! ```compile_fail
//! use fuzzvisor::config::types::RunConfig;
//! use fuzzvisor::exec::preexec::Launch;
//! use fuzzvisor::kernel::stdio::StdioRedirector;
//! use fuzzvisor::kernel::sys::LinuxSys;
//! use std::path::Path;
//!
//! let config = RunConfig::default();
//! let (mut sys, mut stdio) = (LinuxSys::new(), StdioRedirector::new());
//! let _ = Launch::new(&config, &mut sys, &mut stdio)
//!     .harden_env().unwrap()
//!     .set_parent_death_signal().unwrap()
//!     .disable_aslr().unwrap()
//!     .setup_stdio(Path::new("/tmp/in1"));
//! ```
//!
//! Or reusing a consumed state:
//!
//! ```compile_fail
//! use fuzzvisor::config::types::RunConfig;
//! use fuzzvisor::exec::preexec::Launch;
//! use fuzzvisor::kernel::stdio::StdioRedirector;
//! use fuzzvisor::kernel::sys::LinuxSys;
//!
//! let config = RunConfig::default();
//! let (mut sys, mut stdio) = (LinuxSys::new(), StdioRedirector::new());
//! let fresh = Launch::new(&config, &mut sys, &mut stdio);
//! let _first = fresh.harden_env();
//! let _again = fresh.harden_env();
//! ```

use crate::config::types::{FuzzError, Result, RunConfig};
use crate::core::types::TraceSubsystem;
use crate::exec::argv::build_argv;
use crate::kernel::stdio::StdioControl;
use crate::kernel::sys::{ChildSys, IntervalTimer, Limit};
use nix::sys::signal::Signal;
use std::convert::Infallible;
use std::ffi::CString;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;

/// Heap-corruption checks abort the process instead of printing and continuing.
pub const MALLOC_CHECK_ENV: (&str, &str) = ("MALLOC_CHECK_", "3");

/// ASan leaves SEGV to the tracer but still aborts on anything it detects itself.
pub const ASAN_OPTIONS_ENV: (&str, &str) = ("ASAN_OPTIONS", "handle_segv=0:abort_on_error=1");

/// Type-state marker: freshly forked child, nothing configured
pub struct Fresh;

/// Type-state marker: sanitizer and allocator environment set
pub struct EnvHardened;

/// Type-state marker: child dies with its supervisor
pub struct Orphanproof;

/// Type-state marker: address-space randomization off
pub struct AslrDisabled;

/// Type-state marker: argument vector built
pub struct ArgvBuilt;

/// Type-state marker: CPU and wall-clock bounds armed
pub struct TimeBounded;

/// Type-state marker: address-space limit attempted
pub struct MemoryBounded;

/// Type-state marker: standard streams in place
pub struct StdioReady;

/// Type-state marker: tracer attached, nothing left but exec
pub struct ExecReady;

/// Child process being prepared for exec.
pub struct Launch<'a, S> {
    config: &'a RunConfig,
    sys: &'a mut dyn ChildSys,
    stdio: &'a mut dyn StdioControl,
    argv: Vec<CString>,
    _state: PhantomData<S>,
}

impl<'a, S> Launch<'a, S> {
    fn advance<T>(self) -> Launch<'a, T> {
        Launch {
            config: self.config,
            sys: self.sys,
            stdio: self.stdio,
            argv: self.argv,
            _state: PhantomData,
        }
    }

    /// Argument vector handed to exec; empty until the argv step ran.
    pub fn argv(&self) -> &[CString] {
        &self.argv
    }
}

impl<'a> Launch<'a, Fresh> {
    pub fn new(
        config: &'a RunConfig,
        sys: &'a mut dyn ChildSys,
        stdio: &'a mut dyn StdioControl,
    ) -> Self {
        Self {
            config,
            sys,
            stdio,
            argv: Vec::new(),
            _state: PhantomData,
        }
    }

    /// Step 1: make heap corruption and sanitizer reports immediately fatal.
    pub fn harden_env(self) -> Result<Launch<'a, EnvHardened>> {
        for (key, value) in [MALLOC_CHECK_ENV, ASAN_OPTIONS_ENV] {
            self.sys.set_env(key, value)?;
        }
        log::debug!("preexec: {}={} {}={}", MALLOC_CHECK_ENV.0, MALLOC_CHECK_ENV.1, ASAN_OPTIONS_ENV.0, ASAN_OPTIONS_ENV.1);
        Ok(self.advance())
    }
}

impl<'a> Launch<'a, EnvHardened> {
    /// Step 2: SIGKILL the target if the supervising worker dies.
    pub fn set_parent_death_signal(self) -> Result<Launch<'a, Orphanproof>> {
        self.sys.set_parent_death_signal(Signal::SIGKILL)?;
        log::debug!("preexec: parent death signal (SIGKILL) configured");
        Ok(self.advance())
    }
}

impl<'a> Launch<'a, Orphanproof> {
    /// Step 3: reproducible crash addresses across runs of the same input.
    pub fn disable_aslr(self) -> Result<Launch<'a, AslrDisabled>> {
        self.sys.disable_aslr()?;
        log::debug!("preexec: ASLR disabled");
        Ok(self.advance())
    }
}

impl<'a> Launch<'a, AslrDisabled> {
    /// Step 4: argument vector with the candidate path substituted.
    pub fn build_argv(mut self, file_path: &Path) -> Result<Launch<'a, ArgvBuilt>> {
        self.argv = build_argv(&self.config.command, self.config.fuzz_stdin, file_path)?;
        log::debug!(
            "preexec: launching {:?} on file {}",
            self.argv[0],
            file_path.display()
        );
        Ok(self.advance())
    }
}

impl<'a> Launch<'a, ArgvBuilt> {
    /// Step 5: three independent time bounds, all mandatory.
    ///
    /// ITIMER_PROF fires after T seconds of CPU time. ITIMER_REAL at 2T
    /// catches a target that sleeps. RLIMIT_CPU at 2T still holds when the
    /// target blocks or handles both timer signals.
    pub fn arm_time_limits(self) -> Result<Launch<'a, TimeBounded>> {
        let secs = self.config.timeout_secs;
        if secs == 0 {
            return Ok(self.advance());
        }

        let doubled = secs
            .checked_mul(2)
            .ok_or_else(|| FuzzError::Config(format!("timeout_secs {secs} overflows")))?;

        self.sys
            .set_interval_timer(IntervalTimer::Prof, Duration::from_secs(secs))?;
        self.sys
            .set_interval_timer(IntervalTimer::Real, Duration::from_secs(doubled))?;
        self.sys.set_rlimit(Limit::Cpu, doubled, doubled)?;

        log::debug!(
            "preexec: ITIMER_PROF={}s ITIMER_REAL={}s RLIMIT_CPU={}s",
            secs,
            doubled,
            doubled
        );
        Ok(self.advance())
    }
}

impl<'a> Launch<'a, TimeBounded> {
    /// Step 6: advisory memory bound; failure is logged and ignored.
    pub fn limit_address_space(self) -> Launch<'a, MemoryBounded> {
        if let Some(bytes) = self.config.as_limit_bytes() {
            match self.sys.set_rlimit(Limit::AddressSpace, bytes, bytes) {
                Ok(()) => log::debug!("preexec: RLIMIT_AS={} bytes", bytes),
                Err(e) => log::debug!("preexec: couldn't enforce RLIMIT_AS, ignoring: {}", e),
            }
        } else if self.config.as_limit_mib > 0 {
            log::debug!(
                "preexec: as_limit_mib {} does not fit in bytes, ignoring",
                self.config.as_limit_mib
            );
        }
        self.advance()
    }
}

impl<'a> Launch<'a, MemoryBounded> {
    /// Steps 7 and 8: silence the target, then feed the input through stdin.
    pub fn setup_stdio(self, file_path: &Path) -> Result<Launch<'a, StdioReady>> {
        if self.config.nullify_stdio {
            if let Err(e) = self.stdio.nullify() {
                log::warn!("preexec: couldn't redirect stdio to /dev/null: {}", e);
            }
        }

        if self.config.fuzz_stdin {
            self.stdio.redirect_stdin(file_path)?;
        }

        Ok(self.advance())
    }
}

impl<'a> Launch<'a, StdioReady> {
    /// Step 9: let the supervisor intercept the target's signals.
    pub fn enable_tracing(
        self,
        tracer: &mut dyn TraceSubsystem,
    ) -> Result<Launch<'a, ExecReady>> {
        tracer.enable(self.config)?;
        Ok(self.advance())
    }
}

impl<'a> Launch<'a, ExecReady> {
    /// Step 10: replace the process image. Returns only on failure; the
    /// redirected streams are left for the caller to restore.
    pub fn exec(self) -> Result<Infallible> {
        self.sys.exec(&self.argv)
    }
}
