//! perf_event_open(2) counters used as coverage feedback.
//!
//! Counters are opened against the tracee once its first stop confirms the
//! pid, counting user-space work only, and are read back when the run is
//! classified final.

use crate::config::types::{FuzzError, Result, RunConfig};
use crate::core::types::{PerfSubsystem, RunResult};
use nix::unistd::Pid;
use std::fs::File;
use std::io::Read;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

const PERF_TYPE_HARDWARE: u32 = 0;
const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;
const PERF_COUNT_HW_BRANCH_INSTRUCTIONS: u64 = 4;

const ATTR_DISABLED: u64 = 1 << 0;
const ATTR_INHERIT: u64 = 1 << 1;
const ATTR_EXCLUDE_KERNEL: u64 = 1 << 5;
const ATTR_EXCLUDE_HV: u64 = 1 << 6;

const PERF_FLAG_FD_CLOEXEC: libc::c_ulong = 1 << 3;

const PERF_EVENT_IOC_ENABLE: libc::c_ulong = 0x2400;
const PERF_EVENT_IOC_DISABLE: libc::c_ulong = 0x2401;

/// `struct perf_event_attr` as of PERF_ATTR_SIZE_VER5.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct PerfEventAttr {
    kind: u32,
    size: u32,
    config: u64,
    sample_period: u64,
    sample_type: u64,
    read_format: u64,
    flags: u64,
    wakeup_events: u32,
    bp_type: u32,
    config1: u64,
    config2: u64,
    branch_sample_type: u64,
    sample_regs_user: u64,
    sample_stack_user: u32,
    clockid: i32,
    sample_regs_intr: u64,
    aux_watermark: u32,
    sample_max_stack: u16,
    reserved_2: u16,
}

impl PerfEventAttr {
    fn user_hardware_counter(config: u64) -> Self {
        Self {
            kind: PERF_TYPE_HARDWARE,
            size: std::mem::size_of::<Self>() as u32,
            config,
            flags: ATTR_DISABLED | ATTR_INHERIT | ATTR_EXCLUDE_KERNEL | ATTR_EXCLUDE_HV,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterKind {
    Instructions,
    Branches,
}

impl CounterKind {
    fn hw_config(self) -> u64 {
        match self {
            Self::Instructions => PERF_COUNT_HW_INSTRUCTIONS,
            Self::Branches => PERF_COUNT_HW_BRANCH_INSTRUCTIONS,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Instructions => "instructions",
            Self::Branches => "branches",
        }
    }
}

/// Open counters for one run. Descriptors close on drop.
#[derive(Debug, Default)]
pub struct PerfHandle {
    counters: Vec<(CounterKind, File)>,
}

impl PerfHandle {
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct PerfCounters;

impl PerfCounters {
    pub fn new() -> Self {
        Self
    }

    fn open_counter(pid: Pid, kind: CounterKind) -> Result<File> {
        let attr = PerfEventAttr::user_hardware_counter(kind.hw_config());
        let fd = unsafe {
            libc::syscall(
                libc::SYS_perf_event_open,
                &attr as *const PerfEventAttr,
                pid.as_raw(),
                -1 as libc::c_int,
                -1 as libc::c_int,
                PERF_FLAG_FD_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(FuzzError::PerfInit(format!(
                "perf_event_open({}, pid {}) failed: {}",
                kind.name(),
                pid,
                std::io::Error::last_os_error()
            )));
        }

        // perf_event_open returned a fresh descriptor we now own.
        let file = File::from(unsafe { OwnedFd::from_raw_fd(fd as libc::c_int) });
        ioctl_counter(&file, PERF_EVENT_IOC_ENABLE).map_err(|e| {
            FuzzError::PerfInit(format!("PERF_EVENT_IOC_ENABLE({}) failed: {}", kind.name(), e))
        })?;
        Ok(file)
    }

    fn read_counter(kind: CounterKind, file: &mut File) -> Result<u64> {
        if let Err(e) = ioctl_counter(file, PERF_EVENT_IOC_DISABLE) {
            log::debug!("perf: PERF_EVENT_IOC_DISABLE({}) failed: {}", kind.name(), e);
        }
        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)
            .map_err(|e| FuzzError::Perf(format!("reading {} counter failed: {}", kind.name(), e)))?;
        Ok(u64::from_ne_bytes(buf))
    }
}

fn ioctl_counter(file: &File, request: libc::c_ulong) -> std::io::Result<()> {
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request as _, 0) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

impl PerfSubsystem for PerfCounters {
    type Handle = PerfHandle;

    fn enable(&mut self, pid: Pid, config: &RunConfig) -> Result<PerfHandle> {
        let mut handle = PerfHandle::default();
        if !config.perf.any_enabled() {
            log::debug!("perf: every counter disabled, nothing to arm");
            return Ok(handle);
        }
        if config.perf.instructions {
            handle
                .counters
                .push((CounterKind::Instructions, Self::open_counter(pid, CounterKind::Instructions)?));
        }
        if config.perf.branches {
            handle
                .counters
                .push((CounterKind::Branches, Self::open_counter(pid, CounterKind::Branches)?));
        }
        log::debug!("perf: {} counter(s) armed for pid {}", handle.len(), pid);
        Ok(handle)
    }

    fn harvest(
        &mut self,
        _config: &RunConfig,
        result: &mut RunResult,
        mut handle: PerfHandle,
    ) -> Result<()> {
        for (kind, file) in handle.counters.iter_mut() {
            let value = Self::read_counter(*kind, file)?;
            match kind {
                CounterKind::Instructions => result.coverage.instructions = value,
                CounterKind::Branches => result.coverage.branches = value,
            }
        }
        log::debug!(
            "perf: instructions={} branches={}",
            result.coverage.instructions,
            result.coverage.branches
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::PerfConfig;

    #[test]
    fn attr_matches_kernel_ver5_layout() {
        assert_eq!(std::mem::size_of::<PerfEventAttr>(), 112);
        let attr = PerfEventAttr::user_hardware_counter(PERF_COUNT_HW_INSTRUCTIONS);
        assert_eq!(attr.size, 112);
        assert_ne!(attr.flags & ATTR_DISABLED, 0);
        assert_ne!(attr.flags & ATTR_EXCLUDE_KERNEL, 0);
    }

    #[test]
    fn disabled_counters_open_nothing_and_harvest_zero() {
        let mut config = RunConfig::default();
        config.perf = PerfConfig::disabled();

        let mut perf = PerfCounters::new();
        let handle = perf.enable(nix::unistd::getpid(), &config).unwrap();
        assert!(handle.is_empty());

        let mut result = RunResult::new();
        perf.harvest(&config, &mut result, handle).unwrap();
        assert_eq!(result.coverage.instructions, 0);
        assert_eq!(result.coverage.branches, 0);
    }

    #[test]
    fn open_failure_is_a_perf_init_error() {
        let config = RunConfig::default();
        let mut perf = PerfCounters::new();
        // No such process.
        match perf.enable(Pid::from_raw(i32::MAX), &config) {
            Err(FuzzError::PerfInit(msg)) => assert!(msg.contains("perf_event_open")),
            other => panic!("expected perf init error, got {other:?}"),
        }
    }

    #[test]
    fn counts_own_instructions_when_available() {
        let config = RunConfig::default();
        let mut perf = PerfCounters::new();
        // Tests run on worker threads; count this thread, not the main one.
        let Ok(handle) = perf.enable(nix::unistd::gettid(), &config) else {
            // perf_event_paranoid, seccomp or a VM without a PMU.
            return;
        };

        let mut acc = 0u64;
        for i in 0..100_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(acc);

        let mut result = RunResult::new();
        perf.harvest(&config, &mut result, handle).unwrap();
        assert!(result.coverage.instructions > 0);
    }
}
