use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Command template entry replaced with the candidate file path.
pub const FILE_PLACEHOLDER: &str = "@@";

/// Maximum number of command template entries handed to exec.
pub const ARGS_MAX: usize = 512;

/// Hardware/software counters read back as coverage feedback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    /// Count retired user-space instructions
    pub instructions: bool,
    /// Count retired user-space branch instructions
    pub branches: bool,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            instructions: true,
            branches: true,
        }
    }
}

impl PerfConfig {
    /// Configuration with every counter switched off.
    pub fn disabled() -> Self {
        Self {
            instructions: false,
            branches: false,
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.instructions || self.branches
    }
}

/// Signal sets the stop classifier maps onto run outcomes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Stop signals recorded as a crash attributable to the input
    pub crash_signals: Vec<i32>,
    /// Stop signals produced by the launch-time timers and CPU limit
    pub timeout_signals: Vec<i32>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            crash_signals: vec![
                libc::SIGSEGV,
                libc::SIGILL,
                libc::SIGFPE,
                libc::SIGBUS,
                libc::SIGABRT,
            ],
            timeout_signals: vec![
                libc::SIGPROF,
                libc::SIGALRM,
                libc::SIGXCPU,
                libc::SIGVTALRM,
            ],
        }
    }
}

impl TraceConfig {
    pub fn is_crash_signal(&self, signal: i32) -> bool {
        self.crash_signals.contains(&signal)
    }

    pub fn is_timeout_signal(&self, signal: i32) -> bool {
        self.timeout_signals.contains(&signal)
    }
}

/// Per-worker run configuration.
///
/// Built once when the worker starts and shared read-only by every run;
/// nothing in the launch or supervision path mutates it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Target command template; entries equal to [`FILE_PLACEHOLDER`] receive the input path
    pub command: Vec<String>,
    /// Feed the candidate through stdin instead of substituting the placeholder
    pub fuzz_stdin: bool,
    /// CPU-time budget in seconds (0 disables timers and RLIMIT_CPU)
    pub timeout_secs: u64,
    /// Address-space budget in MiB (0 disables RLIMIT_AS)
    pub as_limit_mib: u64,
    /// Send the target's stdin/stdout/stderr to /dev/null
    pub nullify_stdio: bool,
    pub perf: PerfConfig,
    pub trace: TraceConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            fuzz_stdin: false,
            timeout_secs: 0,
            as_limit_mib: 0,
            nullify_stdio: false,
            perf: PerfConfig::default(),
            trace: TraceConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON document on disk.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        serde_json::from_slice(&raw).map_err(|e| {
            FuzzError::Config(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Address-space budget converted to bytes, `None` when unbounded or overflowing.
    pub fn as_limit_bytes(&self) -> Option<u64> {
        if self.as_limit_mib == 0 {
            return None;
        }
        self.as_limit_mib.checked_mul(1024 * 1024)
    }
}

/// Errors raised by the launch and supervision core
#[derive(Error, Debug)]
pub enum FuzzError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A mandatory pre-exec step failed; the forked process must not run the target.
    #[error("Launch setup error: {0}")]
    Setup(String),

    #[error("Exec error: {0}")]
    Exec(String),

    #[error("Trace error: {0}")]
    Trace(String),

    /// Coverage feedback could not be armed; fatal for the whole worker.
    #[error("Perf initialization error: {0}")]
    PerfInit(String),

    #[error("Perf error: {0}")]
    Perf(String),

    #[error("No child process left to supervise")]
    NoChildren,
}

pub type Result<T> = std::result::Result<T, FuzzError>;
