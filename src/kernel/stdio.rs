//! Standard stream redirection for the target process.

use crate::config::types::{FuzzError, Result};
use nix::fcntl::{fcntl, FcntlArg};
use nix::unistd::{close, dup2};
use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

const NULL_DEVICE: &str = "/dev/null";
const STDIO_FDS: [RawFd; 3] = [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO];
// Saved copies live above the low descriptors a target is likely to expect.
const SAVED_FD_FLOOR: RawFd = 10;

pub trait StdioControl {
    /// Point stdin, stdout and stderr at the null device.
    fn nullify(&mut self) -> Result<()>;

    /// Point stdin at `path`.
    fn redirect_stdin(&mut self, path: &Path) -> Result<()>;

    /// Put back whatever the streams referred to before the first redirection.
    fn restore(&mut self);
}

/// Saves close-on-exec copies of fds 0-2 before the first redirection, so a
/// failed exec can hand the original streams back for error reporting.
#[derive(Debug, Default)]
pub struct StdioRedirector {
    saved: Option<[RawFd; 3]>,
}

impl StdioRedirector {
    pub fn new() -> Self {
        Self::default()
    }

    fn save(&mut self) -> Result<()> {
        if self.saved.is_some() {
            return Ok(());
        }

        let mut saved = [-1; 3];
        for (slot, fd) in saved.iter_mut().zip(STDIO_FDS) {
            match fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(SAVED_FD_FLOOR)) {
                Ok(copy) => *slot = copy,
                Err(e) => {
                    // A stream that was already closed has nothing to restore.
                    log::debug!("stdio: not saving fd {}: {}", fd, e);
                }
            }
        }
        self.saved = Some(saved);
        Ok(())
    }

    fn install(source: &File, target: RawFd, what: &str) -> Result<()> {
        dup2(source.as_raw_fd(), target)
            .map(|_| ())
            .map_err(|e| FuzzError::Setup(format!("dup2({what} -> fd {target}) failed: {e}")))
    }
}

impl StdioControl for StdioRedirector {
    fn nullify(&mut self) -> Result<()> {
        self.save()?;
        let null = OpenOptions::new()
            .read(true)
            .write(true)
            .open(NULL_DEVICE)
            .map_err(|e| FuzzError::Setup(format!("open({NULL_DEVICE}) failed: {e}")))?;

        for fd in STDIO_FDS {
            Self::install(&null, fd, NULL_DEVICE)?;
        }
        Ok(())
    }

    fn redirect_stdin(&mut self, path: &Path) -> Result<()> {
        self.save()?;
        let input = File::open(path).map_err(|e| {
            FuzzError::Setup(format!("open({}) for stdin failed: {}", path.display(), e))
        })?;
        Self::install(&input, libc::STDIN_FILENO, &path.display().to_string())
    }

    fn restore(&mut self) {
        let Some(saved) = self.saved.take() else {
            return;
        };

        for (copy, fd) in saved.into_iter().zip(STDIO_FDS) {
            if copy < 0 {
                continue;
            }
            if let Err(e) = dup2(copy, fd) {
                log::warn!("stdio: failed to restore fd {}: {}", fd, e);
            }
            let _ = close(copy);
        }
    }
}
