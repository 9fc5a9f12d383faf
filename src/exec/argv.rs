use crate::config::types::{FuzzError, Result, ARGS_MAX, FILE_PLACEHOLDER};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Build the exec argument vector from the command template.
///
/// Entries are copied verbatim, except that in file mode an entry equal to
/// [`FILE_PLACEHOLDER`] becomes `file_path`. At most [`ARGS_MAX`] entries
/// are kept; anything past the cap is dropped without error and the length
/// is not checked anywhere else.
/// The terminating null pointer is appended by `execvp` itself.
pub fn build_argv(template: &[String], fuzz_stdin: bool, file_path: &Path) -> Result<Vec<CString>> {
    if template.len() > ARGS_MAX {
        log::debug!(
            "argv: truncating command from {} to {} entries",
            template.len(),
            ARGS_MAX
        );
    }

    let mut argv = Vec::with_capacity(template.len().min(ARGS_MAX));
    for arg in template.iter().take(ARGS_MAX) {
        let entry = if !fuzz_stdin && arg == FILE_PLACEHOLDER {
            CString::new(file_path.as_os_str().as_bytes())
        } else {
            CString::new(arg.as_str())
        };
        let entry = entry.map_err(|_| {
            FuzzError::Setup(format!("argument {:?} contains a NUL byte", arg))
        })?;
        argv.push(entry);
    }

    if argv.is_empty() {
        return Err(FuzzError::Config("empty command".to_string()));
    }

    Ok(argv)
}
