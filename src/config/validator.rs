// Config validation
// Runs once at worker startup so that launch-time failures are limited to
// genuine OS refusals rather than malformed input.

use crate::config::types::{FuzzError, Result, RunConfig, FILE_PLACEHOLDER};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a run configuration; errors are fatal, warnings are logged.
pub fn validate_config(config: &RunConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::default();

    validate_command(config, &mut result);
    validate_limits(config, &mut result);

    for warning in &result.warnings {
        log::warn!("config: {}", warning);
    }

    if !result.is_valid() {
        return Err(FuzzError::Config(format!(
            "config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_command(config: &RunConfig, result: &mut ValidationResult) {
    if config.command.is_empty() {
        result.add_error("command cannot be empty".to_string());
        return;
    }

    if config.command.iter().any(|arg| arg.contains('\0')) {
        result.add_error("command entries cannot contain NUL bytes".to_string());
    }

    let has_placeholder = config.command.iter().any(|arg| arg == FILE_PLACEHOLDER);
    if config.fuzz_stdin && has_placeholder {
        result.add_warning(format!(
            "stdin mode is on; {} is passed to the target verbatim",
            FILE_PLACEHOLDER
        ));
    }
    if !config.fuzz_stdin && !has_placeholder {
        result.add_warning(format!(
            "file mode is on but the command has no {} placeholder; the target never sees the input",
            FILE_PLACEHOLDER
        ));
    }
}

fn validate_limits(config: &RunConfig, result: &mut ValidationResult) {
    // ITIMER_REAL and RLIMIT_CPU are armed with 2T.
    let max_timeout = (libc::time_t::MAX / 2) as u64;
    if config.timeout_secs > max_timeout {
        result.add_error(format!(
            "timeout_secs {} is too large (max {})",
            config.timeout_secs, max_timeout
        ));
    }

    if config.as_limit_mib > 0 && config.as_limit_bytes().is_none() {
        result.add_error(format!(
            "as_limit_mib {} overflows when converted to bytes",
            config.as_limit_mib
        ));
    }
}
