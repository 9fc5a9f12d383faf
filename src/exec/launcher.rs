use crate::config::types::{Result, RunConfig};
use crate::core::types::TraceSubsystem;
use crate::exec::preexec::Launch;
use crate::kernel::stdio::StdioControl;
use crate::kernel::sys::ChildSys;
use std::convert::Infallible;
use std::path::Path;

/// Prepare the forked child and exec the target.
///
/// Never returns on success. Any failure leaves the standard streams the
/// way they were found so the caller can still report it.
pub fn launch(
    config: &RunConfig,
    sys: &mut dyn ChildSys,
    stdio: &mut dyn StdioControl,
    tracer: &mut dyn TraceSubsystem,
    file_path: &Path,
) -> Result<Infallible> {
    let err = match run_chain(config, sys, stdio, tracer, file_path) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    stdio.restore();
    log::error!("launch of {:?} failed: {}", config.command.first(), err);
    Err(err)
}

fn run_chain(
    config: &RunConfig,
    sys: &mut dyn ChildSys,
    stdio: &mut dyn StdioControl,
    tracer: &mut dyn TraceSubsystem,
    file_path: &Path,
) -> Result<Infallible> {
    Launch::new(config, sys, stdio)
        .harden_env()?
        .set_parent_death_signal()?
        .disable_aslr()?
        .build_argv(file_path)?
        .arm_time_limits()?
        .limit_address_space()
        .setup_stdio(file_path)?
        .enable_tracing(tracer)?
        .exec()
}
