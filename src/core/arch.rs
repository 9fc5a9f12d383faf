use crate::config::types::{Result, RunConfig};
use crate::core::types::TraceSubsystem;

/// One-time per-worker setup, run before the first candidate.
pub fn arch_init<T: TraceSubsystem + ?Sized>(config: &RunConfig, tracer: &mut T) -> Result<()> {
    tracer.prepare(config)?;
    log::debug!("arch: tracer ready for {:?}", config.command.first());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::FuzzError;
    use crate::testing::fakes::{Call, CallLog, ScriptedTracer};

    #[test]
    fn delegates_to_tracer_prepare() {
        let log = CallLog::new();
        let mut tracer = ScriptedTracer::new(&log);
        arch_init(&RunConfig::default(), &mut tracer).unwrap();
        assert_eq!(log.calls(), vec![Call::TracePrepare]);
    }

    #[test]
    fn prepare_failure_is_returned() {
        let log = CallLog::new();
        let mut tracer = ScriptedTracer::new(&log);
        tracer.fail_prepare = true;
        let err = arch_init(&RunConfig::default(), &mut tracer).unwrap_err();
        assert!(matches!(err, FuzzError::Trace(_)));
    }
}
