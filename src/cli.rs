use crate::config::types::{PerfConfig, RunConfig};
use crate::config::validator::validate_config;
use crate::core::arch::arch_init;
use crate::core::worker::run_candidate;
use crate::kernel::perf::PerfCounters;
use crate::kernel::ptrace::PtraceTracer;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the target once against an input file and print the result as JSON
    Run {
        #[command(flatten)]
        overrides: RunOverrides,
        /// Candidate input file
        #[arg(long)]
        input: PathBuf,
        /// Target command; use @@ where the input path goes
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Check that this host can trace and launch targets
    Check {
        /// JSON run configuration
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunOverrides {
    /// JSON run configuration; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// CPU time limit in seconds (0 disables)
    #[arg(long)]
    timeout: Option<u64>,
    /// Address-space limit in MiB (0 disables)
    #[arg(long)]
    as_limit: Option<u64>,
    /// Feed the input through stdin instead of the @@ placeholder
    #[arg(long)]
    stdin: bool,
    /// Redirect the target's stdio to /dev/null
    #[arg(long)]
    nullify_stdio: bool,
    /// Do not open performance counters
    #[arg(long)]
    no_perf: bool,
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(RunConfig::default()),
    }
}

impl RunOverrides {
    fn apply(&self, config: &mut RunConfig) {
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(as_limit) = self.as_limit {
            config.as_limit_mib = as_limit;
        }
        if self.stdin {
            config.fuzz_stdin = true;
        }
        if self.nullify_stdio {
            config.nullify_stdio = true;
        }
        if self.no_perf {
            config.perf = PerfConfig::disabled();
        }
    }
}

pub fn run() -> Result<()> {
    env_logger::init();

    if !cfg!(target_os = "linux") {
        anyhow::bail!("fuzzvisor requires Linux (ptrace, personality, perf_event_open)");
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            overrides,
            input,
            command,
        } => {
            let mut config = load_config(overrides.config.as_deref())?;
            overrides.apply(&mut config);
            config.command = command;
            validate_config(&config)?;

            if !input.is_file() {
                anyhow::bail!("input {} is not a readable file", input.display());
            }

            let mut tracer = PtraceTracer::new();
            let mut perf = PerfCounters::new();
            arch_init(&config, &mut tracer).context("tracer preparation failed")?;

            let result = run_candidate(&config, &input, &mut tracer, &mut perf)
                .with_context(|| format!("supervising {:?} failed", config.command))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Check { config } => {
            let config = load_config(config.as_deref())?;
            if !config.command.is_empty() {
                let report = validate_config(&config)?;
                for warning in &report.warnings {
                    eprintln!("warning: {}", warning);
                }
            }

            let mut tracer = PtraceTracer::new();
            let traceable = arch_init(&config, &mut tracer);
            let report = serde_json::json!({
                "ptrace": traceable.as_ref().map(|_| "ok".to_string()).unwrap_or_else(|e| e.to_string()),
                "perf_counters": &config.perf,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            traceable.context("host cannot trace targets")?;
            Ok(())
        }
    }
}
