mod collector;
mod config;
mod executors;
mod job;
mod process;
mod protocol;
mod staleness;
mod submitter;

use clap::Parser;
use config::SubmitConfig;
use executors::slurm::{Payload, SlurmExecutor};
use process::SystemRunner;
use staleness::StalenessEvaluator;
use std::{path::PathBuf, process::ExitCode};
use submitter::{JobSubmitter, SubmitterSettings};
use tracing::{debug, error, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

/// Submit SLURM jobs.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// directories to submit
    #[arg(required = true, value_name = "DIRECTORY")]
    directories: Vec<PathBuf>,

    /// batch script passed to sbatch (runner, directory, device, twin job id and prolog
    /// are passed as arguments), searched for in the current and the parent directory if
    /// not given
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// only submit a job if its inputs are more recent than its `_finished` marker
    #[arg(short, long)]
    update: bool,

    /// with --update, also submit jobs that left a `_failed` marker
    #[arg(short = 'f', long)]
    retry_failed: bool,

    /// candidate names of the job configuration file, comma separated
    #[arg(short, long, value_delimiter = ',')]
    cfg_files: Option<Vec<String>>,

    /// input files of every job, comma separated
    #[arg(short, long, value_delimiter = ',')]
    input_files: Option<Vec<String>>,

    /// file to redirect standard output and error to, overrides the job configuration
    #[arg(short, long)]
    log_file: Option<String>,

    /// runner to start instead of the one the job configuration declares
    #[arg(short, long)]
    runner: Option<String>,

    /// comma separated options (without --) that should be passed to sbatch
    #[arg(short = 'O', long, value_delimiter = ',')]
    slurm_options: Vec<String>,

    /// script the batch script sources before starting the runner
    #[arg(long)]
    prolog: Option<String>,

    /// attempts for submitting GPU/CPU twin jobs, 0 retries forever
    #[arg(long)]
    max_attempts: Option<u32>,

    /// file with defaults for all options
    #[arg(long, default_value = "submit.yaml")]
    defaults: PathBuf,

    /// displays debug output
    #[arg(long)]
    debug: bool,

    /// extra arguments for the runner
    #[arg(last = true)]
    runner_args: Vec<String>,
}

impl Args {
    /// command line values take precedence over the defaults file
    fn apply(&self, config: &mut SubmitConfig) {
        if let Some(ref script) = self.script {
            config.script = Some(script.clone());
        }
        if let Some(ref cfg_files) = self.cfg_files {
            config.cfg_files = cfg_files.clone();
        }
        if let Some(ref input_files) = self.input_files {
            config.input_files = input_files.clone();
        }
        if let Some(ref log_file) = self.log_file {
            config.log_file = Some(log_file.clone());
        }
        if let Some(ref runner) = self.runner {
            config.runner = Some(runner.clone());
        }
        if let Some(ref prolog) = self.prolog {
            config.prolog = Some(prolog.clone());
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if !self.runner_args.is_empty() {
            config.runner_args = self.runner_args.clone();
        }

        config.options.extend(
            self.slurm_options
                .iter()
                .map(|option| option.trim())
                .filter(|option| !option.is_empty())
                .map(|option| format!("--{option}")),
        );
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    // scoped to this batch, nothing is installed process wide
    tracing::subscriber::with_default(subscriber, || run(args))
}

fn run(args: Args) -> ExitCode {
    let mut config = match SubmitConfig::load(&args.defaults) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);

    if config.preflight_checks() {
        error!("Found errors in the configuration, not submitting anything");
        return ExitCode::FAILURE;
    }

    let script = match config.script.clone() {
        Some(script) => script,
        None => match collector::discover_batch_script(&[PathBuf::from("."), PathBuf::from("..")])
        {
            Ok(script) => script,
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        },
    };
    debug!(script = ?script, "Using job batch script");
    debug!(options = ?config.options, "Using scheduler options");

    let executor = SlurmExecutor::new(
        config.commands.clone(),
        Payload {
            script,
            prolog: config.prolog.clone(),
            runner_args: config.runner_args.clone(),
        },
        SystemRunner,
    );
    let mut submitter = JobSubmitter::new(
        SubmitterSettings::new(
            &config,
            StalenessEvaluator {
                update: args.update,
                retry_failed: args.retry_failed,
            },
        ),
        executor,
    );

    let mut contains_error = false;

    for directory in &args.directories {
        let status = match submitter.submit_directory(directory) {
            Ok(submitted) => format!("submitted {submitted}"),
            Err(e) if e.is_skip() => format!("skipped: {e}"),
            Err(e) => {
                contains_error = true;
                format!("failed: {e}")
            }
        };

        println!("{:>20}: {status}", directory.display());
    }

    if contains_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
