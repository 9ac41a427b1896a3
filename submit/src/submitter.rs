use crate::{
    config::SubmitConfig,
    executors::{Device, JobId, Scheduler, SchedulerError, SubmissionRequest},
    job::{ConfigError, GpuPolicy, JobConfiguration},
    protocol::{ProtocolError, TwinProtocol},
    staleness::{InputSet, Staleness, StalenessError, StalenessEvaluator},
};
use std::{
    fmt,
    iter::once,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("specified path is not a directory")]
    NotADirectory(PathBuf),
    #[error("no configuration file found (looked for {})", .candidates.join(", "))]
    NoConfigFile { candidates: Vec<String> },
    #[error("{}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
    #[error(transparent)]
    Inputs(#[from] StalenessError),
    #[error("output is up to date")]
    Current,
    #[error("job failed before, use --retry-failed to resubmit it")]
    Failed,
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SubmissionError {
    /// deliberate skips, not defects
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Current | Self::Failed)
    }
}

/// Job ids of one directory; only `prefer` fills both.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Submitted {
    pub cpu: Option<JobId>,
    pub gpu: Option<JobId>,
}

impl fmt::Display for Submitted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.gpu, self.cpu) {
            (Some(gpu), Some(cpu)) => write!(f, "gpu job {gpu}, cpu job {cpu}"),
            (Some(gpu), None) => write!(f, "gpu job {gpu}"),
            (None, Some(cpu)) => write!(f, "cpu job {cpu}"),
            (None, None) => f.write_str("nothing"),
        }
    }
}

/// Per-batch settings of the submitter.
#[derive(Clone, Debug)]
pub struct SubmitterSettings {
    pub cfg_files: Vec<String>,
    pub input_files: Vec<String>,
    pub log_file: Option<String>,
    pub runner: Option<String>,
    pub options: Vec<String>,
    pub gpu_option: String,
    pub max_attempts: u32,
    pub staleness: StalenessEvaluator,
}

impl SubmitterSettings {
    pub fn new(config: &SubmitConfig, staleness: StalenessEvaluator) -> Self {
        Self {
            cfg_files: config.cfg_files.clone(),
            input_files: config.input_files.clone(),
            log_file: config.log_file.clone(),
            runner: config.runner.clone(),
            options: config.options.clone(),
            gpu_option: config.gpu_option.clone(),
            max_attempts: config.max_attempts,
            staleness,
        }
    }
}

/// Processes job directories one at a time.
pub struct JobSubmitter<S> {
    settings: SubmitterSettings,
    scheduler: S,
}

impl<S: Scheduler> JobSubmitter<S> {
    pub fn new(settings: SubmitterSettings, scheduler: S) -> Self {
        Self {
            settings,
            scheduler,
        }
    }

    #[cfg(test)]
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// the first candidate configuration file that exists in `directory`
    fn find_config_file<'a>(&'a self, directory: &Path) -> Option<(PathBuf, &'a str)> {
        self.settings
            .cfg_files
            .iter()
            .map(|name| (directory.join(name), name.as_str()))
            .find(|(path, _)| path.is_file())
    }

    /// Submit the job in `directory`.
    ///
    /// The configuration is read again on every call. Every check runs before the first
    /// scheduler command, so a rejected directory never leaves jobs behind.
    #[instrument(skip_all, level = "info", fields(directory = %directory.display()))]
    pub fn submit_directory(&mut self, directory: &Path) -> Result<Submitted, SubmissionError> {
        if !directory.is_dir() {
            return Err(SubmissionError::NotADirectory(directory.to_path_buf()));
        }

        let (cfg_path, cfg_name) =
            self.find_config_file(directory)
                .ok_or_else(|| SubmissionError::NoConfigFile {
                    candidates: self.settings.cfg_files.clone(),
                })?;
        debug!(path = ?cfg_path, "Using configuration file");

        let config = JobConfiguration::load(&cfg_path).map_err(|source| {
            SubmissionError::Config {
                path: cfg_path.clone(),
                source,
            }
        })?;
        debug!(runner = %config.runner, gpu = ?config.gpu, "Loaded configuration");

        let inputs = InputSet::collect(
            directory,
            self.settings
                .input_files
                .iter()
                .chain(config.input_files.iter())
                .map(String::as_str)
                .chain(once(cfg_name)),
        )?;

        match self.settings.staleness.evaluate(directory, &inputs)? {
            Staleness::Current => return Err(SubmissionError::Current),
            Staleness::Failed => return Err(SubmissionError::Failed),
            Staleness::MustSubmit => {}
        }

        let gpu = self.request(directory, &config, Device::Gpu);
        let cpu = self.request(directory, &config, Device::Cpu);

        match config.gpu {
            GpuPolicy::Yes => {
                let job = self.scheduler.submit(&gpu)?;
                info!(id = %job.id, device = %job.device, directory = ?job.directory, "Submitted");

                Ok(Submitted {
                    gpu: Some(job.id),
                    cpu: None,
                })
            }
            GpuPolicy::No => {
                let job = self.scheduler.submit(&cpu)?;
                info!(id = %job.id, device = %job.device, directory = ?job.directory, "Submitted");

                Ok(Submitted {
                    gpu: None,
                    cpu: Some(job.id),
                })
            }
            GpuPolicy::Prefer => {
                let jobs = TwinProtocol::new(&mut self.scheduler, self.settings.max_attempts)
                    .submit(&gpu, &cpu)?;
                debug!(attempts = jobs.attempts, "Twin submission finished");

                Ok(Submitted {
                    gpu: Some(jobs.gpu),
                    cpu: Some(jobs.cpu),
                })
            }
        }
    }

    /// merge batch defaults and the job configuration into the request for `device`
    fn request(
        &self,
        directory: &Path,
        config: &JobConfiguration,
        device: Device,
    ) -> SubmissionRequest {
        let log_file = self.settings.log_file.as_deref().unwrap_or(&config.log_file);

        let mut options = self.settings.options.clone();
        options.extend(config.options.for_device(device).cloned());
        if device == Device::Gpu {
            options.push(self.settings.gpu_option.clone());
        }

        SubmissionRequest {
            name: directory.to_string_lossy().into_owned(),
            log_path: directory.join(log_file),
            options,
            runner: self
                .settings
                .runner
                .clone()
                .unwrap_or_else(|| config.runner.clone()),
            directory: directory.to_path_buf(),
            device,
            twin: None,
            hold: false,
        }
    }
}
