pub mod slurm;
#[cfg(test)]
pub mod testing;

use std::{fmt, fs, io, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::debug;

/// identifier the scheduler assigned to a submitted job
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl JobId {
    /// the identifier `n` allocations after this one
    pub fn offset(self, n: u64) -> Self {
        Self(self.0.saturating_add(n))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    Gpu,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merged view of one scheduler submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub name: String,
    pub log_path: PathBuf,
    // unconditional options first, then the device specific ones
    pub options: Vec<String>,
    pub runner: String,
    pub directory: PathBuf,
    pub device: Device,
    pub twin: Option<JobId>,
    pub hold: bool,
}

impl SubmissionRequest {
    /// twin as passed to the batch script, `0` stands for "no twin"
    pub fn twin_argument(&self) -> String {
        self.twin
            .map(|id| id.to_string())
            .unwrap_or_else(|| String::from("0"))
    }

    pub fn held(mut self) -> Self {
        self.hold = true;
        self
    }

    pub fn with_twin(mut self, twin: JobId) -> Self {
        self.twin = Some(twin);
        self
    }
}

/// result of a successful submission, only lives for one submission attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerJob {
    pub id: JobId,
    pub device: Device,
    pub directory: PathBuf,
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("unable to find a job id in the output of {command}: {output:?}")]
    UnparsableOutput { command: String, output: String },
    #[error("failed to remove stale log file {path}: {source}")]
    StaleLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no {command} command configured")]
    NotConfigured { command: &'static str },
}

/// The three operations of the external batch scheduler.
pub trait Scheduler {
    fn submit(&mut self, request: &SubmissionRequest) -> Result<SchedulerJob, SchedulerError>;
    fn cancel(&mut self, id: JobId) -> Result<(), SchedulerError>;
    fn release(&mut self, id: JobId) -> Result<(), SchedulerError>;
}

/// delete a log file left behind by an earlier run so new output isn't appended to it
pub fn remove_stale_log(path: &Path) -> Result<(), SchedulerError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = ?path, "Removed stale log file");
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SchedulerError::StaleLog {
            path: path.to_path_buf(),
            source,
        }),
    }
}
