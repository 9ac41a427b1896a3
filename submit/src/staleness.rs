use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};
use thiserror::Error;
use tracing::debug;

/// written by a job that failed
pub const FAILED_MARKER: &str = "_failed";
/// written by a job that ran to completion
pub const FINISHED_MARKER: &str = "_finished";

#[derive(Error, Debug)]
pub enum StalenessError {
    #[error("file {} is missing", .path.display())]
    MissingFile { path: PathBuf },
    #[error("failed to read modification time of {}: {source}", .path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Staleness {
    MustSubmit,
    /// the job finished after its newest input changed
    Current,
    /// the job failed after its newest input changed
    Failed,
}

/// Modification time of the newest input of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputSet {
    pub newest: Option<SystemTime>,
}

impl InputSet {
    /// check that all inputs exist and remember the newest modification time
    pub fn collect<I, P>(directory: &Path, files: I) -> Result<Self, StalenessError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut newest = None;

        for file in files {
            let path = directory.join(file);

            if !path.is_file() {
                return Err(StalenessError::MissingFile { path });
            }

            let modified = modified(&path)?;
            newest = newest.max(Some(modified));
        }

        Ok(Self { newest })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StalenessEvaluator {
    /// only submit jobs whose inputs changed since they last ran
    pub update: bool,
    /// resubmit jobs that left a `_failed` marker
    pub retry_failed: bool,
}

impl StalenessEvaluator {
    pub fn evaluate(
        &self,
        directory: &Path,
        inputs: &InputSet,
    ) -> Result<Staleness, StalenessError> {
        if !self.update {
            return Ok(Staleness::MustSubmit);
        }

        let Some(newest) = inputs.newest else {
            return Ok(Staleness::MustSubmit);
        };

        // a marker exactly as old as the newest input still counts
        let is_recent = |marker: &str| -> Result<bool, StalenessError> {
            Ok(marker_time(directory, marker)?.map_or(false, |time| time >= newest))
        };

        let staleness = if is_recent(FINISHED_MARKER)? {
            Staleness::Current
        } else if !self.retry_failed && is_recent(FAILED_MARKER)? {
            Staleness::Failed
        } else {
            Staleness::MustSubmit
        };
        debug!(staleness = ?staleness, "Evaluated staleness");

        Ok(staleness)
    }
}

fn marker_time(directory: &Path, marker: &str) -> Result<Option<SystemTime>, StalenessError> {
    let path = directory.join(marker);

    match fs::metadata(&path) {
        Ok(_) => modified(&path).map(Some),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StalenessError::Metadata { path, source }),
    }
}

fn modified(path: &Path) -> Result<SystemTime, StalenessError> {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map_err(|source| StalenessError::Metadata {
            path: path.to_path_buf(),
            source,
        })
}
