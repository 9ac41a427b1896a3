use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read defaults file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse defaults file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Globs were invalid")]
    InvalidGlobs(#[from] globset::Error),
    #[error("No batch script was specified and it could not be found automatically")]
    NoBatchScript,
    #[error(
        "No batch script was specified and more than one candidate was found: {}",
        .0.iter().map(|path| path.display()).join(", ")
    )]
    AmbiguousBatchScript(Vec<PathBuf>),
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] io::Error),
}

/// Defaults shared by all directories of a batch, read from `submit.yaml`.
///
/// Every value can be overridden on the command line.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SubmitConfig {
    // batch script handed to the submit command, searched for if missing
    #[serde(default)]
    pub script: Option<PathBuf>,
    // candidate names of the job configuration file, the first existing one is used
    #[serde(default = "default_cfg_files")]
    pub cfg_files: Vec<String>,
    // inputs every job depends on besides the ones from its configuration
    #[serde(default)]
    pub input_files: Vec<String>,
    // overrides `log-file` of every job configuration
    #[serde(default)]
    pub log_file: Option<String>,
    // replaces the runner a job configuration declares
    #[serde(default)]
    pub runner: Option<String>,
    // scheduler options for every job, before the job's own options
    #[serde(default)]
    pub options: Vec<String>,
    // appended to the options of GPU submissions
    #[serde(default = "default_gpu_option")]
    pub gpu_option: String,
    #[serde(default)]
    pub prolog: Option<String>,
    #[serde(default)]
    pub runner_args: Vec<String>,
    // attempts of the GPU/CPU twin submission, 0 retries forever
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub commands: CommandConfig,
}

/// Scheduler commands, program followed by leading arguments.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    #[serde(default = "default_submit_command")]
    pub submit: Vec<String>,
    #[serde(default = "default_cancel_command")]
    pub cancel: Vec<String>,
    #[serde(default = "default_release_command")]
    pub release: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            submit: default_submit_command(),
            cancel: default_cancel_command(),
            release: default_release_command(),
        }
    }
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            script: None,
            cfg_files: default_cfg_files(),
            input_files: Vec::new(),
            log_file: None,
            runner: None,
            options: Vec::new(),
            gpu_option: default_gpu_option(),
            prolog: None,
            runner_args: Vec::new(),
            max_attempts: default_max_attempts(),
            commands: CommandConfig::default(),
        }
    }
}

impl SubmitConfig {
    /// load the defaults file, if there is none the built-in defaults are used
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        match fs::read_to_string(path) {
            Ok(content) => serde_yaml::from_str(&content).map_err(|source| ConfigErrors::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?path, "No defaults file, using built-in defaults");

                Ok(Self::default())
            }
            Err(source) => Err(ConfigErrors::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Validate and normalize the configuration, returns whether errors were found.
    pub fn preflight_checks(&mut self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        for list in [&mut self.cfg_files, &mut self.input_files] {
            list.iter_mut().for_each(|entry| *entry = entry.trim().to_string());
            list.retain(|entry| !entry.is_empty());
        }

        if self.cfg_files.is_empty() {
            error!("cfg_files is empty, no job configuration could ever be found");
            contains_error = true;
        }

        if self.gpu_option.trim().is_empty() {
            error!("gpu_option must not be empty, GPU jobs would not request a GPU");
            contains_error = true;
        }

        for (name, command) in [
            ("submit", &self.commands.submit),
            ("cancel", &self.commands.cancel),
            ("release", &self.commands.release),
        ] {
            if command.first().map_or(true, |program| program.is_empty()) {
                error!("commands.{name} must name a program");
                contains_error = true;
            }
        }

        if self.max_attempts == 0 {
            warn!("max_attempts is 0, twin submissions will be retried forever");
        }

        if let Some(ref script) = self.script {
            match check_executable(script) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        "Batch script {} is not executable, this might cause problems",
                        script.display()
                    );
                }
                Err(e) => {
                    error!("Batch script {} can't be used: {e}", script.display());
                    contains_error = true;
                }
            }
        }

        contains_error
    }
}

fn default_cfg_files() -> Vec<String> {
    vec![String::from("cfg.py")]
}

fn default_gpu_option() -> String {
    String::from("--gres=gpu:1")
}

fn default_max_attempts() -> u32 {
    8
}

fn default_submit_command() -> Vec<String> {
    vec![String::from("sbatch")]
}

fn default_cancel_command() -> Vec<String> {
    vec![String::from("scancel")]
}

fn default_release_command() -> Vec<String> {
    vec![String::from("scontrol"), String::from("release")]
}
