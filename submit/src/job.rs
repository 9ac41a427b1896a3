pub mod grammar;

use crate::executors::Device;
use grammar::{Line, OptionScope};
use std::{fs, io, path::Path};
use thiserror::Error;
use tracing::trace;

pub const DEFAULT_LOG_FILE: &str = "output.txt";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: unknown declaration key `{key}`")]
    UnknownKey { line: usize, key: String },
    #[error("line {line}: expected `# SUBMIT: <key> = <value>`")]
    MalformedDeclaration { line: usize },
    #[error("line {line}: gpu must be one of yes, prefer or no, found `{value}`")]
    InvalidGpuPolicy { line: usize, value: String },
    #[error("line {line}: empty scheduler option")]
    EmptyOption { line: usize },
    #[error("no runner specified (add `# SUBMIT: runner = <command>`)")]
    MissingRunner,
}

/// how a job wants to use GPUs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GpuPolicy {
    /// GPU job only
    Yes,
    /// CPU job only
    #[default]
    No,
    /// submit both and let whichever starts first cancel the other
    Prefer,
}

impl GpuPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "prefer" => Some(Self::Prefer),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub all: Vec<String>,
    pub gpu: Vec<String>,
    pub cpu: Vec<String>,
}

impl SchedulerOptions {
    /// unconditional options followed by the ones specific to `device`
    pub fn for_device(&self, device: Device) -> impl Iterator<Item = &String> {
        let specific = match device {
            Device::Gpu => &self.gpu,
            Device::Cpu => &self.cpu,
        };

        self.all.iter().chain(specific.iter())
    }

    fn push(&mut self, scope: OptionScope, text: &str) {
        let target = match scope {
            OptionScope::All => &mut self.all,
            OptionScope::Gpu => &mut self.gpu,
            OptionScope::Cpu => &mut self.cpu,
        };

        target.push(text.to_string());
    }
}

/// Settings embedded in a job directory's configuration file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobConfiguration {
    pub runner: String,
    pub input_files: Vec<String>,
    pub log_file: String,
    pub gpu: GpuPolicy,
    pub options: SchedulerOptions,
}

impl JobConfiguration {
    /// Directives sit in comments of arbitrary payload files, so bytes that are not valid
    /// UTF-8 are replaced instead of rejecting the whole file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&String::from_utf8_lossy(&fs::read(path)?))
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Self::fold(
            content
                .lines()
                .enumerate()
                .map(|(index, line)| (index + 1, grammar::classify(line))),
        )
    }

    /// Fold classified lines (with their 1-based line numbers) into a configuration.
    ///
    /// Later declarations of a key replace earlier ones, scheduler options accumulate in
    /// file order.
    pub fn fold<'a>(lines: impl IntoIterator<Item = (usize, Line<'a>)>) -> Result<Self, ConfigError> {
        let mut runner = None;
        let mut input_files = Vec::new();
        let mut log_file = String::from(DEFAULT_LOG_FILE);
        let mut gpu = GpuPolicy::default();
        let mut options = SchedulerOptions::default();

        for (line, parsed) in lines {
            match parsed {
                Line::Unrecognized => {}
                Line::MalformedDeclaration => {
                    return Err(ConfigError::MalformedDeclaration { line })
                }
                Line::SchedulerOption { text, .. } if text.is_empty() => {
                    return Err(ConfigError::EmptyOption { line })
                }
                Line::SchedulerOption { scope, text } => {
                    trace!(line, scope = ?scope, text, "Scheduler option");
                    options.push(scope, text);
                }
                Line::Declaration { key, value } => match key.to_ascii_lowercase().as_str() {
                    "runner" => runner = Some(value.to_string()),
                    "input-files" => {
                        input_files = value
                            .split(',')
                            .map(str::trim)
                            .filter(|file| !file.is_empty())
                            .map(String::from)
                            .collect();
                    }
                    "log-file" => log_file = value.to_string(),
                    "gpu" => {
                        gpu = GpuPolicy::parse(value).ok_or_else(|| {
                            ConfigError::InvalidGpuPolicy {
                                line,
                                value: value.to_string(),
                            }
                        })?;
                    }
                    _ => {
                        return Err(ConfigError::UnknownKey {
                            line,
                            key: key.to_string(),
                        })
                    }
                },
            }
        }

        match runner {
            Some(runner) if !runner.is_empty() => Ok(Self {
                runner,
                input_files,
                log_file,
                gpu,
                options,
            }),
            _ => Err(ConfigError::MissingRunner),
        }
    }
}
