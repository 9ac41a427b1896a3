use super::{
    remove_stale_log, JobId, Scheduler, SchedulerError, SchedulerJob, SubmissionRequest,
};
use crate::{
    config::CommandConfig,
    process::{CommandOutput, CommandRunner, SystemRunner},
};
use std::{ffi::OsString, path::PathBuf};
use tracing::{debug, error, info};

/// Everything passed to the batch script besides the per-job arguments.
#[derive(Clone, Debug, Default)]
pub struct Payload {
    pub script: PathBuf,
    pub prolog: Option<String>,
    pub runner_args: Vec<String>,
}

#[derive(Clone, Copy, Debug)]
enum Operation {
    Submit,
    Cancel,
    Release,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Cancel => "cancel",
            Self::Release => "release",
        }
    }
}

/// Scheduler client that talks to SLURM through `sbatch`, `scancel` and `scontrol release`
#[derive(Debug)]
pub struct SlurmExecutor<R = SystemRunner> {
    commands: CommandConfig,
    payload: Payload,
    runner: R,
}

impl<R: CommandRunner> SlurmExecutor<R> {
    pub fn new(commands: CommandConfig, payload: Payload, runner: R) -> Self {
        Self {
            commands,
            payload,
            runner,
        }
    }

    /// arguments for the submit command, in the order the batch script expects them
    pub fn submit_arguments(&self, request: &SubmissionRequest) -> Vec<OsString> {
        let mut args = Vec::with_capacity(request.options.len() + 10);

        let mut name = OsString::from("--job-name=");
        name.push(&request.name);
        args.push(name);

        let mut output = OsString::from("--output=");
        output.push(&request.log_path);
        args.push(output);

        if request.hold {
            args.push(OsString::from("--hold"));
        }

        args.extend(request.options.iter().map(OsString::from));

        args.push(self.payload.script.clone().into_os_string());
        args.push(OsString::from(&request.runner));
        args.push(request.directory.clone().into_os_string());
        args.push(OsString::from(request.device.as_str()));
        args.push(OsString::from(request.twin_argument()));
        args.push(OsString::from(
            self.payload.prolog.as_deref().unwrap_or_default(),
        ));
        args.extend(self.payload.runner_args.iter().map(OsString::from));

        args
    }

    /// run one of the configured commands with the extra arguments appended
    fn invoke(
        &mut self,
        operation: Operation,
        extra: Vec<OsString>,
    ) -> Result<CommandOutput, SchedulerError> {
        let configured = match operation {
            Operation::Submit => &self.commands.submit,
            Operation::Cancel => &self.commands.cancel,
            Operation::Release => &self.commands.release,
        };
        let (program, leading) =
            configured
                .split_first()
                .ok_or(SchedulerError::NotConfigured {
                    command: operation.name(),
                })?;

        let mut args: Vec<OsString> = leading.iter().map(OsString::from).collect();
        args.extend(extra);

        let output = self
            .runner
            .run(program, &args)
            .map_err(|source| SchedulerError::Spawn {
                command: program.clone(),
                source,
            })?;

        if output.success {
            Ok(output)
        } else {
            let error = SchedulerError::Failed {
                command: program.clone(),
                status: output.status_text(),
                stderr: output.stderr.trim().to_string(),
            };
            error!(error = %error, "Scheduler command failed");

            Err(error)
        }
    }
}

impl<R: CommandRunner> Scheduler for SlurmExecutor<R> {
    fn submit(&mut self, request: &SubmissionRequest) -> Result<SchedulerJob, SchedulerError> {
        remove_stale_log(&request.log_path)?;

        let args = self.submit_arguments(request);
        let output = self.invoke(Operation::Submit, args)?;

        match parse_job_id(&output.stdout) {
            Some(id) => {
                info!(
                    id = %id,
                    device = %request.device,
                    held = request.hold,
                    twin = %request.twin_argument(),
                    "Submitted job"
                );

                Ok(SchedulerJob {
                    id,
                    device: request.device,
                    directory: request.directory.clone(),
                })
            }
            None => {
                error!(stdout = %output.stdout, "Failed to parse job id from submit output");

                Err(SchedulerError::UnparsableOutput {
                    command: self.commands.submit.join(" "),
                    output: output.stdout,
                })
            }
        }
    }

    fn cancel(&mut self, id: JobId) -> Result<(), SchedulerError> {
        self.invoke(Operation::Cancel, vec![OsString::from(id.to_string())])?;
        debug!(id = %id, "Cancelled job");

        Ok(())
    }

    fn release(&mut self, id: JobId) -> Result<(), SchedulerError> {
        self.invoke(Operation::Release, vec![OsString::from(id.to_string())])?;
        debug!(id = %id, "Released job");

        Ok(())
    }
}

/// Extract the job id from the output of the submit command.
///
/// Understands the default `Submitted batch job 123` message as well as the `--parsable`
/// format (`123` or `123;cluster`).
pub fn parse_job_id(output: &str) -> Option<JobId> {
    output.lines().map(str::trim).find_map(|line| {
        if let Some(rest) = line.strip_prefix("Submitted batch job") {
            rest.split_whitespace().next()?.parse().ok().map(JobId)
        } else {
            line.split(';').next()?.trim().parse().ok().map(JobId)
        }
    })
}
