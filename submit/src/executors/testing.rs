//! In-memory scheduler that hands out scripted job ids and records every call.

use super::{JobId, Scheduler, SchedulerError, SchedulerJob, SubmissionRequest};
use std::collections::{BTreeSet, VecDeque};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Submit(SubmissionRequest, JobId),
    Cancel(JobId),
    Release(JobId),
}

#[derive(Debug, Default)]
pub struct ScriptedScheduler {
    ids: VecDeque<u64>,
    pub calls: Vec<Call>,
    pub failing_cancels: BTreeSet<u64>,
    pub failing_releases: BTreeSet<u64>,
}

impl ScriptedScheduler {
    /// submissions fail once `ids` is used up
    pub fn with_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn submissions(&self) -> Vec<(&SubmissionRequest, JobId)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Submit(request, id) => Some((request, *id)),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<JobId> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Cancel(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn released(&self) -> Vec<JobId> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Release(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

impl Scheduler for ScriptedScheduler {
    fn submit(&mut self, request: &SubmissionRequest) -> Result<SchedulerJob, SchedulerError> {
        match self.ids.pop_front() {
            Some(id) => {
                self.calls.push(Call::Submit(request.clone(), JobId(id)));

                Ok(SchedulerJob {
                    id: JobId(id),
                    device: request.device,
                    directory: request.directory.clone(),
                })
            }
            None => Err(SchedulerError::Failed {
                command: String::from("sbatch"),
                status: String::from("1"),
                stderr: String::from("QOSMaxSubmitJobPerUserLimit"),
            }),
        }
    }

    fn cancel(&mut self, id: JobId) -> Result<(), SchedulerError> {
        self.calls.push(Call::Cancel(id));

        if self.failing_cancels.contains(&id.0) {
            Err(SchedulerError::Failed {
                command: String::from("scancel"),
                status: String::from("1"),
                stderr: format!("Invalid job id specified: {id}"),
            })
        } else {
            Ok(())
        }
    }

    fn release(&mut self, id: JobId) -> Result<(), SchedulerError> {
        self.calls.push(Call::Release(id));

        if self.failing_releases.contains(&id.0) {
            Err(SchedulerError::Failed {
                command: String::from("scontrol"),
                status: String::from("1"),
                stderr: format!("Job {id} is not held"),
            })
        } else {
            Ok(())
        }
    }
}
