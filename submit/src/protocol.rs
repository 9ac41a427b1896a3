#[cfg(test)]
mod protocol_test;

use crate::executors::{JobId, Scheduler, SchedulerError, SubmissionRequest};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("job ids did not match the prediction in {attempts} attempts, giving up")]
    Exhausted { attempts: u32 },
}

/// identifiers of a released GPU/CPU pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TwinJobs {
    pub gpu: JobId,
    pub cpu: JobId,
    pub attempts: u32,
}

/// Submits a GPU job and a CPU job that each know the id of the other one.
///
/// Every attempt submits a held probe job to observe the next id, predicts that the GPU job
/// gets `probe + 1` and the CPU job `probe + 2`, submits both held with the predicted twin ids,
/// cancels the probe and releases both jobs only if the scheduler assigned exactly the
/// predicted ids. Otherwise both jobs are cancelled and the attempt is repeated.
///
/// Precondition: without interference from other submitters the scheduler assigns strictly
/// increasing, contiguous ids. On a scheduler that doesn't, every attempt mismatches and the
/// protocol ends with [`ProtocolError::Exhausted`].
pub struct TwinProtocol<'a, S> {
    scheduler: &'a mut S,
    // 0 retries forever
    max_attempts: u32,
}

impl<'a, S: Scheduler> TwinProtocol<'a, S> {
    pub fn new(scheduler: &'a mut S, max_attempts: u32) -> Self {
        Self {
            scheduler,
            max_attempts,
        }
    }

    #[instrument(skip_all, level = "info", fields(name = %gpu.name))]
    pub fn submit(
        &mut self,
        gpu: &SubmissionRequest,
        cpu: &SubmissionRequest,
    ) -> Result<TwinJobs, ProtocolError> {
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);

            if let Some((gpu_id, cpu_id)) = self.attempt(gpu, cpu)? {
                info!(gpu = %gpu_id, cpu = %cpu_id, attempts, "Released twin jobs");

                return Ok(TwinJobs {
                    gpu: gpu_id,
                    cpu: cpu_id,
                    attempts,
                });
            }

            if self.max_attempts != 0 && attempts >= self.max_attempts {
                error!(attempts, "Giving up on predicting job ids");

                return Err(ProtocolError::Exhausted { attempts });
            }
        }
    }

    /// one probe, submit, verify round; `None` if the ids didn't match the prediction
    fn attempt(
        &mut self,
        gpu: &SubmissionRequest,
        cpu: &SubmissionRequest,
    ) -> Result<Option<(JobId, JobId)>, SchedulerError> {
        let mut probe_request = cpu.clone().held();
        probe_request.name.push_str("-probe");
        probe_request.twin = None;

        let probe = self.scheduler.submit(&probe_request)?.id;
        let predicted_gpu = probe.offset(1);
        let predicted_cpu = probe.offset(2);
        debug!(probe = %probe, gpu = %predicted_gpu, cpu = %predicted_cpu, "Predicted job ids");

        let gpu_id = match self
            .scheduler
            .submit(&gpu.clone().held().with_twin(predicted_cpu))
        {
            Ok(job) => job.id,
            Err(error) => {
                self.discard(&[probe]);
                return Err(error);
            }
        };

        let cpu_id = match self
            .scheduler
            .submit(&cpu.clone().held().with_twin(predicted_gpu))
        {
            Ok(job) => job.id,
            Err(error) => {
                self.discard(&[probe, gpu_id]);
                return Err(error);
            }
        };

        if let Err(error) = self.scheduler.cancel(probe) {
            error!(probe = %probe, error = %error, "Failed to cancel probe job");
            self.discard(&[gpu_id, cpu_id]);
            return Err(error);
        }

        if gpu_id != predicted_gpu || cpu_id != predicted_cpu {
            warn!(
                gpu = %gpu_id,
                cpu = %cpu_id,
                predicted_gpu = %predicted_gpu,
                predicted_cpu = %predicted_cpu,
                "Job ids did not match the prediction, another submission interleaved"
            );
            self.cancel_all(&[gpu_id, cpu_id])?;

            return Ok(None);
        }

        for id in [gpu_id, cpu_id] {
            if let Err(error) = self.scheduler.release(id) {
                self.discard(&[gpu_id, cpu_id]);
                return Err(error);
            }
        }

        Ok(Some((gpu_id, cpu_id)))
    }

    /// cancel every job, even if an earlier cancel failed, and report the first failure
    fn cancel_all(&mut self, ids: &[JobId]) -> Result<(), SchedulerError> {
        let mut first_error = None;

        for &id in ids {
            if let Err(error) = self.scheduler.cancel(id) {
                first_error.get_or_insert(error);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// cleanup on the error path, the triggering error wins over cleanup failures
    fn discard(&mut self, ids: &[JobId]) {
        if let Err(error) = self.cancel_all(ids) {
            error!(
                error = %error,
                ids = ?ids,
                "Failed to cancel jobs, they may have to be removed manually"
            );
        }
    }
}
