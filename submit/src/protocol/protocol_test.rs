use super::{ProtocolError, TwinJobs, TwinProtocol};
use crate::executors::{
    testing::{Call, ScriptedScheduler},
    Device, JobId, SubmissionRequest,
};
use std::path::PathBuf;

fn request(device: Device) -> SubmissionRequest {
    SubmissionRequest {
        name: String::from("sweep/lr=0.1"),
        log_path: PathBuf::from("sweep/lr=0.1/output.txt"),
        options: match device {
            Device::Gpu => vec![String::from("--gres=gpu:1")],
            Device::Cpu => Vec::new(),
        },
        runner: String::from("train.sh"),
        directory: PathBuf::from("sweep/lr=0.1"),
        device,
        twin: None,
        hold: false,
    }
}

fn run(scheduler: &mut ScriptedScheduler, max_attempts: u32) -> Result<TwinJobs, ProtocolError> {
    TwinProtocol::new(scheduler, max_attempts).submit(&request(Device::Gpu), &request(Device::Cpu))
}

#[test]
pub fn contiguous_ids_succeed_on_first_attempt() {
    let mut scheduler = ScriptedScheduler::with_ids([100, 101, 102]);

    let jobs = run(&mut scheduler, 8).unwrap();

    assert_eq!(
        jobs,
        TwinJobs {
            gpu: JobId(101),
            cpu: JobId(102),
            attempts: 1
        }
    );

    let probe = SubmissionRequest {
        name: String::from("sweep/lr=0.1-probe"),
        hold: true,
        ..request(Device::Cpu)
    };
    let gpu = request(Device::Gpu).held().with_twin(JobId(102));
    let cpu = request(Device::Cpu).held().with_twin(JobId(101));

    assert_eq!(
        scheduler.calls,
        vec![
            Call::Submit(probe, JobId(100)),
            Call::Submit(gpu, JobId(101)),
            Call::Submit(cpu, JobId(102)),
            Call::Cancel(JobId(100)),
            Call::Release(JobId(101)),
            Call::Release(JobId(102)),
        ]
    );
}

#[test]
pub fn twins_reference_each_other() {
    let mut scheduler = ScriptedScheduler::with_ids([7, 8, 9]);

    let jobs = run(&mut scheduler, 8).unwrap();

    let submissions = scheduler.submissions();
    let (gpu, gpu_id) = submissions[1];
    let (cpu, cpu_id) = submissions[2];
    assert_eq!((gpu_id, cpu_id), (jobs.gpu, jobs.cpu));
    assert_eq!(gpu.twin, Some(cpu_id));
    assert_eq!(cpu.twin, Some(gpu_id));
    assert_eq!(gpu.device, Device::Gpu);
    assert_eq!(cpu.device, Device::Cpu);
}

#[test]
pub fn interleaved_submission_triggers_retry() {
    // another user grabbed 101 and 102 between our probe and our submissions
    let mut scheduler = ScriptedScheduler::with_ids([100, 103, 104, 105, 106, 107]);

    let jobs = run(&mut scheduler, 8).unwrap();

    assert_eq!(
        jobs,
        TwinJobs {
            gpu: JobId(106),
            cpu: JobId(107),
            attempts: 2
        }
    );
    assert_eq!(
        scheduler.cancelled(),
        vec![JobId(100), JobId(103), JobId(104), JobId(105)]
    );
    assert_eq!(scheduler.released(), vec![JobId(106), JobId(107)]);
    assert_eq!(
        scheduler.submissions()[4].0.twin,
        Some(JobId(107)),
        "second attempt must use the new prediction"
    );
}

#[test]
pub fn partial_mismatch_also_retries() {
    let mut scheduler = ScriptedScheduler::with_ids([100, 101, 103, 200, 201, 202]);

    let jobs = run(&mut scheduler, 8).unwrap();

    assert_eq!((jobs.gpu, jobs.cpu), (JobId(201), JobId(202)));
    assert_eq!(
        scheduler.cancelled(),
        vec![JobId(100), JobId(101), JobId(103), JobId(200)]
    );
}

#[test]
pub fn probe_is_cancelled_before_verification() {
    let mut scheduler = ScriptedScheduler::with_ids([100, 103, 104, 105, 106, 107]);

    run(&mut scheduler, 8).unwrap();

    // the probe cancel always directly follows the two real submissions
    for (index, call) in scheduler.calls.iter().enumerate() {
        if let Call::Submit(request, probe) = call {
            if request.name.ends_with("-probe") {
                assert_eq!(scheduler.calls[index + 3], Call::Cancel(*probe));
            }
        }
    }
}

#[test]
pub fn gives_up_after_max_attempts() {
    let mut scheduler = ScriptedScheduler::with_ids([1, 3, 4, 10, 12, 13]);

    let result = run(&mut scheduler, 2);

    assert!(matches!(result, Err(ProtocolError::Exhausted { attempts: 2 })));
    assert_eq!(
        scheduler.cancelled(),
        [1, 3, 4, 10, 12, 13].map(JobId).to_vec()
    );
    assert!(scheduler.released().is_empty());
}

#[test]
pub fn zero_max_attempts_retries_until_match() {
    let mut scheduler =
        ScriptedScheduler::with_ids([1, 3, 4, 5, 7, 8, 9, 11, 12, 20, 21, 22]);

    let jobs = run(&mut scheduler, 0).unwrap();

    assert_eq!(jobs.attempts, 4);
    assert_eq!((jobs.gpu, jobs.cpu), (JobId(21), JobId(22)));
}

#[test]
pub fn failed_submission_cleans_up_attempt() {
    // the CPU submission fails because no id is left
    let mut scheduler = ScriptedScheduler::with_ids([100, 101]);

    let result = run(&mut scheduler, 8);

    assert!(matches!(result, Err(ProtocolError::Scheduler(_))));
    assert_eq!(scheduler.cancelled(), vec![JobId(100), JobId(101)]);
    assert!(scheduler.released().is_empty());
}

#[test]
pub fn failed_probe_submission_submits_nothing_else() {
    let mut scheduler = ScriptedScheduler::with_ids([]);

    assert!(run(&mut scheduler, 8).is_err());
    assert!(scheduler.calls.is_empty());
}

#[test]
pub fn failed_probe_cancel_is_surfaced() {
    let mut scheduler = ScriptedScheduler::with_ids([100, 101, 102]);
    scheduler.failing_cancels.insert(100);

    let result = run(&mut scheduler, 8);

    assert!(matches!(result, Err(ProtocolError::Scheduler(_))));
    assert_eq!(
        scheduler.cancelled(),
        vec![JobId(100), JobId(101), JobId(102)]
    );
    assert!(scheduler.released().is_empty());
}

#[test]
pub fn failed_cancel_of_mismatched_jobs_is_surfaced() {
    let mut scheduler = ScriptedScheduler::with_ids([100, 103, 104, 105, 106, 107]);
    scheduler.failing_cancels.insert(103);

    let result = run(&mut scheduler, 8);

    assert!(matches!(result, Err(ProtocolError::Scheduler(_))));
    // 104 is still cancelled although cancelling 103 failed
    assert_eq!(
        scheduler.cancelled(),
        vec![JobId(100), JobId(103), JobId(104)]
    );
}

#[test]
pub fn failed_release_cancels_both_jobs() {
    let mut scheduler = ScriptedScheduler::with_ids([100, 101, 102]);
    scheduler.failing_releases.insert(102);

    let result = run(&mut scheduler, 8);

    assert!(matches!(result, Err(ProtocolError::Scheduler(_))));
    assert_eq!(
        scheduler.calls[3..],
        [
            Call::Cancel(JobId(100)),
            Call::Release(JobId(101)),
            Call::Release(JobId(102)),
            Call::Cancel(JobId(101)),
            Call::Cancel(JobId(102)),
        ]
    );
}
