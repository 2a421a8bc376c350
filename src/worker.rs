use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::errors::{JobQueueError, WorkerError, WorkerResult};
use crate::jobs::{JobQueue, JobStatus};
use crate::models::{result_job_error, JobArgs, JobError, JobType, KojiFinalizeJob};

/// A job handed to a worker, with the results of its dependencies in
/// dependency order.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedJob {
    pub id: Uuid,
    pub token: Uuid,
    pub job_type: JobType,
    pub args: Value,
    pub dependencies: Vec<Uuid>,
    pub dynamic_args: Vec<Value>,
}

pub fn valid_artifact_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains("..") && name != "."
}

/// Typed access to the job queue plus the artifact filesystem.
pub struct WorkerServer {
    queue: JobQueue,
    artifacts_dir: PathBuf,
    config: WorkerConfig,
}

impl WorkerServer {
    pub fn new(queue: JobQueue, artifacts_dir: PathBuf, config: WorkerConfig) -> io::Result<Self> {
        fs::create_dir_all(artifacts_dir.join("tmp"))?;
        Ok(WorkerServer {
            queue,
            artifacts_dir,
            config,
        })
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    fn tmp_dir(&self, token: Uuid) -> PathBuf {
        self.artifacts_dir.join("tmp").join(token.to_string())
    }

    pub fn enqueue<A: JobArgs>(
        &self,
        args: &A,
        deps: &[Uuid],
        channel: &str,
        arch: &str,
    ) -> WorkerResult<Uuid> {
        let value = serde_json::to_value(args)?;
        Ok(self.queue.enqueue(A::JOB_TYPE, value, deps, channel, arch)?)
    }

    /// Enqueues a job workers can't see until it is released.
    pub fn enqueue_held<A: JobArgs>(
        &self,
        args: &A,
        deps: &[Uuid],
        channel: &str,
        arch: &str,
    ) -> WorkerResult<Uuid> {
        let value = serde_json::to_value(args)?;
        Ok(self.queue.enqueue_held(A::JOB_TYPE, value, deps, channel, arch)?)
    }

    pub fn release(&self, ids: &[Uuid]) -> WorkerResult<()> {
        Ok(self.queue.release(ids)?)
    }

    /// KojiFinalize waits on the init job and every build. Held like the
    /// rest of the graph it closes.
    pub fn enqueue_koji_finalize(
        &self,
        args: &KojiFinalizeJob,
        init_id: Uuid,
        build_ids: &[Uuid],
        channel: &str,
    ) -> WorkerResult<Uuid> {
        let mut deps = vec![init_id];
        deps.extend_from_slice(build_ids);
        self.enqueue_held(args, &deps, channel, "")
    }

    pub fn job_type(&self, id: Uuid) -> WorkerResult<JobType> {
        Ok(self.queue.job_status(id)?.job_type)
    }

    fn check_type(&self, id: Uuid, found: JobType, expected: JobType) -> WorkerResult<()> {
        if found != expected {
            return Err(WorkerError::WrongJobType {
                id,
                expected,
                found,
            });
        }
        Ok(())
    }

    pub fn job<A: JobArgs>(&self, id: Uuid) -> WorkerResult<A> {
        let definition = self.queue.job(id)?;
        self.check_type(id, definition.job_type, A::JOB_TYPE)?;
        Ok(serde_json::from_value(definition.args)?)
    }

    /// The typed result, zero-valued while the job is unfinished, with the
    /// job's status.
    pub fn job_info<A: JobArgs>(&self, id: Uuid) -> WorkerResult<(A::Result, JobStatus)> {
        let status = self.queue.job_status(id)?;
        self.check_type(id, status.job_type, A::JOB_TYPE)?;
        let result = match &status.result {
            Some(value) if status.is_finished() => serde_json::from_value(value.clone())?,
            _ => A::Result::default(),
        };
        Ok((result, status))
    }

    pub fn job_status(&self, id: Uuid) -> WorkerResult<JobStatus> {
        Ok(self.queue.job_status(id)?)
    }

    /// The job's error, with dependency errors expanded into the errors of
    /// the dependencies that caused them.
    pub fn job_dependency_chain_errors(&self, id: Uuid) -> WorkerResult<Option<JobError>> {
        let status = self.queue.job_status(id)?;
        let error = match status.result.as_ref().and_then(result_job_error) {
            Some(error) => error,
            None => return Ok(None),
        };
        if !error.is_dependency_error() {
            return Ok(Some(error));
        }

        let mut children = vec![];
        for dep in status.dependencies.iter() {
            if let Some(child) = self.job_dependency_chain_errors(*dep)? {
                children.push(json!(child));
            }
        }
        if children.is_empty() {
            return Ok(Some(error));
        }
        Ok(Some(JobError {
            details: Some(Value::Array(children)),
            ..error
        }))
    }

    fn dynamic_args(&self, dependencies: &[Uuid]) -> WorkerResult<Vec<Value>> {
        dependencies
            .iter()
            .map(|dep| {
                let status = self.queue.job_status(*dep)?;
                Ok(status.result.unwrap_or(Value::Null))
            })
            .collect()
    }

    fn assign(&self, job: crate::jobs::DequeuedJob) -> WorkerResult<AssignedJob> {
        let dynamic_args = self.dynamic_args(&job.dependencies)?;
        fs::create_dir_all(self.tmp_dir(job.token))?;
        Ok(AssignedJob {
            id: job.id,
            token: job.token,
            job_type: job.job_type,
            args: job.args,
            dependencies: job.dependencies,
            dynamic_args,
        })
    }

    /// Waits for a job of one of `types` for the worker's arch and channel.
    /// `None` when nothing arrived in time.
    pub async fn request_job(
        &self,
        types: &[JobType],
        arch: &str,
        channel: &str,
    ) -> WorkerResult<Option<AssignedJob>> {
        let arches = vec![arch.to_string()];
        let channels = vec![channel.to_string()];
        match self
            .queue
            .dequeue(self.config.request_job_timeout(), types, &arches, &channels)
            .await
        {
            Ok(job) => Ok(Some(self.assign(job)?)),
            Err(JobQueueError::DequeueTimeout) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn request_job_by_id(&self, id: Uuid) -> WorkerResult<AssignedJob> {
        let job = self.queue.dequeue_by_id(id)?;
        self.assign(job)
    }

    pub fn finish_job(&self, token: Uuid, result: Value) -> WorkerResult<()> {
        let id = self.queue.id_from_token(token)?;
        self.queue.finish_job(token, result)?;

        let tmp = self.tmp_dir(token);
        if tmp.exists() {
            let dest = self.artifacts_dir.join(id.to_string());
            if let Err(e) = move_dir(&tmp, &dest) {
                error!("Error moving artifacts of job {} into place: {}", id, e);
            }
        }
        Ok(())
    }

    pub fn fail_job(&self, id: Uuid, error: JobError) -> WorkerResult<()> {
        Ok(self.queue.fail_job(id, error)?)
    }

    pub fn cancel(&self, id: Uuid) -> WorkerResult<()> {
        Ok(self.queue.cancel_job(id)?)
    }

    /// Whether the job behind a live token was canceled.
    pub fn job_canceled(&self, token: Uuid) -> WorkerResult<bool> {
        let id = self.queue.running_job_id(token)?;
        Ok(self.queue.job_status(id)?.canceled)
    }

    pub fn refresh_heartbeat(&self, token: Uuid) {
        self.queue.refresh_heartbeat(token)
    }

    /// Tokens that missed two heartbeat intervals.
    pub fn stale_tokens(&self) -> Vec<Uuid> {
        self.queue.heartbeats(self.config.heartbeat_interval() * 2)
    }

    pub fn requeue_or_fail(&self, token: Uuid) -> WorkerResult<bool> {
        let requeued = self
            .queue
            .requeue_or_fail(token, self.config.max_heartbeat_retries)?;
        let tmp = self.tmp_dir(token);
        if tmp.exists() {
            if let Err(e) = fs::remove_dir_all(&tmp) {
                warn!("Error discarding artifacts of token {}: {}", token, e);
            }
        }
        Ok(requeued)
    }

    /// Where a worker's upload for a running job is written.
    pub fn artifact_upload_path(&self, token: Uuid, name: &str) -> WorkerResult<PathBuf> {
        if !valid_artifact_name(name) {
            return Err(WorkerError::InvalidArtifactName(name.to_string()));
        }
        self.queue.running_job_id(token)?;
        let dir = self.tmp_dir(token);
        fs::create_dir_all(&dir)?;
        Ok(dir.join(name))
    }

    /// An artifact of a finished job.
    pub fn job_artifact_location(&self, id: Uuid, name: &str) -> WorkerResult<PathBuf> {
        if !valid_artifact_name(name) {
            return Err(WorkerError::InvalidArtifactName(name.to_string()));
        }
        let status = self.queue.job_status(id)?;
        if !status.is_finished() {
            return Err(WorkerError::ArtifactNotFound);
        }
        let path = self.artifacts_dir.join(id.to_string()).join(name);
        if !path.is_file() {
            return Err(WorkerError::ArtifactNotFound);
        }
        Ok(path)
    }

    pub fn all_root_job_ids(&self) -> Vec<Uuid> {
        self.queue.all_root_job_ids()
    }

    /// Deletes a job tree and the artifacts of every job removed.
    pub fn delete_job(&self, id: Uuid) -> WorkerResult<Vec<Uuid>> {
        let deleted = self.queue.delete_job(id)?;
        for job_id in deleted.iter() {
            let dir = self.artifacts_dir.join(job_id.to_string());
            if dir.exists() {
                if let Err(e) = fs::remove_dir_all(&dir) {
                    warn!("Error removing artifacts of job {}: {}", job_id, e);
                }
            }
        }
        Ok(deleted)
    }

    /// Polls until the job finishes or is canceled.
    pub async fn wait_for_job(&self, id: Uuid, timeout: Duration) -> WorkerResult<JobStatus> {
        let start = Instant::now();
        loop {
            let status = self.queue.job_status(id)?;
            if status.is_finished() || status.canceled {
                return Ok(status);
            }
            if start.elapsed() > timeout {
                debug!("Gave up waiting for job {}", id);
                return Err(JobQueueError::DequeueTimeout.into());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Reclaims every job whose worker stopped sending heartbeats.
    pub fn reap_stale_jobs(&self) {
        for token in self.stale_tokens() {
            match self.requeue_or_fail(token) {
                Ok(true) => info!("Requeued job with stale token {}", token),
                Ok(false) => info!("Failed job with stale token {}", token),
                Err(e) => warn!("Error reclaiming token {}: {}", token, e),
            }
        }
    }
}

fn move_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}
