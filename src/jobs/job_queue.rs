use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

use super::store::{FsStore, StoredJob};
use crate::errors::{JobQueueError, JobQueueResult};
use crate::models::{clienterrors, dependency_error, result_is_failure, JobError, JobResult, JobType};

/// Everything the queue knows about a job's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub job_type: JobType,
    pub channel: String,
    pub result: Option<Value>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub canceled: bool,
    pub dependencies: Vec<Uuid>,
    pub dependents: Vec<Uuid>,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.is_finished()
            && !self.canceled
            && self.result.as_ref().map(|r| !result_is_failure(r)).unwrap_or(false)
    }
}

/// A job as it was enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDefinition {
    pub job_type: JobType,
    pub args: Value,
    pub dependencies: Vec<Uuid>,
    pub channel: String,
    pub arch: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DequeuedJob {
    pub id: Uuid,
    pub token: Uuid,
    pub job_type: JobType,
    pub args: Value,
    pub dependencies: Vec<Uuid>,
    pub channel: String,
}

enum DependencyState {
    Succeeded,
    Failed(JobType),
    Waiting,
}

enum Evaluation {
    Pending,
    Finished,
    Waiting,
}

fn succeeded(job: &StoredJob) -> bool {
    job.is_finished()
        && !job.canceled
        && job.result.as_ref().map(|r| !result_is_failure(r)).unwrap_or(false)
}

fn matches_filter(job: &StoredJob, types: &[JobType], arches: &[String], channels: &[String]) -> bool {
    let type_ok = types.contains(&job.job_type);
    let arch_ok = job.arch.is_empty()
        || arches.iter().any(|a| *a == job.arch)
        || (arches.len() == 1 && arches[0] == "*");
    let channel_ok =
        channels.iter().any(|c| *c == job.channel) || (channels.len() == 1 && channels[0].is_empty());
    type_ok && arch_ok && channel_ok
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, StoredJob>,
    dependents: HashMap<Uuid, Vec<Uuid>>,
    // Enqueue order, the dequeue order within a bucket
    seq: HashMap<Uuid, u64>,
    pending: BTreeMap<u64, Uuid>,
    tokens: HashMap<Uuid, Uuid>,
    heartbeats: HashMap<Uuid, Instant>,
    // Enqueued but not yet released to workers
    held: HashSet<Uuid>,
    next_seq: u64,
}

impl QueueState {
    fn get(&self, id: &Uuid) -> JobQueueResult<&StoredJob> {
        self.jobs.get(id).ok_or(JobQueueError::NotExist)
    }

    fn dependents_of(&self, id: &Uuid) -> Vec<Uuid> {
        self.dependents.get(id).cloned().unwrap_or_default()
    }

    fn is_pending(&self, id: &Uuid) -> bool {
        self.seq
            .get(id)
            .map(|seq| self.pending.contains_key(seq))
            .unwrap_or(false)
    }

    fn remove_pending(&mut self, id: &Uuid) {
        if let Some(seq) = self.seq.get(id) {
            self.pending.remove(seq);
        }
    }

    fn track(&mut self, job: &StoredJob) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.seq.insert(job.id, seq);
        for dep in job.dependencies.iter() {
            self.dependents.entry(*dep).or_default().push(job.id);
        }
    }

    // Disk first, so a failed write leaves memory untouched.
    fn save(&mut self, store: &FsStore, job: StoredJob) -> JobQueueResult<()> {
        store.write(&job)?;
        self.jobs.insert(job.id, job);
        Ok(())
    }

    fn dependency_state(&self, job: &StoredJob) -> JobQueueResult<DependencyState> {
        let mut waiting = false;
        for dep_id in job.dependencies.iter() {
            let dep = self
                .jobs
                .get(dep_id)
                .ok_or(JobQueueError::DepsNotExist(*dep_id))?;
            if dep.canceled || (dep.is_finished() && !succeeded(dep)) {
                return Ok(DependencyState::Failed(dep.job_type));
            }
            if !dep.is_finished() {
                waiting = true;
            }
        }
        Ok(if waiting {
            DependencyState::Waiting
        } else {
            DependencyState::Succeeded
        })
    }

    /// Re-evaluates a job that has not started yet against its dependencies.
    fn evaluate(&mut self, store: &FsStore, id: Uuid) -> JobQueueResult<Evaluation> {
        let job = self.get(&id)?.clone();
        // Canceled jobs stay as cancel left them, on reopen too
        if job.started_at.is_some()
            || job.is_finished()
            || job.canceled
            || self.held.contains(&id)
        {
            return Ok(Evaluation::Waiting);
        }

        match self.dependency_state(&job)? {
            DependencyState::Succeeded => {
                if !self.is_pending(&id) {
                    if let Some(seq) = self.seq.get(&id) {
                        self.pending.insert(*seq, id);
                    }
                    debug!("Job {} ({}) is now pending", id, job.job_type);
                }
                Ok(Evaluation::Pending)
            }
            DependencyState::Failed(failed_type) => {
                let mut job = job;
                let error = dependency_error(job.job_type, failed_type);
                info!(
                    "Job {} ({}) failed because a {} dependency failed",
                    id, job.job_type, failed_type
                );
                let now = Utc::now();
                job.started_at = Some(now);
                job.finished_at = Some(now);
                job.result = Some(json!(JobResult::failed(error)));
                self.save(store, job)?;
                self.remove_pending(&id);
                Ok(Evaluation::Finished)
            }
            DependencyState::Waiting => Ok(Evaluation::Waiting),
        }
    }

    fn cancel_one(&mut self, store: &FsStore, id: Uuid) -> JobQueueResult<()> {
        let job = self.get(&id)?;
        if job.is_finished() || job.canceled {
            return Ok(());
        }
        let mut job = job.clone();
        job.canceled = true;
        self.save(store, job)?;
        self.remove_pending(&id);
        info!("Canceled job {}", id);
        Ok(())
    }

    /// Walks the forward edges from `root`. In cancel mode every unfinished
    /// descendant is canceled; otherwise each dependent is re-evaluated and
    /// failures continue down the graph. Returns whether a job became pending.
    fn propagate(&mut self, store: &FsStore, root: Uuid, cancel: bool) -> JobQueueResult<bool> {
        let mut queue: VecDeque<Uuid> = self.dependents_of(&root).into();
        let mut seen = HashSet::new();
        let mut wake = false;

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let descend = if cancel {
                self.cancel_one(store, id)?;
                true
            } else {
                match self.evaluate(store, id)? {
                    Evaluation::Pending => {
                        wake = true;
                        false
                    }
                    Evaluation::Finished => true,
                    Evaluation::Waiting => false,
                }
            };
            if descend {
                queue.extend(self.dependents_of(&id));
            }
        }

        Ok(wake)
    }

    fn start(&mut self, store: &FsStore, id: Uuid) -> JobQueueResult<DequeuedJob> {
        let mut job = self.get(&id)?.clone();
        let token = Uuid::new_v4();
        job.token = Some(token);
        job.started_at = Some(Utc::now());
        self.save(store, job.clone())?;
        self.remove_pending(&id);
        self.tokens.insert(token, id);
        self.heartbeats.insert(token, Instant::now());
        info!("Dequeued {} job {} (token {})", job.job_type, id, token);

        Ok(DequeuedJob {
            id,
            token,
            job_type: job.job_type,
            args: job.args,
            dependencies: job.dependencies,
            channel: job.channel,
        })
    }

    /// The job a live token belongs to.
    fn running_job(&self, token: &Uuid) -> JobQueueResult<StoredJob> {
        let id = self.tokens.get(token).ok_or(JobQueueError::NotExist)?;
        let job = self.get(id)?;
        if job.token != Some(*token) || !job.is_running() {
            return Err(JobQueueError::NotRunning);
        }
        Ok(job.clone())
    }

    fn status(&self, job: &StoredJob) -> JobStatus {
        JobStatus {
            job_type: job.job_type,
            channel: job.channel.clone(),
            result: job.result.clone(),
            queued_at: job.queued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            canceled: job.canceled,
            dependencies: job.dependencies.clone(),
            dependents: self.dependents_of(&job.id),
        }
    }
}

/// The durable job graph. All operations are serialized by one lock; the
/// state is mirrored in memory and written through to one file per job.
pub struct JobQueue {
    store: FsStore,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    pub fn open(dir: PathBuf) -> JobQueueResult<JobQueue> {
        let store = FsStore::open(dir)?;
        let mut jobs = store.load_all()?;
        jobs.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then(a.id.cmp(&b.id)));

        let mut state = QueueState::default();
        let ids: Vec<Uuid> = jobs.iter().map(|j| j.id).collect();
        for job in jobs.into_iter() {
            state.jobs.insert(job.id, job);
        }

        let mut running = 0;
        for id in ids.iter() {
            let job = state.get(id)?.clone();
            for dep in job.dependencies.iter() {
                if !state.jobs.contains_key(dep) {
                    return Err(JobQueueError::Corrupt(format!(
                        "job {id} depends on missing job {dep}"
                    )));
                }
            }
            state.track(&job);
            if let Some(token) = job.token {
                state.tokens.insert(token, job.id);
                if job.is_running() {
                    state.heartbeats.insert(token, Instant::now());
                    running += 1;
                }
            } else if job.is_running() {
                return Err(JobQueueError::Corrupt(format!("running job {id} has no token")));
            }
        }

        for id in ids.iter() {
            state.evaluate(&store, *id)?;
        }

        info!(
            "Loaded {} jobs ({} pending, {} running)",
            ids.len(),
            state.pending.len(),
            running
        );

        Ok(JobQueue {
            store,
            state: Mutex::new(state),
            notify: Notify::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_waiters(&self) {
        self.notify.notify_waiters();
    }

    pub fn enqueue(
        &self,
        job_type: JobType,
        args: Value,
        deps: &[Uuid],
        channel: &str,
        arch: &str,
    ) -> JobQueueResult<Uuid> {
        self.insert(job_type, args, deps, channel, arch, false)
    }

    /// Like [`JobQueue::enqueue`], but the job is not handed to workers until
    /// [`JobQueue::release`]. Lets a caller build a whole graph and still
    /// delete it before anything started.
    pub fn enqueue_held(
        &self,
        job_type: JobType,
        args: Value,
        deps: &[Uuid],
        channel: &str,
        arch: &str,
    ) -> JobQueueResult<Uuid> {
        self.insert(job_type, args, deps, channel, arch, true)
    }

    fn insert(
        &self,
        job_type: JobType,
        args: Value,
        deps: &[Uuid],
        channel: &str,
        arch: &str,
        held: bool,
    ) -> JobQueueResult<Uuid> {
        let mut dependencies: Vec<Uuid> = Vec::with_capacity(deps.len());
        for dep in deps {
            if !dependencies.contains(dep) {
                dependencies.push(*dep);
            }
        }

        let mut state = self.state();
        if let Some(missing) = dependencies.iter().find(|d| !state.jobs.contains_key(d)) {
            return Err(JobQueueError::DepsNotExist(*missing));
        }

        let job = StoredJob {
            id: Uuid::new_v4(),
            job_type,
            args,
            dependencies,
            channel: channel.to_string(),
            arch: arch.to_string(),
            token: None,
            result: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            retries: 0,
            canceled: false,
        };
        let id = job.id;
        state.save(&self.store, job.clone())?;
        state.track(&job);
        if held {
            state.held.insert(id);
        }
        info!("Enqueued {} job {} (channel {:?})", job_type, id, channel);

        let wake = matches!(state.evaluate(&self.store, id)?, Evaluation::Pending);
        drop(state);
        if wake {
            self.wake_waiters();
        }
        Ok(id)
    }

    /// Hands held jobs to workers. Ids that were deleted meanwhile are skipped.
    pub fn release(&self, ids: &[Uuid]) -> JobQueueResult<()> {
        let mut state = self.state();
        let mut wake = false;
        for id in ids {
            if !state.held.remove(id) || !state.jobs.contains_key(id) {
                continue;
            }
            match state.evaluate(&self.store, *id)? {
                Evaluation::Pending => wake = true,
                Evaluation::Finished => wake |= state.propagate(&self.store, *id, false)?,
                Evaluation::Waiting => (),
            }
        }
        drop(state);
        if wake {
            self.wake_waiters();
        }
        Ok(())
    }

    fn try_dequeue(
        &self,
        types: &[JobType],
        arches: &[String],
        channels: &[String],
    ) -> JobQueueResult<Option<DequeuedJob>> {
        let mut state = self.state();
        let found = state
            .pending
            .values()
            .find(|id| {
                state
                    .jobs
                    .get(*id)
                    .map(|job| matches_filter(job, types, arches, channels))
                    .unwrap_or(false)
            })
            .copied();
        match found {
            Some(id) => Ok(Some(state.start(&self.store, id)?)),
            None => Ok(None),
        }
    }

    /// Waits up to `timeout` for an eligible job matching the filters.
    pub async fn dequeue(
        &self,
        timeout: Duration,
        types: &[JobType],
        arches: &[String],
        channels: &[String],
    ) -> JobQueueResult<DequeuedJob> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a wakeup between the two isn't lost
            notified.as_mut().enable();

            if let Some(job) = self.try_dequeue(types, arches, channels)? {
                return Ok(job);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(JobQueueError::DequeueTimeout);
            }
        }
    }

    pub fn dequeue_by_id(&self, id: Uuid) -> JobQueueResult<DequeuedJob> {
        let mut state = self.state();
        let job = state.get(&id)?;
        if job.canceled {
            return Err(JobQueueError::Canceled);
        }
        if !state.is_pending(&id) {
            return Err(JobQueueError::NotPending);
        }
        state.start(&self.store, id)
    }

    pub fn finish_job(&self, token: Uuid, result: Value) -> JobQueueResult<()> {
        let mut state = self.state();
        let mut job = state.running_job(&token)?;
        let id = job.id;

        job.finished_at = Some(Utc::now());
        if job.canceled {
            info!("Discarding result of canceled job {}", id);
            job.result = None;
        } else {
            job.result = Some(result);
        }
        let canceled = job.canceled;
        state.save(&self.store, job)?;
        state.heartbeats.remove(&token);
        info!("Finished job {}", id);

        let wake = if canceled {
            false
        } else {
            state.propagate(&self.store, id, false)?
        };
        drop(state);
        if wake {
            self.wake_waiters();
        }
        Ok(())
    }

    /// Fails a job that has not finished, running or not, with `error` and
    /// cascades the failure.
    pub fn fail_job(&self, id: Uuid, error: JobError) -> JobQueueResult<()> {
        let mut state = self.state();
        let mut job = state.get(&id)?.clone();
        if job.is_finished() {
            return Err(JobQueueError::NotRunning);
        }

        let now = Utc::now();
        if job.started_at.is_none() {
            job.started_at = Some(now);
        }
        job.finished_at = Some(now);
        job.result = Some(json!(JobResult::failed(error)));
        if let Some(token) = job.token {
            state.heartbeats.remove(&token);
        }
        state.save(&self.store, job)?;
        state.remove_pending(&id);
        warn!("Failed job {}", id);

        let wake = state.propagate(&self.store, id, false)?;
        drop(state);
        if wake {
            self.wake_waiters();
        }
        Ok(())
    }

    /// Gives a job whose worker vanished another chance, or fails it for good
    /// once `max_retries` is exhausted. Returns whether it was requeued.
    pub fn requeue_or_fail(&self, token: Uuid, max_retries: u32) -> JobQueueResult<bool> {
        let mut state = self.state();
        let mut job = state.running_job(&token)?;
        let id = job.id;
        state.heartbeats.remove(&token);

        if job.canceled {
            job.finished_at = Some(Utc::now());
            job.result = None;
            state.save(&self.store, job)?;
            info!("Worker of canceled job {} is gone, finishing it", id);
            return Ok(false);
        }

        if job.retries >= max_retries {
            job.finished_at = Some(Utc::now());
            job.canceled = true;
            job.result = Some(json!(JobResult::failed(JobError::new(
                clienterrors::JOB_MISSING_HEARTBEAT,
                "Worker running this job stopped responding",
                None,
            ))));
            state.save(&self.store, job)?;
            error!("Job {} lost its worker {} times, giving up", id, max_retries + 1);
            let wake = state.propagate(&self.store, id, false)?;
            drop(state);
            if wake {
                self.wake_waiters();
            }
            return Ok(false);
        }

        job.token = None;
        job.started_at = None;
        job.retries += 1;
        state.save(&self.store, job)?;
        if let Some(seq) = state.seq.get(&id).copied() {
            state.pending.insert(seq, id);
        }
        warn!("Requeued job {} after its worker vanished", id);
        drop(state);
        self.wake_waiters();
        Ok(true)
    }

    pub fn cancel_job(&self, id: Uuid) -> JobQueueResult<()> {
        let mut state = self.state();
        state.get(&id)?;
        state.cancel_one(&self.store, id)?;
        state.propagate(&self.store, id, true)?;
        Ok(())
    }

    pub fn job_status(&self, id: Uuid) -> JobQueueResult<JobStatus> {
        let state = self.state();
        let job = state.get(&id)?;
        Ok(state.status(job))
    }

    pub fn job(&self, id: Uuid) -> JobQueueResult<JobDefinition> {
        let state = self.state();
        let job = state.get(&id)?;
        Ok(JobDefinition {
            job_type: job.job_type,
            args: job.args.clone(),
            dependencies: job.dependencies.clone(),
            channel: job.channel.clone(),
            arch: job.arch.clone(),
        })
    }

    pub fn id_from_token(&self, token: Uuid) -> JobQueueResult<Uuid> {
        self.state()
            .tokens
            .get(&token)
            .copied()
            .ok_or(JobQueueError::NotExist)
    }

    /// The running job a token belongs to, if the token is still the live one.
    /// Tokens invalidated by a reclaim, or of finished jobs, give `NotRunning`.
    pub fn running_job_id(&self, token: Uuid) -> JobQueueResult<Uuid> {
        self.state().running_job(&token).map(|job| job.id)
    }

    /// Tokens of unfinished jobs not heard from for longer than `older_than`.
    pub fn heartbeats(&self, older_than: Duration) -> Vec<Uuid> {
        let state = self.state();
        let now = Instant::now();
        state
            .heartbeats
            .iter()
            .filter(|(_, last)| now.duration_since(**last) > older_than)
            .filter(|(token, _)| {
                state
                    .tokens
                    .get(*token)
                    .and_then(|id| state.jobs.get(id))
                    .map(|job| !job.is_finished())
                    .unwrap_or(false)
            })
            .map(|(token, _)| *token)
            .collect()
    }

    pub fn refresh_heartbeat(&self, token: Uuid) {
        let mut state = self.state();
        if state.running_job(&token).is_ok() {
            state.heartbeats.insert(token, Instant::now());
        }
    }

    pub fn dependents(&self, id: Uuid) -> JobQueueResult<Vec<Uuid>> {
        let state = self.state();
        state.get(&id)?;
        Ok(state.dependents_of(&id))
    }

    /// Jobs nothing depends on, in enqueue order.
    pub fn all_root_job_ids(&self) -> Vec<Uuid> {
        let state = self.state();
        let mut roots: Vec<(u64, Uuid)> = state
            .jobs
            .keys()
            .filter(|id| state.dependents.get(*id).map_or(true, |d| d.is_empty()))
            .map(|id| (state.seq.get(id).copied().unwrap_or(0), *id))
            .collect();
        roots.sort();
        roots.into_iter().map(|(_, id)| id).collect()
    }

    /// Unfinished, uncanceled jobs of one type in enqueue order.
    pub fn unfinished_jobs(&self, job_type: JobType) -> Vec<Uuid> {
        let state = self.state();
        let mut ids: Vec<(u64, Uuid)> = state
            .jobs
            .values()
            .filter(|j| j.job_type == job_type && !j.is_finished() && !j.canceled)
            .map(|j| (state.seq.get(&j.id).copied().unwrap_or(0), j.id))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Removes a job that nothing depends on, and recursively every
    /// dependency left without dependents. Returns the removed ids.
    pub fn delete_job(&self, id: Uuid) -> JobQueueResult<Vec<Uuid>> {
        let mut state = self.state();
        state.get(&id)?;
        if !state.dependents_of(&id).is_empty() {
            return Err(JobQueueError::HasDependents(id));
        }

        let mut deleted = vec![];
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let job = match state.jobs.get(&id) {
                Some(job) => job.clone(),
                None => continue,
            };
            if !state.dependents_of(&id).is_empty() {
                continue;
            }

            self.store.remove(&id)?;
            state.remove_pending(&id);
            state.jobs.remove(&id);
            state.seq.remove(&id);
            state.dependents.remove(&id);
            state.held.remove(&id);
            state.tokens.retain(|_, job_id| *job_id != id);
            if let Some(token) = job.token {
                state.heartbeats.remove(&token);
            }
            for dep in job.dependencies.iter() {
                if let Some(dependents) = state.dependents.get_mut(dep) {
                    dependents.retain(|d| *d != id);
                }
                stack.push(*dep);
            }
            deleted.push(id);
        }

        info!("Deleted jobs {:?}", deleted);
        Ok(deleted)
    }
}
