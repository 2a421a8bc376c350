mod job_queue;
mod reaper;
mod store;

pub use job_queue::{DequeuedJob, JobDefinition, JobQueue, JobStatus};
pub use reaper::{start_heartbeat_reaper, HeartbeatReaper, ReapNow, StopHeartbeatReaper};

/**************************************************************************
 * Job handling - theory of operations.
 *
 * Every unit of work (depsolve, manifest, build, upload, koji) is a job in
 * a single queue. Jobs are kept in memory and each change is written
 * through to one json file per job under <state-dir>/jobs, so the queue
 * survives a restart.
 *
 * A job goes through these states:
 *   Pending  - queued, waiting for its dependencies or for a worker
 *   Running  - handed to a worker, which holds a fresh token for it
 *   Finished - a result was stored, or it failed or was canceled
 *
 * A job only becomes pending once all its dependencies finished
 * successfully. When a dependency fails or is canceled, the failure is
 * pushed down to every dependent as a synthetic dependency error, so a
 * compose never hangs on a job that can no longer run.
 *
 * Workers long-poll for pending jobs of the types, arch and channel they
 * serve and get them in enqueue order. The token is the only way a worker
 * can touch the job. A running worker must keep sending heartbeats; the
 * HeartbeatReaper actor hands jobs of silent workers out again under a new
 * token, and fails them once they ran out of retries.
 *
 * Manifest jobs are never handed to workers. The server serializes them
 * itself once their depsolve and resolve dependencies are done.
 *
 ************************************************************************/
