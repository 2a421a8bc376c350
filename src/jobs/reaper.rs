use actix::prelude::*;
use log::info;
use std::sync::Arc;
use std::time::Duration;

use crate::worker::WorkerServer;

// The reaper only looks at heartbeats, so it runs more often than workers
// send them.
const REAP_INTERVAL_DIVISOR: u32 = 2;

pub struct HeartbeatReaper {
    server: Arc<WorkerServer>,
    interval: Duration,
    running: bool,
}

impl HeartbeatReaper {
    fn reap(&mut self) {
        if self.running {
            self.server.reap_stale_jobs();
        }
    }
}

impl Actor for HeartbeatReaper {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        ctx.run_interval(self.interval, |reaper, _ctx| reaper.reap());
    }
}

pub struct ReapNow();

impl Message for ReapNow {
    type Result = ();
}

impl Handler<ReapNow> for HeartbeatReaper {
    type Result = ();

    fn handle(&mut self, _msg: ReapNow, _ctx: &mut Self::Context) -> Self::Result {
        self.reap();
    }
}

pub struct StopHeartbeatReaper();

impl Message for StopHeartbeatReaper {
    type Result = ();
}

impl Handler<StopHeartbeatReaper> for HeartbeatReaper {
    type Result = ();

    fn handle(&mut self, _msg: StopHeartbeatReaper, ctx: &mut Self::Context) -> Self::Result {
        info!("Stopping heartbeat reaper");
        self.running = false;
        ctx.stop();
    }
}

pub fn start_heartbeat_reaper(server: Arc<WorkerServer>) -> Addr<HeartbeatReaper> {
    let interval = (server.config().heartbeat_interval() / REAP_INTERVAL_DIVISOR)
        .max(Duration::from_millis(100));
    HeartbeatReaper {
        server,
        interval,
        running: true,
    }
    .start()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::jobs::JobQueue;
    use crate::models::{DepsolveJob, JobType};
    use serde_json::json;

    #[actix_web::test]
    async fn test_reaper_fails_abandoned_job() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JobQueue::open(dir.path().join("jobs")).unwrap();
        let config = WorkerConfig {
            heartbeat_interval_secs: 0,
            request_job_timeout_secs: 0,
            max_heartbeat_retries: 0,
        };
        let server =
            Arc::new(WorkerServer::new(queue, dir.path().join("artifacts"), config).unwrap());
        let id = server.enqueue(&DepsolveJob::default(), &[], "", "").unwrap();
        server
            .request_job(&[JobType::Depsolve], "x86_64", "")
            .await
            .unwrap()
            .unwrap();

        let reaper = start_heartbeat_reaper(server.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
        reaper.send(ReapNow()).await.unwrap();

        let status = server.job_status(id).unwrap();
        assert!(status.is_finished());
        assert_eq!(status.result.unwrap()["job_error"]["id"], json!(39));

        reaper.send(StopHeartbeatReaper()).await.unwrap();
    }
}
