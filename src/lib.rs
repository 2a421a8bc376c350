pub mod api;
pub mod app;
pub mod blueprint;
pub mod compose;
pub mod config;
pub mod distro;
pub mod errors;
pub mod jobs;
pub mod logger;
pub mod manifest;
pub mod models;
pub mod planner;
pub mod status;
pub mod targets;
pub mod tokens;
pub mod worker;

use actix::prelude::*;
use actix_web::dev::{Server, ServerHandle};
use actix_web::web::Data;
use actix_web::HttpServer;
use log::{error, info};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

use app::AppState;
use jobs::{HeartbeatReaper, JobQueue, StopHeartbeatReaper};
use manifest::{ManifestGenerator, PipelineManifestSource};
use planner::Planner;
use tokens::TenantResolver;
use worker::WorkerServer;

pub use config::Config;

pub fn load_config(path: &Path) -> io::Result<Arc<Config>> {
    let config_data = config::load_config(path)
        .map_err(|e| io::Error::new(e.kind(), format!("Failed to read config file {path:?}: {e}")))?;
    Ok(Arc::new(config_data))
}

fn open_job_queue(config: &Config) -> io::Result<JobQueue> {
    // A store we can't read back must not be silently replaced
    JobQueue::open(config.jobs_dir()).map_err(|e| {
        error!("Failed to open the job store in {:?}: {}", config.jobs_dir(), e);
        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
    })
}

async fn handle_signals(server: ServerHandle, reaper: Addr<HeartbeatReaper>) {
    let (mut sigint, mut sigterm) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!("Can't install signal handlers: {}", e);
            return;
        }
    };

    let graceful = tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received, exiting");
            false
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, exiting");
            true
        }
    };

    info!("Stopping http server");
    server.stop(graceful).await;
    if let Err(e) = reaper.send(StopHeartbeatReaper()).await {
        error!("Error stopping the heartbeat reaper: {}", e);
    }
    info!("Exiting...");
    System::current().stop();
}

/// Brings up the queue, the background tasks and the http server. Must be
/// called from within a running actix system.
pub fn start(config: Arc<Config>) -> io::Result<Server> {
    let queue = open_job_queue(&config)?;
    let server = Arc::new(WorkerServer::new(
        queue,
        config.artifacts_dir(),
        config.worker.clone(),
    )?);

    let reaper = jobs::start_heartbeat_reaper(server.clone());

    let registry = Arc::new(config.distro_registry());
    let manifests = Arc::new(ManifestGenerator::new(
        server.clone(),
        registry.clone(),
        Arc::new(PipelineManifestSource::default()),
        config.depsolve_timeout(),
    ));
    let resumed = manifests.resume_pending();
    if resumed > 0 {
        info!("Resumed {} manifest jobs", resumed);
    }

    let planner = Arc::new(Planner::new(
        server.clone(),
        registry,
        manifests,
        config.compose_request_dir(),
    )?);

    let state = Data::new(AppState {
        planner,
        server,
        tenants: TenantResolver::new(&config.jwt),
        config: config.clone(),
    });

    let app_config = config.clone();
    let http_server = HttpServer::new(move || app::create_app(state.clone(), &app_config))
        .workers(config.workers as usize)
        .bind((config.host.as_str(), config.port as u16))?
        .run();
    info!("Listening on {}:{}", config.host, config.port);

    actix_web::rt::spawn(handle_signals(http_server.handle(), reaper));

    Ok(http_server)
}
