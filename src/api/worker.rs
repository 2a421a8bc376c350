use actix_web::web::{Data, Json, Path, Payload, Query};
use actix_web::{HttpRequest, HttpResponse};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{Api, ApiError, JobQueueError, WorkerError, WorkerErrorCode};
use crate::models::JobType;
use crate::tokens::ClaimsValidator;

use super::utils::{self, save_payload, ErrorListParams};

pub const WORKER_HREF: &str = "/api/worker/v1";

#[derive(Deserialize, Debug)]
pub struct RequestJobBody {
    pub types: Vec<String>,
    pub arch: String,
}

#[derive(Serialize, Debug)]
pub struct RequestJobResponse {
    pub href: String,
    pub id: Uuid,
    pub kind: &'static str,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub args: Value,
    pub dependencies: Vec<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dynamic_args: Vec<Value>,
    pub location: String,
    pub artifact_location: String,
}

#[derive(Deserialize, Debug)]
pub struct UpdateJobBody {
    pub result: Value,
}

#[derive(Deserialize, Debug)]
pub struct TokenPathParams {
    pub token: String,
}

#[derive(Deserialize, Debug)]
pub struct ArtifactPathParams {
    pub token: String,
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct ErrorPathParams {
    pub id: String,
}

fn parse_token(token: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(token).map_err(|e| ApiError::worker(WorkerErrorCode::MalformedJobToken).with_internal(e))
}

fn api_error(e: WorkerError, fallback: WorkerErrorCode) -> ApiError {
    match e {
        WorkerError::Queue(JobQueueError::NotExist) => ApiError::worker(WorkerErrorCode::JobNotFound),
        WorkerError::Queue(JobQueueError::NotRunning) => {
            ApiError::worker(WorkerErrorCode::JobNotRunning)
        }
        WorkerError::InvalidArtifactName(_) => {
            ApiError::worker(WorkerErrorCode::ResourceNotFound).with_internal(e)
        }
        e => ApiError::worker(fallback).with_internal(e),
    }
}

fn parse_job_types(types: &[String]) -> Result<Vec<JobType>, ApiError> {
    types
        .iter()
        .map(|t| match JobType::from_str(t) {
            Ok(job_type) if job_type.is_worker_type() => Ok(job_type),
            _ => Err(ApiError::worker(WorkerErrorCode::InvalidJobType)
                .with_internal(format!("job type {t:?} can't be requested"))),
        })
        .collect()
}

pub async fn status() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "href": format!("{WORKER_HREF}/status"),
        "id": "status",
        "kind": "Status",
        "status": "OK",
    }))
}

pub async fn request_job(
    body: Json<RequestJobBody>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let types = parse_job_types(&body.types)?;
    let channel = req.tenant_channel(&state.tenants, Api::Worker)?;

    let job = match state
        .server
        .request_job(&types, &body.arch, &channel)
        .await
        .map_err(|e| api_error(e, WorkerErrorCode::RequestingJob))?
    {
        Some(job) => job,
        None => return Ok(HttpResponse::NoContent().finish()),
    };
    info!("Assigned {} job {} to a worker ({})", job.job_type, job.id, body.arch);

    let location = format!("{WORKER_HREF}/jobs/{}", job.token);
    Ok(HttpResponse::Created().json(RequestJobResponse {
        href: format!("{WORKER_HREF}/jobs"),
        id: job.id,
        kind: "RequestJob",
        job_type: job.job_type,
        args: job.args,
        dependencies: job.dependencies,
        dynamic_args: job.dynamic_args,
        artifact_location: format!("{location}/artifacts/"),
        location,
    }))
}

pub async fn get_job(params: Path<TokenPathParams>, state: Data<AppState>) -> Result<HttpResponse, ApiError> {
    let token = parse_token(&params.token)?;
    let canceled = state
        .server
        .job_canceled(token)
        .map_err(|e| api_error(e, WorkerErrorCode::RetrievingJobStatus))?;
    state.server.refresh_heartbeat(token);
    Ok(HttpResponse::Ok().json(json!({
        "href": format!("{WORKER_HREF}/jobs/{token}"),
        "id": token,
        "kind": "JobStatus",
        "canceled": canceled,
    })))
}

pub async fn update_job(
    params: Path<TokenPathParams>,
    body: Json<UpdateJobBody>,
    state: Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let token = parse_token(&params.token)?;
    state
        .server
        .finish_job(token, body.into_inner().result)
        .map_err(|e| api_error(e, WorkerErrorCode::FinishingJob))?;
    Ok(HttpResponse::Ok().json(json!({
        "href": format!("{WORKER_HREF}/jobs/{token}"),
        "id": token,
        "kind": "UpdateJobResponse",
    })))
}

pub async fn heartbeat(params: Path<TokenPathParams>, state: Data<AppState>) -> Result<HttpResponse, ApiError> {
    let token = parse_token(&params.token)?;
    state
        .server
        .job_canceled(token)
        .map_err(|e| api_error(e, WorkerErrorCode::ResolvingJobId))?;
    state.server.refresh_heartbeat(token);
    Ok(HttpResponse::Ok().finish())
}

pub async fn upload_artifact(
    params: Path<ArtifactPathParams>,
    payload: Payload,
    state: Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let token = parse_token(&params.token)?;
    let dest = state
        .server
        .artifact_upload_path(token, &params.name)
        .map_err(|e| api_error(e, WorkerErrorCode::CreatingArtifact))?;
    let size = save_payload(payload, &dest).await?;
    info!("Stored artifact {} ({} bytes) for token {}", params.name, size, token);
    Ok(HttpResponse::Ok().finish())
}

pub async fn list_errors(params: Query<ErrorListParams>) -> Result<HttpResponse, ApiError> {
    utils::list_errors(Api::Worker, &params)
}

pub async fn get_error(params: Path<ErrorPathParams>) -> Result<HttpResponse, ApiError> {
    utils::get_error(Api::Worker, &params.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_types() {
        let types = parse_job_types(&["osbuild".to_string(), "depsolve".to_string()]).unwrap();
        assert_eq!(types, vec![JobType::OSBuild, JobType::Depsolve]);

        let err = parse_job_types(&["manifest-id-only".to_string()]).unwrap_err();
        assert_eq!(err.code(), WorkerErrorCode::InvalidJobType as u32);
        let err = parse_job_types(&["bogus".to_string()]).unwrap_err();
        assert_eq!(err.code(), WorkerErrorCode::InvalidJobType as u32);
    }

    #[test]
    fn test_api_error_mapping() {
        let err = api_error(JobQueueError::NotExist.into(), WorkerErrorCode::FinishingJob);
        assert_eq!(err.code(), WorkerErrorCode::JobNotFound as u32);
        let err = api_error(JobQueueError::NotRunning.into(), WorkerErrorCode::FinishingJob);
        assert_eq!(err.code(), WorkerErrorCode::JobNotRunning as u32);
        let err = api_error(JobQueueError::Corrupt("x".to_string()).into(), WorkerErrorCode::FinishingJob);
        assert_eq!(err.code(), WorkerErrorCode::FinishingJob as u32);
    }
}
