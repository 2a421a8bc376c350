use actix_files::NamedFile;
use actix_web::web::{Data, Json, Path, Query};
use actix_web::{HttpRequest, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::compose::{
    AwsEc2CloneCompose, CloneComposeResponse, ComposeId, ComposeRequest, DepsolveRequest,
    Distribution, DistributionArch, DistributionImageType, PackageDetails, PackagesResponse,
    SearchPackagesRequest,
};
use crate::errors::{Api, ApiError, ComposerErrorCode};
use crate::planner::PlanError;
use crate::status::{self, CLONES_HREF, COMPOSES_HREF};
use crate::tokens::ClaimsValidator;

use super::utils::{self, respond_with_url, ErrorListParams};

#[derive(Deserialize, Debug)]
pub struct ComposePathParams {
    pub id: String,
}

#[derive(Deserialize, Debug)]
pub struct ErrorPathParams {
    pub id: String,
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|e| ApiError::composer(ComposerErrorCode::InvalidComposeId).with_internal(e))
}

fn channel(state: &AppState, req: &HttpRequest) -> Result<String, ApiError> {
    req.tenant_channel(&state.tenants, Api::Composer)
}

/// Resolves a compose id the caller is allowed to see.
fn visible_compose(state: &AppState, req: &HttpRequest, id: &str) -> Result<Uuid, ApiError> {
    let channel = channel(state, req)?;
    let id = parse_id(id)?;
    status::check_channel(&state.server, id, &channel)?;
    Ok(id)
}

pub async fn post_compose(
    body: Json<ComposeRequest>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let channel = channel(&state, &req)?;
    let id = state.planner.enqueue_compose(&body, &channel)?;
    let response = ComposeId {
        href: format!("{COMPOSES_HREF}/{id}"),
        id,
        kind: "ComposeId".to_string(),
    };
    respond_with_url(&response, &req, "compose_status", &[id.to_string()])
}

pub async fn get_composes(state: Data<AppState>, req: HttpRequest) -> Result<HttpResponse, ApiError> {
    let channel = channel(&state, &req)?;
    Ok(HttpResponse::Ok().json(status::compose_list(&state.server, &channel)?))
}

pub async fn get_compose(
    params: Path<ComposePathParams>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let id = visible_compose(&state, &req, &params.id)?;
    Ok(HttpResponse::Ok().json(status::compose_status(&state.server, id)?))
}

pub async fn delete_compose(
    params: Path<ComposePathParams>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let id = visible_compose(&state, &req, &params.id)?;
    let compose = status::compose_status(&state.server, id)?;
    state.planner.delete_compose(id).map_err(|e| {
        ApiError::composer(ComposerErrorCode::DeletingJob).with_internal(e)
    })?;
    Ok(HttpResponse::Ok().json(compose))
}

pub async fn get_compose_logs(
    params: Path<ComposePathParams>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let id = visible_compose(&state, &req, &params.id)?;
    Ok(HttpResponse::Ok().json(status::compose_logs(&state.server, id)?))
}

pub async fn get_compose_manifests(
    params: Path<ComposePathParams>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let id = visible_compose(&state, &req, &params.id)?;
    Ok(HttpResponse::Ok().json(status::compose_manifests(&state.server, id)?))
}

pub async fn get_compose_metadata(
    params: Path<ComposePathParams>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let id = visible_compose(&state, &req, &params.id)?;
    Ok(HttpResponse::Ok().json(status::compose_metadata(&state.server, id)?))
}

pub async fn get_compose_sboms(
    params: Path<ComposePathParams>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let id = visible_compose(&state, &req, &params.id)?;
    Ok(HttpResponse::Ok().json(status::compose_sboms(&state.server, id)?))
}

pub async fn download_compose(
    params: Path<ComposePathParams>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<NamedFile, ApiError> {
    let id = visible_compose(&state, &req, &params.id)?;
    let path = status::compose_artifact(&state.server, id)?;
    NamedFile::open(path)
        .map_err(|e| ApiError::composer(ComposerErrorCode::ReadingArtifact).with_internal(e))
}

pub async fn clone_compose(
    params: Path<ComposePathParams>,
    body: Json<AwsEc2CloneCompose>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let id = visible_compose(&state, &req, &params.id)?;
    let channel = channel(&state, &req)?;
    let clone = state.planner.clone_compose(id, &body, &channel)?;
    let response = CloneComposeResponse {
        href: format!("{CLONES_HREF}/{clone}"),
        id: clone,
        kind: "CloneComposeId".to_string(),
    };
    respond_with_url(&response, &req, "clone_status", &[clone.to_string()])
}

pub async fn get_clone_status(
    params: Path<ComposePathParams>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let id = visible_compose(&state, &req, &params.id)?;
    Ok(HttpResponse::Ok().json(status::clone_status(&state.server, id)?))
}

fn packages_response<'a, I>(packages: I) -> HttpResponse
where
    I: IntoIterator<Item = &'a crate::models::DepsolvedPackage>,
{
    HttpResponse::Ok().json(PackagesResponse {
        packages: packages.into_iter().map(PackageDetails::from).collect(),
    })
}

pub async fn depsolve_blueprint(
    body: Json<DepsolveRequest>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let channel = channel(&state, &req)?;
    let packages = state
        .planner
        .depsolve_blueprint(&body, &channel, state.config.depsolve_timeout())
        .await?;
    Ok(packages_response(packages.iter()))
}

pub async fn search_packages(
    body: Json<SearchPackagesRequest>,
    state: Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let channel = channel(&state, &req)?;
    let packages = state
        .planner
        .search_packages(&body, &channel, state.config.depsolve_timeout())
        .await
        .map_err(|e| match e {
            PlanError::JobFailed(_) | PlanError::JobTimeout => {
                ApiError::composer(ComposerErrorCode::FailedToSearchPackages).with_internal(e)
            }
            e => ApiError::from(e),
        })?;
    Ok(packages_response(packages.iter()))
}

pub async fn get_distributions(state: Data<AppState>) -> Result<HttpResponse, ApiError> {
    let distributions: Vec<Distribution> = state
        .planner
        .registry()
        .list()
        .iter()
        .map(|distro| Distribution {
            name: distro.name.clone(),
            releasever: distro.releasever.clone(),
            arches: distro
                .arches
                .iter()
                .map(|arch| DistributionArch {
                    name: arch.name.clone(),
                    image_types: arch
                        .image_types
                        .iter()
                        .map(|image_type| DistributionImageType {
                            name: image_type.name.clone(),
                            repositories: arch.repositories.clone(),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();
    Ok(HttpResponse::Ok().json(distributions))
}

pub async fn list_errors(params: Query<ErrorListParams>) -> Result<HttpResponse, ApiError> {
    utils::list_errors(Api::Composer, &params)
}

pub async fn get_error(params: Path<ErrorPathParams>) -> Result<HttpResponse, ApiError> {
    utils::get_error(Api::Composer, &params.id)
}
