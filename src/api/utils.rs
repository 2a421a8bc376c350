use actix_web::http::header::LOCATION;
use actix_web::web::{Payload, Query};
use actix_web::{HttpRequest, HttpResponse};
use futures::StreamExt;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::errors::{error_list, Api, ApiError, ComposerErrorCode, ErrorBody, WorkerErrorCode};
use crate::logger::current_operation_id;

/// A 201 response whose LOCATION points at the named resource.
pub fn respond_with_url<T>(
    data: &T,
    req: &HttpRequest,
    name: &str,
    elements: &[String],
) -> Result<HttpResponse, ApiError>
where
    T: Serialize,
{
    match req.url_for(name, elements) {
        Ok(url) => Ok(HttpResponse::Created()
            .insert_header((LOCATION, url.to_string()))
            .json(data)),
        Err(e) => Err(ApiError::composer(ComposerErrorCode::Unspecified)
            .with_internal(format!("Can't get url for {name} {elements:?}: {e}"))),
    }
}

/// Streams a request body into `dest`. The bytes go to a temporary file
/// next to it first, so a partial upload never shows up under its name.
pub async fn save_payload(mut payload: Payload, dest: &Path) -> Result<u64, ApiError> {
    let dir = dest
        .parent()
        .ok_or_else(|| ApiError::worker(WorkerErrorCode::CreatingArtifact))?;
    let mut named_file = NamedTempFile::new_in(dir)
        .map_err(|e| ApiError::worker(WorkerErrorCode::CreatingArtifact).with_internal(e))?;

    let mut size = 0u64;
    while let Some(chunk) = payload.next().await {
        let bytes = chunk
            .map_err(|e| ApiError::worker(WorkerErrorCode::WritingArtifact).with_internal(e))?;
        named_file
            .write_all(&bytes)
            .map_err(|e| ApiError::worker(WorkerErrorCode::WritingArtifact).with_internal(e))?;
        size += bytes.len() as u64;
    }

    let persisted_file = named_file
        .persist(dest)
        .map_err(|e| ApiError::worker(WorkerErrorCode::WritingArtifact).with_internal(e))?;
    match persisted_file.metadata() {
        Ok(metadata) => {
            let mut perms = metadata.permissions();
            perms.set_mode(0o644);
            if let Err(e) = fs::set_permissions(dest, perms) {
                warn!("Can't change permissions on uploaded file: {}", e);
            }
        }
        Err(e) => warn!("Can't get permissions on uploaded file: {}", e),
    }
    Ok(size)
}

#[derive(Deserialize, Debug)]
pub struct ErrorListParams {
    pub page: Option<String>,
    pub size: Option<String>,
}

fn list_param_error(api: Api, page: bool) -> ApiError {
    match (api, page) {
        (Api::Composer, true) => ApiError::composer(ComposerErrorCode::InvalidPageParam),
        (Api::Composer, false) => ApiError::composer(ComposerErrorCode::InvalidSizeParam),
        (Api::Worker, _) => ApiError::worker(WorkerErrorCode::InvalidErrorId),
    }
}

fn parse_list_param(api: Api, value: &Option<String>, default: usize, page: bool) -> Result<usize, ApiError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e| list_param_error(api, page).with_internal(e)),
    }
}

/// `GET /errors` of either catalog.
pub fn list_errors(api: Api, params: &Query<ErrorListParams>) -> Result<HttpResponse, ApiError> {
    let page = parse_list_param(api, &params.page, 0, true)?;
    let size = parse_list_param(api, &params.size, 100, false)?;
    let operation_id = current_operation_id().unwrap_or_default();
    Ok(HttpResponse::Ok().json(error_list(api, page, size, &operation_id)))
}

/// `GET /errors/{id}` of either catalog.
pub fn get_error(api: Api, id: &str) -> Result<HttpResponse, ApiError> {
    let (invalid, not_found) = match api {
        Api::Composer => (
            ApiError::composer(ComposerErrorCode::InvalidErrorId),
            ApiError::composer(ComposerErrorCode::ErrorNotFound),
        ),
        Api::Worker => (
            ApiError::worker(WorkerErrorCode::InvalidErrorId),
            ApiError::worker(WorkerErrorCode::ErrorNotFound),
        ),
    };
    let code: u32 = id.parse().map_err(|e| invalid.with_internal(e))?;
    if !api.contains(code) {
        return Err(not_found);
    }
    let operation_id = current_operation_id().unwrap_or_default();
    Ok(HttpResponse::Ok().json(ErrorBody::new(api, api.find(code), &operation_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_error() {
        let resp = get_error(Api::Composer, "15").unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        let err = get_error(Api::Composer, "abc").unwrap_err();
        assert_eq!(err.code(), ComposerErrorCode::InvalidErrorId as u32);
        let err = get_error(Api::Composer, "4242").unwrap_err();
        assert_eq!(err.code(), ComposerErrorCode::ErrorNotFound as u32);
        let err = get_error(Api::Worker, "4242").unwrap_err();
        assert_eq!(err.code(), WorkerErrorCode::ErrorNotFound as u32);
    }

    #[test]
    fn test_list_param_errors() {
        let params = Query(ErrorListParams {
            page: Some("x".to_string()),
            size: None,
        });
        let err = list_errors(Api::Composer, &params).unwrap_err();
        assert_eq!(err.code(), ComposerErrorCode::InvalidPageParam as u32);

        let params = Query(ErrorListParams {
            page: None,
            size: Some("-1".to_string()),
        });
        let err = list_errors(Api::Composer, &params).unwrap_err();
        assert_eq!(err.code(), ComposerErrorCode::InvalidSizeParam as u32);
    }
}
