use actix_web::http::StatusCode;
use actix_web::{error::ResponseError, HttpResponse};
use log::{error, warn};
use serde::Serialize;
use std::fmt;
use std::io;
use uuid::Uuid;

use crate::logger;
use crate::models::JobType;

#[derive(thiserror::Error, Debug)]
pub enum JobQueueError {
    #[error("job does not exist")]
    NotExist,

    #[error("job is not pending")]
    NotPending,

    #[error("job is not running")]
    NotRunning,

    #[error("timed out waiting for a job")]
    DequeueTimeout,

    #[error("job was canceled")]
    Canceled,

    #[error("dependency {0} does not exist")]
    DepsNotExist(Uuid),

    #[error("job {0} still has dependents")]
    HasDependents(Uuid),

    #[error("job store i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("job store serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt job store: {0}")]
    Corrupt(String),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] JobQueueError),

    #[error("invalid job token")]
    InvalidToken,

    #[error("job {id} is a {found} job, expected {expected}")]
    WrongJobType {
        id: Uuid,
        expected: JobType,
        found: JobType,
    },

    #[error("invalid artifact name {0:?}")]
    InvalidArtifactName(String),

    #[error("artifact not found")]
    ArtifactNotFound,

    #[error("artifact i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed job payload: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WorkerResult<T> = Result<T, WorkerError>;

/// The two HTTP surfaces each have their own error catalog, prefix and href.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Api {
    Composer,
    Worker,
}

impl Api {
    pub fn code_prefix(&self) -> &'static str {
        match self {
            Api::Composer => "IMAGE-BUILDER-COMPOSER-",
            Api::Worker => "IMAGE-BUILDER-WORKER-",
        }
    }

    pub fn errors_href(&self) -> &'static str {
        match self {
            Api::Composer => "/api/image-builder-composer/v2/errors",
            Api::Worker => "/api/worker/v1/errors",
        }
    }

    pub fn catalog(&self) -> &'static [ServiceError] {
        match self {
            Api::Composer => COMPOSER_ERRORS,
            Api::Worker => WORKER_ERRORS,
        }
    }

    /// Unknown codes resolve to the catalog's "Error does not exist" entry.
    pub fn find(&self, code: u32) -> &'static ServiceError {
        let catalog = self.catalog();
        catalog
            .iter()
            .find(|e| e.code == code)
            .or_else(|| catalog.iter().find(|e| e.code == SERVICE_ERROR_NOT_FOUND))
            .unwrap_or(&FALLBACK_ERROR)
    }

    pub fn contains(&self, code: u32) -> bool {
        self.catalog().iter().any(|e| e.code == code)
    }
}

#[derive(Debug)]
pub struct ServiceError {
    pub code: u32,
    pub status: StatusCode,
    pub reason: &'static str,
}

const SERVICE_ERROR_NOT_FOUND: u32 = 10002;
const MALFORMED_OPERATION_ID: u32 = 10003;

static FALLBACK_ERROR: ServiceError = ServiceError {
    code: SERVICE_ERROR_NOT_FOUND,
    status: StatusCode::INTERNAL_SERVER_ERROR,
    reason: "Error does not exist",
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComposerErrorCode {
    Unauthenticated = 401,
    Unauthorized = 2,
    UnsupportedMediaType = 3,
    UnsupportedDistribution = 4,
    UnsupportedArchitecture = 5,
    UnsupportedImageType = 6,
    InvalidRepository = 7,
    DNFError = 8,
    InvalidOSTreeRef = 9,
    InvalidOSTreeRepo = 10,
    FailedToMakeManifest = 11,
    InvalidNumberOfImageBuilds = 12,
    InvalidOSTreeParams = 13,
    InvalidComposeId = 14,
    ComposeNotFound = 15,
    InvalidErrorId = 16,
    ErrorNotFound = 17,
    InvalidPageParam = 18,
    InvalidSizeParam = 19,
    BodyDecodingError = 20,
    ResourceNotFound = 21,
    MethodNotAllowed = 22,
    NotAcceptable = 23,
    TenantNotFound = 24,
    ComposeBadState = 27,
    UnsupportedImage = 28,
    InvalidCustomization = 31,
    InvalidUploadTarget = 34,
    ArtifactNotFound = 35,

    FailedToGenerateManifestSeed = 1001,
    FailedToDepsolve = 1002,
    JSONMarshallingError = 1003,
    JSONUnMarshallingError = 1004,
    EnqueueingJob = 1005,
    SeveralUploadTargets = 1006,
    UnknownUploadTarget = 1007,
    MalformedOSBuildJobResult = 1012,
    GettingDepsolveJobStatus = 1013,
    DepsolveJobCanceled = 1014,
    GettingBuildDependencyStatus = 1015,
    GettingOSBuildJobStatus = 1016,
    GettingAWSEC2JobStatus = 1017,
    GettingJobType = 1018,
    InvalidJobType = 1019,
    FailedToSearchPackages = 1020,
    DeletingJob = 1021,
    ReadingArtifact = 1022,
    UnexpectedNumberOfImageBuilds = 1023,

    Unspecified = 10000,
    NotHTTPError = 10001,
}

const fn se(code: u32, status: StatusCode, reason: &'static str) -> ServiceError {
    ServiceError {
        code,
        status,
        reason,
    }
}

static COMPOSER_ERRORS: &[ServiceError] = &[
    se(401, StatusCode::UNAUTHORIZED, "Account authentication could not be verified"),
    se(2, StatusCode::FORBIDDEN, "Account is unauthorized to perform this action"),
    se(3, StatusCode::UNSUPPORTED_MEDIA_TYPE, "Only 'application/json' content is supported"),
    se(4, StatusCode::BAD_REQUEST, "Unsupported distribution"),
    se(5, StatusCode::BAD_REQUEST, "Unsupported architecture"),
    se(6, StatusCode::BAD_REQUEST, "Unsupported image type"),
    se(7, StatusCode::BAD_REQUEST, "Must specify baseurl, mirrorlist, or metalink"),
    se(8, StatusCode::BAD_REQUEST, "Failed to depsolve packages"),
    se(9, StatusCode::BAD_REQUEST, "Invalid OSTree ref"),
    se(10, StatusCode::BAD_REQUEST, "Error resolving OSTree repo"),
    se(11, StatusCode::BAD_REQUEST, "Failed to get manifest"),
    se(12, StatusCode::BAD_REQUEST, "Compose request has unsupported number of image requests"),
    se(13, StatusCode::BAD_REQUEST, "Invalid OSTree parameters or parameter combination"),
    se(14, StatusCode::BAD_REQUEST, "Invalid format for compose id"),
    se(15, StatusCode::NOT_FOUND, "Compose with given id not found"),
    se(16, StatusCode::BAD_REQUEST, "Invalid format for error id, it should be an integer as a string"),
    se(17, StatusCode::NOT_FOUND, "Error with given id not found"),
    se(18, StatusCode::BAD_REQUEST, "Invalid format for page param, it should be an integer as a string"),
    se(19, StatusCode::BAD_REQUEST, "Invalid format for size param, it should be an integer as a string"),
    se(20, StatusCode::BAD_REQUEST, "Malformed json, unable to decode body"),
    se(21, StatusCode::NOT_FOUND, "Requested resource doesn't exist"),
    se(22, StatusCode::METHOD_NOT_ALLOWED, "Requested method isn't supported for resource"),
    se(23, StatusCode::NOT_ACCEPTABLE, "Only 'application/json' content is supported"),
    se(24, StatusCode::BAD_REQUEST, "Tenant not found in JWT claims"),
    se(27, StatusCode::BAD_REQUEST, "Compose is running or has failed"),
    se(28, StatusCode::BAD_REQUEST, "This compose doesn't support the requested operation"),
    se(31, StatusCode::BAD_REQUEST, "Invalid image customization"),
    se(34, StatusCode::BAD_REQUEST, "Invalid upload target for image type"),
    se(35, StatusCode::NOT_FOUND, "Compose has no downloadable artifact"),
    se(1001, StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate manifest seed"),
    se(1002, StatusCode::INTERNAL_SERVER_ERROR, "Failed to depsolve packages"),
    se(1003, StatusCode::INTERNAL_SERVER_ERROR, "Failed to marshal struct"),
    se(1004, StatusCode::INTERNAL_SERVER_ERROR, "Failed to unmarshal struct"),
    se(1005, StatusCode::INTERNAL_SERVER_ERROR, "Failed to enqueue job"),
    se(1006, StatusCode::INTERNAL_SERVER_ERROR, "Compose has more than one upload target"),
    se(1007, StatusCode::INTERNAL_SERVER_ERROR, "Compose has unknown upload target"),
    se(1012, StatusCode::INTERNAL_SERVER_ERROR, "OSBuildJobResult does not have expected fields set"),
    se(1013, StatusCode::INTERNAL_SERVER_ERROR, "Unable to get depsolve job status"),
    se(1014, StatusCode::INTERNAL_SERVER_ERROR, "Depsolve job was cancelled"),
    se(1015, StatusCode::INTERNAL_SERVER_ERROR, "Error getting status of build job dependencies"),
    se(1016, StatusCode::INTERNAL_SERVER_ERROR, "Unable to get osbuild job status"),
    se(1017, StatusCode::INTERNAL_SERVER_ERROR, "Unable to get ec2 job status"),
    se(1018, StatusCode::INTERNAL_SERVER_ERROR, "Unable to get job type of existing job"),
    se(1019, StatusCode::INTERNAL_SERVER_ERROR, "Requested job has invalid type"),
    se(1020, StatusCode::INTERNAL_SERVER_ERROR, "Failed to search packages"),
    se(1021, StatusCode::INTERNAL_SERVER_ERROR, "Unable to delete job"),
    se(1022, StatusCode::INTERNAL_SERVER_ERROR, "Unable to read compose artifact"),
    se(1023, StatusCode::INTERNAL_SERVER_ERROR, "Compose has unexpected number of image builds"),
    se(10000, StatusCode::INTERNAL_SERVER_ERROR, "Unspecified internal error "),
    se(10001, StatusCode::INTERNAL_SERVER_ERROR, "Error is not an instance of HTTPError"),
    se(10002, StatusCode::INTERNAL_SERVER_ERROR, "Error does not exist"),
    se(10003, StatusCode::INTERNAL_SERVER_ERROR, "OperationID is empty or is not a string"),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerErrorCode {
    UnsupportedMediaType = 3,
    JobNotFound = 5,
    JobNotRunning = 6,
    MalformedJobId = 7,
    MalformedJobToken = 8,
    InvalidErrorId = 9,
    BodyDecodingError = 10,
    ResourceNotFound = 11,
    MethodNotAllowed = 12,
    NotAcceptable = 13,
    ErrorNotFound = 14,
    InvalidJobType = 15,
    TenantNotFound = 16,

    DiscardingArtifact = 1000,
    CreatingArtifact = 1001,
    WritingArtifact = 1002,
    ResolvingJobId = 1003,
    FinishingJob = 1004,
    RetrievingJobStatus = 1005,
    RequestingJob = 1006,

    Unspecified = 10000,
}

static WORKER_ERRORS: &[ServiceError] = &[
    se(3, StatusCode::UNSUPPORTED_MEDIA_TYPE, "Only 'application/json' content is supported"),
    se(5, StatusCode::NOT_FOUND, "Token not found"),
    se(6, StatusCode::NOT_FOUND, "Job is not running"),
    se(7, StatusCode::BAD_REQUEST, "Given job id is not a uuidv4"),
    se(8, StatusCode::BAD_REQUEST, "Given job token is not a uuidv4"),
    se(9, StatusCode::BAD_REQUEST, "Invalid format for error id, it should be an integer as a string"),
    se(10, StatusCode::BAD_REQUEST, "Malformed json, unable to decode body"),
    se(11, StatusCode::NOT_FOUND, "Requested resource doesn't exist"),
    se(12, StatusCode::METHOD_NOT_ALLOWED, "Requested method isn't supported for resource"),
    se(13, StatusCode::NOT_ACCEPTABLE, "Only 'application/json' content is supported"),
    se(14, StatusCode::NOT_FOUND, "Error with given id not found"),
    se(15, StatusCode::BAD_REQUEST, "Requested job type cannot be dequeued"),
    se(16, StatusCode::BAD_REQUEST, "Tenant not found in JWT claims"),
    se(1000, StatusCode::INTERNAL_SERVER_ERROR, "Error discarding artifact"),
    se(1001, StatusCode::INTERNAL_SERVER_ERROR, "Error creating artifact"),
    se(1002, StatusCode::INTERNAL_SERVER_ERROR, "Error writing artifact"),
    se(1003, StatusCode::INTERNAL_SERVER_ERROR, "Error resolving id from job token"),
    se(1004, StatusCode::INTERNAL_SERVER_ERROR, "Error finishing job"),
    se(1005, StatusCode::INTERNAL_SERVER_ERROR, "Error retrieving job status"),
    se(1006, StatusCode::INTERNAL_SERVER_ERROR, "Error requesting job"),
    se(10000, StatusCode::INTERNAL_SERVER_ERROR, "Unspecified internal error "),
    se(10002, StatusCode::INTERNAL_SERVER_ERROR, "Error does not exist"),
    se(10003, StatusCode::INTERNAL_SERVER_ERROR, "OperationID is empty or is not a string"),
];

/// The rendered error document of both APIs.
#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub href: String,
    pub id: String,
    pub kind: &'static str,
    pub code: String,
    pub operation_id: String,
    pub reason: String,
}

impl ErrorBody {
    pub fn new(api: Api, se: &ServiceError, operation_id: &str) -> Self {
        ErrorBody {
            href: format!("{}/{}", api.errors_href(), se.code),
            id: se.code.to_string(),
            kind: "Error",
            code: format!("{}{}", api.code_prefix(), se.code),
            operation_id: operation_id.to_string(),
            reason: se.reason.to_string(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorList {
    pub kind: &'static str,
    pub page: usize,
    pub size: usize,
    pub total: usize,
    pub items: Vec<ErrorBody>,
}

pub fn error_list(api: Api, page: usize, size: usize, operation_id: &str) -> ErrorList {
    let catalog = api.catalog();
    let start = page.saturating_mul(size).min(catalog.len());
    let end = page.saturating_add(1).saturating_mul(size).min(catalog.len());
    let items: Vec<ErrorBody> = catalog[start..end]
        .iter()
        .map(|se| ErrorBody::new(api, se, operation_id))
        .collect();
    ErrorList {
        kind: "ErrorList",
        page,
        size: items.len(),
        total: catalog.len(),
        items,
    }
}

#[derive(Debug)]
pub struct ApiError {
    api: Api,
    code: u32,
    internal: Option<String>,
}

impl ApiError {
    pub fn composer(code: ComposerErrorCode) -> Self {
        ApiError {
            api: Api::Composer,
            code: code as u32,
            internal: None,
        }
    }

    pub fn worker(code: WorkerErrorCode) -> Self {
        ApiError {
            api: Api::Worker,
            code: code as u32,
            internal: None,
        }
    }

    /// Attach a cause; it is logged with the operation id but never rendered.
    pub fn with_internal<E: fmt::Display>(mut self, e: E) -> Self {
        self.internal = Some(e.to_string());
        self
    }

    pub fn api(&self) -> Api {
        self.api
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    fn service_error(&self) -> &'static ServiceError {
        self.api.find(self.code)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let se = self.service_error();
        write!(f, "{}{}: {}", self.api.code_prefix(), se.code, se.reason)?;
        if let Some(internal) = &self.internal {
            write!(f, " ({internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.service_error().status
    }

    fn error_response(&self) -> HttpResponse {
        let mut se = self.service_error();
        let operation_id = match logger::current_operation_id() {
            Some(id) => id,
            None => {
                error!("Couldn't find operation id handling error {}", self.code);
                se = self.api.find(MALFORMED_OPERATION_ID);
                String::new()
            }
        };

        if se.status.is_server_error() {
            error!("{} (operation id {})", self, operation_id);
        } else if let Some(internal) = &self.internal {
            warn!("{}: {} (operation id {})", se.code, internal, operation_id);
        }

        if logger::current_request_is_head() {
            return HttpResponse::build(se.status).finish();
        }

        HttpResponse::build(se.status).json(ErrorBody::new(self.api, se, &operation_id))
    }
}

impl From<actix::MailboxError> for ApiError {
    fn from(e: actix::MailboxError) -> Self {
        ApiError::composer(ComposerErrorCode::Unspecified).with_internal(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_falls_back_to_not_found_entry() {
        let se = Api::Composer.find(424242);
        assert_eq!(se.code, 10002);
        assert_eq!(se.reason, "Error does not exist");
        let se = Api::Worker.find(ComposerErrorCode::Unauthenticated as u32);
        assert_eq!(se.code, 10002);
    }

    #[test]
    fn test_error_body_shape() {
        let se = Api::Composer.find(ComposerErrorCode::ComposeNotFound as u32);
        let body = ErrorBody::new(Api::Composer, se, "op1");
        assert_eq!(body.href, "/api/image-builder-composer/v2/errors/15");
        assert_eq!(body.id, "15");
        assert_eq!(body.kind, "Error");
        assert_eq!(body.code, "IMAGE-BUILDER-COMPOSER-15");
        assert_eq!(body.operation_id, "op1");
        assert_eq!(se.status, StatusCode::NOT_FOUND);

        let se = Api::Worker.find(WorkerErrorCode::JobNotRunning as u32);
        let body = ErrorBody::new(Api::Worker, se, "op2");
        assert_eq!(body.code, "IMAGE-BUILDER-WORKER-6");
    }

    #[test]
    fn test_catalog_ranges_and_codes_are_unique() {
        for api in [Api::Composer, Api::Worker] {
            let catalog = api.catalog();
            for (i, e) in catalog.iter().enumerate() {
                assert!(catalog[i + 1..].iter().all(|other| other.code != e.code));
                if e.code >= 1000 && e.code < 2000 {
                    assert!(e.status.is_server_error(), "{} should be a 5xx", e.code);
                }
            }
        }
    }

    #[test]
    fn test_error_list_paging() {
        let total = Api::Composer.catalog().len();
        let list = error_list(Api::Composer, 0, 5, "op");
        assert_eq!(list.size, 5);
        assert_eq!(list.total, total);
        assert_eq!(list.items[0].id, "401");

        let list = error_list(Api::Composer, 1000, 100, "op");
        assert_eq!(list.size, 0);

        let list = error_list(Api::Worker, 0, 1000, "op");
        assert_eq!(list.size, Api::Worker.catalog().len());
    }

    #[test]
    fn test_api_error_display_keeps_internal() {
        let e = ApiError::composer(ComposerErrorCode::EnqueueingJob).with_internal("disk full");
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            e.to_string(),
            "IMAGE-BUILDER-COMPOSER-1005: Failed to enqueue job (disk full)"
        );
    }
}
