//! Read-only views of compose job trees.
use log::warn;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::compose::{
    ComposeListEntry, ComposeLogs, ComposeManifests, ComposeMetadata, ComposeSboms,
    ComposeStatus, ComposeStatusValue, ImageSbom, ImageStatus, ImageStatusValue, KojiLogs,
    KojiStatus, PackageMetadata, UploadStatus, UploadStatusValue,
};
use crate::errors::{ApiError, ComposerErrorCode, JobQueueError, WorkerError};
use crate::jobs::JobStatus;
use crate::models::{
    clienterrors, AwsEc2CopyJob, AwsEc2JobResult, DepsolveJobResult, JobError, JobType,
    KojiInitJob, ManifestJobByIDResult, OSBuildJob, OSBuildJobResult,
};
use crate::targets::{TargetKind, TargetResultOptions};
use crate::worker::WorkerServer;

pub const COMPOSES_HREF: &str = "/api/image-builder-composer/v2/composes";
pub const CLONES_HREF: &str = "/api/image-builder-composer/v2/clones";

fn lookup_error(code: ComposerErrorCode) -> impl Fn(WorkerError) -> ApiError {
    move |e| match e {
        WorkerError::Queue(JobQueueError::NotExist) => {
            ApiError::composer(ComposerErrorCode::ComposeNotFound)
        }
        e => ApiError::composer(code).with_internal(e),
    }
}

fn compose_href(id: Uuid) -> String {
    format!("{COMPOSES_HREF}/{id}")
}

/// Composes and clones are only visible on the channel they were made on.
pub fn check_channel(server: &WorkerServer, id: Uuid, channel: &str) -> Result<JobType, ApiError> {
    let status = server
        .job_status(id)
        .map_err(lookup_error(ComposerErrorCode::GettingJobType))?;
    if status.channel != channel {
        return Err(ApiError::composer(ComposerErrorCode::ComposeNotFound));
    }
    Ok(status.job_type)
}

pub fn image_status_value(status: &JobStatus, result: &OSBuildJobResult) -> ImageStatusValue {
    if status.canceled {
        ImageStatusValue::Failure
    } else if status.started_at.is_none() {
        ImageStatusValue::Pending
    } else if !status.is_finished() {
        ImageStatusValue::Building
    } else if result.build_succeeded() {
        ImageStatusValue::Success
    } else {
        ImageStatusValue::Failure
    }
}

pub fn upload_status_value(status: &JobStatus, target_error: Option<&JobError>) -> UploadStatusValue {
    if target_error.is_some() || status.canceled {
        UploadStatusValue::Failure
    } else if status.started_at.is_none() {
        UploadStatusValue::Pending
    } else if !status.is_finished() {
        UploadStatusValue::Running
    } else {
        UploadStatusValue::Success
    }
}

fn upload_statuses(
    job: &OSBuildJob,
    status: &JobStatus,
    result: &OSBuildJobResult,
) -> Result<Vec<UploadStatus>, ApiError> {
    let mut uploads = vec![];
    for target in job.targets.iter() {
        let kind = match target.kind() {
            Some(TargetKind::Koji) => continue,
            Some(kind) => kind,
            None => return Err(ApiError::composer(ComposerErrorCode::UnknownUploadTarget)),
        };
        let target_result = result.target_results.iter().find(|r| r.name == target.name);
        let options = TargetResultOptions::parse(kind, target_result.and_then(|r| r.options.as_ref()))
            .map_err(|e| {
                ApiError::composer(ComposerErrorCode::MalformedOSBuildJobResult).with_internal(e)
            })?;
        let target_error = target_result.and_then(|r| r.target_error.as_ref());
        // A failed build never got to upload anything
        let value = if status.is_finished() && !result.build_succeeded() {
            UploadStatusValue::Failure
        } else {
            upload_status_value(status, target_error)
        };
        uploads.push(UploadStatus {
            upload_type: kind.upload_type().to_string(),
            status: value,
            options: options.to_value(),
        });
    }
    Ok(uploads)
}

fn image_error(
    server: &WorkerServer,
    id: Uuid,
    result: &OSBuildJobResult,
) -> Result<Option<JobError>, ApiError> {
    let error = server
        .job_dependency_chain_errors(id)
        .map_err(lookup_error(ComposerErrorCode::GettingBuildDependencyStatus))?;
    if error.is_some() {
        return Ok(error);
    }
    let target_errors: Vec<Value> = result
        .target_results
        .iter()
        .filter_map(|r| r.target_error.as_ref())
        .map(|e| json!(e))
        .collect();
    if target_errors.is_empty() {
        return Ok(None);
    }
    Ok(Some(JobError::new(
        clienterrors::UPLOADING_IMAGE,
        "Error uploading image",
        Some(Value::Array(target_errors)),
    )))
}

/// Status of one image build and its uploads.
pub fn image_status(server: &WorkerServer, id: Uuid) -> Result<ImageStatus, ApiError> {
    let (result, status) = server
        .job_info::<OSBuildJob>(id)
        .map_err(lookup_error(ComposerErrorCode::GettingOSBuildJobStatus))?;
    let job = server
        .job::<OSBuildJob>(id)
        .map_err(lookup_error(ComposerErrorCode::GettingOSBuildJobStatus))?;

    let value = image_status_value(&status, &result);
    let error = match value {
        ImageStatusValue::Failure => image_error(server, id, &result)?,
        _ => None,
    };
    let mut uploads = upload_statuses(&job, &status, &result)?;
    let (upload_status, upload_statuses) = match uploads.len() {
        0 => (None, None),
        1 => (uploads.pop(), None),
        _ => (uploads.first().cloned(), Some(uploads)),
    };
    Ok(ImageStatus {
        status: value,
        error,
        upload_status,
        upload_statuses,
    })
}

fn compose_status_value(images: &[ImageStatus]) -> ComposeStatusValue {
    if images.iter().any(|i| i.status == ImageStatusValue::Failure) {
        ComposeStatusValue::Failure
    } else if images.iter().all(|i| i.status == ImageStatusValue::Success) {
        ComposeStatusValue::Success
    } else {
        ComposeStatusValue::Pending
    }
}

fn job_failed(status: &JobStatus) -> bool {
    status.canceled || (status.is_finished() && !status.is_success())
}

/// The init job, the build jobs and the finalize job of a Koji compose.
struct KojiTree {
    init: Uuid,
    builds: Vec<Uuid>,
    finalize: JobStatus,
}

fn koji_tree(server: &WorkerServer, id: Uuid) -> Result<KojiTree, ApiError> {
    let finalize = server
        .job_status(id)
        .map_err(lookup_error(ComposerErrorCode::GettingJobType))?;
    let (init, builds) = match finalize.dependencies.split_first() {
        Some((init, builds)) if !builds.is_empty() => (*init, builds.to_vec()),
        _ => return Err(ApiError::composer(ComposerErrorCode::UnexpectedNumberOfImageBuilds)),
    };
    Ok(KojiTree {
        init,
        builds,
        finalize,
    })
}

/// The image builds of a compose, for either kind of compose.
fn image_builds(server: &WorkerServer, id: Uuid, job_type: JobType) -> Result<Vec<Uuid>, ApiError> {
    match job_type {
        JobType::OSBuild => Ok(vec![id]),
        JobType::KojiFinalize => Ok(koji_tree(server, id)?.builds),
        _ => Err(ApiError::composer(ComposerErrorCode::InvalidJobType)),
    }
}

fn compose_job_type(server: &WorkerServer, id: Uuid) -> Result<JobType, ApiError> {
    let job_type = server
        .job_type(id)
        .map_err(lookup_error(ComposerErrorCode::GettingJobType))?;
    match job_type {
        JobType::OSBuild | JobType::KojiFinalize => Ok(job_type),
        _ => Err(ApiError::composer(ComposerErrorCode::ComposeNotFound)),
    }
}

pub fn compose_status(server: &WorkerServer, id: Uuid) -> Result<ComposeStatus, ApiError> {
    match compose_job_type(server, id)? {
        JobType::KojiFinalize => koji_compose_status(server, id),
        _ => {
            let image = image_status(server, id)?;
            Ok(ComposeStatus {
                href: compose_href(id),
                id,
                kind: "ComposeStatus".to_string(),
                status: compose_status_value(std::slice::from_ref(&image)),
                image_status: image,
                image_statuses: None,
                koji_status: None,
            })
        }
    }
}

fn koji_compose_status(server: &WorkerServer, id: Uuid) -> Result<ComposeStatus, ApiError> {
    let tree = koji_tree(server, id)?;
    let (init_result, init_status) = server
        .job_info::<KojiInitJob>(tree.init)
        .map_err(lookup_error(ComposerErrorCode::GettingBuildDependencyStatus))?;
    let images = tree
        .builds
        .iter()
        .map(|build| image_status(server, *build))
        .collect::<Result<Vec<_>, _>>()?;

    let failed = job_failed(&init_status)
        || job_failed(&tree.finalize)
        || images.iter().any(|i| i.status == ImageStatusValue::Failure);
    let succeeded = init_status.is_success()
        && tree.finalize.is_success()
        && images.iter().all(|i| i.status == ImageStatusValue::Success);
    let status = if failed {
        ComposeStatusValue::Failure
    } else if succeeded {
        ComposeStatusValue::Success
    } else {
        ComposeStatusValue::Pending
    };

    Ok(ComposeStatus {
        href: compose_href(id),
        id,
        kind: "ComposeStatus".to_string(),
        status,
        image_status: images[0].clone(),
        image_statuses: Some(images),
        koji_status: Some(KojiStatus {
            build_id: Some(init_result.build_id).filter(|b| *b != 0),
        }),
    })
}

/// Every compose on `channel` with its overall status.
pub fn compose_list(server: &WorkerServer, channel: &str) -> Result<Vec<ComposeListEntry>, ApiError> {
    let mut entries = vec![];
    for id in server.all_root_job_ids() {
        let status = match server.job_status(id) {
            Ok(status) => status,
            // Deleted since the listing
            Err(_) => continue,
        };
        if status.channel != channel
            || !matches!(status.job_type, JobType::OSBuild | JobType::KojiFinalize)
        {
            continue;
        }
        // One unreadable compose must not hide the rest
        let compose = match compose_status(server, id) {
            Ok(compose) => compose,
            Err(e) => {
                warn!("Skipping compose {} in listing: {}", id, e);
                continue;
            }
        };
        entries.push(ComposeListEntry {
            href: compose.href,
            id,
            kind: "ComposeStatus".to_string(),
            status: compose.status,
        });
    }
    Ok(entries)
}

fn raw_result(server: &WorkerServer, id: Uuid) -> Result<Value, ApiError> {
    let status = server
        .job_status(id)
        .map_err(lookup_error(ComposerErrorCode::GettingOSBuildJobStatus))?;
    Ok(status.result.unwrap_or(Value::Null))
}

pub fn compose_logs(server: &WorkerServer, id: Uuid) -> Result<ComposeLogs, ApiError> {
    let job_type = compose_job_type(server, id)?;
    let builds = image_builds(server, id, job_type)?;
    let image_builds = builds
        .iter()
        .map(|build| raw_result(server, *build))
        .collect::<Result<Vec<_>, _>>()?;
    let koji = match job_type {
        JobType::KojiFinalize => {
            let tree = koji_tree(server, id)?;
            Some(KojiLogs {
                init: raw_result(server, tree.init)?,
                import: raw_result(server, id)?,
            })
        }
        _ => None,
    };
    Ok(ComposeLogs {
        href: format!("{}/logs", compose_href(id)),
        id,
        kind: "ComposeLogs".to_string(),
        image_builds,
        koji,
    })
}

fn dependency_of_type(
    server: &WorkerServer,
    id: Uuid,
    job_type: JobType,
) -> Result<Option<Uuid>, ApiError> {
    let status = server
        .job_status(id)
        .map_err(lookup_error(ComposerErrorCode::GettingBuildDependencyStatus))?;
    for dep in status.dependencies {
        let dep_type = server
            .job_type(dep)
            .map_err(lookup_error(ComposerErrorCode::GettingBuildDependencyStatus))?;
        if dep_type == job_type {
            return Ok(Some(dep));
        }
    }
    Ok(None)
}

pub fn compose_manifests(server: &WorkerServer, id: Uuid) -> Result<ComposeManifests, ApiError> {
    let job_type = compose_job_type(server, id)?;
    let mut manifests = vec![];
    for build in image_builds(server, id, job_type)? {
        let manifest = match dependency_of_type(server, build, JobType::ManifestIdOnly)? {
            Some(manifest) => manifest,
            None => {
                manifests.push(Value::Null);
                continue;
            }
        };
        let (result, _) = server
            .job_info::<crate::models::ManifestJobByID>(manifest)
            .map_err(lookup_error(ComposerErrorCode::GettingBuildDependencyStatus))?;
        let ManifestJobByIDResult { data, .. } = result;
        manifests.push(data);
    }
    Ok(ComposeManifests {
        href: format!("{}/manifests", compose_href(id)),
        id,
        kind: "ComposeManifests".to_string(),
        manifests,
    })
}

fn stage_packages(stage: &Value) -> Vec<PackageMetadata> {
    let field = |p: &Value, name: &str| p.get(name).and_then(Value::as_str).unwrap_or("").to_string();
    stage
        .get("packages")
        .and_then(Value::as_array)
        .map(|packages| {
            packages
                .iter()
                .map(|p| PackageMetadata {
                    package_type: "rpm".to_string(),
                    name: field(p, "name"),
                    version: field(p, "version"),
                    release: field(p, "release"),
                    epoch: p.get("epoch").and_then(Value::as_str).map(str::to_string),
                    arch: field(p, "arch"),
                    sigmd5: field(p, "sigmd5"),
                    signature: p.get("signature").and_then(Value::as_str).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Package and OSTree commit metadata of a finished single-image compose.
pub fn compose_metadata(server: &WorkerServer, id: Uuid) -> Result<ComposeMetadata, ApiError> {
    if compose_job_type(server, id)? != JobType::OSBuild {
        return Err(ApiError::composer(ComposerErrorCode::UnsupportedImage));
    }
    let (result, status) = server
        .job_info::<OSBuildJob>(id)
        .map_err(lookup_error(ComposerErrorCode::GettingOSBuildJobStatus))?;
    let mut metadata = ComposeMetadata {
        href: format!("{}/metadata", compose_href(id)),
        id,
        kind: "ComposeMetadata".to_string(),
        packages: None,
        ostree_commit: None,
    };
    if image_status_value(&status, &result) != ImageStatusValue::Success {
        return Ok(metadata);
    }

    let job = server
        .job::<OSBuildJob>(id)
        .map_err(lookup_error(ComposerErrorCode::GettingOSBuildJobStatus))?;
    let payload = result
        .pipeline_names
        .as_ref()
        .or(job.pipeline_names.as_ref())
        .map(|p| p.payload.clone())
        .unwrap_or_default();
    let output = result.osbuild_output.unwrap_or_default();

    let mut packages = vec![];
    for pipeline in payload.iter() {
        let stages = match output.metadata.get(pipeline) {
            Some(stages) => stages,
            None => continue,
        };
        if let Some(rpm) = stages.get("org.osbuild.rpm") {
            packages.extend(stage_packages(rpm));
        }
        if let Some(commit) = stages
            .pointer("/org.osbuild.ostree.commit/compose/ostree-commit")
            .and_then(Value::as_str)
        {
            metadata.ostree_commit = Some(commit.to_string());
        }
    }
    metadata.packages = Some(packages);
    Ok(metadata)
}

/// SBOM documents of each image, from its depsolve job.
pub fn compose_sboms(server: &WorkerServer, id: Uuid) -> Result<ComposeSboms, ApiError> {
    let job_type = compose_job_type(server, id)?;
    let mut items = vec![];
    for build in image_builds(server, id, job_type)? {
        let job = server
            .job::<OSBuildJob>(build)
            .map_err(lookup_error(ComposerErrorCode::GettingOSBuildJobStatus))?;
        let names = job.pipeline_names.unwrap_or_default();
        let depsolve = match dependency_of_type(server, build, JobType::ManifestIdOnly)? {
            Some(manifest) => dependency_of_type(server, manifest, JobType::Depsolve)?,
            None => None,
        };
        let result: DepsolveJobResult = match depsolve {
            Some(depsolve) => {
                server
                    .job_info::<crate::models::DepsolveJob>(depsolve)
                    .map_err(lookup_error(ComposerErrorCode::GettingDepsolveJobStatus))?
                    .0
            }
            None => DepsolveJobResult::default(),
        };

        let mut sboms = vec![];
        for (package_set, doc) in result.sbom_docs.iter() {
            let (pipeline_name, purpose) = if package_set == "build" {
                (names.build.first(), "buildroot")
            } else {
                (names.payload.first(), "image")
            };
            sboms.push(ImageSbom {
                pipeline_name: pipeline_name.cloned().unwrap_or_else(|| package_set.clone()),
                pipeline_purpose: purpose.to_string(),
                sbom_type: doc.doc_type.clone(),
                sbom: doc.document.clone(),
            });
        }
        items.push(sboms);
    }
    Ok(ComposeSboms {
        href: format!("{}/sboms", compose_href(id)),
        id,
        kind: "ComposeSBOMs".to_string(),
        items,
    })
}

/// The file exported through the worker server target of a finished
/// compose.
pub fn compose_artifact(server: &WorkerServer, id: Uuid) -> Result<std::path::PathBuf, ApiError> {
    if compose_job_type(server, id)? != JobType::OSBuild {
        return Err(ApiError::composer(ComposerErrorCode::UnsupportedImage));
    }
    let job = server
        .job::<OSBuildJob>(id)
        .map_err(lookup_error(ComposerErrorCode::GettingOSBuildJobStatus))?;
    let target = job
        .targets
        .iter()
        .find(|t| t.kind() == Some(TargetKind::WorkerServer))
        .ok_or_else(|| ApiError::composer(ComposerErrorCode::ArtifactNotFound))?;
    server
        .job_artifact_location(id, &target.osbuild_artifact.export_filename)
        .map_err(|e| match e {
            WorkerError::ArtifactNotFound | WorkerError::InvalidArtifactName(_) => {
                ApiError::composer(ComposerErrorCode::ArtifactNotFound)
            }
            e => ApiError::composer(ComposerErrorCode::ReadingArtifact).with_internal(e),
        })
}

/// The upload status of a clone, which is the share job or the copy job
/// it started from.
pub fn clone_status(server: &WorkerServer, id: Uuid) -> Result<UploadStatus, ApiError> {
    let job_type = server
        .job_type(id)
        .map_err(lookup_error(ComposerErrorCode::GettingAWSEC2JobStatus))?;
    let (result, status) = match job_type {
        JobType::AwsEc2Share => server.job_info::<crate::models::AwsEc2ShareJob>(id),
        JobType::AwsEc2Copy => server.job_info::<AwsEc2CopyJob>(id),
        _ => return Err(ApiError::composer(ComposerErrorCode::ComposeNotFound)),
    }
    .map_err(lookup_error(ComposerErrorCode::GettingAWSEC2JobStatus))?;
    let AwsEc2JobResult {
        ami,
        region,
        job_result,
    } = result;
    Ok(UploadStatus {
        upload_type: TargetKind::Aws.upload_type().to_string(),
        status: upload_status_value(&status, job_result.job_error.as_ref()),
        options: json!({ "ami": ami, "region": region }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::test_manifest;
    use crate::planner::test_planner::{aws_request, planner};
    use crate::planner::Planner;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn finish_next(planner: &Planner, job_type: JobType, result: Value) -> Uuid {
        let job = planner
            .server()
            .request_job(&[job_type], "arch3", "")
            .await
            .unwrap()
            .unwrap();
        planner.server().finish_job(job.token, result).unwrap();
        job.id
    }

    async fn wait_for_manifest(planner: &Planner, root: Uuid) {
        let manifest = planner.server().job_status(root).unwrap().dependencies[0];
        planner
            .server()
            .wait_for_job(manifest, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[actix_web::test]
    async fn test_single_image_lifecycle() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let server = planner.server().clone();
        let root = planner.enqueue_compose(&aws_request(), "").unwrap();

        let status = compose_status(&server, root).unwrap();
        assert_eq!(status.status, ComposeStatusValue::Pending);
        assert_eq!(status.image_status.status, ImageStatusValue::Pending);
        let upload = status.image_status.upload_status.unwrap();
        assert_eq!(upload.status, UploadStatusValue::Pending);
        assert_eq!(upload.options, json!({"ami": "", "region": ""}));

        finish_next(&planner, JobType::Depsolve, test_manifest::depsolve_result()).await;
        wait_for_manifest(&planner, root).await;
        let job = server
            .request_job(&[JobType::OSBuild], "arch3", "")
            .await
            .unwrap()
            .unwrap();
        let status = compose_status(&server, root).unwrap();
        assert_eq!(status.image_status.status, ImageStatusValue::Building);

        let result = json!({
            "success": true,
            "osbuild_output": {
                "success": true,
                "metadata": {
                    "image": {
                        "org.osbuild.rpm": {"packages": [
                            {"name": "kernel", "version": "6.1", "release": "1", "arch": "x86_64", "sigmd5": "abc"}
                        ]}
                    }
                }
            },
            "target_results": [{"name": "org.osbuild.aws", "options": {"ami": "ami-1", "region": "eu"}}],
        });
        server.finish_job(job.token, result).unwrap();

        let status = compose_status(&server, root).unwrap();
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["status"], "success");
        assert_eq!(v["image_status"]["status"], "success");
        assert_eq!(v["image_status"]["upload_status"]["type"], "aws");
        assert_eq!(v["image_status"]["upload_status"]["status"], "success");
        assert_eq!(v["image_status"]["upload_status"]["options"]["ami"], "ami-1");

        let metadata = compose_metadata(&server, root).unwrap();
        let packages = metadata.packages.unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "kernel");
        assert_eq!(packages[0].package_type, "rpm");

        let manifests = compose_manifests(&server, root).unwrap();
        assert_eq!(manifests.manifests[0]["version"], "2");

        let logs = compose_logs(&server, root).unwrap();
        assert_eq!(logs.image_builds[0]["success"], true);
        assert!(logs.koji.is_none());

        let list = compose_list(&server, "").unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].status, ComposeStatusValue::Success);
        assert!(compose_list(&server, "org-1").unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_list_skips_unreadable_compose() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let server = planner.server().clone();
        let a = planner.enqueue_compose(&aws_request(), "").unwrap();
        let b = planner.enqueue_compose(&aws_request(), "").unwrap();

        for _ in 0..2 {
            finish_next(&planner, JobType::Depsolve, test_manifest::depsolve_result()).await;
        }
        wait_for_manifest(&planner, a).await;
        wait_for_manifest(&planner, b).await;

        let broken = finish_next(&planner, JobType::OSBuild, json!({"target_results": "bogus"})).await;
        assert!(compose_status(&server, broken).is_err());

        let list = compose_list(&server, "").unwrap();
        assert_eq!(list.len(), 1);
        assert_ne!(list[0].id, broken);
        assert!(list[0].id == a || list[0].id == b);
    }

    #[actix_web::test]
    async fn test_dependency_failure_chain() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let server = planner.server().clone();
        let root = planner.enqueue_compose(&aws_request(), "").unwrap();

        finish_next(
            &planner,
            JobType::Depsolve,
            json!({"job_error": {"id": 22, "reason": "DNF Error"}}),
        )
        .await;

        let status = compose_status(&server, root).unwrap();
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["status"], "failure");
        assert_eq!(v["image_status"]["status"], "failure");
        assert_eq!(
            v["image_status"]["error"],
            json!({
                "id": 9,
                "reason": "Manifest dependency failed",
                "details": [{
                    "id": 5,
                    "reason": "Error in depsolve job dependency",
                    "details": [{"id": 22, "reason": "DNF Error"}]
                }]
            })
        );
        assert_eq!(v["image_status"]["upload_status"]["status"], "failure");
    }

    #[actix_web::test]
    async fn test_cancel_marks_compose_failed() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let server = planner.server().clone();
        let root = planner.enqueue_compose(&aws_request(), "").unwrap();
        let manifest = server.job_status(root).unwrap().dependencies[0];
        let depsolve = server.job_status(manifest).unwrap().dependencies[0];

        server.cancel(depsolve).unwrap();
        for id in [depsolve, manifest, root] {
            assert!(server.job_status(id).unwrap().canceled);
        }
        let status = compose_status(&server, root).unwrap();
        assert_eq!(status.status, ComposeStatusValue::Failure);
        assert_eq!(status.image_status.status, ImageStatusValue::Failure);
    }

    #[actix_web::test]
    async fn test_channel_and_type_checks() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let server = planner.server().clone();
        let root = planner.enqueue_compose(&aws_request(), "org-42").unwrap();

        assert_eq!(check_channel(&server, root, "org-42").unwrap(), JobType::OSBuild);
        let err = check_channel(&server, root, "org-1").unwrap_err();
        assert_eq!(err.code(), ComposerErrorCode::ComposeNotFound as u32);
        let err = check_channel(&server, Uuid::new_v4(), "org-42").unwrap_err();
        assert_eq!(err.code(), ComposerErrorCode::ComposeNotFound as u32);

        let depsolve = server
            .job_status(server.job_status(root).unwrap().dependencies[0])
            .unwrap()
            .dependencies[0];
        let err = compose_status(&server, depsolve).unwrap_err();
        assert_eq!(err.code(), ComposerErrorCode::ComposeNotFound as u32);

        let err = compose_artifact(&server, root).unwrap_err();
        assert_eq!(err.code(), ComposerErrorCode::ArtifactNotFound as u32);
    }

    #[actix_web::test]
    async fn test_koji_status_fold() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let server = planner.server().clone();
        let mut request = aws_request();
        let mut image = request.image_request.take().unwrap();
        image.upload_options = None;
        request.image_requests = Some(vec![image]);
        request.koji = Some(crate::compose::Koji {
            server: "https://koji.example".to_string(),
            task_id: 1,
            name: "n".to_string(),
            version: "1".to_string(),
            release: "1".to_string(),
        });
        let root = planner.enqueue_compose(&request, "").unwrap();

        let status = compose_status(&server, root).unwrap();
        assert_eq!(status.status, ComposeStatusValue::Pending);
        assert_eq!(status.image_statuses.as_ref().unwrap().len(), 1);
        assert_eq!(status.koji_status, Some(KojiStatus { build_id: None }));
        // Only the koji target, which isn't an upload the client sees
        assert!(status.image_status.upload_status.is_none());

        finish_next(&planner, JobType::KojiInit, json!({"build_id": 42, "token": "t"})).await;
        let status = compose_status(&server, root).unwrap();
        assert_eq!(status.koji_status.unwrap().build_id, Some(42));

        finish_next(&planner, JobType::Depsolve, json!({"job_error": {"id": 22, "reason": "DNF Error"}})).await;
        let status = compose_status(&server, root).unwrap();
        assert_eq!(status.status, ComposeStatusValue::Failure);

        let logs = compose_logs(&server, root).unwrap();
        assert_eq!(logs.koji.unwrap().init["build_id"], 42);
        assert_eq!(
            compose_metadata(&server, root).unwrap_err().code(),
            ComposerErrorCode::UnsupportedImage as u32
        );
    }

    #[actix_web::test]
    async fn test_sboms_follow_depsolve() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let server = planner.server().clone();
        let root = planner.enqueue_compose(&aws_request(), "").unwrap();

        let mut result = test_manifest::depsolve_result();
        result["sbom_docs"] = json!({
            "build": {"type": "spdx", "document": {"name": "build"}},
            "os": {"type": "spdx", "document": {"name": "os"}},
        });
        finish_next(&planner, JobType::Depsolve, result).await;

        let sboms = compose_sboms(&server, root).unwrap();
        assert_eq!(sboms.items.len(), 1);
        let items = &sboms.items[0];
        assert_eq!(items[0].pipeline_name, "build");
        assert_eq!(items[0].pipeline_purpose, "buildroot");
        assert_eq!(items[1].pipeline_name, "os");
        assert_eq!(items[1].pipeline_purpose, "image");
        assert_eq!(items[1].sbom, json!({"name": "os"}));
    }

    #[actix_web::test]
    async fn test_clone_status() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let server = planner.server().clone();
        let root = planner.enqueue_compose(&aws_request(), "").unwrap();
        let share = server
            .enqueue(
                &crate::models::AwsEc2ShareJob {
                    ami: "ami-1".to_string(),
                    region: "eu".to_string(),
                    share_with_accounts: vec![],
                },
                &[],
                "",
                "",
            )
            .unwrap();
        let status = clone_status(&server, share).unwrap();
        assert_eq!(status.status, UploadStatusValue::Pending);
        assert_eq!(status.upload_type, "aws");

        finish_next(&planner, JobType::AwsEc2Share, json!({"ami": "ami-1", "region": "eu"})).await;
        let status = clone_status(&server, share).unwrap();
        assert_eq!(status.status, UploadStatusValue::Success);
        assert_eq!(status.options, json!({"ami": "ami-1", "region": "eu"}));

        let err = clone_status(&server, root).unwrap_err();
        assert_eq!(err.code(), ComposerErrorCode::ComposeNotFound as u32);
    }
}
