//! Manifest generation.
//!
//! Manifest jobs never reach a worker. Once the depsolve and resolve jobs a
//! manifest depends on have finished, the server takes the job itself,
//! renders the manifest and stores it as the job's result.
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::blueprint::BlueprintCustomizations;
use crate::distro::{Distro, DistroRegistry, ImageType};
use crate::errors::{JobQueueError, WorkerError};
use crate::models::{
    clienterrors, ContainerResolveJobResult, ContainerSpec, DepsolveJobResult, DepsolvedPackage,
    JobError, JobResult, JobType, ManifestInfo, ManifestJobByID, ManifestJobByIDResult,
    OSTreeResolveJobResult, OSTreeResolveResultSpec,
};
use crate::worker::{AssignedJob, WorkerServer};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn composer_version() -> String {
    format!("image-composer-{}", env!("CARGO_PKG_VERSION"))
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ManifestError {
    #[error("no image type {image_type} for {distro}/{arch}")]
    UnknownImageType {
        distro: String,
        arch: String,
        image_type: String,
    },

    #[error("package set {0:?} was not depsolved")]
    MissingPackageSet(String),

    #[error("package {0} has no checksum")]
    MissingChecksum(String),

    #[error("package {0} has no remote location")]
    MissingLocation(String),

    #[error("image type requires an ostree commit but none was resolved")]
    MissingOSTreeCommit,
}

/// Everything a manifest is rendered from.
pub struct ManifestInputs<'a> {
    pub distro: &'a Distro,
    pub image_type: &'a ImageType,
    pub job: &'a ManifestJobByID,
    pub package_specs: &'a BTreeMap<String, Vec<DepsolvedPackage>>,
    pub containers: &'a [ContainerSpec],
    pub ostree_commits: &'a [OSTreeResolveResultSpec],
}

pub trait ManifestSource: Send + Sync {
    fn serialize(&self, inputs: &ManifestInputs<'_>) -> Result<Value, ManifestError>;
}

/// Renders osbuild version 2 manifests.
#[derive(Default)]
pub struct PipelineManifestSource {}

fn rpm_stage<'a, I>(packages: I, curl: &mut BTreeMap<String, Value>) -> Result<Value, ManifestError>
where
    I: Iterator<Item = &'a DepsolvedPackage>,
{
    let mut references = vec![];
    for pkg in packages {
        let checksum = pkg
            .checksum
            .clone()
            .ok_or_else(|| ManifestError::MissingChecksum(pkg.name.clone()))?;
        let url = pkg
            .remote_locations
            .first()
            .ok_or_else(|| ManifestError::MissingLocation(pkg.name.clone()))?;
        let mut item = json!({ "url": url });
        if pkg.check_gpg == Some(true) {
            item["secrets"] = json!({"name": "org.osbuild.rhsm"});
        }
        curl.insert(checksum.clone(), item);
        references.push(json!({ "id": checksum }));
    }
    Ok(json!({
        "type": "org.osbuild.rpm",
        "inputs": {
            "packages": {
                "type": "org.osbuild.files",
                "origin": "org.osbuild.source",
                "references": references,
            }
        },
    }))
}

fn stage(stage_type: &str, options: Value) -> Value {
    json!({ "type": stage_type, "options": options })
}

fn customization_stages(c: &BlueprintCustomizations) -> Vec<Value> {
    let mut stages = vec![];
    if let Some(hostname) = &c.hostname {
        stages.push(stage("org.osbuild.hostname", json!({ "hostname": hostname })));
    }
    if let Some(timezone) = &c.timezone {
        stages.push(stage("org.osbuild.timezone", json!({ "zone": timezone })));
    }
    if let Some(locale) = &c.locale {
        stages.push(stage("org.osbuild.locale", json!({ "language": locale })));
    }
    if !c.group.is_empty() {
        let groups: Map<String, Value> = c
            .group
            .iter()
            .map(|g| (g.name.clone(), json!({ "gid": g.gid })))
            .collect();
        stages.push(stage("org.osbuild.groups", json!({ "groups": groups })));
    }
    if !c.user.is_empty() {
        let mut users = Map::new();
        for user in c.user.iter() {
            let mut options = json!(user);
            if let Some(obj) = options.as_object_mut() {
                obj.remove("name");
            }
            users.insert(user.name.clone(), options);
        }
        stages.push(stage("org.osbuild.users", json!({ "users": users })));
    }
    if let Some(kernel) = &c.kernel {
        if !kernel.append.is_empty() {
            stages.push(stage(
                "org.osbuild.kernel-cmdline",
                json!({ "kernel_opts": kernel.append }),
            ));
        }
    }
    if let Some(firewall) = &c.firewall {
        let services = firewall.services.clone().unwrap_or_default();
        stages.push(stage(
            "org.osbuild.firewall",
            json!({
                "ports": firewall.ports,
                "enabled_services": services.enabled,
                "disabled_services": services.disabled,
            }),
        ));
    }
    if let Some(services) = &c.services {
        stages.push(stage(
            "org.osbuild.systemd",
            json!({
                "enabled_services": services.enabled,
                "disabled_services": services.disabled,
            }),
        ));
    }
    stages
}

impl ManifestSource for PipelineManifestSource {
    fn serialize(&self, inputs: &ManifestInputs<'_>) -> Result<Value, ManifestError> {
        let image_type = inputs.image_type;
        let names = image_type.pipeline_names();
        let build_name = names.build.first().cloned().unwrap_or_else(|| "build".to_string());
        let build_ref = format!("name:{build_name}");

        let mut curl = BTreeMap::new();
        let mut skopeo = BTreeMap::new();
        let mut ostree = BTreeMap::new();
        let mut pipelines = vec![];

        let build_packages = inputs
            .package_specs
            .get("build")
            .ok_or_else(|| ManifestError::MissingPackageSet("build".to_string()))?;
        pipelines.push(json!({
            "name": build_name,
            "runner": format!("org.osbuild.{}", inputs.distro.name),
            "stages": [rpm_stage(build_packages.iter(), &mut curl)?],
        }));

        // The first payload pipeline assembles the tree, the rest package it.
        let mut tree_stages = vec![];
        let mut payload_packages = vec![];
        for set in image_type.payload_package_sets.iter() {
            let packages = inputs
                .package_specs
                .get(set)
                .ok_or_else(|| ManifestError::MissingPackageSet(set.clone()))?;
            payload_packages.extend(packages.iter());
        }
        tree_stages.push(rpm_stage(payload_packages.into_iter(), &mut curl)?);

        if image_type.requires_ostree_commit {
            let commit = inputs
                .ostree_commits
                .first()
                .ok_or(ManifestError::MissingOSTreeCommit)?;
            ostree.insert(
                commit.checksum.clone(),
                json!({ "remote": { "url": commit.url } }),
            );
            tree_stages.push(json!({
                "type": "org.osbuild.ostree.deploy",
                "inputs": {
                    "commits": {
                        "type": "org.osbuild.ostree",
                        "origin": "org.osbuild.source",
                        "references": [commit.checksum],
                    }
                },
                "options": { "ref": commit.ostree_ref },
            }));
        }

        if !inputs.containers.is_empty() {
            let mut references = Map::new();
            for container in inputs.containers.iter() {
                let mut image = json!({ "name": container.source, "digest": container.digest });
                if let Some(tls_verify) = container.tls_verify {
                    image["tls-verify"] = json!(tls_verify);
                }
                skopeo.insert(container.image_id.clone(), json!({ "image": image }));
                references.insert(container.image_id.clone(), json!({ "name": container.name }));
            }
            tree_stages.push(json!({
                "type": "org.osbuild.skopeo",
                "inputs": {
                    "images": {
                        "type": "org.osbuild.containers",
                        "origin": "org.osbuild.source",
                        "references": references,
                    }
                },
                "options": { "destination": { "type": "containers-storage" } },
            }));
        }

        if let Some(c) = &inputs.job.blueprint.customizations {
            tree_stages.extend(customization_stages(c));
        }

        let mut payload = names.payload.iter();
        let mut previous = match payload.next() {
            Some(tree) => {
                pipelines.push(json!({ "name": tree, "build": build_ref, "stages": tree_stages }));
                tree.clone()
            }
            None => build_name.clone(),
        };

        let mut rng = StdRng::seed_from_u64(inputs.job.seed as u64);
        let partition_uuid = uuid::Builder::from_random_bytes(rng.gen()).into_uuid();
        let filesystems: Vec<Value> = inputs
            .job
            .blueprint
            .customizations
            .as_ref()
            .map(|c| {
                c.filesystem
                    .iter()
                    .map(|fs| json!({ "mountpoint": fs.mountpoint, "minsize": fs.minsize }))
                    .collect()
            })
            .unwrap_or_default();

        for name in payload {
            let mut stages = vec![json!({
                "type": "org.osbuild.copy",
                "inputs": {
                    "tree": {
                        "type": "org.osbuild.tree",
                        "origin": "org.osbuild.pipeline",
                        "references": [format!("name:{previous}")],
                    }
                },
                "options": {
                    "filename": image_type.filename,
                    "size": inputs.job.size,
                    "partition_uuid": partition_uuid,
                    "filesystems": filesystems,
                    "boot_mode": image_type.boot_mode,
                },
            })];
            if let Some(ostree_ref) = &image_type.ostree_ref {
                let mut options = json!({ "ref": ostree_ref, "os_version": inputs.distro.releasever });
                let parent = inputs.job.ostree.as_ref().filter(|o| !o.parent.is_empty());
                if let (Some(_), Some(commit)) = (parent, inputs.ostree_commits.first()) {
                    options["parent"] = json!(commit.checksum);
                }
                stages.push(stage("org.osbuild.ostree.commit", options));
            }
            pipelines.push(json!({ "name": name, "build": build_ref, "stages": stages }));
            previous = name.clone();
        }

        let mut sources = Map::new();
        if !curl.is_empty() {
            sources.insert("org.osbuild.curl".to_string(), json!({ "items": curl }));
        }
        if !skopeo.is_empty() {
            sources.insert("org.osbuild.skopeo".to_string(), json!({ "items": skopeo }));
        }
        if !ostree.is_empty() {
            sources.insert("org.osbuild.ostree".to_string(), json!({ "items": ostree }));
        }

        Ok(json!({
            "version": "2",
            "pipelines": pipelines,
            "sources": sources,
        }))
    }
}

/// Runs manifest jobs inside the server.
pub struct ManifestGenerator {
    server: Arc<WorkerServer>,
    registry: Arc<DistroRegistry>,
    source: Arc<dyn ManifestSource>,
    timeout: Duration,
}

impl ManifestGenerator {
    pub fn new(
        server: Arc<WorkerServer>,
        registry: Arc<DistroRegistry>,
        source: Arc<dyn ManifestSource>,
        timeout: Duration,
    ) -> Self {
        ManifestGenerator {
            server,
            registry,
            source,
            timeout,
        }
    }

    pub fn spawn(self: &Arc<Self>, manifest_id: Uuid) {
        let generator = self.clone();
        actix_web::rt::spawn(async move { generator.serialize(manifest_id).await });
    }

    /// Picks up manifest jobs left behind by a previous run.
    pub fn resume_pending(self: &Arc<Self>) -> usize {
        let ids = self.server.queue().unfinished_jobs(JobType::ManifestIdOnly);
        for id in ids.iter() {
            info!("Resuming manifest job {}", id);
            self.spawn(*id);
        }
        ids.len()
    }

    /// Waits for the manifest job to become pending, then renders and
    /// finishes it. Failures end up in the job, never in the caller.
    pub async fn serialize(&self, manifest_id: Uuid) {
        let start = Instant::now();
        let assigned = loop {
            match self.server.request_job_by_id(manifest_id) {
                Ok(job) => break job,
                Err(WorkerError::Queue(JobQueueError::NotPending)) => (),
                Err(WorkerError::Queue(JobQueueError::Canceled)) => {
                    info!("Manifest job {} was canceled", manifest_id);
                    return;
                }
                Err(e) => {
                    error!("Error requesting manifest job {}: {}", manifest_id, e);
                    return;
                }
            }

            match self.server.job_status(manifest_id) {
                Ok(status) if status.is_finished() => {
                    debug!("Manifest job {} finished by a failed dependency", manifest_id);
                    return;
                }
                Ok(_) => (),
                Err(e) => {
                    error!("Error reading manifest job {}: {}", manifest_id, e);
                    return;
                }
            }

            if start.elapsed() >= self.timeout {
                warn!(
                    "Manifest job {} dependencies took longer than {:?} to finish",
                    manifest_id, self.timeout
                );
                self.fail_timed_out(manifest_id);
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };

        let result = match self.generate(&assigned) {
            Ok(result) => result,
            Err(job_error) => {
                error!("Error in manifest job {}: {}", manifest_id, job_error);
                ManifestJobByIDResult {
                    info: ManifestInfo {
                        composer_version: composer_version(),
                        pipeline_names: None,
                    },
                    job_result: JobResult::failed(job_error),
                    ..Default::default()
                }
            }
        };

        let finished = serde_json::to_value(&result)
            .map_err(WorkerError::from)
            .and_then(|value| self.server.finish_job(assigned.token, value));
        if let Err(e) = finished {
            error!("Error finishing manifest job {}: {}", manifest_id, e);
        }
    }

    fn fail_timed_out(&self, manifest_id: Uuid) {
        let job_error = JobError::new(
            clienterrors::DEPSOLVE_TIMEOUT,
            "Timeout while waiting for package dependency resolution",
            Some(json!("There may be a temporary issue with compute resources.")),
        );
        if let Err(e) = self.server.fail_job(manifest_id, job_error.clone()) {
            error!("Error failing manifest job {}: {}", manifest_id, e);
        }

        let dependencies = match self.server.job_status(manifest_id) {
            Ok(status) => status.dependencies,
            Err(_) => return,
        };
        for dep in dependencies {
            match self.server.job_status(dep) {
                Ok(status) if status.started_at.is_none() => {
                    if let Err(e) = self.server.fail_job(dep, job_error.clone()) {
                        error!("Error failing dependency {} of manifest {}: {}", dep, manifest_id, e);
                    }
                }
                _ => (),
            }
        }
    }

    fn generate(&self, assigned: &AssignedJob) -> Result<ManifestJobByIDResult, JobError> {
        use clienterrors::*;

        let reading = |_| JobError::new(READING_JOB_STATUS, "Error reading job status", None);
        let parsing = |_| JobError::new(PARSING_DYNAMIC_ARGS, "Error parsing dynamic arguments", None);

        let job = self
            .server
            .job::<ManifestJobByID>(assigned.id)
            .map_err(reading)?;
        if assigned.dynamic_args.is_empty() {
            return Err(JobError::new(NO_DYN_ARGS, "No dynamic arguments", None));
        }
        let dependencies = self.server.job_status(assigned.id).map_err(reading)?.dependencies;

        let mut depsolve = None;
        let mut containers = vec![];
        let mut ostree_commits = vec![];
        for (dep, arg) in dependencies.iter().zip(assigned.dynamic_args.iter()) {
            match self.server.job_type(*dep).map_err(reading)? {
                JobType::Depsolve => {
                    let result: DepsolveJobResult =
                        serde_json::from_value(arg.clone()).map_err(parsing)?;
                    if let Some(e) = result.job_result.job_error {
                        return Err(JobError::new(
                            DEPSOLVE_DEPENDENCY,
                            "Error in depsolve job dependency",
                            e.details,
                        ));
                    }
                    depsolve = Some(result);
                }
                JobType::ContainerResolve => {
                    let result: ContainerResolveJobResult =
                        serde_json::from_value(arg.clone()).map_err(parsing)?;
                    if let Some(e) = result.job_result.job_error {
                        return Err(JobError::new(
                            CONTAINER_DEPENDENCY,
                            "Error in container resolve job dependency",
                            e.details,
                        ));
                    }
                    containers = result.specs;
                }
                JobType::OSTreeResolve => {
                    let result: OSTreeResolveJobResult =
                        serde_json::from_value(arg.clone()).map_err(parsing)?;
                    if let Some(e) = result.job_result.job_error {
                        return Err(JobError::new(
                            OSTREE_DEPENDENCY,
                            "Error in ostree resolve job dependency",
                            e.details,
                        ));
                    }
                    ostree_commits = result.ostree_resolve_result_specs;
                }
                other => debug!("Ignoring {} dependency of manifest {}", other, assigned.id),
            }
        }

        let depsolve = depsolve.ok_or_else(|| JobError::new(NO_DYN_ARGS, "No dynamic arguments", None))?;
        if depsolve.package_specs.is_empty() {
            return Err(JobError::new(EMPTY_PACKAGE_SPECS, "Received empty package specs", None));
        }

        let generation = |e: ManifestError| {
            JobError::new(MANIFEST_GENERATION, "Error generating manifest", Some(json!(e.to_string())))
        };
        let unknown = || ManifestError::UnknownImageType {
            distro: job.distribution.clone(),
            arch: job.arch.clone(),
            image_type: job.image_type.clone(),
        };
        let distro = self.registry.get(&job.distribution).ok_or_else(|| generation(unknown()))?;
        let image_type = distro
            .arch(&job.arch)
            .and_then(|a| a.image_type(&job.image_type))
            .ok_or_else(|| generation(unknown()))?;

        let data = self
            .source
            .serialize(&ManifestInputs {
                distro,
                image_type,
                job: &job,
                package_specs: &depsolve.package_specs,
                containers: &containers,
                ostree_commits: &ostree_commits,
            })
            .map_err(generation)?;

        Ok(ManifestJobByIDResult {
            data,
            info: ManifestInfo {
                composer_version: composer_version(),
                pipeline_names: Some(image_type.pipeline_names()),
            },
            error: String::new(),
            job_result: JobResult::default(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_manifest::*;
    use super::*;
    use crate::blueprint::Blueprint;
    use crate::config::WorkerConfig;
    use crate::distro::test_distro;
    use crate::jobs::JobQueue;
    use crate::models::{DepsolveJob, OSBuildJob};
    use tempfile::TempDir;

    fn job(image_type: &str) -> ManifestJobByID {
        ManifestJobByID {
            distribution: "test-distro".to_string(),
            arch: "x86_64".to_string(),
            image_type: image_type.to_string(),
            seed: 42,
            size: 4 << 30,
            ..Default::default()
        }
    }

    fn render(job: &ManifestJobByID, specs: &BTreeMap<String, Vec<DepsolvedPackage>>) -> Result<Value, ManifestError> {
        let registry = test_distro::registry();
        let distro = registry.get("test-distro").unwrap();
        let image_type = distro.arch("x86_64").unwrap().image_type(&job.image_type).unwrap();
        PipelineManifestSource::default().serialize(&ManifestInputs {
            distro,
            image_type,
            job,
            package_specs: specs,
            containers: &[],
            ostree_commits: &[],
        })
    }

    fn specs() -> BTreeMap<String, Vec<DepsolvedPackage>> {
        serde_json::from_value::<DepsolveJobResult>(depsolve_result())
            .unwrap()
            .package_specs
    }

    #[test]
    fn test_pipeline_manifest() {
        let mut job = job("aws");
        job.blueprint = Blueprint {
            customizations: Some(BlueprintCustomizations {
                hostname: Some("builder".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let manifest = render(&job, &specs()).unwrap();

        assert_eq!(manifest["version"], "2");
        let names: Vec<&str> = manifest["pipelines"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["build", "os", "image"]);
        assert_eq!(manifest["pipelines"][0]["runner"], "org.osbuild.test-distro");
        assert_eq!(manifest["pipelines"][1]["stages"][1]["type"], "org.osbuild.hostname");
        assert_eq!(
            manifest["sources"]["org.osbuild.curl"]["items"].as_object().unwrap().len(),
            3
        );

        // Same seed, same manifest.
        assert_eq!(render(&job, &specs()).unwrap(), manifest);
        job.seed = 43;
        assert_ne!(render(&job, &specs()).unwrap(), manifest);
    }

    #[test]
    fn test_pipeline_manifest_errors() {
        let mut specs = specs();
        specs.get_mut("os").unwrap()[0].checksum = None;
        assert_eq!(
            render(&job("aws"), &specs),
            Err(ManifestError::MissingChecksum("kernel".to_string()))
        );
        specs.remove("os");
        assert_eq!(
            render(&job("aws"), &specs),
            Err(ManifestError::MissingPackageSet("os".to_string()))
        );
        assert_eq!(
            render(&job("edge-installer"), &self::specs()),
            Err(ManifestError::MissingOSTreeCommit)
        );
    }

    fn generator(timeout: Duration) -> (TempDir, Arc<WorkerServer>, ManifestGenerator) {
        let dir = tempfile::tempdir().unwrap();
        let queue = JobQueue::open(dir.path().join("jobs")).unwrap();
        let config = WorkerConfig {
            request_job_timeout_secs: 0,
            ..Default::default()
        };
        let server = Arc::new(WorkerServer::new(queue, dir.path().join("artifacts"), config).unwrap());
        let generator = ManifestGenerator::new(
            server.clone(),
            Arc::new(test_distro::registry()),
            Arc::new(PipelineManifestSource::default()),
            timeout,
        );
        (dir, server, generator)
    }

    #[actix_web::test]
    async fn test_serialize_after_depsolve() {
        let (_dir, server, generator) = generator(Duration::from_secs(5));
        let depsolve = server.enqueue(&DepsolveJob::default(), &[], "", "x86_64").unwrap();
        let manifest = server.enqueue(&job("aws"), &[depsolve], "", "x86_64").unwrap();

        let worker = server.clone();
        actix_web::rt::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let job = worker
                .request_job(&[JobType::Depsolve], "x86_64", "")
                .await
                .unwrap()
                .unwrap();
            worker.finish_job(job.token, depsolve_result()).unwrap();
        });
        generator.serialize(manifest).await;

        let (result, status) = server.job_info::<ManifestJobByID>(manifest).unwrap();
        assert!(status.is_success());
        assert_eq!(result.data["version"], "2");
        assert_eq!(result.info.composer_version, composer_version());
        assert_eq!(
            result.info.pipeline_names.unwrap().payload,
            vec!["os".to_string(), "image".to_string()]
        );
    }

    #[actix_web::test]
    async fn test_empty_package_specs() {
        let (_dir, server, generator) = generator(Duration::from_secs(5));
        let depsolve = server.enqueue(&DepsolveJob::default(), &[], "", "x86_64").unwrap();
        let manifest = server.enqueue(&job("aws"), &[depsolve], "", "x86_64").unwrap();
        let job = server.request_job(&[JobType::Depsolve], "x86_64", "").await.unwrap().unwrap();
        server.finish_job(job.token, json!({})).unwrap();

        generator.serialize(manifest).await;
        let error = server.job_dependency_chain_errors(manifest).unwrap().unwrap();
        assert_eq!(error.id, clienterrors::EMPTY_PACKAGE_SPECS);
    }

    #[actix_web::test]
    async fn test_timeout_fails_manifest_and_depsolve() {
        let (_dir, server, generator) = generator(Duration::from_millis(120));
        let depsolve = server.enqueue(&DepsolveJob::default(), &[], "", "x86_64").unwrap();
        let manifest = server.enqueue(&job("aws"), &[depsolve], "", "x86_64").unwrap();
        let build = server.enqueue(&OSBuildJob::default(), &[manifest], "", "x86_64").unwrap();

        generator.serialize(manifest).await;

        let error = server.job_dependency_chain_errors(manifest).unwrap().unwrap();
        assert_eq!(error.id, clienterrors::DEPSOLVE_TIMEOUT);
        let error = server.job_dependency_chain_errors(depsolve).unwrap().unwrap();
        assert_eq!(error.id, clienterrors::DEPSOLVE_TIMEOUT);
        let error = server.job_dependency_chain_errors(build).unwrap().unwrap();
        assert_eq!(error.id, clienterrors::MANIFEST_DEPENDENCY);
    }

    #[actix_web::test]
    async fn test_canceled_manifest_is_left_alone() {
        let (_dir, server, generator) = generator(Duration::from_secs(5));
        let depsolve = server.enqueue(&DepsolveJob::default(), &[], "", "x86_64").unwrap();
        let manifest = server.enqueue(&job("aws"), &[depsolve], "", "x86_64").unwrap();
        server.cancel(depsolve).unwrap();

        generator.serialize(manifest).await;
        let status = server.job_status(manifest).unwrap();
        assert!(status.canceled);
        assert!(status.result.is_none());
    }
}
