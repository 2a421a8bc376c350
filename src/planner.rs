//! Turns compose requests into job graphs.
use log::{info, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::blueprint::{Blueprint, BlueprintError, Package};
use crate::compose::{
    AwsEc2CloneCompose, AwsEc2UploadOptions, AwsS3UploadOptions, AzureUploadOptions,
    ComposeRequest, ContainerUploadOptions, DepsolveRequest, GcpUploadOptions, ImageRequest, Koji,
    LocalUploadOptions, OciUploadOptions, PulpOSTreeUploadOptions, Repository,
    SearchPackagesRequest, OSTree,
};
use crate::distro::{Arch, Distro, DistroRegistry, ImageType};
use crate::errors::{ApiError, ComposerErrorCode, JobQueueError, WorkerError};
use crate::manifest::ManifestGenerator;
use crate::models::{
    AwsEc2CopyJob, AwsEc2ShareJob, ContainerResolveJob, ContainerSpec, DepsolveJob,
    DepsolvedPackage, JobArgs, JobError, JobOutcome, JobType, KojiFinalizeJob, KojiInitJob,
    ManifestJobByID, OSBuildJob, OSTreeResolveJob, OSTreeResolveSpec, OSTreeSource, PackageSet,
    RepoConfig, SearchPackagesJob,
};
use crate::targets::{
    AwsS3TargetOptions, AwsTargetOptions, AwsTargetResultOptions, AzureImageTargetOptions,
    ContainerTargetOptions, GcpTargetOptions, KojiTargetOptions, OciTargetOptions, OsbuildArtifact,
    PulpOSTreeTargetOptions, Target, TargetKind, WorkerServerTargetOptions,
};
use crate::worker::WorkerServer;

const SBOM_TYPE: &str = "spdx";

#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    #[error("compose request has {0} image requests")]
    InvalidNumberOfImageBuilds(usize),

    #[error("unsupported distribution {0:?}")]
    UnsupportedDistribution(String),

    #[error("unsupported architecture {0:?}")]
    UnsupportedArchitecture(String),

    #[error("unsupported image type {0:?}")]
    UnsupportedImageType(String),

    #[error("repository {0} must have exactly one of baseurl, mirrorlist or metalink")]
    InvalidRepository(usize),

    #[error(transparent)]
    InvalidCustomization(#[from] BlueprintError),

    #[error("invalid ostree ref {0:?}")]
    InvalidOSTreeRef(String),

    #[error("invalid ostree parameters: {0}")]
    InvalidOSTreeParams(&'static str),

    #[error("invalid upload target: {0}")]
    InvalidUploadTarget(String),

    #[error("failed to generate manifest seed: {0}")]
    Seed(rand::Error),

    #[error("compose not found")]
    ComposeNotFound,

    #[error("compose is not finished or failed")]
    ComposeBadState,

    #[error("compose doesn't support this operation")]
    UnsupportedImage,

    #[error("job failed: {0}")]
    JobFailed(JobError),

    #[error("timed out waiting for job")]
    JobTimeout,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl PlanError {
    pub fn code(&self) -> ComposerErrorCode {
        use ComposerErrorCode::*;
        match self {
            PlanError::InvalidNumberOfImageBuilds(_) => InvalidNumberOfImageBuilds,
            PlanError::UnsupportedDistribution(_) => UnsupportedDistribution,
            PlanError::UnsupportedArchitecture(_) => UnsupportedArchitecture,
            PlanError::UnsupportedImageType(_) => UnsupportedImageType,
            PlanError::InvalidRepository(_) => InvalidRepository,
            PlanError::InvalidCustomization(_) => InvalidCustomization,
            PlanError::InvalidOSTreeRef(_) => InvalidOSTreeRef,
            PlanError::InvalidOSTreeParams(_) => InvalidOSTreeParams,
            PlanError::InvalidUploadTarget(_) => InvalidUploadTarget,
            PlanError::Seed(_) => FailedToGenerateManifestSeed,
            PlanError::ComposeNotFound => ComposeNotFound,
            PlanError::ComposeBadState => ComposeBadState,
            PlanError::UnsupportedImage => UnsupportedImage,
            PlanError::JobFailed(_) => DNFError,
            PlanError::JobTimeout => FailedToDepsolve,
            PlanError::Json(_) => JSONMarshallingError,
            PlanError::Worker(WorkerError::Queue(JobQueueError::NotExist)) => ComposeNotFound,
            PlanError::Worker(WorkerError::WrongJobType { .. }) => UnsupportedImage,
            PlanError::Worker(_) => EnqueueingJob,
        }
    }
}

impl From<PlanError> for ApiError {
    fn from(e: PlanError) -> Self {
        ApiError::composer(e.code()).with_internal(e)
    }
}

/// A validated image request, ready to be enqueued.
#[derive(Debug, Clone)]
struct ImagePlan {
    distro: String,
    arch: String,
    releasever: String,
    module_platform_id: String,
    image_type: ImageType,
    blueprint: Blueprint,
    repositories: Vec<RepoConfig>,
    ostree: Option<OSTreeSource>,
    ostree_resolve: Option<OSTreeResolveSpec>,
    containers: Vec<ContainerSpec>,
    targets: Vec<Target>,
    size: u64,
    seed: i64,
}

#[derive(Debug, Clone, Copy)]
struct EnqueuedImage {
    build: Uuid,
    manifest: Uuid,
}

pub struct Planner {
    server: Arc<WorkerServer>,
    registry: Arc<DistroRegistry>,
    manifests: Arc<ManifestGenerator>,
    compose_request_dir: PathBuf,
}

impl Planner {
    pub fn new(
        server: Arc<WorkerServer>,
        registry: Arc<DistroRegistry>,
        manifests: Arc<ManifestGenerator>,
        compose_request_dir: PathBuf,
    ) -> io::Result<Self> {
        fs::create_dir_all(&compose_request_dir)?;
        Ok(Planner {
            server,
            registry,
            manifests,
            compose_request_dir,
        })
    }

    pub fn server(&self) -> &Arc<WorkerServer> {
        &self.server
    }

    pub fn registry(&self) -> &DistroRegistry {
        &self.registry
    }

    /// Validates the request, enqueues its job graph and returns the root
    /// job. The graph is held back from workers until every job is in, so
    /// nothing has started when a failed plan is rolled back.
    pub fn enqueue_compose(&self, request: &ComposeRequest, channel: &str) -> Result<Uuid, PlanError> {
        let images = request.all_image_requests();
        let count_ok = match request.koji {
            Some(_) => !images.is_empty(),
            None => images.len() == 1,
        };
        if !count_ok {
            return Err(PlanError::InvalidNumberOfImageBuilds(images.len()));
        }

        let seed = manifest_seed()?;
        let plans = images
            .iter()
            .map(|image| self.plan_image(request, image, seed))
            .collect::<Result<Vec<_>, _>>()?;

        let mut enqueued = vec![];
        let planned = match &request.koji {
            Some(koji) => self.enqueue_koji(koji, &plans, channel, &mut enqueued),
            None => self
                .enqueue_image(&plans[0], channel, None, &mut enqueued)
                .map(|image| (image.build, vec![image.manifest])),
        };

        let (root, manifests) = match planned {
            Ok(planned) => planned,
            Err(e) => {
                self.rollback(&enqueued);
                return Err(e);
            }
        };
        if let Err(e) = self.server.release(&enqueued) {
            self.rollback(&enqueued);
            return Err(e.into());
        }

        self.save_request(root, request);
        for manifest in manifests {
            self.manifests.spawn(manifest);
        }
        info!(
            "Enqueued compose {} ({} jobs) on channel {:?}",
            root,
            enqueued.len(),
            channel
        );
        Ok(root)
    }

    fn resolve<'a>(&'a self, distro: &str, arch: &str, image_type: &str) -> Result<(&'a Distro, &'a Arch, &'a ImageType), PlanError> {
        let d = self
            .registry
            .get(distro)
            .ok_or_else(|| PlanError::UnsupportedDistribution(distro.to_string()))?;
        let a = d
            .arch(arch)
            .ok_or_else(|| PlanError::UnsupportedArchitecture(arch.to_string()))?;
        let t = a
            .image_type(image_type)
            .ok_or_else(|| PlanError::UnsupportedImageType(image_type.to_string()))?;
        Ok((d, a, t))
    }

    fn plan_image(&self, request: &ComposeRequest, image: &ImageRequest, seed: i64) -> Result<ImagePlan, PlanError> {
        let (distro, arch, image_type) =
            self.resolve(&request.distribution, &image.architecture, &image.image_type)?;

        let customizations = request.customizations.clone().unwrap_or_default();
        let blueprint = Blueprint {
            name: "compose".to_string(),
            version: "0.0.0".to_string(),
            packages: customizations
                .packages
                .iter()
                .map(|name| Package {
                    name: name.clone(),
                    version: None,
                })
                .collect(),
            containers: customizations.blueprint_containers(),
            customizations: customizations.blueprint_customizations(),
            ..Default::default()
        };
        blueprint.validate(&image_type.allowed_customizations)?;
        if !blueprint.containers.is_empty() && !image_type.embed_containers {
            return Err(BlueprintError::UnsupportedCustomization("containers".to_string()).into());
        }

        let repositories = image_repositories(
            arch,
            image_type,
            &image.repositories,
            &customizations.payload_repositories,
        )?;
        let (ostree, ostree_resolve) = ostree_options(image_type, image.ostree.as_ref())?;
        let targets = image_targets(image_type, image, request.koji.is_some())?;

        Ok(ImagePlan {
            distro: distro.name.clone(),
            arch: arch.name.clone(),
            releasever: distro.releasever.clone(),
            module_platform_id: distro.module_platform_id.clone(),
            image_type: image_type.clone(),
            containers: blueprint
                .containers
                .iter()
                .map(|c| ContainerSpec {
                    source: c.source.clone(),
                    name: c.name.clone(),
                    tls_verify: c.tls_verify,
                    ..Default::default()
                })
                .collect(),
            blueprint,
            repositories,
            ostree,
            ostree_resolve,
            targets,
            size: image_type.size(image.size),
            seed,
        })
    }

    fn enqueue_tracked<A: JobArgs>(
        &self,
        args: &A,
        deps: &[Uuid],
        channel: &str,
        arch: &str,
        enqueued: &mut Vec<Uuid>,
    ) -> Result<Uuid, PlanError> {
        let id = self.server.enqueue_held(args, deps, channel, arch)?;
        enqueued.push(id);
        Ok(id)
    }

    /// Depsolve, resolvers, manifest and build of one image. With `koji`
    /// set the build also waits on the Koji init job and gets the Koji
    /// target in front of its own.
    fn enqueue_image(
        &self,
        plan: &ImagePlan,
        channel: &str,
        koji: Option<(Uuid, Target)>,
        enqueued: &mut Vec<Uuid>,
    ) -> Result<EnqueuedImage, PlanError> {
        let depsolve = self.enqueue_tracked(
            &DepsolveJob {
                grouped_package_sets: plan.image_type.package_sets(&plan.blueprint, &plan.repositories),
                module_platform_id: plan.module_platform_id.clone(),
                arch: plan.arch.clone(),
                releasever: plan.releasever.clone(),
                sbom_type: Some(SBOM_TYPE.to_string()),
            },
            &[],
            channel,
            &plan.arch,
            enqueued,
        )?;

        let mut resolvers = vec![];
        if !plan.containers.is_empty() {
            resolvers.push(self.enqueue_tracked(
                &ContainerResolveJob {
                    arch: plan.arch.clone(),
                    specs: plan.containers.clone(),
                },
                &[],
                channel,
                &plan.arch,
                enqueued,
            )?);
        }
        if let Some(spec) = &plan.ostree_resolve {
            resolvers.push(self.enqueue_tracked(
                &OSTreeResolveJob {
                    ostree_resolve_specs: vec![spec.clone()],
                },
                &[],
                channel,
                &plan.arch,
                enqueued,
            )?);
        }

        let mut manifest_deps = vec![depsolve];
        manifest_deps.extend_from_slice(&resolvers);
        let manifest = self.enqueue_tracked(
            &ManifestJobByID {
                distribution: plan.distro.clone(),
                arch: plan.arch.clone(),
                image_type: plan.image_type.name.clone(),
                blueprint: plan.blueprint.clone(),
                seed: plan.seed,
                repositories: plan.repositories.clone(),
                ostree: plan.ostree.clone(),
                size: plan.size,
            },
            &manifest_deps,
            channel,
            &plan.arch,
            enqueued,
        )?;

        let mut build = OSBuildJob {
            targets: plan.targets.clone(),
            pipeline_names: Some(plan.image_type.pipeline_names()),
            image_boot_mode: plan.image_type.boot_mode.clone(),
            ..Default::default()
        };
        let mut build_deps = vec![];
        match koji {
            Some((init, target)) => {
                build.targets.insert(0, target);
                build.manifest_dyn_args_idx = Some(1);
                build.depsolve_dyn_args_idx = Some(2);
                build_deps.extend_from_slice(&[init, manifest, depsolve]);
            }
            None => {
                build.manifest_dyn_args_idx = Some(0);
                build_deps.push(manifest);
            }
        }
        build_deps.extend_from_slice(&resolvers);
        let build = self.enqueue_tracked(&build, &build_deps, channel, &plan.arch, enqueued)?;

        Ok(EnqueuedImage { build, manifest })
    }

    fn enqueue_koji(
        &self,
        koji: &Koji,
        plans: &[ImagePlan],
        channel: &str,
        enqueued: &mut Vec<Uuid>,
    ) -> Result<(Uuid, Vec<Uuid>), PlanError> {
        let koji_directory = format!("osbuild-cg/osbuild-composer-koji-{}", Uuid::new_v4());
        let init = self.enqueue_tracked(
            &KojiInitJob {
                server: koji.server.clone(),
                name: koji.name.clone(),
                version: koji.version.clone(),
                release: koji.release.clone(),
            },
            &[],
            channel,
            "",
            enqueued,
        )?;

        let mut builds = vec![];
        let mut manifests = vec![];
        let mut koji_filenames = vec![];
        for plan in plans {
            let filename = koji_filename(koji, &plan.arch, &plan.image_type.filename);
            let target = Target::new(
                TargetKind::Koji,
                &filename,
                &KojiTargetOptions {
                    server: koji.server.clone(),
                    upload_directory: koji_directory.clone(),
                },
                artifact(&plan.image_type),
            )?;
            let image = self.enqueue_image(plan, channel, Some((init, target)), enqueued)?;
            builds.push(image.build);
            manifests.push(image.manifest);
            koji_filenames.push(filename);
        }

        let finalize = KojiFinalizeJob {
            server: koji.server.clone(),
            name: koji.name.clone(),
            version: koji.version.clone(),
            release: koji.release.clone(),
            koji_filenames,
            koji_directory,
            task_id: koji.task_id,
            start_time: chrono::Utc::now().timestamp().max(0) as u64,
        };
        let root = self
            .server
            .enqueue_koji_finalize(&finalize, init, &builds, channel)?;
        enqueued.push(root);
        Ok((root, manifests))
    }

    fn rollback(&self, enqueued: &[Uuid]) {
        for id in enqueued.iter().rev() {
            match self.server.delete_job(*id) {
                Ok(_) | Err(WorkerError::Queue(JobQueueError::NotExist)) => (),
                Err(e) => warn!("Error removing job {} of a failed compose: {}", id, e),
            }
        }
    }

    fn request_path(&self, id: Uuid) -> PathBuf {
        self.compose_request_dir.join(format!("{id}.json"))
    }

    fn save_request(&self, id: Uuid, request: &ComposeRequest) {
        let write = || -> io::Result<()> {
            let mut file = NamedTempFile::new_in(&self.compose_request_dir)?;
            serde_json::to_writer(&mut file, request)?;
            file.flush()?;
            file.persist(self.request_path(id)).map_err(|e| e.error)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!("Error saving compose request {}: {}", id, e);
        }
    }

    /// Removes a compose's job tree, its artifacts and its request snapshot.
    pub fn delete_compose(&self, id: Uuid) -> Result<Vec<Uuid>, PlanError> {
        let deleted = self.server.delete_job(id)?;
        match fs::remove_file(self.request_path(id)) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (),
            Err(e) => warn!("Error removing compose request {}: {}", id, e),
        }
        info!("Deleted compose {} ({} jobs)", id, deleted.len());
        Ok(deleted)
    }

    /// Copies the AMI of a finished AWS compose to another region when
    /// needed, then shares it. Returns the share job.
    pub fn clone_compose(
        &self,
        id: Uuid,
        body: &AwsEc2CloneCompose,
        channel: &str,
    ) -> Result<Uuid, PlanError> {
        let (result, status) = self.server.job_info::<OSBuildJob>(id)?;
        if !status.is_finished() || !result.build_succeeded() {
            return Err(PlanError::ComposeBadState);
        }
        let aws: AwsTargetResultOptions = result
            .target_results
            .iter()
            .find(|r| r.kind() == Some(TargetKind::Aws) && r.target_error.is_none())
            .map(|r| serde_json::from_value(r.options.clone().unwrap_or(Value::Null)))
            .transpose()?
            .ok_or(PlanError::UnsupportedImage)?;

        let mut enqueued = vec![];
        let share_dep;
        let share = if body.region == aws.region {
            share_dep = id;
            AwsEc2ShareJob {
                ami: aws.ami.clone(),
                region: body.region.clone(),
                share_with_accounts: body.share_with_accounts.clone(),
            }
        } else {
            share_dep = match self.existing_copy(id, &body.region)? {
                Some(copy) => copy,
                None => {
                    let copy = self.server.enqueue_held(
                        &AwsEc2CopyJob {
                            ami: aws.ami.clone(),
                            source_region: aws.region.clone(),
                            target_region: body.region.clone(),
                            target_name: format!("composer-api-{}", Uuid::new_v4()),
                        },
                        &[id],
                        channel,
                        "",
                    )?;
                    enqueued.push(copy);
                    copy
                }
            };
            AwsEc2ShareJob {
                ami: String::new(),
                region: body.region.clone(),
                share_with_accounts: body.share_with_accounts.clone(),
            }
        };

        let share_id = match self.server.enqueue_held(&share, &[share_dep], channel, "") {
            Ok(share_id) => share_id,
            Err(e) => {
                self.rollback(&enqueued);
                return Err(e.into());
            }
        };
        enqueued.push(share_id);
        if let Err(e) = self.server.release(&enqueued) {
            self.rollback(&enqueued);
            return Err(e.into());
        }
        info!("Cloning compose {} to {} as {}", id, body.region, share_id);
        Ok(share_id)
    }

    fn existing_copy(&self, id: Uuid, region: &str) -> Result<Option<Uuid>, PlanError> {
        for dependent in self.server.queue().dependents(id).map_err(WorkerError::from)? {
            if self.server.job_type(dependent)? != JobType::AwsEc2Copy {
                continue;
            }
            let copy = self.server.job::<AwsEc2CopyJob>(dependent)?;
            let status = self.server.job_status(dependent)?;
            if copy.target_region == region && status.is_success() {
                return Ok(Some(dependent));
            }
        }
        Ok(None)
    }

    /// Runs a job nobody else will look at and throws it away afterwards.
    async fn run_transient<A: JobArgs>(
        &self,
        args: &A,
        channel: &str,
        arch: &str,
        timeout: Duration,
    ) -> Result<A::Result, PlanError> {
        let id = self.server.enqueue(args, &[], channel, arch)?;
        let outcome = match self.server.wait_for_job(id, timeout).await {
            Ok(status) if status.is_finished() => self
                .server
                .job_info::<A>(id)
                .map(|(result, _)| result)
                .map_err(PlanError::from),
            Ok(_) => Err(PlanError::JobFailed(JobError::new(0, "Job was canceled", None))),
            Err(WorkerError::Queue(JobQueueError::DequeueTimeout)) => {
                if let Err(e) = self.server.cancel(id) {
                    warn!("Error canceling timed out job {}: {}", id, e);
                }
                Err(PlanError::JobTimeout)
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = self.server.delete_job(id) {
            warn!("Error deleting transient job {}: {}", id, e);
        }

        let result = outcome?;
        if let Some(job_error) = result.job_error() {
            return Err(PlanError::JobFailed(job_error.clone()));
        }
        Ok(result)
    }

    fn request_repositories(
        &self,
        arch: &Arch,
        repositories: &[Repository],
    ) -> Result<Vec<RepoConfig>, PlanError> {
        if repositories.is_empty() {
            return Ok(arch.repositories.clone());
        }
        repositories
            .iter()
            .enumerate()
            .map(|(i, r)| {
                r.to_repo_config(&format!("repo-{i}"))
                    .ok_or(PlanError::InvalidRepository(i))
            })
            .collect()
    }

    /// Depsolves a blueprint's packages through a transient depsolve job.
    pub async fn depsolve_blueprint(
        &self,
        request: &DepsolveRequest,
        channel: &str,
        timeout: Duration,
    ) -> Result<Vec<DepsolvedPackage>, PlanError> {
        let bp = &request.blueprint;
        let distro_name = request
            .distribution
            .as_ref()
            .or(bp.distro.as_ref())
            .ok_or_else(|| PlanError::UnsupportedDistribution(String::new()))?;
        let arch_name = request
            .architecture
            .as_ref()
            .or(bp.architecture.as_ref())
            .map(String::as_str)
            .unwrap_or(std::env::consts::ARCH);
        let distro = self
            .registry
            .get(distro_name)
            .ok_or_else(|| PlanError::UnsupportedDistribution(distro_name.clone()))?;
        let arch = distro
            .arch(arch_name)
            .ok_or_else(|| PlanError::UnsupportedArchitecture(arch_name.to_string()))?;

        let blueprint = Blueprint {
            name: bp.name.clone(),
            packages: bp.packages.clone(),
            modules: bp.modules.clone(),
            ..Default::default()
        };
        let mut sets = BTreeMap::new();
        sets.insert(
            "depsolve".to_string(),
            vec![PackageSet {
                include: blueprint.package_names(),
                exclude: vec![],
                repositories: self.request_repositories(arch, &bp.repositories)?,
            }],
        );
        let job = DepsolveJob {
            grouped_package_sets: sets,
            module_platform_id: distro.module_platform_id.clone(),
            arch: arch.name.clone(),
            releasever: distro.releasever.clone(),
            sbom_type: None,
        };
        let mut result = self.run_transient(&job, channel, &arch.name, timeout).await?;
        Ok(result.package_specs.remove("depsolve").unwrap_or_default())
    }

    /// Searches the distribution's repositories through a transient job.
    pub async fn search_packages(
        &self,
        request: &SearchPackagesRequest,
        channel: &str,
        timeout: Duration,
    ) -> Result<Vec<DepsolvedPackage>, PlanError> {
        let distro = self
            .registry
            .get(&request.distribution)
            .ok_or_else(|| PlanError::UnsupportedDistribution(request.distribution.clone()))?;
        let arch = distro
            .arch(&request.architecture)
            .ok_or_else(|| PlanError::UnsupportedArchitecture(request.architecture.clone()))?;
        let job = SearchPackagesJob {
            packages: request.packages.clone(),
            repos: self.request_repositories(arch, &request.repositories)?,
            module_platform_id: distro.module_platform_id.clone(),
            arch: arch.name.clone(),
            releasever: distro.releasever.clone(),
        };
        let result = self.run_transient(&job, channel, &arch.name, timeout).await?;
        Ok(result.packages)
    }
}

/// A random non-negative seed shared by every image of a compose.
fn manifest_seed() -> Result<i64, PlanError> {
    let mut bytes = [0u8; 8];
    OsRng.try_fill_bytes(&mut bytes).map_err(PlanError::Seed)?;
    Ok(i64::from_le_bytes(bytes) & i64::MAX)
}

/// Everything after the first dot, including it.
fn split_extension(filename: &str) -> &str {
    filename.find('.').map(|i| &filename[i..]).unwrap_or("")
}

fn koji_filename(koji: &Koji, arch: &str, image_filename: &str) -> String {
    format!(
        "{}-{}-{}.{}{}",
        koji.name,
        koji.version,
        koji.release,
        arch,
        split_extension(image_filename)
    )
}

fn artifact(image_type: &ImageType) -> OsbuildArtifact {
    OsbuildArtifact {
        export_filename: image_type.filename.clone(),
        export_name: image_type.exports.first().cloned().unwrap_or_default(),
    }
}

fn image_repositories(
    arch: &Arch,
    image_type: &ImageType,
    requested: &[Repository],
    payload: &[Repository],
) -> Result<Vec<RepoConfig>, PlanError> {
    let mut repos = arch.repositories.clone();
    for (i, repo) in requested.iter().enumerate() {
        let config = repo
            .to_repo_config(&format!("repo-{i}"))
            .ok_or(PlanError::InvalidRepository(i))?;
        repos.push(config);
    }
    for (i, repo) in payload.iter().enumerate() {
        let mut config = repo
            .to_repo_config(&format!("payload-repo-{i}"))
            .ok_or(PlanError::InvalidRepository(requested.len() + i))?;
        if config.package_sets.is_empty() {
            config.package_sets = image_type.payload_package_sets.clone();
        }
        repos.push(config);
    }
    Ok(repos)
}

fn valid_ref_component(component: &str) -> bool {
    let mut chars = component.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => (),
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Slash separated components of letters, digits, `_`, `-` and `.`, none
/// starting with `-` or `.`.
pub fn valid_ostree_ref(r: &str) -> bool {
    r.split('/').all(valid_ref_component)
}

fn ostree_options(
    image_type: &ImageType,
    requested: Option<&OSTree>,
) -> Result<(Option<OSTreeSource>, Option<OSTreeResolveSpec>), PlanError> {
    let requested = match requested {
        Some(o) => o,
        None if image_type.requires_ostree_commit => {
            return Err(PlanError::InvalidOSTreeParams("image type requires an ostree url"))
        }
        None => return Ok((None, None)),
    };
    let default_ref = match &image_type.ostree_ref {
        Some(r) => r,
        None => return Err(PlanError::InvalidOSTreeParams("image type does not support ostree")),
    };

    let ostree_ref = requested.ostree_ref.clone().unwrap_or_else(|| default_ref.clone());
    if !valid_ostree_ref(&ostree_ref) {
        return Err(PlanError::InvalidOSTreeRef(ostree_ref));
    }
    if let Some(parent) = &requested.parent {
        if !valid_ostree_ref(parent) {
            return Err(PlanError::InvalidOSTreeRef(parent.clone()));
        }
    }

    let url = requested.url.clone().filter(|u| !u.is_empty());
    let resolve = match &url {
        Some(url) => Some(OSTreeResolveSpec {
            url: url.clone(),
            ostree_ref: requested.parent.clone().unwrap_or_else(|| ostree_ref.clone()),
            rhsm: requested.rhsm,
        }),
        None if requested.parent.is_some() => {
            return Err(PlanError::InvalidOSTreeParams("parent ref requires a url"))
        }
        None if image_type.requires_ostree_commit => {
            return Err(PlanError::InvalidOSTreeParams("image type requires an ostree url"))
        }
        None => None,
    };

    let source = OSTreeSource {
        url: url.unwrap_or_default(),
        ostree_ref,
        parent: requested.parent.clone().unwrap_or_default(),
        rhsm: requested.rhsm,
    };
    Ok((Some(source), resolve))
}

fn image_targets(image_type: &ImageType, image: &ImageRequest, koji: bool) -> Result<Vec<Target>, PlanError> {
    let requested: Vec<(String, Value)> = match (&image.upload_targets, &image.upload_options) {
        (Some(targets), _) => targets
            .iter()
            .map(|t| (t.upload_type.clone(), t.upload_options.clone()))
            .collect(),
        (None, Some(options)) => vec![(image_type.default_target.clone(), options.clone())],
        (None, None) if koji => vec![],
        (None, None) => vec![(image_type.default_target.clone(), json!({}))],
    };
    if requested.is_empty() && !koji {
        return Err(PlanError::InvalidUploadTarget("no upload target".to_string()));
    }

    requested
        .iter()
        .map(|(upload_type, options)| {
            let kind = TargetKind::from_upload_type(upload_type)
                .filter(|k| *k != TargetKind::Koji && image_type.permits_target(upload_type))
                .ok_or_else(|| {
                    PlanError::InvalidUploadTarget(format!(
                        "{:?} is not supported by image type {}",
                        upload_type, image_type.name
                    ))
                })?;
            make_target(kind, options, image_type)
        })
        .collect()
}

fn upload_options<O: serde::de::DeserializeOwned>(kind: TargetKind, options: &Value) -> Result<O, PlanError> {
    let options = match options {
        Value::Null => json!({}),
        other => other.clone(),
    };
    serde_json::from_value(options)
        .map_err(|e| PlanError::InvalidUploadTarget(format!("{}: {}", kind.upload_type(), e)))
}

fn make_target(kind: TargetKind, options: &Value, image_type: &ImageType) -> Result<Target, PlanError> {
    let key = format!("composer-api-{}", Uuid::new_v4());
    let artifact = artifact(image_type);
    let target = match kind {
        TargetKind::Aws => {
            let o: AwsEc2UploadOptions = upload_options(kind, options)?;
            let image_name = o.snapshot_name.clone().unwrap_or_else(|| key.clone());
            let options = AwsTargetOptions {
                region: o.region,
                key,
                share_with_accounts: o.share_with_accounts,
            };
            Target::new(kind, &image_name, &options, artifact)?
        }
        TargetKind::AwsS3 => {
            let o: AwsS3UploadOptions = upload_options(kind, options)?;
            let options = AwsS3TargetOptions {
                region: o.region,
                key: key.clone(),
                public: o.public,
            };
            Target::new(kind, &key, &options, artifact)?
        }
        TargetKind::Gcp => {
            let o: GcpUploadOptions = upload_options(kind, options)?;
            let image_name = o.image_name.clone().unwrap_or_else(|| key.clone());
            let options = GcpTargetOptions {
                region: o.region,
                bucket: o.bucket.unwrap_or_default(),
                object: key,
                share_with_accounts: o.share_with_accounts,
            };
            Target::new(kind, &image_name, &options, artifact)?
        }
        TargetKind::Azure => {
            let o: AzureUploadOptions = upload_options(kind, options)?;
            let image_name = o.image_name.clone().unwrap_or_else(|| key.clone());
            let options = AzureImageTargetOptions {
                tenant_id: o.tenant_id,
                subscription_id: o.subscription_id,
                resource_group: o.resource_group,
                location: o.location,
            };
            Target::new(kind, &image_name, &options, artifact)?
        }
        TargetKind::Container => {
            let o: ContainerUploadOptions = upload_options(kind, options)?;
            let name = o.name.unwrap_or_else(|| image_type.name.clone());
            let tag = o.tag.unwrap_or_else(|| "latest".to_string());
            let options = ContainerTargetOptions {
                reference: format!("{name}:{tag}"),
                tls_verify: None,
            };
            Target::new(kind, &name, &options, artifact)?
        }
        TargetKind::Oci => {
            let _: OciUploadOptions = upload_options(kind, options)?;
            Target::new(kind, &key, &OciTargetOptions::default(), artifact)?
        }
        TargetKind::PulpOSTree => {
            let o: PulpOSTreeUploadOptions = upload_options(kind, options)?;
            let options = PulpOSTreeTargetOptions {
                server_address: o.server_address,
                repository: o.repository,
                basepath: o.basepath,
            };
            Target::new(kind, &key, &options, artifact)?
        }
        TargetKind::WorkerServer => {
            let _: LocalUploadOptions = upload_options(kind, options)?;
            Target::new(kind, &key, &WorkerServerTargetOptions {}, artifact)?
        }
        TargetKind::Koji => {
            return Err(PlanError::InvalidUploadTarget("koji".to_string()));
        }
    };
    Ok(target)
}

#[cfg(test)]
pub mod test_planner {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::distro::test_distro;
    use crate::jobs::JobQueue;
    use crate::manifest::PipelineManifestSource;
    use tempfile::TempDir;

    /// A planner over a fresh state directory.
    pub fn planner(dir: &TempDir) -> Planner {
        let queue = JobQueue::open(dir.path().join("jobs")).unwrap();
        let config = WorkerConfig {
            request_job_timeout_secs: 1,
            ..Default::default()
        };
        let server = Arc::new(WorkerServer::new(queue, dir.path().join("artifacts"), config).unwrap());
        let registry = Arc::new(test_distro::registry());
        let manifests = Arc::new(ManifestGenerator::new(
            server.clone(),
            registry.clone(),
            Arc::new(PipelineManifestSource::default()),
            Duration::from_secs(5),
        ));
        Planner::new(server, registry, manifests, dir.path().join("ComposeRequest")).unwrap()
    }

    pub fn aws_request() -> ComposeRequest {
        serde_json::from_value(json!({
            "distribution": "test-distro",
            "image_request": {
                "arch": "arch3",
                "image_type": "aws",
                "repositories": [{"baseurl": "https://r.example"}],
                "upload_options": {"region": "eu"}
            }
        }))
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_planner::*;
    use super::*;
    use crate::compose::{Container, Customizations, UploadTarget};
    use crate::targets::TargetResult;
    use tempfile::TempDir;

    fn count_jobs(planner: &Planner) -> usize {
        fs::read_dir(planner.server.artifacts_dir().parent().unwrap().join("jobs"))
            .unwrap()
            .count()
    }

    #[actix_web::test]
    async fn test_enqueue_compose_graph() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let root = planner.enqueue_compose(&aws_request(), "org-42").unwrap();

        let status = planner.server.job_status(root).unwrap();
        assert_eq!(status.job_type, JobType::OSBuild);
        assert_eq!(status.channel, "org-42");
        assert_eq!(status.dependencies.len(), 1);
        let manifest = status.dependencies[0];
        let manifest_status = planner.server.job_status(manifest).unwrap();
        assert_eq!(manifest_status.job_type, JobType::ManifestIdOnly);
        let depsolve = manifest_status.dependencies[0];
        assert_eq!(planner.server.job_type(depsolve).unwrap(), JobType::Depsolve);

        let build: OSBuildJob = planner.server.job(root).unwrap();
        assert_eq!(build.targets.len(), 1);
        assert_eq!(build.targets[0].name, "org.osbuild.aws");
        assert_eq!(build.targets[0].options["region"], "eu");
        assert!(build.targets[0].image_name.starts_with("composer-api-"));
        assert_eq!(build.manifest_dyn_args_idx, Some(0));

        let args: ManifestJobByID = planner.server.job(manifest).unwrap();
        assert!(args.seed >= 0);
        assert_eq!(args.repositories.len(), 2);

        let snapshot = dir.path().join("ComposeRequest").join(format!("{root}.json"));
        let saved: ComposeRequest = serde_json::from_slice(&fs::read(snapshot).unwrap()).unwrap();
        assert_eq!(saved, aws_request());
    }

    #[actix_web::test]
    async fn test_rejections_leave_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);

        let mut request = aws_request();
        request.distribution = "fedora-99".to_string();
        assert_eq!(
            planner.enqueue_compose(&request, "").unwrap_err().code(),
            ComposerErrorCode::UnsupportedDistribution
        );

        let mut request = aws_request();
        request.image_request.as_mut().unwrap().architecture = "s390x".to_string();
        assert_eq!(
            planner.enqueue_compose(&request, "").unwrap_err().code(),
            ComposerErrorCode::UnsupportedArchitecture
        );

        let mut request = aws_request();
        request.image_request.as_mut().unwrap().repositories = vec![Repository::default()];
        assert_eq!(
            planner.enqueue_compose(&request, "").unwrap_err().code(),
            ComposerErrorCode::InvalidRepository
        );

        let mut request = aws_request();
        request.image_request.as_mut().unwrap().upload_targets = Some(vec![UploadTarget {
            upload_type: "gcp".to_string(),
            upload_options: json!({"region": "x"}),
        }]);
        assert_eq!(
            planner.enqueue_compose(&request, "").unwrap_err().code(),
            ComposerErrorCode::InvalidUploadTarget
        );

        let mut request = aws_request();
        request.customizations = Some(Customizations {
            containers: vec![Container {
                source: "quay.io/x/y".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert_eq!(
            planner.enqueue_compose(&request, "").unwrap_err().code(),
            ComposerErrorCode::InvalidCustomization
        );

        let mut request = aws_request();
        request.image_requests = Some(vec![request.image_request.clone().unwrap()]);
        assert_eq!(
            planner.enqueue_compose(&request, "").unwrap_err().code(),
            ComposerErrorCode::InvalidNumberOfImageBuilds
        );

        assert_eq!(count_jobs(&planner), 0);
    }

    #[actix_web::test]
    async fn test_ostree_options() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);

        let mut request = aws_request();
        let image = request.image_request.as_mut().unwrap();
        image.image_type = "edge-installer".to_string();
        image.upload_options = Some(json!({"region": "eu"}));
        assert_eq!(
            planner.enqueue_compose(&request, "").unwrap_err().code(),
            ComposerErrorCode::InvalidOSTreeParams
        );

        request.image_request.as_mut().unwrap().ostree = Some(OSTree {
            url: Some("https://ostree.example".to_string()),
            ostree_ref: Some("-bad".to_string()),
            ..Default::default()
        });
        assert_eq!(
            planner.enqueue_compose(&request, "").unwrap_err().code(),
            ComposerErrorCode::InvalidOSTreeRef
        );

        request.image_request.as_mut().unwrap().ostree = Some(OSTree {
            url: Some("https://ostree.example".to_string()),
            ..Default::default()
        });
        let root = planner.enqueue_compose(&request, "").unwrap();
        let build = planner.server.job_status(root).unwrap();
        assert_eq!(build.dependencies.len(), 2);
        let manifest = planner.server.job_status(build.dependencies[0]).unwrap();
        let resolve = manifest.dependencies[1];
        let args: OSTreeResolveJob = planner.server.job(resolve).unwrap();
        assert_eq!(args.ostree_resolve_specs[0].ostree_ref, "test/edge");
    }

    #[test]
    fn test_ostree_refs() {
        assert!(valid_ostree_ref("test/edge"));
        assert!(valid_ostree_ref("rhel/9/x86_64/edge"));
        assert!(!valid_ostree_ref("test//edge"));
        assert!(!valid_ostree_ref("/test"));
        assert!(!valid_ostree_ref(".hidden"));
        assert!(!valid_ostree_ref(""));
    }

    #[test]
    fn test_koji_filename() {
        let koji = Koji {
            server: "https://koji.example".to_string(),
            task_id: 1,
            name: "name".to_string(),
            version: "1".to_string(),
            release: "2".to_string(),
        };
        assert_eq!(koji_filename(&koji, "x86_64", "disk.qcow2"), "name-1-2.x86_64.qcow2");
        assert_eq!(koji_filename(&koji, "aarch64", "image.raw.xz"), "name-1-2.aarch64.raw.xz");
        assert_eq!(koji_filename(&koji, "aarch64", "image"), "name-1-2.aarch64");
    }

    #[actix_web::test]
    async fn test_koji_compose_graph() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let mut request = aws_request();
        let image = request.image_request.take().unwrap();
        let mut second = image.clone();
        second.image_type = "guest-image".to_string();
        second.upload_options = None;
        request.image_requests = Some(vec![image, second]);
        request.koji = Some(Koji {
            server: "https://koji.example".to_string(),
            task_id: 7,
            name: "name".to_string(),
            version: "1".to_string(),
            release: "2".to_string(),
        });

        let root = planner.enqueue_compose(&request, "").unwrap();
        let finalize = planner.server.job_status(root).unwrap();
        assert_eq!(finalize.job_type, JobType::KojiFinalize);
        assert_eq!(finalize.dependencies.len(), 3);
        let init = finalize.dependencies[0];
        assert_eq!(planner.server.job_type(init).unwrap(), JobType::KojiInit);

        let args: KojiFinalizeJob = planner.server.job(root).unwrap();
        assert_eq!(args.koji_filenames, vec!["name-1-2.arch3.raw", "name-1-2.arch3.qcow2"]);
        assert!(args.koji_directory.starts_with("osbuild-cg/osbuild-composer-koji-"));
        assert_eq!(args.task_id, 7);

        for build in &finalize.dependencies[1..] {
            let status = planner.server.job_status(*build).unwrap();
            assert_eq!(status.dependencies[0], init);
            let job: OSBuildJob = planner.server.job(*build).unwrap();
            assert_eq!(job.targets[0].name, "org.osbuild.koji");
            assert_eq!(job.targets[0].options["upload_directory"], args.koji_directory.as_str());
            assert_eq!(job.manifest_dyn_args_idx, Some(1));
            assert_eq!(job.depsolve_dyn_args_idx, Some(2));
        }
        let first: OSBuildJob = planner.server.job(finalize.dependencies[1]).unwrap();
        assert_eq!(first.targets.len(), 2);
        let second: OSBuildJob = planner.server.job(finalize.dependencies[2]).unwrap();
        assert_eq!(second.targets.len(), 1);
    }

    #[actix_web::test]
    async fn test_delete_compose() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let root = planner.enqueue_compose(&aws_request(), "").unwrap();
        assert_eq!(count_jobs(&planner), 3);
        let deleted = planner.delete_compose(root).unwrap();
        assert_eq!(deleted.len(), 3);
        assert_eq!(count_jobs(&planner), 0);
        assert!(!dir.path().join("ComposeRequest").join(format!("{root}.json")).exists());
    }

    async fn finish_next(planner: &Planner, job_type: JobType, result: Value) {
        let job = planner
            .server
            .request_job(&[job_type], "arch3", "")
            .await
            .unwrap()
            .unwrap();
        planner.server.finish_job(job.token, result).unwrap();
    }

    #[actix_web::test]
    async fn test_clone_compose() {
        let dir = TempDir::new().unwrap();
        let planner = planner(&dir);
        let root = planner.enqueue_compose(&aws_request(), "").unwrap();
        let body = AwsEc2CloneCompose {
            region: "us".to_string(),
            share_with_accounts: vec!["123".to_string()],
        };
        assert_eq!(
            planner.clone_compose(root, &body, "").unwrap_err().code(),
            ComposerErrorCode::ComposeBadState
        );

        let manifest = planner.server.job_status(root).unwrap().dependencies[0];
        finish_next(&planner, JobType::Depsolve, crate::manifest::test_manifest::depsolve_result()).await;
        planner.server.wait_for_job(manifest, Duration::from_secs(5)).await.unwrap();
        let result = json!({
            "success": true,
            "osbuild_output": {"success": true},
            "target_results": [TargetResult {
                name: "org.osbuild.aws".to_string(),
                options: Some(json!({"ami": "ami-1", "region": "eu"})),
                target_error: None,
            }],
        });
        finish_next(&planner, JobType::OSBuild, result).await;

        let share = planner.clone_compose(root, &body, "").unwrap();
        let share_status = planner.server.job_status(share).unwrap();
        let copy = share_status.dependencies[0];
        let args: AwsEc2CopyJob = planner.server.job(copy).unwrap();
        assert_eq!(args.ami, "ami-1");
        assert_eq!(args.source_region, "eu");
        assert_eq!(args.target_region, "us");

        finish_next(&planner, JobType::AwsEc2Copy, json!({"ami": "ami-2", "region": "us"})).await;
        let again = planner.clone_compose(root, &body, "").unwrap();
        assert_eq!(planner.server.job_status(again).unwrap().dependencies, vec![copy]);

        let same_region = AwsEc2CloneCompose {
            region: "eu".to_string(),
            share_with_accounts: vec![],
        };
        let share = planner.clone_compose(root, &same_region, "").unwrap();
        let args: AwsEc2ShareJob = planner.server.job(share).unwrap();
        assert_eq!(args.ami, "ami-1");
    }

    #[actix_web::test]
    async fn test_transient_jobs_are_removed() {
        let dir = TempDir::new().unwrap();
        let planner = Arc::new(planner(&dir));
        let request = SearchPackagesRequest {
            packages: vec!["kernel".to_string()],
            distribution: "test-distro".to_string(),
            architecture: "arch3".to_string(),
            repositories: vec![],
        };

        let p = planner.clone();
        let search = actix_web::rt::spawn(async move {
            p.search_packages(&request, "", Duration::from_secs(5)).await
        });
        let job = planner
            .server
            .request_job(&[JobType::SearchPackages], "arch3", "")
            .await
            .unwrap()
            .unwrap();
        let args: SearchPackagesJob = serde_json::from_value(job.args.clone()).unwrap();
        assert_eq!(args.repos[0].id, "baseos");
        let result = json!({"packages": [crate::manifest::test_manifest::package("kernel")]});
        planner.server.finish_job(job.token, result).unwrap();

        let packages = search.await.unwrap().unwrap();
        assert_eq!(packages[0].name, "kernel");
        assert_eq!(count_jobs(&planner), 0);

        let request = DepsolveRequest {
            distribution: Some("test-distro".to_string()),
            architecture: Some("arch3".to_string()),
            ..Default::default()
        };
        let err = planner
            .depsolve_blueprint(&request, "", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ComposerErrorCode::FailedToDepsolve);
        assert_eq!(count_jobs(&planner), 0);
    }
}
