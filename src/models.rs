use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::blueprint::Blueprint;
use crate::targets::{Target, TargetResult};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobType {
    #[serde(rename = "depsolve")]
    Depsolve,
    #[serde(rename = "manifest-id-only")]
    ManifestIdOnly,
    #[serde(rename = "osbuild")]
    OSBuild,
    #[serde(rename = "koji-init")]
    KojiInit,
    #[serde(rename = "koji-finalize")]
    KojiFinalize,
    #[serde(rename = "aws-ec2-copy")]
    AwsEc2Copy,
    #[serde(rename = "aws-ec2-share")]
    AwsEc2Share,
    #[serde(rename = "search-packages")]
    SearchPackages,
    #[serde(rename = "container-resolve")]
    ContainerResolve,
    #[serde(rename = "ostree-resolve")]
    OSTreeResolve,
}

impl JobType {
    pub const ALL: [JobType; 10] = [
        JobType::Depsolve,
        JobType::ManifestIdOnly,
        JobType::OSBuild,
        JobType::KojiInit,
        JobType::KojiFinalize,
        JobType::AwsEc2Copy,
        JobType::AwsEc2Share,
        JobType::SearchPackages,
        JobType::ContainerResolve,
        JobType::OSTreeResolve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Depsolve => "depsolve",
            JobType::ManifestIdOnly => "manifest-id-only",
            JobType::OSBuild => "osbuild",
            JobType::KojiInit => "koji-init",
            JobType::KojiFinalize => "koji-finalize",
            JobType::AwsEc2Copy => "aws-ec2-copy",
            JobType::AwsEc2Share => "aws-ec2-share",
            JobType::SearchPackages => "search-packages",
            JobType::ContainerResolve => "container-resolve",
            JobType::OSTreeResolve => "ostree-resolve",
        }
    }

    /// Manifest jobs are serialized in-process and never handed to workers.
    pub fn is_worker_type(&self) -> bool {
        *self != JobType::ManifestIdOnly
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown job type {s:?}"))
    }
}

/// Stable ids for errors carried inside job results.
pub mod clienterrors {
    pub const NO_DYN_ARGS: u32 = 1;
    pub const INVALID_TARGET_CONFIG: u32 = 2;
    pub const SHARING_TARGET: u32 = 3;
    pub const INVALID_TARGET: u32 = 4;
    pub const DEPSOLVE_DEPENDENCY: u32 = 5;
    pub const READING_JOB_STATUS: u32 = 6;
    pub const PARSING_DYNAMIC_ARGS: u32 = 7;
    pub const MANIFEST_GENERATION: u32 = 8;
    pub const MANIFEST_DEPENDENCY: u32 = 9;
    pub const BUILD_JOB: u32 = 10;
    pub const UPLOADING_IMAGE: u32 = 11;
    pub const IMPORTING_IMAGE: u32 = 12;
    pub const KOJI_FAILED_DEPENDENCY: u32 = 13;
    pub const KOJI_BUILD: u32 = 14;
    pub const KOJI_INIT: u32 = 15;
    pub const KOJI_FINALIZE: u32 = 16;
    pub const INVALID_CONFIG: u32 = 17;
    pub const EMPTY_MANIFEST: u32 = 19;
    pub const DNF_DEPSOLVE_ERROR: u32 = 20;
    pub const DNF_MARKING_ERRORS: u32 = 21;
    pub const DNF_OTHER_ERROR: u32 = 22;
    pub const RPMMD_ERROR: u32 = 23;
    pub const EMPTY_PACKAGE_SPECS: u32 = 24;
    pub const DNF_REPO_ERROR: u32 = 25;
    pub const JOB_DEPENDENCY: u32 = 26;
    pub const OSTREE_REF_INVALID: u32 = 27;
    pub const OSTREE_REF_RESOLUTION: u32 = 28;
    pub const OSTREE_PARAMS_INVALID: u32 = 29;
    pub const OSTREE_DEPENDENCY: u32 = 32;
    pub const REMOTE_FILE_RESOLUTION: u32 = 33;
    pub const CONTAINER_RESOLUTION: u32 = 36;
    pub const CONTAINER_DEPENDENCY: u32 = 38;
    pub const JOB_MISSING_HEARTBEAT: u32 = 39;
    pub const DEPSOLVE_TIMEOUT: u32 = 40;

    pub const DEPENDENCY_ERRORS: [u32; 6] = [
        DEPSOLVE_DEPENDENCY,
        MANIFEST_DEPENDENCY,
        KOJI_FAILED_DEPENDENCY,
        JOB_DEPENDENCY,
        OSTREE_DEPENDENCY,
        CONTAINER_DEPENDENCY,
    ];
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobError {
    pub id: u32,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl JobError {
    pub fn new(id: u32, reason: &str, details: Option<Value>) -> Self {
        JobError {
            id,
            reason: reason.to_string(),
            details,
        }
    }

    pub fn is_dependency_error(&self) -> bool {
        clienterrors::DEPENDENCY_ERRORS.contains(&self.id)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code: {}, Reason: {}", self.id, self.reason)
    }
}

/// The synthesized error a job finishes with when one of its dependencies
/// did not succeed.
pub fn dependency_error(dependent: JobType, failed: JobType) -> JobError {
    use clienterrors::*;
    match (dependent, failed) {
        (JobType::OSBuild, JobType::ManifestIdOnly) => {
            JobError::new(MANIFEST_DEPENDENCY, "Manifest dependency failed", None)
        }
        (JobType::ManifestIdOnly, JobType::Depsolve) => {
            JobError::new(DEPSOLVE_DEPENDENCY, "Error in depsolve job dependency", None)
        }
        (JobType::ManifestIdOnly, JobType::ContainerResolve) => JobError::new(
            CONTAINER_DEPENDENCY,
            "Error in container resolve job dependency",
            None,
        ),
        (JobType::ManifestIdOnly, JobType::OSTreeResolve) => JobError::new(
            OSTREE_DEPENDENCY,
            "Error in ostree resolve job dependency",
            None,
        ),
        (JobType::OSBuild, JobType::KojiInit) | (JobType::KojiFinalize, JobType::KojiInit) => {
            JobError::new(KOJI_FAILED_DEPENDENCY, "Koji init job failed", None)
        }
        _ => JobError::new(JOB_DEPENDENCY, "Job dependency failed", None),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct JobResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_error: Option<JobError>,
}

impl JobResult {
    pub fn failed(error: JobError) -> Self {
        JobResult {
            job_error: Some(error),
        }
    }
}

/// A raw result is a failure when it carries a job error or an explicit
/// `"success": false`.
pub fn result_is_failure(result: &Value) -> bool {
    let has_error = result
        .get("job_error")
        .map(|e| !e.is_null())
        .unwrap_or(false);
    let unsuccessful = result.get("success") == Some(&Value::Bool(false));
    has_error || unsuccessful
}

pub fn result_job_error(result: &Value) -> Option<JobError> {
    result
        .get("job_error")
        .filter(|e| !e.is_null())
        .and_then(|e| serde_json::from_value(e.clone()).ok())
}

/// Typed job arguments. `JOB_TYPE` ties a payload to the queue's type tag.
pub trait JobArgs: Serialize + DeserializeOwned {
    const JOB_TYPE: JobType;
    type Result: JobOutcome;
}

pub trait JobOutcome: Serialize + DeserializeOwned + Default {
    fn job_error(&self) -> Option<&JobError>;
}

macro_rules! job_outcome {
    ($($t:ty),*) => {
        $(impl JobOutcome for $t {
            fn job_error(&self) -> Option<&JobError> {
                self.job_result.job_error.as_ref()
            }
        })*
    };
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub baseurls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpgkeys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_gpg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_repo_gpg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_ssl: Option<bool>,
    #[serde(default)]
    pub rhsm: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_sets: Vec<String>,
}

impl RepoConfig {
    /// Repositories tagged with package sets only apply to those sets.
    pub fn applies_to(&self, package_set: &str) -> bool {
        self.package_sets.is_empty() || self.package_sets.iter().any(|s| s == package_set)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub repositories: Vec<RepoConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DepsolvedPackage {
    pub name: String,
    #[serde(default)]
    pub epoch: u32,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_locations: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_gpg: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SbomDoc {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub document: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DepsolveJob {
    pub grouped_package_sets: BTreeMap<String, Vec<PackageSet>>,
    pub module_platform_id: String,
    pub arch: String,
    pub releasever: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbom_type: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DepsolveJobResult {
    #[serde(default)]
    pub package_specs: BTreeMap<String, Vec<DepsolvedPackage>>,
    #[serde(default)]
    pub repo_configs: BTreeMap<String, Vec<RepoConfig>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sbom_docs: BTreeMap<String, SbomDoc>,
    #[serde(flatten)]
    pub job_result: JobResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct OSTreeSource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "ref")]
    pub ostree_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,
    #[serde(default)]
    pub rhsm: bool,
}

/// Everything the server needs to serialize a manifest once its
/// dependencies have finished.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ManifestJobByID {
    pub distribution: String,
    pub arch: String,
    pub image_type: String,
    pub blueprint: Blueprint,
    pub seed: i64,
    #[serde(default)]
    pub repositories: Vec<RepoConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ostree: Option<OSTreeSource>,
    #[serde(default)]
    pub size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineNames {
    pub build: Vec<String>,
    pub payload: Vec<String>,
}

impl PipelineNames {
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.build.iter().chain(self.payload.iter())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ManifestInfo {
    #[serde(default)]
    pub composer_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_names: Option<PipelineNames>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ManifestJobByIDResult {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default)]
    pub info: ManifestInfo,
    #[serde(default)]
    pub error: String,
    #[serde(flatten)]
    pub job_result: JobResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OSBuildJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_dyn_args_idx: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depsolve_dyn_args_idx: Option<usize>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_names: Option<PipelineNames>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_boot_mode: String,
}

/// Per-pipeline build output reported by the image builder.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OSBuildOutput {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub log: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OSBuildJobResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osbuild_output: Option<OSBuildOutput>,
    #[serde(default)]
    pub target_results: Vec<TargetResult>,
    #[serde(default)]
    pub upload_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_names: Option<PipelineNames>,
    #[serde(default)]
    pub host_os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(flatten)]
    pub job_result: JobResult,
}

impl OSBuildJobResult {
    /// The image itself built, regardless of what happened to its uploads.
    pub fn build_succeeded(&self) -> bool {
        self.job_result.job_error.is_none()
            && self.osbuild_output.as_ref().map(|o| o.success).unwrap_or(false)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct KojiInitJob {
    pub server: String,
    pub name: String,
    pub version: String,
    pub release: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct KojiInitJobResult {
    #[serde(default)]
    pub build_id: u64,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub koji_error: String,
    #[serde(flatten)]
    pub job_result: JobResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct KojiFinalizeJob {
    pub server: String,
    pub name: String,
    pub version: String,
    pub release: String,
    pub koji_filenames: Vec<String>,
    pub koji_directory: String,
    pub task_id: u64,
    pub start_time: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct KojiFinalizeJobResult {
    #[serde(default)]
    pub koji_error: String,
    #[serde(flatten)]
    pub job_result: JobResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsEc2CopyJob {
    pub ami: String,
    pub source_region: String,
    pub target_region: String,
    pub target_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsEc2ShareJob {
    pub ami: String,
    pub region: String,
    #[serde(rename = "shareWithAccounts")]
    pub share_with_accounts: Vec<String>,
}

/// Shared by the copy and share jobs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AwsEc2JobResult {
    #[serde(default)]
    pub ami: String,
    #[serde(default)]
    pub region: String,
    #[serde(flatten)]
    pub job_result: JobResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SearchPackagesJob {
    pub packages: Vec<String>,
    pub repos: Vec<RepoConfig>,
    pub module_platform_id: String,
    pub arch: String,
    pub releasever: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SearchPackagesJobResult {
    #[serde(default)]
    pub packages: Vec<DepsolvedPackage>,
    #[serde(flatten)]
    pub job_result: JobResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub source: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "tls-verify", default, skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub digest: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerResolveJob {
    pub arch: String,
    pub specs: Vec<ContainerSpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ContainerResolveJobResult {
    #[serde(default)]
    pub specs: Vec<ContainerSpec>,
    #[serde(flatten)]
    pub job_result: JobResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct OSTreeResolveSpec {
    pub url: String,
    #[serde(rename = "ref")]
    pub ostree_ref: String,
    #[serde(default)]
    pub rhsm: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct OSTreeResolveJob {
    pub ostree_resolve_specs: Vec<OSTreeResolveSpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct OSTreeResolveResultSpec {
    pub url: String,
    #[serde(rename = "ref")]
    pub ostree_ref: String,
    pub checksum: String,
    #[serde(default)]
    pub secrets: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OSTreeResolveJobResult {
    #[serde(default)]
    pub ostree_resolve_result_specs: Vec<OSTreeResolveResultSpec>,
    #[serde(flatten)]
    pub job_result: JobResult,
}

job_outcome!(
    DepsolveJobResult,
    ManifestJobByIDResult,
    OSBuildJobResult,
    KojiInitJobResult,
    KojiFinalizeJobResult,
    AwsEc2JobResult,
    SearchPackagesJobResult,
    ContainerResolveJobResult,
    OSTreeResolveJobResult
);

impl JobArgs for DepsolveJob {
    const JOB_TYPE: JobType = JobType::Depsolve;
    type Result = DepsolveJobResult;
}

impl JobArgs for ManifestJobByID {
    const JOB_TYPE: JobType = JobType::ManifestIdOnly;
    type Result = ManifestJobByIDResult;
}

impl JobArgs for OSBuildJob {
    const JOB_TYPE: JobType = JobType::OSBuild;
    type Result = OSBuildJobResult;
}

impl JobArgs for KojiInitJob {
    const JOB_TYPE: JobType = JobType::KojiInit;
    type Result = KojiInitJobResult;
}

impl JobArgs for KojiFinalizeJob {
    const JOB_TYPE: JobType = JobType::KojiFinalize;
    type Result = KojiFinalizeJobResult;
}

impl JobArgs for AwsEc2CopyJob {
    const JOB_TYPE: JobType = JobType::AwsEc2Copy;
    type Result = AwsEc2JobResult;
}

impl JobArgs for AwsEc2ShareJob {
    const JOB_TYPE: JobType = JobType::AwsEc2Share;
    type Result = AwsEc2JobResult;
}

impl JobArgs for SearchPackagesJob {
    const JOB_TYPE: JobType = JobType::SearchPackages;
    type Result = SearchPackagesJobResult;
}

impl JobArgs for ContainerResolveJob {
    const JOB_TYPE: JobType = JobType::ContainerResolve;
    type Result = ContainerResolveJobResult;
}

impl JobArgs for OSTreeResolveJob {
    const JOB_TYPE: JobType = JobType::OSTreeResolve;
    type Result = OSTreeResolveJobResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_type_names() {
        for t in JobType::ALL.iter() {
            assert_eq!(t.as_str().parse::<JobType>().unwrap(), *t);
            assert_eq!(serde_json::to_value(t).unwrap(), json!(t.as_str()));
        }
        assert!("osbuild:x86_64".parse::<JobType>().is_err());
        assert!(!JobType::ManifestIdOnly.is_worker_type());
    }

    #[test]
    fn test_result_failure_detection() {
        assert!(!result_is_failure(&json!({})));
        assert!(!result_is_failure(&json!({"job_error": null, "success": true})));
        assert!(result_is_failure(&json!({"success": false})));
        assert!(result_is_failure(&json!({"job_error": {"id": 22, "reason": "DNF Error"}})));

        let err = result_job_error(&json!({"job_error": {"id": 22, "reason": "DNF Error"}}));
        assert_eq!(err, Some(JobError::new(22, "DNF Error", None)));
    }

    #[test]
    fn test_dependency_errors() {
        let e = dependency_error(JobType::OSBuild, JobType::ManifestIdOnly);
        assert_eq!(e.id, clienterrors::MANIFEST_DEPENDENCY);
        assert_eq!(e.reason, "Manifest dependency failed");
        assert!(e.is_dependency_error());

        let e = dependency_error(JobType::ManifestIdOnly, JobType::Depsolve);
        assert_eq!(e.id, clienterrors::DEPSOLVE_DEPENDENCY);
        assert_eq!(
            dependency_error(JobType::KojiFinalize, JobType::KojiInit).id,
            clienterrors::KOJI_FAILED_DEPENDENCY
        );
        assert_eq!(
            dependency_error(JobType::KojiFinalize, JobType::OSBuild).id,
            clienterrors::JOB_DEPENDENCY
        );
        assert!(!JobError::new(clienterrors::DNF_OTHER_ERROR, "x", None).is_dependency_error());
    }

    #[test]
    fn test_flattened_job_result() {
        let result: OSBuildJobResult = serde_json::from_value(json!({
            "success": true,
            "osbuild_output": {"success": true},
            "job_error": {"id": 10, "reason": "boom"}
        }))
        .unwrap();
        assert_eq!(result.job_error().map(|e| e.id), Some(10));
        assert!(!result.build_succeeded());

        let ok = OSBuildJobResult {
            success: true,
            osbuild_output: Some(OSBuildOutput {
                success: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(ok.build_succeeded());
        assert!(serde_json::to_value(&ok).unwrap().get("job_error").is_none());
    }
}
