//! The documents of the client API.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::blueprint::{
    BlueprintContainer, BlueprintCustomizations, FilesystemCustomization, FirewallCustomization,
    GroupCustomization, KernelCustomization, ServicesCustomization, UserCustomization,
};
use crate::models::{DepsolvedPackage, JobError, RepoConfig};

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ComposeRequest {
    pub distribution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_request: Option<ImageRequest>,
    /// Only Koji composes may carry several images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_requests: Option<Vec<ImageRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customizations: Option<Customizations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub koji: Option<Koji>,
}

impl ComposeRequest {
    pub fn all_image_requests(&self) -> Vec<&ImageRequest> {
        self.image_request
            .iter()
            .chain(self.image_requests.iter().flatten())
            .collect()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Koji {
    pub server: String,
    pub task_id: u64,
    pub name: String,
    pub version: String,
    pub release: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ImageRequest {
    #[serde(alias = "arch")]
    pub architecture: String,
    pub image_type: String,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_targets: Option<Vec<UploadTarget>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ostree: Option<OSTree>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct UploadTarget {
    #[serde(rename = "type")]
    pub upload_type: String,
    #[serde(default)]
    pub upload_options: Value,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct OSTree {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ostree_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub rhsm: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Repository {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseurl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirrorlist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpgkey: Option<String>,
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

impl Repository {
    /// `None` unless exactly one source of packages is given.
    pub fn to_repo_config(&self, id: &str) -> Option<RepoConfig> {
        let sources = [&self.baseurl, &self.mirrorlist, &self.metalink]
            .iter()
            .filter(|s| s.as_deref().map_or(false, |s| !s.is_empty()))
            .count();
        if sources != 1 {
            return None;
        }
        Some(RepoConfig {
            id: id.to_string(),
            name: id.to_string(),
            baseurls: self.baseurl.iter().cloned().collect(),
            metalink: self.metalink.clone(),
            mirrorlist: self.mirrorlist.clone(),
            gpgkeys: self.gpgkey.iter().cloned().collect(),
            check_gpg: self.check_gpg,
            check_repo_gpg: self.check_repo_gpg,
            ignore_ssl: self.ignore_ssl,
            rhsm: self.rhsm,
            package_sets: self.package_sets.clone(),
        })
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Customizations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload_repositories: Vec<Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<UserCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall: Option<FirewallCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ServicesCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filesystem: Vec<FilesystemCustomization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fips: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_device: Option<String>,
}

impl Customizations {
    /// The blueprint-side view; packages and containers are carried
    /// separately by the blueprint itself.
    pub fn blueprint_customizations(&self) -> Option<BlueprintCustomizations> {
        let c = BlueprintCustomizations {
            hostname: self.hostname.clone(),
            kernel: self.kernel.clone(),
            user: self.users.clone(),
            group: self.groups.clone(),
            timezone: self.timezone.clone(),
            locale: self.locale.clone(),
            firewall: self.firewall.clone(),
            services: self.services.clone(),
            filesystem: self.filesystem.clone(),
            fips: self.fips,
            installation_device: self.installation_device.clone(),
        };
        if c.used().is_empty() {
            None
        } else {
            Some(c)
        }
    }

    pub fn blueprint_containers(&self) -> Vec<BlueprintContainer> {
        self.containers
            .iter()
            .map(|c| BlueprintContainer {
                source: c.source.clone(),
                name: c.name.clone().unwrap_or_default(),
                tls_verify: c.tls_verify,
            })
            .collect()
    }
}

/* Upload options as clients send them, one per upload type */

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AwsEc2UploadOptions {
    pub region: String,
    #[serde(default)]
    pub share_with_accounts: Vec<String>,
    #[serde(default)]
    pub snapshot_name: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AwsS3UploadOptions {
    pub region: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GcpUploadOptions {
    pub region: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub image_name: Option<String>,
    #[serde(default)]
    pub share_with_accounts: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AzureUploadOptions {
    pub tenant_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub image_name: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ContainerUploadOptions {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OciUploadOptions {}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PulpOSTreeUploadOptions {
    pub basepath: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub server_address: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LocalUploadOptions {}

/* Responses */

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ComposeId {
    pub href: String,
    pub id: Uuid,
    pub kind: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComposeStatusValue {
    Pending,
    Success,
    Failure,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatusValue {
    Pending,
    Building,
    Uploading,
    Registering,
    Success,
    Failure,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatusValue {
    Pending,
    Running,
    Success,
    Failure,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UploadStatus {
    #[serde(rename = "type")]
    pub upload_type: String,
    pub status: UploadStatusValue,
    pub options: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImageStatus {
    pub status: ImageStatusValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_status: Option<UploadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_statuses: Option<Vec<UploadStatus>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct KojiStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComposeStatus {
    pub href: String,
    pub id: Uuid,
    pub kind: String,
    pub status: ComposeStatusValue,
    pub image_status: ImageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_statuses: Option<Vec<ImageStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub koji_status: Option<KojiStatus>,
}

/// One entry of the compose listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ComposeListEntry {
    pub href: String,
    pub id: Uuid,
    pub kind: String,
    pub status: ComposeStatusValue,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KojiLogs {
    pub init: Value,
    pub import: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComposeLogs {
    pub href: String,
    pub id: Uuid,
    pub kind: String,
    pub image_builds: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub koji: Option<KojiLogs>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComposeManifests {
    pub href: String,
    pub id: Uuid,
    pub kind: String,
    pub manifests: Vec<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    #[serde(rename = "type")]
    pub package_type: String,
    pub name: String,
    pub version: String,
    pub release: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<String>,
    pub arch: String,
    pub sigmd5: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ComposeMetadata {
    pub href: String,
    pub id: Uuid,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<PackageMetadata>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ostree_commit: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImageSbom {
    pub pipeline_name: String,
    pub pipeline_purpose: String,
    pub sbom_type: String,
    pub sbom: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComposeSboms {
    pub href: String,
    pub id: Uuid,
    pub kind: String,
    pub items: Vec<Vec<ImageSbom>>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AwsEc2CloneCompose {
    pub region: String,
    #[serde(default)]
    pub share_with_accounts: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CloneComposeResponse {
    pub href: String,
    pub id: Uuid,
    pub kind: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct DepsolveRequest {
    pub blueprint: DepsolveBlueprint,
    #[serde(default)]
    pub distribution: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
}

/// The subset of a blueprint the depsolve endpoint looks at.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct DepsolveBlueprint {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub distro: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub packages: Vec<crate::blueprint::Package>,
    #[serde(default)]
    pub modules: Vec<crate::blueprint::Package>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct SearchPackagesRequest {
    pub packages: Vec<String>,
    pub distribution: String,
    pub architecture: String,
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PackageDetails {
    pub name: String,
    #[serde(default)]
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl From<&DepsolvedPackage> for PackageDetails {
    fn from(p: &DepsolvedPackage) -> Self {
        PackageDetails {
            name: p.name.clone(),
            epoch: p.epoch,
            version: p.version.clone(),
            release: p.release.clone(),
            arch: p.arch.clone(),
            checksum: p.checksum.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PackagesResponse {
    pub packages: Vec<PackageDetails>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DistributionImageType {
    pub name: String,
    pub repositories: Vec<RepoConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DistributionArch {
    pub name: String,
    pub image_types: Vec<DistributionImageType>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Distribution {
    pub name: String,
    pub releasever: String,
    pub arches: Vec<DistributionArch>,
}
