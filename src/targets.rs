use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::JobError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Aws,
    AwsS3,
    Gcp,
    Azure,
    Container,
    Oci,
    PulpOSTree,
    WorkerServer,
    Koji,
}

impl TargetKind {
    pub const ALL: [TargetKind; 9] = [
        TargetKind::Aws,
        TargetKind::AwsS3,
        TargetKind::Gcp,
        TargetKind::Azure,
        TargetKind::Container,
        TargetKind::Oci,
        TargetKind::PulpOSTree,
        TargetKind::WorkerServer,
        TargetKind::Koji,
    ];

    /// The name workers dispatch uploads on.
    pub fn target_name(&self) -> &'static str {
        match self {
            TargetKind::Aws => "org.osbuild.aws",
            TargetKind::AwsS3 => "org.osbuild.aws.s3",
            TargetKind::Gcp => "org.osbuild.gcp",
            TargetKind::Azure => "org.osbuild.azure.image",
            TargetKind::Container => "org.osbuild.container",
            TargetKind::Oci => "org.osbuild.oci",
            TargetKind::PulpOSTree => "org.osbuild.pulp.ostree",
            TargetKind::WorkerServer => "org.osbuild.worker.server",
            TargetKind::Koji => "org.osbuild.koji",
        }
    }

    /// The name clients see in upload statuses and request upload targets.
    pub fn upload_type(&self) -> &'static str {
        match self {
            TargetKind::Aws => "aws",
            TargetKind::AwsS3 => "aws.s3",
            TargetKind::Gcp => "gcp",
            TargetKind::Azure => "azure",
            TargetKind::Container => "container",
            TargetKind::Oci => "oci.objectstorage",
            TargetKind::PulpOSTree => "pulp.ostree",
            TargetKind::WorkerServer => "local",
            TargetKind::Koji => "koji",
        }
    }

    pub fn from_target_name(name: &str) -> Option<TargetKind> {
        TargetKind::ALL
            .iter()
            .find(|k| k.target_name() == name)
            .copied()
    }

    pub fn from_upload_type(name: &str) -> Option<TargetKind> {
        TargetKind::ALL
            .iter()
            .find(|k| k.upload_type() == name)
            .copied()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct OsbuildArtifact {
    pub export_filename: String,
    pub export_name: String,
}

/// One upload destination of an image build.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Target {
    pub uuid: Uuid,
    pub name: String,
    pub image_name: String,
    pub created: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub options: Value,
    pub osbuild_artifact: OsbuildArtifact,
}

impl Target {
    pub fn new<O: Serialize>(
        kind: TargetKind,
        image_name: &str,
        options: &O,
        artifact: OsbuildArtifact,
    ) -> Result<Self, serde_json::Error> {
        Ok(Target {
            uuid: Uuid::new_v4(),
            name: kind.target_name().to_string(),
            image_name: image_name.to_string(),
            created: chrono::Utc::now(),
            options: serde_json::to_value(options)?,
            osbuild_artifact: artifact,
        })
    }

    pub fn kind(&self) -> Option<TargetKind> {
        TargetKind::from_target_name(&self.name)
    }

    pub fn typed_options<O: DeserializeOwned>(&self) -> Result<O, serde_json::Error> {
        serde_json::from_value(self.options.clone())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsTargetOptions {
    pub region: String,
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub share_with_accounts: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsS3TargetOptions {
    pub region: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub public: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GcpTargetOptions {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub object: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub share_with_accounts: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AzureImageTargetOptions {
    pub tenant_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerTargetOptions {
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub tls_verify: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct OciTargetOptions {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PulpOSTreeTargetOptions {
    #[serde(default)]
    pub server_address: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub basepath: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerServerTargetOptions {}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct KojiTargetOptions {
    pub server: String,
    pub upload_directory: String,
}

/// Result of one target, as reported by a worker inside an OSBuild result.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TargetResult {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_error: Option<JobError>,
}

impl TargetResult {
    pub fn kind(&self) -> Option<TargetKind> {
        TargetKind::from_target_name(&self.name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsTargetResultOptions {
    #[serde(default)]
    pub ami: String,
    #[serde(default)]
    pub region: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlTargetResultOptions {
    #[serde(default)]
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GcpTargetResultOptions {
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub project_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AzureTargetResultOptions {
    #[serde(default)]
    pub image_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerTargetResultOptions {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub digest: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PulpOSTreeTargetResultOptions {
    #[serde(default)]
    pub repo_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerServerTargetResultOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub artifact_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct KojiImage {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub checksum_type: String,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct KojiTargetResultOptions {
    #[serde(default)]
    pub image: KojiImage,
}

/// Success data of a target, one variant per target kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetResultOptions {
    Aws(AwsTargetResultOptions),
    AwsS3(UrlTargetResultOptions),
    Gcp(GcpTargetResultOptions),
    Azure(AzureTargetResultOptions),
    Container(ContainerTargetResultOptions),
    Oci(UrlTargetResultOptions),
    PulpOSTree(PulpOSTreeTargetResultOptions),
    WorkerServer(WorkerServerTargetResultOptions),
    Koji(KojiTargetResultOptions),
}

fn parse_or_default<O: DeserializeOwned + Default>(
    options: Option<&Value>,
) -> Result<O, serde_json::Error> {
    match options {
        None | Some(Value::Null) => Ok(O::default()),
        Some(v) => serde_json::from_value(v.clone()),
    }
}

impl TargetResultOptions {
    /// Missing options decode to the kind's empty result.
    pub fn parse(kind: TargetKind, options: Option<&Value>) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            TargetKind::Aws => TargetResultOptions::Aws(parse_or_default(options)?),
            TargetKind::AwsS3 => TargetResultOptions::AwsS3(parse_or_default(options)?),
            TargetKind::Gcp => TargetResultOptions::Gcp(parse_or_default(options)?),
            TargetKind::Azure => TargetResultOptions::Azure(parse_or_default(options)?),
            TargetKind::Container => TargetResultOptions::Container(parse_or_default(options)?),
            TargetKind::Oci => TargetResultOptions::Oci(parse_or_default(options)?),
            TargetKind::PulpOSTree => TargetResultOptions::PulpOSTree(parse_or_default(options)?),
            TargetKind::WorkerServer => {
                TargetResultOptions::WorkerServer(parse_or_default(options)?)
            }
            TargetKind::Koji => TargetResultOptions::Koji(parse_or_default(options)?),
        })
    }

    pub fn to_value(&self) -> Value {
        let v = match self {
            TargetResultOptions::Aws(o) => serde_json::to_value(o),
            TargetResultOptions::AwsS3(o) => serde_json::to_value(o),
            TargetResultOptions::Gcp(o) => serde_json::to_value(o),
            TargetResultOptions::Azure(o) => serde_json::to_value(o),
            TargetResultOptions::Container(o) => serde_json::to_value(o),
            TargetResultOptions::Oci(o) => serde_json::to_value(o),
            TargetResultOptions::PulpOSTree(o) => serde_json::to_value(o),
            TargetResultOptions::WorkerServer(o) => serde_json::to_value(o),
            TargetResultOptions::Koji(o) => serde_json::to_value(o),
        };
        v.unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_names() {
        for kind in TargetKind::ALL.iter() {
            assert_eq!(TargetKind::from_target_name(kind.target_name()), Some(*kind));
            assert_eq!(TargetKind::from_upload_type(kind.upload_type()), Some(*kind));
        }
        assert_eq!(TargetKind::from_target_name("org.osbuild.nope"), None);
    }

    #[test]
    fn test_target_options() {
        let target = Target::new(
            TargetKind::Aws,
            "composer-api-1",
            &AwsTargetOptions {
                region: "eu".to_string(),
                key: "k".to_string(),
                share_with_accounts: vec![],
            },
            OsbuildArtifact {
                export_filename: "image.raw".to_string(),
                export_name: "image".to_string(),
            },
        )
        .unwrap();
        assert_eq!(target.kind(), Some(TargetKind::Aws));
        let opts: AwsTargetOptions = target.typed_options().unwrap();
        assert_eq!(opts.region, "eu");
    }

    #[test]
    fn test_result_options_default_when_missing() {
        let opts = TargetResultOptions::parse(TargetKind::Aws, None).unwrap();
        assert_eq!(opts.to_value(), json!({"ami": "", "region": ""}));

        let opts =
            TargetResultOptions::parse(TargetKind::Aws, Some(&json!({"ami": "ami-1", "region": "eu"})))
                .unwrap();
        assert_eq!(
            opts,
            TargetResultOptions::Aws(AwsTargetResultOptions {
                ami: "ami-1".to_string(),
                region: "eu".to_string()
            })
        );

        assert!(TargetResultOptions::parse(TargetKind::Koji, Some(&json!({"image": 3}))).is_err());
    }
}
