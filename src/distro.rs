use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::blueprint::Blueprint;
use crate::models::{PackageSet, PipelineNames, RepoConfig};

fn default_build_pipelines() -> Vec<String> {
    vec!["build".to_string()]
}

fn default_payload_package_sets() -> Vec<String> {
    vec!["os".to_string()]
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageType {
    pub name: String,
    pub filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub build_packages: Vec<String>,
    pub exports: Vec<String>,
    #[serde(default = "default_build_pipelines")]
    pub build_pipelines: Vec<String>,
    pub payload_pipelines: Vec<String>,
    #[serde(default = "default_payload_package_sets")]
    pub payload_package_sets: Vec<String>,
    #[serde(default)]
    pub default_size: u64,
    /// Set for image types that produce or deploy an OSTree commit.
    #[serde(default)]
    pub ostree_ref: Option<String>,
    /// Installer-style images that must be fed an existing commit.
    #[serde(default)]
    pub requires_ostree_commit: bool,
    #[serde(default)]
    pub embed_containers: bool,
    pub default_target: String,
    #[serde(default)]
    pub upload_targets: Vec<String>,
    #[serde(default)]
    pub allowed_customizations: Vec<String>,
    #[serde(default)]
    pub boot_mode: String,
}

impl ImageType {
    pub fn pipeline_names(&self) -> PipelineNames {
        PipelineNames {
            build: self.build_pipelines.clone(),
            payload: self.payload_pipelines.clone(),
        }
    }

    /// Upload targets a request may name, the default one included.
    pub fn permits_target(&self, upload_type: &str) -> bool {
        self.default_target == upload_type || self.upload_targets.iter().any(|t| t == upload_type)
    }

    pub fn size(&self, requested: Option<u64>) -> u64 {
        match requested {
            Some(size) if size > self.default_size => size,
            _ => self.default_size,
        }
    }

    /// The depsolve input: one build set and one set per payload set, each
    /// with the repositories that apply to it.
    pub fn package_sets(
        &self,
        bp: &Blueprint,
        repos: &[RepoConfig],
    ) -> BTreeMap<String, Vec<PackageSet>> {
        let repos_for = |set: &str| -> Vec<RepoConfig> {
            repos.iter().filter(|r| r.applies_to(set)).cloned().collect()
        };

        let mut sets = BTreeMap::new();
        sets.insert(
            "build".to_string(),
            vec![PackageSet {
                include: self.build_packages.clone(),
                exclude: vec![],
                repositories: repos_for("build"),
            }],
        );
        for set in self.payload_package_sets.iter() {
            let mut include = self.packages.clone();
            include.extend(bp.package_names());
            sets.insert(
                set.clone(),
                vec![PackageSet {
                    include,
                    exclude: vec![],
                    repositories: repos_for(set),
                }],
            );
        }
        sets
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Arch {
    pub name: String,
    pub image_types: Vec<ImageType>,
    #[serde(default)]
    pub repositories: Vec<RepoConfig>,
}

impl Arch {
    pub fn image_type(&self, name: &str) -> Option<&ImageType> {
        self.image_types.iter().find(|t| t.name == name)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Distro {
    pub name: String,
    pub releasever: String,
    pub module_platform_id: String,
    #[serde(default)]
    pub vendor: String,
    pub arches: Vec<Arch>,
}

impl Distro {
    pub fn arch(&self, name: &str) -> Option<&Arch> {
        self.arches.iter().find(|a| a.name == name)
    }
}

/// Read-only after startup.
#[derive(Debug, Clone, Default)]
pub struct DistroRegistry {
    distros: Vec<Distro>,
}

impl DistroRegistry {
    pub fn new(distros: Vec<Distro>) -> Self {
        DistroRegistry { distros }
    }

    pub fn get(&self, name: &str) -> Option<&Distro> {
        self.distros.iter().find(|d| d.name == name)
    }

    pub fn list(&self) -> &[Distro] {
        &self.distros
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::Package;

    #[test]
    fn test_lookup() {
        let registry = test_distro::registry();
        let distro = registry.get("test-distro").unwrap();
        let arch = distro.arch("arch3").unwrap();
        assert!(arch.image_type("aws").is_some());
        assert!(arch.image_type("nope").is_none());
        assert!(distro.arch("s390x").is_none());
        assert!(registry.get("fedora-99").is_none());
    }

    #[test]
    fn test_package_sets_and_repo_tags() {
        let registry = test_distro::registry();
        let image_type = registry
            .get("test-distro")
            .and_then(|d| d.arch("x86_64"))
            .and_then(|a| a.image_type("aws"))
            .unwrap();
        let bp = Blueprint {
            packages: vec![Package {
                name: "vim".to_string(),
                version: None,
            }],
            ..Default::default()
        };
        let repos = vec![
            RepoConfig {
                id: "base".to_string(),
                ..Default::default()
            },
            RepoConfig {
                id: "payload".to_string(),
                package_sets: vec!["os".to_string()],
                ..Default::default()
            },
        ];
        let sets = image_type.package_sets(&bp, &repos);
        assert_eq!(sets["build"][0].repositories.len(), 1);
        assert_eq!(sets["os"][0].repositories.len(), 2);
        assert!(sets["os"][0].include.contains(&"vim".to_string()));
        assert!(!sets["build"][0].include.contains(&"vim".to_string()));
    }

    #[test]
    fn test_targets_and_size() {
        let registry = test_distro::registry();
        let image_type = registry
            .get("test-distro")
            .and_then(|d| d.arch("x86_64"))
            .and_then(|a| a.image_type("aws"))
            .unwrap();
        assert!(image_type.permits_target("aws"));
        assert!(image_type.permits_target("aws.s3"));
        assert!(!image_type.permits_target("gcp"));
        assert_eq!(image_type.size(Some(1)), image_type.default_size);
        assert_eq!(image_type.size(Some(8 << 30)), 8 << 30);
    }
}
