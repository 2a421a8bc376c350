use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BlueprintError {
    #[error("customization {0:?} is not supported by this image type")]
    UnsupportedCustomization(String),

    #[error("invalid mountpoint {0:?}: {1}")]
    InvalidMountpoint(String, &'static str),

    #[error("duplicate mountpoint {0:?}")]
    DuplicateMountpoint(String),

    #[error("invalid user {0:?}: {1}")]
    InvalidUser(String, &'static str),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Blueprint {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<BlueprintContainer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customizations: Option<BlueprintCustomizations>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BlueprintContainer {
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct UserCustomization {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupCustomization {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemCustomization {
    pub mountpoint: String,
    #[serde(default)]
    pub minsize: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicesCustomization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FirewallCustomization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ServicesCustomization>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelCustomization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub append: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BlueprintCustomizations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user: Vec<UserCustomization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<GroupCustomization>,
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

impl BlueprintCustomizations {
    /// Names of the customizations this document actually sets.
    pub fn used(&self) -> Vec<&'static str> {
        let mut used = vec![];
        if self.hostname.is_some() {
            used.push("hostname");
        }
        if self.kernel.is_some() {
            used.push("kernel");
        }
        if !self.user.is_empty() {
            used.push("user");
        }
        if !self.group.is_empty() {
            used.push("group");
        }
        if self.timezone.is_some() {
            used.push("timezone");
        }
        if self.locale.is_some() {
            used.push("locale");
        }
        if self.firewall.is_some() {
            used.push("firewall");
        }
        if self.services.is_some() {
            used.push("services");
        }
        if !self.filesystem.is_empty() {
            used.push("filesystem");
        }
        if self.fips.is_some() {
            used.push("fips");
        }
        if self.installation_device.is_some() {
            used.push("installation_device");
        }
        used
    }
}

// Mountpoints below these are owned by the OS and can't be split off.
const DENIED_MOUNTPOINTS: &[&str] = &[
    "/bin",
    "/boot/efi",
    "/dev",
    "/etc",
    "/lib",
    "/lib64",
    "/lost+found",
    "/proc",
    "/run",
    "/sbin",
    "/sys",
    "/sysroot",
    "/usr/bin",
    "/usr/lib",
    "/usr/sbin",
    "/var/lock",
    "/var/run",
];

pub fn check_mountpoint(mountpoint: &str) -> Result<(), BlueprintError> {
    let invalid = |why| Err(BlueprintError::InvalidMountpoint(mountpoint.to_string(), why));
    let path = Path::new(mountpoint);
    if !path.is_absolute() {
        return invalid("must be an absolute path");
    }
    if mountpoint != "/" && mountpoint.ends_with('/') {
        return invalid("must not end with a slash");
    }
    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
        || mountpoint.contains("//")
    {
        return invalid("must be a canonical path");
    }
    if DENIED_MOUNTPOINTS
        .iter()
        .any(|denied| path.starts_with(Path::new(denied)))
    {
        return invalid("path is reserved");
    }
    Ok(())
}

impl Blueprint {
    pub fn package_names(&self) -> Vec<String> {
        self.packages
            .iter()
            .chain(self.modules.iter())
            .map(|p| match &p.version {
                Some(v) if !v.is_empty() && v != "*" => format!("{}-{}", p.name, v),
                _ => p.name.clone(),
            })
            .collect()
    }

    /// Checks the customizations against an image type's allow-list and the
    /// filesystem and user policies.
    pub fn validate(&self, allowed: &[String]) -> Result<(), BlueprintError> {
        let customizations = match &self.customizations {
            Some(c) => c,
            None => return Ok(()),
        };

        for name in customizations.used() {
            if !allowed.iter().any(|a| a == name) {
                return Err(BlueprintError::UnsupportedCustomization(name.to_string()));
            }
        }

        let mut seen = HashSet::new();
        for fs in customizations.filesystem.iter() {
            check_mountpoint(&fs.mountpoint)?;
            if !seen.insert(fs.mountpoint.as_str()) {
                return Err(BlueprintError::DuplicateMountpoint(fs.mountpoint.clone()));
            }
        }

        for user in customizations.user.iter() {
            if user.name.is_empty() {
                return Err(BlueprintError::InvalidUser(user.name.clone(), "empty name"));
            }
            if user.name == "root" && user.password.is_some() {
                return Err(BlueprintError::InvalidUser(
                    user.name.clone(),
                    "setting the root password is not supported",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_filesystems(mountpoints: &[&str]) -> Blueprint {
        Blueprint {
            customizations: Some(BlueprintCustomizations {
                filesystem: mountpoints
                    .iter()
                    .map(|m| FilesystemCustomization {
                        mountpoint: m.to_string(),
                        minsize: 1024,
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_mountpoint_policy() {
        assert!(check_mountpoint("/").is_ok());
        assert!(check_mountpoint("/var").is_ok());
        assert!(check_mountpoint("/var/log").is_ok());
        assert!(check_mountpoint("/usr").is_ok());
        assert!(check_mountpoint("/etc").is_err());
        assert!(check_mountpoint("/etc/foo").is_err());
        assert!(check_mountpoint("/boot/efi").is_err());
        assert!(check_mountpoint("var").is_err());
        assert!(check_mountpoint("/var/").is_err());
        assert!(check_mountpoint("/var/../etc").is_err());
        assert!(check_mountpoint("/var//log").is_err());
    }

    #[test]
    fn test_validate_allow_list() {
        let allowed = vec!["filesystem".to_string()];
        assert!(with_filesystems(&["/", "/var"]).validate(&allowed).is_ok());
        assert_eq!(
            with_filesystems(&["/var", "/var"]).validate(&allowed),
            Err(BlueprintError::DuplicateMountpoint("/var".to_string()))
        );
        assert_eq!(
            with_filesystems(&["/var"]).validate(&[]),
            Err(BlueprintError::UnsupportedCustomization("filesystem".to_string()))
        );
        assert!(Blueprint::default().validate(&[]).is_ok());
    }

    #[test]
    fn test_package_names() {
        let bp = Blueprint {
            packages: vec![
                Package {
                    name: "vim".to_string(),
                    version: Some("*".to_string()),
                },
                Package {
                    name: "tmux".to_string(),
                    version: Some("3.2".to_string()),
                },
            ],
            ..Default::default()
        };
        assert_eq!(bp.package_names(), vec!["vim", "tmux-3.2"]);
    }
}
