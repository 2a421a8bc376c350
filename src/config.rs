use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::distro::{Distro, DistroRegistry};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> i32 {
    8080
}

fn default_numcpu() -> u32 {
    num_cpus::get() as u32
}

fn default_depsolve_timeout() -> u64 {
    300
}

fn default_tenant_provider_fields() -> Vec<String> {
    vec!["rh-org-id".to_string(), "account_id".to_string()]
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_request_job_timeout() -> u64 {
    20
}

fn default_max_heartbeat_retries() -> u32 {
    1
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct JwtConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, deserialize_with = "from_base64")]
    pub secret: Vec<u8>,
    /// Claims a tenant is read from, in order of preference.
    #[serde(default = "default_tenant_provider_fields")]
    pub tenant_provider_fields: Vec<String>,
    /// Subjects allowed to call the API. Empty allows any verified token.
    #[serde(default)]
    pub acl: Vec<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        JwtConfig {
            enabled: false,
            secret: vec![],
            tenant_provider_fields: default_tenant_provider_fields(),
            acl: vec![],
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WorkerConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_request_job_timeout")]
    pub request_job_timeout_secs: u64,
    #[serde(default = "default_max_heartbeat_retries")]
    pub max_heartbeat_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            heartbeat_interval_secs: default_heartbeat_interval(),
            request_job_timeout_secs: default_request_job_timeout(),
            max_heartbeat_retries: default_max_heartbeat_retries(),
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn request_job_timeout(&self) -> Duration {
        Duration::from_secs(self.request_job_timeout_secs)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: i32,
    pub state_dir: PathBuf,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default = "default_depsolve_timeout")]
    pub depsolve_timeout_secs: u64,
    #[serde(default = "default_numcpu")]
    pub workers: u32,
    #[serde(default)]
    pub distributions: Vec<Distro>,
}

impl Config {
    pub fn jobs_dir(&self) -> PathBuf {
        self.state_dir.join("jobs")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.state_dir.join("artifacts")
    }

    pub fn compose_request_dir(&self) -> PathBuf {
        self.state_dir.join("ComposeRequest")
    }

    pub fn depsolve_timeout(&self) -> Duration {
        Duration::from_secs(self.depsolve_timeout_secs)
    }

    pub fn distro_registry(&self) -> DistroRegistry {
        DistroRegistry::new(self.distributions.clone())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> io::Result<Config> {
    let config_contents = fs::read_to_string(path)?;
    let config_data: Config = serde_json::from_str(&config_contents)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    if config_data.jwt.enabled && config_data.jwt.secret.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "jwt is enabled but no secret is configured",
        ));
    }
    if config_data.worker.heartbeat_interval_secs == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "heartbeat-interval-secs must be positive",
        ));
    }

    Ok(config_data)
}

fn from_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    String::deserialize(deserializer)
        .and_then(|string| base64::decode(string).map_err(|err| Error::custom(err.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let file = write_config(r#"{"state-dir": "/var/lib/composer"}"#);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert!(!config.jwt.enabled);
        assert_eq!(config.jwt.tenant_provider_fields, vec!["rh-org-id", "account_id"]);
        assert_eq!(config.worker.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.worker.max_heartbeat_retries, 1);
        assert_eq!(config.jobs_dir(), PathBuf::from("/var/lib/composer/jobs"));
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_jwt_secret_is_base64() {
        let file = write_config(
            r#"{"state-dir": "/tmp/x", "jwt": {"enabled": true, "secret": "c2VjcmV0", "acl": ["worker"]}}"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.jwt.secret, b"secret".to_vec());
        assert_eq!(config.jwt.acl, vec!["worker"]);

        let file = write_config(r#"{"state-dir": "/tmp/x", "jwt": {"secret": "%%%"}}"#);
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_rejects_bad_config() {
        let file = write_config(r#"{"state-dir": "/tmp/x", "database-url": "pg://"}"#);
        assert!(load_config(file.path()).is_err());

        let file = write_config(r#"{"state-dir": "/tmp/x", "jwt": {"enabled": true}}"#);
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_distributions() {
        let file = write_config(
            r#"{
                "state-dir": "/tmp/x",
                "distributions": [{
                    "name": "test-distro",
                    "releasever": "1",
                    "module-platform-id": "platform:test1",
                    "arches": [{
                        "name": "x86_64",
                        "repositories": [{"baseurls": ["https://example.com/repo"]}],
                        "image-types": [{
                            "name": "aws",
                            "filename": "image.raw",
                            "mime-type": "application/octet-stream",
                            "exports": ["image"],
                            "payload-pipelines": ["os", "image"],
                            "default-target": "aws"
                        }]
                    }]
                }]
            }"#,
        );
        let config = load_config(file.path()).unwrap();
        let registry = config.distro_registry();
        let image_type = registry
            .get("test-distro")
            .and_then(|d| d.arch("x86_64"))
            .and_then(|a| a.image_type("aws"))
            .unwrap();
        assert_eq!(image_type.build_pipelines, vec!["build"]);
        assert_eq!(image_type.payload_package_sets, vec!["os"]);
    }
}
