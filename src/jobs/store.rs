use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::errors::{JobQueueError, JobQueueResult};
use crate::models::JobType;

/// The on-disk form of a job, one file per job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub args: Value,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub canceled: bool,
}

impl StoredJob {
    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.finished_at.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    pub fn open(dir: PathBuf) -> io::Result<FsStore> {
        fs::create_dir_all(&dir)?;
        Ok(FsStore { dir })
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Atomically replaces the job's file.
    pub fn write(&self, job: &StoredJob) -> JobQueueResult<()> {
        let mut file = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut file, job)?;
        file.flush()?;
        file.persist(self.path_for(&job.id))
            .map_err(|e| JobQueueError::Io(e.error))?;
        Ok(())
    }

    pub fn remove(&self, id: &Uuid) -> JobQueueResult<()> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_all(&self) -> JobQueueResult<Vec<StoredJob>> {
        let mut jobs = vec![];
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                debug!("Ignoring {:?} in job store", path);
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            let job: StoredJob = serde_json::from_str(&contents)
                .map_err(|e| JobQueueError::Corrupt(format!("{}: {}", path.display(), e)))?;
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if stem != job.id.to_string() {
                return Err(JobQueueError::Corrupt(format!(
                    "{} holds job {}",
                    path.display(),
                    job.id
                )));
            }
            jobs.push(job);
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> StoredJob {
        StoredJob {
            id: Uuid::new_v4(),
            job_type: JobType::Depsolve,
            args: json!({"arch": "x86_64"}),
            dependencies: vec![],
            channel: "org-1".to_string(),
            arch: "x86_64".to_string(),
            token: None,
            result: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            retries: 0,
            canceled: false,
        }
    }

    #[test]
    fn test_write_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path().join("jobs")).unwrap();
        let mut j = job();
        store.write(&j).unwrap();
        j.canceled = true;
        store.write(&j).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![j.clone()]);

        store.remove(&j.id).unwrap();
        store.remove(&j.id).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path().to_path_buf()).unwrap();
        fs::write(dir.path().join(format!("{}.json", Uuid::new_v4())), "{").unwrap();
        assert!(matches!(store.load_all(), Err(JobQueueError::Corrupt(_))));
    }
}
