//! Metadata Store: one `metadata.json` per managed container under
//! `<user-home>/.amplifier/containers/containers/<name>/`.

use std::path::PathBuf;

use tokio::fs;
use tracing::debug;

use crate::errors::{ContainerError, ContainerResult};
use crate::types::ContainerRecord;

/// Persists [`ContainerRecord`]s as JSON files, one directory per
/// container name.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    base_dir: PathBuf,
}

impl MetadataStore {
    /// Store rooted at `<user-home>/.amplifier/containers`.
    pub fn new() -> ContainerResult<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            ContainerError::io(
                "resolve home directory",
                std::io::Error::new(std::io::ErrorKind::NotFound, "no home directory"),
            )
        })?;
        Ok(Self::with_base_dir(home.join(".amplifier").join("containers")))
    }

    /// Store rooted at an explicit base directory, used in tests.
    #[must_use]
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn container_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join("containers").join(name)
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("metadata.json")
    }

    /// Persist a record, overwriting any existing one for the same name.
    pub async fn save(&self, record: &ContainerRecord) -> ContainerResult<()> {
        let dir = self.container_dir(&record.name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ContainerError::metadata("save", e))?;

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| ContainerError::malformed_json("container record", e))?;

        fs::write(self.metadata_path(&record.name), json)
            .await
            .map_err(|e| ContainerError::metadata("save", e))?;

        debug!(container = %record.name, "saved container metadata");
        Ok(())
    }

    /// Load a record by name, if present.
    pub async fn load(&self, name: &str) -> ContainerResult<Option<ContainerRecord>> {
        let path = self.metadata_path(name);
        match fs::read(&path).await {
            Ok(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .map_err(|e| ContainerError::malformed_json(name, e))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ContainerError::metadata("load", e)),
        }
    }

    /// Remove a container's metadata directory. Absent is not an error.
    pub async fn remove(&self, name: &str) -> ContainerResult<()> {
        match fs::remove_dir_all(self.container_dir(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ContainerError::metadata("remove", e)),
        }
    }

    /// List every persisted record, in lexical name order.
    pub async fn list_all(&self) -> ContainerResult<Vec<ContainerRecord>> {
        let containers_dir = self.base_dir.join("containers");
        let mut entries = match fs::read_dir(&containers_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ContainerError::metadata("list_all", e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ContainerError::metadata("list_all", e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            if let Some(record) = self.load(&name).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProvisioningFlags;
    use chrono::Utc;

    fn sample_record(name: &str) -> ContainerRecord {
        ContainerRecord {
            name: name.to_string(),
            container_id: "abcdef012345".to_string(),
            image: "python:3.12-slim".to_string(),
            purpose: Some("python".to_string()),
            created: Utc::now(),
            persistent: false,
            mounts: vec![],
            mount_cwd: true,
            ports: vec![],
            env_keys: vec![],
            exec_user: None,
            compose_project: None,
            compose_file: None,
            compose_network: None,
            provisioning: ProvisioningFlags::default(),
        }
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::with_base_dir(dir.path().to_path_buf());
        let record = sample_record("amp-python-abc123");
        store.save(&record).await.unwrap();

        let loaded = store.load("amp-python-abc123").await.unwrap().unwrap();
        assert_eq!(loaded.name, record.name);
        assert_eq!(loaded.container_id, record.container_id);
    }

    #[tokio::test]
    async fn load_missing_is_none_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::with_base_dir(dir.path().to_path_buf());
        assert!(store.load("does-not-exist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_missing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::with_base_dir(dir.path().to_path_buf());
        store.remove("does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn list_all_is_lexically_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::with_base_dir(dir.path().to_path_buf());
        store.save(&sample_record("amp-zeta-111111")).await.unwrap();
        store.save(&sample_record("amp-alpha-222222")).await.unwrap();

        let all = store.list_all().await.unwrap();
        let names: Vec<_> = all.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["amp-alpha-222222", "amp-zeta-111111"]);
    }
}
