use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    anyhow::{Context, Result},
    serde::Deserialize,
};

/// Persistence for one backend's recipient list.
pub trait RegistryStore: Send + Sync {
    /// Load the stored ids in insertion order. A missing store is empty.
    fn load(&self) -> Result<Vec<String>>;

    /// Replace the stored ids.
    fn save(&self, ids: &[String]) -> Result<()>;

    /// Where the data lives, for log lines.
    fn describe(&self) -> String;
}

/// Ids written by older deployments may be bare JSON numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredId {
    Text(String),
    Number(serde_json::Number),
}

impl From<StoredId> for String {
    fn from(id: StoredId) -> Self {
        match id {
            StoredId::Text(s) => s,
            StoredId::Number(n) => n.to_string(),
        }
    }
}

/// JSON array file, e.g. `groups.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RegistryStore for JsonFileStore {
    fn load(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<StoredId> = serde_json::from_str(&data)
            .with_context(|| format!("invalid registry file {}", self.path.display()))?;
        Ok(ids.into_iter().map(String::from).collect())
    }

    fn save(&self, ids: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(ids)?;
        let tmp = self.temp_path();
        fs::write(&tmp, data).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Volatile store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ids: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Mutex::new(ids.into_iter().map(Into::into).collect()),
        }
    }
}

impl RegistryStore for MemoryStore {
    fn load(&self) -> Result<Vec<String>> {
        Ok(self.ids.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, ids: &[String]) -> Result<()> {
        *self.ids.lock().unwrap_or_else(|e| e.into_inner()) = ids.to_vec();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
