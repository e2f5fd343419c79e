use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, Result},
    serde::Deserialize,
    tracing::{debug, warn},
};

/// Where the administrator allow-list comes from.
pub trait AdminSource: Send + Sync {
    fn load(&self) -> Result<Vec<String>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AdminId {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Deserialize)]
struct AdminSet {
    admins: Vec<AdminId>,
}

/// `{ "admins": ["5511999999999", ...] }`, read on every call.
#[derive(Debug, Clone)]
pub struct AdminFile {
    path: PathBuf,
}

impl AdminFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AdminSource for AdminFile {
    fn load(&self) -> Result<Vec<String>> {
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let set: AdminSet = serde_json::from_str(&data)
            .with_context(|| format!("invalid admin file {}", self.path.display()))?;
        Ok(set
            .admins
            .into_iter()
            .map(|id| match id {
                AdminId::Text(s) => s.trim().to_string(),
                AdminId::Number(n) => n.to_string(),
            })
            .collect())
    }
}

/// Fixed allow-list.
#[derive(Debug, Clone, Default)]
pub struct StaticAdmins(pub Vec<String>);

impl AdminSource for StaticAdmins {
    fn load(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Decides whether a sender may issue commands or broadcasts.
///
/// The allow-list is reloaded for every check, so edits to the admin file
/// take effect on the next message.
#[derive(Clone)]
pub struct AuthorizationGate {
    source: Arc<dyn AdminSource>,
}

impl AuthorizationGate {
    pub fn new(source: Arc<dyn AdminSource>) -> Self {
        Self { source }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(AdminFile::new(path)))
    }

    pub fn is_authorized(&self, sender: &str) -> bool {
        let admins = match self.source.load() {
            Ok(admins) => admins,
            Err(e) => {
                warn!(error = %e, "admin list unavailable, refusing everyone");
                Vec::new()
            },
        };
        let allowed = admins.iter().any(|a| a == sender);
        debug!(sender, allowed, "authorization check");
        allowed
    }
}

impl std::fmt::Debug for AuthorizationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGate").finish_non_exhaustive()
    }
}
