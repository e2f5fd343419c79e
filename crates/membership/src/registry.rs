use std::{collections::HashSet, path::PathBuf, sync::Arc};

use {
    anyhow::Result,
    herald_common::{Backend, ReconcileReport},
    tokio::sync::Mutex,
    tracing::{debug, info},
};

use crate::store::{JsonFileStore, MemoryStore, RegistryStore};

struct Slot {
    store: Arc<dyn RegistryStore>,
    // Single writer per backend: every mutation is a locked
    // read-modify-write of the store.
    write_lock: Mutex<()>,
}

impl Slot {
    fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }
}

/// Recipients known per backend.
///
/// Ids keep insertion order and never repeat. Entries are only removed by an
/// explicit [`remove`](Self::remove); reconciliation is additive.
pub struct MembershipRegistry {
    whatsapp: Slot,
    telegram: Slot,
}

impl MembershipRegistry {
    pub fn new(whatsapp: Arc<dyn RegistryStore>, telegram: Arc<dyn RegistryStore>) -> Self {
        Self {
            whatsapp: Slot::new(whatsapp),
            telegram: Slot::new(telegram),
        }
    }

    /// Registry backed by one JSON file per backend.
    pub fn from_files(whatsapp: impl Into<PathBuf>, telegram: impl Into<PathBuf>) -> Self {
        Self::new(
            Arc::new(JsonFileStore::new(whatsapp)),
            Arc::new(JsonFileStore::new(telegram)),
        )
    }

    /// Registry that never touches disk.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    fn slot(&self, backend: Backend) -> &Slot {
        match backend {
            Backend::WhatsApp => &self.whatsapp,
            Backend::Telegram => &self.telegram,
        }
    }

    /// Current ids in insertion order.
    pub async fn members(&self, backend: Backend) -> Result<Vec<String>> {
        let slot = self.slot(backend);
        let _guard = slot.write_lock.lock().await;
        Ok(dedup(slot.store.load()?))
    }

    pub async fn len(&self, backend: Backend) -> Result<usize> {
        Ok(self.members(backend).await?.len())
    }

    pub async fn is_empty(&self, backend: Backend) -> Result<bool> {
        Ok(self.len(backend).await? == 0)
    }

    pub async fn contains(&self, backend: Backend, id: &str) -> Result<bool> {
        Ok(self.members(backend).await?.iter().any(|m| m == id))
    }

    /// Append `id` if absent. Returns whether the registry changed.
    pub async fn add(&self, backend: Backend, id: &str) -> Result<bool> {
        let slot = self.slot(backend);
        let _guard = slot.write_lock.lock().await;

        let mut ids = dedup(slot.store.load()?);
        if ids.iter().any(|m| m == id) {
            debug!(%backend, id, "already registered");
            return Ok(false);
        }
        ids.push(id.to_string());
        slot.store.save(&ids)?;
        info!(%backend, id, total = ids.len(), "recipient registered");
        Ok(true)
    }

    /// Drop `id` if present. Returns whether the registry changed.
    pub async fn remove(&self, backend: Backend, id: &str) -> Result<bool> {
        let slot = self.slot(backend);
        let _guard = slot.write_lock.lock().await;

        let mut ids = dedup(slot.store.load()?);
        let before = ids.len();
        ids.retain(|m| m != id);
        if ids.len() == before {
            debug!(%backend, id, "not registered, nothing to remove");
            return Ok(false);
        }
        slot.store.save(&ids)?;
        info!(%backend, id, total = ids.len(), "recipient removed");
        Ok(true)
    }

    /// Add every id of a live membership snapshot that is not yet known.
    /// Known ids missing from the snapshot are kept.
    pub async fn reconcile<I, S>(&self, backend: Backend, snapshot: I) -> Result<ReconcileReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let slot = self.slot(backend);
        let _guard = slot.write_lock.lock().await;

        let mut ids = dedup(slot.store.load()?);
        let mut known: HashSet<String> = ids.iter().cloned().collect();
        let mut seen = HashSet::new();
        let mut added = 0;

        for id in snapshot {
            let id = id.as_ref();
            if !seen.insert(id.to_string()) {
                continue;
            }
            if known.insert(id.to_string()) {
                ids.push(id.to_string());
                added += 1;
            }
        }

        if added > 0 {
            slot.store.save(&ids)?;
        }

        let report = ReconcileReport {
            found: seen.len(),
            added,
            total: ids.len(),
        };
        info!(
            %backend,
            found = report.found,
            added = report.added,
            total = report.total,
            store = %slot.store.describe(),
            "membership reconciled"
        );
        Ok(report)
    }
}

/// Drop repeated ids, keeping the first occurrence.
fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
