//! Local store: a persistent key-value store shared by every session on the
//! same device, and the module-aware adapter the reconciler uses on top of it.
//!
//! Values are JSON text. A module's records live either in flat lists or in a
//! section of the shared document; [`LocalStore`] hides which one is in use.

use crate::module::{Module, WriteTarget, SHARED_DOCUMENT_KEY};
use crate::record::Record;
use crate::{RecordId, Result, TenantId};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Key of the flag set by an operator wipe.
pub const WIPE_GUARD_KEY: &str = "datos_operativos_limpiados";
/// Key holding the active registration number.
pub const ACTIVE_NUMBER_KEY: &str = "activeRegistrationNumber";
/// Key holding the last resolved tenant id.
pub const TENANT_ID_KEY: &str = "tenantId";
/// Key marking a tenant that was just created on this device.
pub const NEW_TENANT_FLAG_KEY: &str = "newUserCreated";
/// Key holding the pending id of a just-created tenant.
pub const NEW_TENANT_ID_KEY: &str = "newUserTenantId";

const EVENT_CAPACITY: usize = 256;

/// Identifies one session (tab, window, process) attached to a local store.
pub type SessionId = u64;

/// A change made to the local store by some session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// `None` when the key was removed
    pub new_value: Option<String>,
    pub session: SessionId,
}

/// Stream of changes made by *other* sessions.
pub struct StorageWatch {
    rx: broadcast::Receiver<StorageEvent>,
    session: SessionId,
}

impl StorageWatch {
    /// Wait for the next foreign change. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.session == self.session => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Storage watcher lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Raw key-value access for one session.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
    /// Subscribe to changes made by other sessions.
    fn watch(&self) -> StorageWatch;
}

#[derive(Debug)]
struct KvInner {
    entries: RwLock<BTreeMap<String, String>>,
    path: Option<PathBuf>,
    events: broadcast::Sender<StorageEvent>,
    next_session: AtomicU64,
    writes: AtomicU64,
}

/// Device-wide key-value store, optionally persisted to a JSON file.
///
/// Cloning is cheap; every clone refers to the same entries. Sessions are
/// created with [`LocalKv::session`].
#[derive(Debug, Clone)]
pub struct LocalKv {
    inner: Arc<KvInner>,
}

impl LocalKv {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::with_entries(BTreeMap::new(), None)
    }

    /// Open (or create) a store persisted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), keys = entries.len(), "Opened local store");
        Ok(Self::with_entries(entries, Some(path)))
    }

    fn with_entries(entries: BTreeMap<String, String>, path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(KvInner {
                entries: RwLock::new(entries),
                path,
                events,
                next_session: AtomicU64::new(1),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Attach a new session.
    pub fn session(&self) -> KvSession {
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        KvSession {
            inner: self.inner.clone(),
            id,
        }
    }

    /// Number of mutating calls made by all sessions so far.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }
}

impl KvInner {
    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(entries)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn notify(&self, key: &str, new_value: Option<String>, session: SessionId) {
        // No receivers is the common case and not an error.
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            new_value,
            session,
        });
    }
}

/// One session's handle on a [`LocalKv`].
#[derive(Debug, Clone)]
pub struct KvSession {
    inner: Arc<KvInner>,
    id: SessionId,
}

impl KvSession {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl KeyValueStore for KvSession {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut entries = self.inner.entries.write();
            entries.insert(key.to_string(), value.to_string());
            self.inner.persist(&entries)?;
        }
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
        self.inner.notify(key, Some(value.to_string()), self.id);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        {
            let mut entries = self.inner.entries.write();
            if entries.remove(key).is_none() {
                return Ok(());
            }
            self.inner.persist(&entries)?;
        }
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
        self.inner.notify(key, None, self.id);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.entries.read().keys().cloned().collect())
    }

    fn watch(&self) -> StorageWatch {
        StorageWatch {
            rx: self.inner.events.subscribe(),
            session: self.id,
        }
    }
}

/// Module-aware adapter over a [`KeyValueStore`].
#[derive(Clone)]
pub struct LocalStore {
    kv: Arc<dyn KeyValueStore>,
}

impl LocalStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// All records of a module, across every key it is stored under.
    pub fn get(&self, module: Module) -> Result<Vec<Record>> {
        let chain = module.identifier_chain();
        let mut bodies = Vec::new();

        for key in module.flat_keys() {
            if let Some(text) = self.kv.get(key)? {
                bodies.extend(parse_list(module, key, &text));
            }
        }

        if let Some(section) = module.shared_section() {
            let shared = self.read_shared_document()?;
            if let Some(entries) = shared.get(section) {
                bodies.extend(coerce_list(module, section, entries.clone()));
            }
        }

        let records = bodies
            .into_iter()
            .filter_map(|body| {
                let record = Record::local(body, chain);
                if record.is_none() {
                    tracing::debug!(module = %module, "Skipping local entry without identifier");
                }
                record
            })
            .collect();
        Ok(records)
    }

    /// Store a record under `id`. Returns `false` when a flat list already
    /// held a record with that id and nothing was written.
    pub fn put(&self, module: Module, id: &str, body: &Value) -> Result<bool> {
        match module.write_target(body) {
            WriteTarget::SharedSection(section) => {
                let mut shared = self.read_shared_document()?;
                let entries = shared
                    .entry(section.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entries.is_object() {
                    tracing::warn!(module = %module, section, "Shared section was not a map, resetting");
                    *entries = Value::Object(Map::new());
                }
                if let Value::Object(map) = entries {
                    map.insert(id.to_string(), body.clone());
                }
                self.kv
                    .set(SHARED_DOCUMENT_KEY, &serde_json::to_string(&shared)?)?;
                Ok(true)
            }
            WriteTarget::Flat(key) => {
                let chain = module.identifier_chain();
                let mut existing = match self.kv.get(key)? {
                    Some(text) => parse_list(module, key, &text),
                    None => Vec::new(),
                };
                if existing
                    .iter()
                    .any(|item| chain.resolve(item).as_deref() == Some(id))
                {
                    return Ok(false);
                }
                existing.push(body.clone());
                self.kv.set(key, &serde_json::to_string(&existing)?)?;
                Ok(true)
            }
        }
    }

    /// Remove every local copy of record `id`. Returns whether anything was
    /// removed.
    pub fn remove(&self, module: Module, id: &str) -> Result<bool> {
        let chain = module.identifier_chain();
        let mut removed = false;

        for key in module.flat_keys() {
            let Some(text) = self.kv.get(key)? else {
                continue;
            };
            let mut items = parse_list(module, key, &text);
            let before = items.len();
            items.retain(|item| chain.resolve(item).as_deref() != Some(id));
            if items.len() != before {
                self.kv.set(key, &serde_json::to_string(&items)?)?;
                removed = true;
            }
        }

        if let Some(section) = module.shared_section() {
            let mut shared = self.read_shared_document()?;
            if let Some(Value::Object(map)) = shared.get_mut(section) {
                let before = map.len();
                map.retain(|key, item| key != id && chain.resolve(item).as_deref() != Some(id));
                if map.len() != before {
                    self.kv
                        .set(SHARED_DOCUMENT_KEY, &serde_json::to_string(&shared)?)?;
                    removed = true;
                }
            }
        }

        Ok(removed)
    }

    /// Identifiers currently stored for a module.
    pub fn ids(&self, module: Module) -> Result<Vec<RecordId>> {
        Ok(self.get(module)?.into_iter().map(|r| r.id).collect())
    }

    fn read_shared_document(&self) -> Result<Map<String, Value>> {
        let Some(text) = self.kv.get(SHARED_DOCUMENT_KEY)? else {
            return Ok(Map::new());
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => {
                tracing::warn!(key = SHARED_DOCUMENT_KEY, "Shared document is not an object, ignoring");
                Ok(Map::new())
            }
            Err(e) => {
                tracing::warn!(key = SHARED_DOCUMENT_KEY, error = %e, "Failed to parse shared document");
                Ok(Map::new())
            }
        }
    }

    // Wipe guard

    pub fn wipe_guard(&self) -> Result<bool> {
        Ok(self.kv.get(WIPE_GUARD_KEY)?.as_deref() == Some("true"))
    }

    pub fn set_wipe_guard(&self) -> Result<()> {
        self.kv.set(WIPE_GUARD_KEY, "true")
    }

    pub fn clear_wipe_guard(&self) -> Result<()> {
        self.kv.remove(WIPE_GUARD_KEY)
    }

    /// Operator wipe: remove all operational data and raise the wipe guard so
    /// the next pass cannot resurrect it from this device.
    ///
    /// Returns the number of keys removed.
    pub fn purge_operational_data(&self) -> Result<usize> {
        let mut keys: Vec<&str> = Module::ALL
            .iter()
            .flat_map(|m| m.flat_keys().iter().copied())
            .collect();
        keys.push(SHARED_DOCUMENT_KEY);
        keys.push(ACTIVE_NUMBER_KEY);

        let mut removed = 0;
        for key in keys {
            if self.kv.get(key)?.is_some() {
                self.kv.remove(key)?;
                removed += 1;
            }
        }
        self.set_wipe_guard()?;
        tracing::info!(removed, "Operational data purged, wipe guard raised");
        Ok(removed)
    }

    // Active registration number

    pub fn active_number(&self) -> Result<Option<String>> {
        Ok(self
            .kv
            .get(ACTIVE_NUMBER_KEY)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && v != "-"))
    }

    pub fn set_active_number(&self, number: &str) -> Result<()> {
        self.kv.set(ACTIVE_NUMBER_KEY, number)
    }

    pub fn remove_active_number(&self) -> Result<()> {
        self.kv.remove(ACTIVE_NUMBER_KEY)
    }

    // Tenant

    pub fn tenant_id(&self) -> Result<Option<TenantId>> {
        Ok(self.kv.get(TENANT_ID_KEY)?.filter(|t| !t.trim().is_empty()))
    }

    pub fn set_tenant_id(&self, tenant: &str) -> Result<()> {
        self.kv.set(TENANT_ID_KEY, tenant)
    }

    /// Tenant id of a just-created tenant, only while its flag is raised.
    pub fn pending_tenant(&self) -> Result<Option<TenantId>> {
        if self.kv.get(NEW_TENANT_FLAG_KEY)?.as_deref() != Some("true") {
            return Ok(None);
        }
        Ok(self
            .kv
            .get(NEW_TENANT_ID_KEY)?
            .filter(|t| !t.trim().is_empty()))
    }

    pub fn mark_pending_tenant(&self, tenant: &str) -> Result<()> {
        self.kv.set(NEW_TENANT_ID_KEY, tenant)?;
        self.kv.set(NEW_TENANT_FLAG_KEY, "true")
    }

    pub fn clear_pending_tenant(&self) -> Result<()> {
        self.kv.remove(NEW_TENANT_FLAG_KEY)?;
        self.kv.remove(NEW_TENANT_ID_KEY)
    }

    /// Changes to the store made by other sessions.
    pub fn watch(&self) -> StorageWatch {
        self.kv.watch()
    }
}

fn parse_list(module: Module, key: &str, text: &str) -> Vec<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => coerce_list(module, key, value),
        Err(e) => {
            tracing::warn!(module = %module, key, error = %e, "Failed to parse local entry, treating as empty");
            Vec::new()
        }
    }
}

fn coerce_list(module: Module, key: &str, value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            tracing::warn!(module = %module, key, "Local entry held an object, using its values");
            map.into_iter().map(|(_, v)| v).collect()
        }
        Value::Null => Vec::new(),
        _ => {
            tracing::warn!(module = %module, key, "Unexpected local entry shape, treating as empty");
            Vec::new()
        }
    }
}

impl From<KvSession> for LocalStore {
    fn from(session: KvSession) -> Self {
        LocalStore::new(Arc::new(session))
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}
