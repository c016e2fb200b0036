//! Active registration number broadcaster.
//!
//! Owns the one shared "current registration number" and keeps it
//! consistent across the in-memory value, the local store, the remote store,
//! every registered consumer field and every other session on the device.
//!
//! All writers go through [`ActiveNumberBroadcaster::set`], which validates
//! the value, ignores it when nothing changes and otherwise fans it out.
//! Remote pushes and cross-session storage events re-enter through `set`
//! too, so an echo of our own write is always a no-op.

use crate::local::{LocalStore, ACTIVE_NUMBER_KEY};
use crate::remote::RemoteAdapter;
use chrono::Datelike;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 64;

/// Accepted shape of a registration number: a two-digit year prefix
/// followed by five digits, e.g. `2500042`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberFormat {
    year_prefix: String,
}

impl NumberFormat {
    /// Format for the current calendar year.
    pub fn current() -> Self {
        let year = chrono::Local::now().year().rem_euclid(100);
        Self {
            year_prefix: format!("{year:02}"),
        }
    }

    pub fn with_year_prefix(prefix: impl Into<String>) -> Self {
        Self {
            year_prefix: prefix.into(),
        }
    }

    pub fn year_prefix(&self) -> &str {
        &self.year_prefix
    }

    pub fn is_valid(&self, value: &str) -> bool {
        value
            .strip_prefix(self.year_prefix.as_str())
            .is_some_and(|rest| rest.len() == 5 && rest.bytes().all(|b| b.is_ascii_digit()))
    }
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self::current()
    }
}

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeSource {
    Manual,
    /// A consumer field edited by the user
    Input,
    /// The primary field already held a value at init
    FieldInit,
    /// Loaded during init from the local or remote store
    Init,
    /// Another session on this device
    LocalStore,
    /// Realtime push from the remote store
    Remote,
    Clear,
}

impl fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeSource::Manual => "manual",
            ChangeSource::Input => "input",
            ChangeSource::FieldInit => "field-init",
            ChangeSource::Init => "init",
            ChangeSource::LocalStore => "local-store",
            ChangeSource::Remote => "remote",
            ChangeSource::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// Change notification. `numero` is empty after a clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberChanged {
    pub numero: String,
    pub source: ChangeSource,
}

/// Something displaying the active number (a form field, a header).
pub trait ConsumerField: Send + Sync {
    fn value(&self) -> String;
    fn set_value(&self, value: &str);
}

/// In-memory [`ConsumerField`] that counts writes.
#[derive(Debug, Default)]
pub struct FieldSlot {
    value: RwLock<String>,
    writes: AtomicU64,
}

impl FieldSlot {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            value: RwLock::new(initial.into()),
            writes: AtomicU64::new(0),
        }
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl ConsumerField for FieldSlot {
    fn value(&self) -> String {
        self.value.read().clone()
    }

    fn set_value(&self, value: &str) {
        *self.value.write() = value.to_string();
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct State {
    number: Option<String>,
    initialized: bool,
    listeners: Vec<JoinHandle<()>>,
}

struct Inner {
    local: LocalStore,
    remote: RemoteAdapter,
    format: NumberFormat,
    state: Mutex<State>,
    consumers: RwLock<Vec<Arc<dyn ConsumerField>>>,
    primary: RwLock<Option<Arc<dyn ConsumerField>>>,
    events: broadcast::Sender<NumberChanged>,
    /// Serializes remote writes
    remote_writes: tokio::sync::Mutex<()>,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.state.get_mut().listeners.drain(..) {
            task.abort();
        }
    }
}

/// Single source of truth for the active registration number.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct ActiveNumberBroadcaster {
    inner: Arc<Inner>,
}

impl ActiveNumberBroadcaster {
    pub fn new(local: LocalStore, remote: RemoteAdapter) -> Self {
        Self::with_format(local, remote, NumberFormat::current())
    }

    pub fn with_format(local: LocalStore, remote: RemoteAdapter, format: NumberFormat) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                local,
                remote,
                format,
                state: Mutex::new(State::default()),
                consumers: RwLock::new(Vec::new()),
                primary: RwLock::new(None),
                events,
                remote_writes: tokio::sync::Mutex::new(()),
                pending_writes: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn format(&self) -> &NumberFormat {
        &self.inner.format
    }

    /// Register a consumer kept in step with the active number.
    pub fn register(&self, field: Arc<dyn ConsumerField>) {
        self.inner.consumers.write().push(field);
    }

    /// Register the primary consumer. A valid value it holds when
    /// [`init`](Self::init) runs wins over both stores.
    pub fn register_primary(&self, field: Arc<dyn ConsumerField>) {
        *self.inner.primary.write() = Some(field.clone());
        self.register(field);
    }

    /// Change notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NumberChanged> {
        self.inner.events.subscribe()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().initialized
    }

    /// Resolve the starting value and start listening for remote pushes and
    /// changes from other sessions. Does nothing when already initialized.
    ///
    /// Resolution order: primary field, local store, remote store.
    pub async fn init(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.initialized {
                tracing::debug!("Active number broadcaster already initialized");
                return;
            }
            state.initialized = true;
        }

        let format = &self.inner.format;
        let from_field = self
            .inner
            .primary
            .read()
            .as_ref()
            .map(|field| field.value().trim().to_string())
            .filter(|value| format.is_valid(value));

        let mut listeners = Vec::new();
        if let Some(task) = self.spawn_storage_listener() {
            listeners.push(task);
        }

        if let Some(number) = from_field {
            tracing::info!(%number, "Active number taken from primary field");
            self.set(&number, ChangeSource::FieldInit);
        } else if let Some(number) = self.load_local() {
            tracing::info!(%number, "Active number loaded from local store");
            self.adopt(number);
        } else if let Some(number) = self.load_remote().await {
            tracing::info!(%number, "Active number loaded from remote store");
            if let Err(e) = self.inner.local.set_active_number(&number) {
                tracing::warn!(error = %e, "Failed to store active number locally");
            }
            self.adopt(number);
        } else {
            tracing::info!("No active registration number");
        }

        if let Some(task) = self.spawn_remote_listener().await {
            listeners.push(task);
        }

        let mut state = self.inner.state.lock();
        if state.initialized {
            state.listeners.extend(listeners);
        } else {
            // destroy() ran while we were resolving.
            for task in listeners {
                task.abort();
            }
        }
    }

    /// Set the active number. Returns whether anything changed.
    ///
    /// Empty values and `-` are ignored. Values not matching the
    /// [`NumberFormat`] are rejected with a warning. Setting the current
    /// value is a no-op with no writes and no notification.
    pub fn set(&self, value: &str, source: ChangeSource) -> bool {
        let value = value.trim();
        if value.is_empty() || value == "-" {
            return false;
        }
        if !self.inner.format.is_valid(value) {
            tracing::warn!(value, %source, "Rejected registration number with invalid format");
            return false;
        }

        {
            let mut state = self.inner.state.lock();
            if state.number.as_deref() == Some(value) {
                return false;
            }
            state.number = Some(value.to_string());
        }
        tracing::info!(number = value, %source, "Active number changed");

        // The other session already stored it, locally and remotely.
        if source != ChangeSource::LocalStore {
            if let Err(e) = self.inner.local.set_active_number(value) {
                tracing::warn!(error = %e, "Failed to store active number locally");
            }
            if source != ChangeSource::Remote {
                self.spawn_remote_write(value.to_string());
            }
        }

        self.update_consumers(value);
        self.emit(value, source);
        true
    }

    /// Current number: memory first, then the local store.
    pub fn get(&self) -> Option<String> {
        if let Some(number) = self.inner.state.lock().number.clone() {
            return Some(number);
        }
        self.load_local()
    }

    /// Clear the active number everywhere and broadcast an empty value.
    pub async fn clear(&self) {
        self.inner.state.lock().number = None;
        if let Err(e) = self.inner.local.remove_active_number() {
            tracing::warn!(error = %e, "Failed to remove local active number");
        }

        {
            let _serial = self.inner.remote_writes.lock().await;
            if let Err(e) = self.inner.remote.set_active_number(None).await {
                tracing::warn!(error = %e, "Failed to clear remote active number");
            }
        }

        self.update_consumers("");
        self.emit("", ChangeSource::Clear);
        tracing::info!("Active number cleared");
    }

    /// Forget the in-memory value after the local store was purged and
    /// blank every consumer. The remote value is left alone.
    pub fn reset(&self) {
        if self.inner.state.lock().number.take().is_none() {
            return;
        }
        self.update_consumers("");
        self.emit("", ChangeSource::Clear);
        tracing::info!("Active number reset after local purge");
    }

    /// Stop listening for remote pushes and other sessions. A later
    /// [`init`](Self::init) starts over.
    pub fn destroy(&self) {
        let mut state = self.inner.state.lock();
        for task in state.listeners.drain(..) {
            task.abort();
        }
        state.initialized = false;
    }

    /// Wait for every remote write started so far.
    pub async fn flush(&self) {
        let pending: Vec<_> = self.inner.pending_writes.lock().drain(..).collect();
        for task in pending {
            let _ = task.await;
        }
    }

    /// Take a value as current without persisting it anywhere.
    fn adopt(&self, number: String) {
        self.inner.state.lock().number = Some(number.clone());
        self.update_consumers(&number);
        self.emit(&number, ChangeSource::Init);
    }

    fn load_local(&self) -> Option<String> {
        match self.inner.local.active_number() {
            Ok(Some(number)) if self.inner.format.is_valid(&number) => Some(number),
            Ok(Some(number)) => {
                tracing::warn!(%number, "Ignoring stored active number with invalid format");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read local active number");
                None
            }
        }
    }

    async fn load_remote(&self) -> Option<String> {
        match self.inner.remote.get_active_number().await {
            Ok(doc) => doc
                .and_then(|doc| doc.number)
                .map(|number| number.trim().to_string())
                .filter(|number| self.inner.format.is_valid(number)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read remote active number");
                None
            }
        }
    }

    fn update_consumers(&self, value: &str) {
        let consumers: Vec<_> = self.inner.consumers.read().clone();
        let mut updated = 0;
        for field in consumers {
            if field.value() != value {
                field.set_value(value);
                updated += 1;
            }
        }
        if updated > 0 {
            tracing::debug!(updated, value, "Updated consumer fields");
        }
    }

    fn emit(&self, numero: &str, source: ChangeSource) {
        // No subscribers is fine.
        let _ = self.inner.events.send(NumberChanged {
            numero: numero.to_string(),
            source,
        });
    }

    fn spawn_remote_write(&self, number: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%number, "No async runtime, skipping remote write");
            return;
        };
        let inner = self.inner.clone();
        let task = runtime.spawn(async move {
            let _serial = inner.remote_writes.lock().await;
            // A newer value superseded this one while we waited.
            if inner.state.lock().number.as_deref() != Some(number.as_str()) {
                tracing::debug!(%number, "Skipping stale remote write");
                return;
            }
            if let Err(e) = inner.remote.set_active_number(Some(&number)).await {
                tracing::warn!(%number, error = %e, "Failed to store remote active number");
            }
        });

        let mut pending = self.inner.pending_writes.lock();
        pending.retain(|task| !task.is_finished());
        pending.push(task);
    }

    fn spawn_storage_listener(&self) -> Option<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let mut watch = self.inner.local.watch();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        Some(runtime.spawn(async move {
            while let Some(event) = watch.recv().await {
                if event.key != ACTIVE_NUMBER_KEY {
                    continue;
                }
                let Some(value) = event.new_value else {
                    continue;
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ActiveNumberBroadcaster { inner }.set(&value, ChangeSource::LocalStore);
            }
        }))
    }

    async fn spawn_remote_listener(&self) -> Option<JoinHandle<()>> {
        let mut subscription = match self.inner.remote.subscribe_active_number().await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(error = %e, "Remote active number feed unavailable");
                return None;
            }
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        Some(tokio::spawn(async move {
            while let Some(doc) = subscription.recv().await {
                let Some(number) = doc.number else {
                    continue;
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ActiveNumberBroadcaster { inner }.set(&number, ChangeSource::Remote);
            }
        }))
    }
}
