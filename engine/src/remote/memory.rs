//! In-process remote store.
//!
//! Behaves like the document server (tenant-partitioned collections, snapshot
//! pushes after every write) without any network. Used for offline demos and
//! as the injected double in tests, so it also exposes knobs for connectivity,
//! readiness and write failures, plus call counters.

use super::{ActiveNumberDoc, RemoteDocument, RemoteStore, Subscription};
use crate::{Error, Result, TenantId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::mpsc;

type CollectionKey = (TenantId, String);

#[derive(Default)]
struct MemoryState {
    documents: HashMap<CollectionKey, BTreeMap<String, Value>>,
    active_numbers: HashMap<TenantId, ActiveNumberDoc>,
    profiles: HashMap<String, TenantId>,
    collection_subs: HashMap<CollectionKey, Vec<mpsc::UnboundedSender<Vec<RemoteDocument>>>>,
    number_subs: HashMap<TenantId, Vec<mpsc::UnboundedSender<ActiveNumberDoc>>>,
}

impl MemoryState {
    fn snapshot(&self, key: &CollectionKey) -> Vec<RemoteDocument> {
        self.documents
            .get(key)
            .map(|docs| {
                docs.iter()
                    .map(|(id, body)| RemoteDocument {
                        id: id.clone(),
                        body: body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Remote store held entirely in memory.
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    online: AtomicBool,
    ready: AtomicBool,
    unreachable: AtomicBool,
    failing_writes: AtomicU32,
    writes: AtomicU64,
    reads: AtomicU64,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            online: AtomicBool::new(true),
            ready: AtomicBool::new(true),
            unreachable: AtomicBool::new(false),
            failing_writes: AtomicU32::new(0),
            writes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        }
    }

    /// What the connectivity probe reports.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make every call fail with [`Error::Remote`] until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `count` document writes.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Successful document and active-number writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Collection reads so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Record a user's tenant on their profile.
    pub fn set_user_tenant(&self, user_id: &str, tenant: &str) {
        self.state
            .lock()
            .profiles
            .insert(user_id.to_string(), tenant.to_string());
    }

    /// Seed a document without counting it as a write or notifying anyone.
    pub fn seed(&self, tenant: &str, collection: &str, doc_id: &str, body: Value) {
        self.state
            .lock()
            .documents
            .entry((tenant.to_string(), collection.to_string()))
            .or_default()
            .insert(doc_id.to_string(), body);
    }

    /// Current document keys of a tenant's collection.
    pub fn doc_ids(&self, tenant: &str, collection: &str) -> Vec<String> {
        self.state
            .lock()
            .documents
            .get(&(tenant.to_string(), collection.to_string()))
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Current body of one document.
    pub fn document(&self, tenant: &str, collection: &str, doc_id: &str) -> Option<Value> {
        self.state
            .lock()
            .documents
            .get(&(tenant.to_string(), collection.to_string()))
            .and_then(|docs| docs.get(doc_id).cloned())
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Remote("remote store unreachable".into()));
        }
        Ok(())
    }

    fn take_write_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get_all(&self, tenant: &str, collection: &str) -> Result<Vec<RemoteDocument>> {
        self.check_reachable()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let key = (tenant.to_string(), collection.to_string());
        Ok(self.state.lock().snapshot(&key))
    }

    async fn upsert(
        &self,
        tenant: &str,
        collection: &str,
        doc_id: &str,
        body: &Value,
    ) -> Result<()> {
        self.check_reachable()?;
        if self.take_write_failure() {
            return Err(Error::Remote(format!("injected write failure for {doc_id}")));
        }

        let key = (tenant.to_string(), collection.to_string());
        let mut state = self.state.lock();
        state
            .documents
            .entry(key.clone())
            .or_default()
            .insert(doc_id.to_string(), body.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);

        let snapshot = state.snapshot(&key);
        if let Some(subs) = state.collection_subs.get_mut(&key) {
            subs.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        tenant: &str,
        collection: &str,
    ) -> Result<Subscription<Vec<RemoteDocument>>> {
        self.check_reachable()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .collection_subs
            .entry((tenant.to_string(), collection.to_string()))
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }

    async fn get_active_number(&self, tenant: &str) -> Result<Option<ActiveNumberDoc>> {
        self.check_reachable()?;
        Ok(self.state.lock().active_numbers.get(tenant).cloned())
    }

    async fn set_active_number(&self, tenant: &str, doc: &ActiveNumberDoc) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        state
            .active_numbers
            .insert(tenant.to_string(), doc.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);

        if let Some(subs) = state.number_subs.get_mut(tenant) {
            subs.retain(|tx| tx.send(doc.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe_active_number(
        &self,
        tenant: &str,
    ) -> Result<Subscription<ActiveNumberDoc>> {
        self.check_reachable()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .number_subs
            .entry(tenant.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }

    async fn user_tenant(&self, user_id: &str) -> Result<Option<TenantId>> {
        self.check_reachable()?;
        Ok(self.state.lock().profiles.get(user_id).cloned())
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
