//! Full-pass orchestration.
//!
//! [`SyncScheduler::sync_all`] reconciles every module in turn and then drains
//! the retry queue once. At most one full pass runs at a time; a call made
//! while a pass is in flight returns immediately without touching either
//! store. Passes run at start-up (after a delay), on demand, and optionally
//! on a fixed period.

use crate::module::Module;
use crate::queue::{RetryItem, RetryOutcome, RetryQueue};
use crate::reconcile::{ModuleReport, Reconciler};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Outcome of one full pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub modules: Vec<ModuleReport>,
    /// Queue items attempted during the drain
    pub retried: usize,
    /// Queue items whose retry succeeded
    pub recovered: usize,
    /// Queue items dropped after reaching the retry limit
    pub dropped: usize,
    /// Items left for the next pass
    pub queued: usize,
}

impl PassReport {
    pub fn module(&self, module: Module) -> Option<&ModuleReport> {
        self.modules.iter().find(|r| r.module == module)
    }

    pub fn is_clean(&self) -> bool {
        self.queued == 0 && self.modules.iter().all(ModuleReport::is_clean)
    }
}

/// Resets the in-flight flag even if the pass future is dropped.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncScheduler {
    reconciler: Reconciler,
    queue: Mutex<RetryQueue>,
    syncing: AtomicBool,
    last_pass: Mutex<Option<PassReport>>,
}

impl SyncScheduler {
    pub fn new(reconciler: Reconciler, queue: RetryQueue) -> Self {
        Self {
            reconciler,
            queue: Mutex::new(queue),
            syncing: AtomicBool::new(false),
            last_pass: Mutex::new(None),
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Snapshot of the queued items.
    pub fn queued(&self) -> Vec<RetryItem> {
        self.queue.lock().items().cloned().collect()
    }

    pub fn last_pass(&self) -> Option<PassReport> {
        self.last_pass.lock().clone()
    }

    /// Run one full pass. Returns `None` when a pass was already running.
    pub async fn sync_all(&self) -> Option<PassReport> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("Sync already in progress, skipping");
            return None;
        }
        let _guard = PassGuard(&self.syncing);

        let started_at = Utc::now();
        tracing::info!(modules = Module::ALL.len(), "Starting full sync");

        let mut modules = Vec::with_capacity(Module::ALL.len());
        for module in Module::ALL {
            let report = self.reconciler.reconcile(module).await;
            self.enqueue_failures(&report);
            modules.push(report);
        }

        let (retried, recovered, dropped) = self.drain_queue().await;
        let report = PassReport {
            started_at,
            finished_at: Utc::now(),
            modules,
            retried,
            recovered,
            dropped,
            queued: self.queue_len(),
        };

        tracing::info!(
            pushed = report.modules.iter().map(|m| m.pushed).sum::<usize>(),
            pulled = report.modules.iter().map(|m| m.pulled).sum::<usize>(),
            evicted = report.modules.iter().map(|m| m.evicted).sum::<usize>(),
            recovered,
            dropped,
            queued = report.queued,
            "Full sync finished"
        );
        *self.last_pass.lock() = Some(report.clone());
        Some(report)
    }

    /// Reconcile a single module on demand. Failures are queued like in a
    /// full pass, but the queue is not drained.
    pub async fn sync_module(&self, module: Module) -> ModuleReport {
        let report = self.reconciler.reconcile(module).await;
        self.enqueue_failures(&report);
        report
    }

    fn enqueue_failures(&self, report: &ModuleReport) {
        if report.error.is_some() {
            self.queue.lock().push(RetryItem::module(report.module));
        }
        self.enqueue_inconsistencies(report);
    }

    fn enqueue_inconsistencies(&self, report: &ModuleReport) {
        let mut queue = self.queue.lock();
        for inconsistency in &report.failures {
            queue.push(RetryItem::inconsistency(inconsistency.clone()));
        }
    }

    /// Retry every queued item once. Returns (retried, recovered, dropped).
    async fn drain_queue(&self) -> (usize, usize, usize) {
        let items = self.queue.lock().take_all();
        if items.is_empty() {
            return (0, 0, 0);
        }
        tracing::info!(items = items.len(), "Processing retry queue");

        let retried = items.len();
        let mut recovered = 0;
        let mut dropped = 0;
        for item in items {
            let ok = match &item.inconsistency {
                Some(inconsistency) => match self.reconciler.resolve(inconsistency).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            module = %item.module,
                            id = %inconsistency.id,
                            retries = item.retries + 1,
                            error = %e,
                            "Retry failed"
                        );
                        false
                    }
                },
                // Uploads that fail inside the module pass are queued on
                // their own; the module item only tracks the fetch.
                None => {
                    let report = self.reconciler.reconcile(item.module).await;
                    self.enqueue_inconsistencies(&report);
                    report.error.is_none()
                }
            };

            if ok {
                recovered += 1;
                tracing::debug!(module = %item.module, "Retry succeeded");
            } else if self.queue.lock().retry_failed(item) == RetryOutcome::Dropped {
                dropped += 1;
            }
        }
        (retried, recovered, dropped)
    }

    /// Run a full pass once `delay` has elapsed.
    pub fn spawn_startup(self: &Arc<Self>, delay: Duration) -> JoinHandle<()> {
        let scheduler = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.sync_all().await;
            }
        })
    }

    /// Run a full pass every `period`, skipping ticks while one is running.
    /// Stops once the scheduler is dropped or the handle is aborted.
    pub fn start_periodic(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let scheduler: Weak<Self> = Arc::downgrade(self);
        tracing::info!(period_secs = period.as_secs(), "Periodic sync enabled");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                if !scheduler.is_syncing() {
                    scheduler.sync_all().await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalKv, LocalStore};
    use crate::readiness::Readiness;
    use crate::remote::{MemoryRemote, RemoteAdapter, RemoteStore};
    use crate::tenant::TenantResolver;
    use serde_json::json;

    const TENANT: &str = "acme";

    fn scheduler(remote: &Arc<MemoryRemote>, local: &LocalStore) -> Arc<SyncScheduler> {
        let store: Arc<dyn RemoteStore> = remote.clone();
        let tenants = Arc::new(TenantResolver::new(local.clone(), store.clone()));
        let adapter = RemoteAdapter::new(
            store,
            tenants,
            Readiness::new(3, Duration::from_millis(100)),
        );
        Arc::new(SyncScheduler::new(
            Reconciler::new(local.clone(), adapter),
            RetryQueue::default(),
        ))
    }

    fn setup() -> (Arc<MemoryRemote>, LocalStore) {
        let local = LocalStore::from(LocalKv::in_memory().session());
        local.set_tenant_id(TENANT).unwrap();
        (Arc::new(MemoryRemote::new()), local)
    }

    #[tokio::test]
    async fn full_pass_visits_every_module() {
        let (remote, local) = setup();
        local.put(Module::Diesel, "D1", &json!({"id": "D1"})).unwrap();
        remote.seed(TENANT, "diesel", "D2", json!({"id": "D2", "tenantId": TENANT}));
        remote.seed(TENANT, "cxc", "C1", json!({"id": "C1", "tenantId": TENANT}));
        let scheduler = scheduler(&remote, &local);

        let report = scheduler.sync_all().await.unwrap();
        assert_eq!(report.modules.len(), Module::ALL.len());
        assert!(report.is_clean());
        assert_eq!(report.module(Module::Diesel).unwrap().pushed, 1);
        assert_eq!(report.module(Module::Receivables).unwrap().pulled, 1);
        assert_eq!(local.ids(Module::Receivables).unwrap(), vec!["C1"]);
        assert_eq!(scheduler.last_pass(), Some(report));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_pass_is_a_noop() {
        let (remote, local) = setup();
        remote.set_ready(false);
        let scheduler = scheduler(&remote, &local);

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.sync_all().await })
        };
        tokio::task::yield_now().await;
        assert!(scheduler.is_syncing());

        assert!(scheduler.sync_all().await.is_none());
        assert_eq!(remote.read_count(), 0);

        remote.set_ready(true);
        assert!(first.await.unwrap().is_some());
        assert!(!scheduler.is_syncing());
    }

    #[tokio::test]
    async fn failed_upload_recovers_on_next_pass() {
        let (remote, local) = setup();
        remote.seed(TENANT, "tesoreria", "X", json!({"id": "X", "tenantId": TENANT}));
        local.put(Module::Treasury, "A", &json!({"id": "A"})).unwrap();
        // Initial attempt plus the retry in the same pass.
        remote.fail_next_writes(2);
        let scheduler = scheduler(&remote, &local);

        let first = scheduler.sync_all().await.unwrap();
        assert_eq!(first.module(Module::Treasury).unwrap().failures.len(), 1);
        assert_eq!(first.retried, 1);
        assert_eq!(scheduler.queued()[0].retries, 1);

        let second = scheduler.sync_all().await.unwrap();
        assert!(second.is_clean());
        assert_eq!(second.recovered, 1);
        assert!(remote.doc_ids(TENANT, "tesoreria").contains(&"A".to_string()));
    }

    #[tokio::test]
    async fn unreachable_remote_items_are_bounded() {
        let (remote, local) = setup();
        remote.set_unreachable(true);
        let scheduler = scheduler(&remote, &local);

        let first = scheduler.sync_all().await.unwrap();
        assert!(first.modules.iter().all(|m| m.error.is_some()));
        assert_eq!(scheduler.queue_len(), Module::ALL.len());
        assert!(scheduler.queued().iter().all(|item| item.retries == 1));

        scheduler.sync_all().await.unwrap();
        assert!(scheduler.queued().iter().all(|item| item.retries == 2));

        let third = scheduler.sync_all().await.unwrap();
        assert_eq!(third.dropped, Module::ALL.len());
        assert_eq!(scheduler.queue_len(), 0);
    }

    #[tokio::test]
    async fn sync_module_queues_without_draining() {
        let (remote, local) = setup();
        remote.set_unreachable(true);
        let scheduler = scheduler(&remote, &local);

        let report = scheduler.sync_module(Module::Inventory).await;
        assert!(report.error.is_some());
        assert_eq!(scheduler.queued()[0].retries, 0);
    }

    #[tokio::test]
    async fn module_retry_queues_failed_uploads() {
        let (remote, local) = setup();
        remote.set_unreachable(true);
        let scheduler = scheduler(&remote, &local);
        scheduler.sync_module(Module::Diesel).await;

        remote.set_unreachable(false);
        remote.seed(TENANT, "diesel", "D0", json!({"id": "D0", "tenantId": TENANT}));
        local.put(Module::Diesel, "D1", &json!({"id": "D1"})).unwrap();
        remote.fail_next_writes(1);

        assert_eq!(scheduler.drain_queue().await, (1, 1, 0));
        let queued = scheduler.queued();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].inconsistency.as_ref().unwrap().id, "D1");
        assert_eq!(queued[0].retries, 0);
        assert_eq!(local.ids(Module::Diesel).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_pass_runs_after_delay() {
        let (remote, local) = setup();
        let scheduler = scheduler(&remote, &local);

        let handle = scheduler.spawn_startup(Duration::from_secs(3));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.last_pass().is_none());

        handle.await.unwrap();
        assert!(scheduler.last_pass().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_passes() {
        let (remote, local) = setup();
        let scheduler = scheduler(&remote, &local);

        let handle = scheduler.start_periodic(Duration::from_secs(300));
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(remote.read_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(remote.read_count(), Module::ALL.len() as u64);
        handle.abort();
    }
}
