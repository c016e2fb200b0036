//! Wiring of the scheduler and the broadcaster from one configuration.

use crate::broadcast::ActiveNumberBroadcaster;
use crate::config::EngineConfig;
use crate::local::{LocalKv, LocalStore};
use crate::queue::RetryQueue;
use crate::reconcile::Reconciler;
use crate::remote::{HttpRemote, MemoryRemote, RemoteAdapter, RemoteStore};
use crate::scheduler::{PassReport, SyncScheduler};
use crate::tenant::{LicenseSource, TenantResolver};
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One engine instance per application session.
pub struct Engine {
    config: EngineConfig,
    local: LocalStore,
    remote: RemoteAdapter,
    scheduler: Arc<SyncScheduler>,
    broadcaster: ActiveNumberBroadcaster,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Build an engine over injected stores.
    pub fn new(
        config: EngineConfig,
        local: LocalStore,
        store: Arc<dyn RemoteStore>,
        license: Option<Arc<dyn LicenseSource>>,
    ) -> Self {
        let mut tenants = TenantResolver::new(local.clone(), store.clone())
            .with_demo_tenant(config.demo_tenant.clone());
        if let Some(user_id) = &config.user_id {
            tenants = tenants.with_user(user_id.clone());
        }
        if let Some(license) = license {
            tenants = tenants.with_license(license);
        }

        let remote = RemoteAdapter::new(store, Arc::new(tenants), config.readiness);
        let scheduler = Arc::new(SyncScheduler::new(
            Reconciler::new(local.clone(), remote.clone()),
            RetryQueue::new(config.max_retries),
        ));
        let broadcaster = ActiveNumberBroadcaster::new(local.clone(), remote.clone());

        Self {
            config,
            local,
            remote,
            scheduler,
            broadcaster,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build an engine with the stores the configuration names: a file-backed
    /// or in-memory local store, and the document server or an in-memory
    /// remote store.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let kv = match &config.local_path {
            Some(path) => LocalKv::open(path)?,
            None => LocalKv::in_memory(),
        };
        let store: Arc<dyn RemoteStore> = match &config.remote_url {
            Some(url) => {
                let mut remote = HttpRemote::new(url.as_str());
                if let Some(token) = &config.remote_token {
                    remote = remote.with_token(token.as_str());
                }
                Arc::new(remote)
            }
            None => {
                tracing::warn!("No remote URL configured, using an in-memory remote store");
                Arc::new(MemoryRemote::new())
            }
        };
        Ok(Self::new(config, LocalStore::from(kv.session()), store, None))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn remote(&self) -> &RemoteAdapter {
        &self.remote
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    pub fn broadcaster(&self) -> &ActiveNumberBroadcaster {
        &self.broadcaster
    }

    /// Initialize the broadcaster, schedule the start-up pass and, when
    /// configured, periodic passes.
    pub async fn start(&self) {
        self.broadcaster.init().await;

        let mut tasks = vec![self.scheduler.spawn_startup(self.config.startup_delay)];
        if let Some(period) = self.config.sync_interval {
            tasks.push(self.scheduler.start_periodic(period));
        }
        self.tasks.lock().extend(tasks);
        tracing::info!(
            startup_delay_ms = self.config.startup_delay.as_millis() as u64,
            periodic = self.config.sync_interval.is_some(),
            "Engine started"
        );
    }

    /// Run a full pass now. `None` when one is already running.
    pub async fn sync_now(&self) -> Option<PassReport> {
        self.scheduler.sync_all().await
    }

    /// Operator wipe of all local operational data. Raises the wipe guard so
    /// no pass uploads anything from this device until it is cleared. The
    /// broadcaster drops the purged active number too.
    pub fn wipe_local_data(&self) -> Result<usize> {
        let removed = self.local.purge_operational_data()?;
        self.broadcaster.reset();
        Ok(removed)
    }

    /// Stop background passes and listeners.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.broadcaster.destroy();
        tracing::info!("Engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
