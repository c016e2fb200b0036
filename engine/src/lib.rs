//! # Tandem Engine
//!
//! State reconciliation and active-number broadcast for an offline-capable,
//! multi-tenant business application.
//!
//! Each device keeps a local cache of ten business modules. The authoritative
//! copy lives in a remote document store partitioned by tenant. This crate
//! keeps the two converged and keeps one shared "current registration number"
//! consistent across sessions.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Business records are opaque JSON objects. The engine only resolves their
//! identifier, through a fixed [`IdentifierChain`]
//! (`id` → `numeroRegistro` → `registroId` → `gastoId`). Identity is the
//! sole reconciliation key: there is no field-level merging.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] diffs one module's local and remote snapshots and
//! resolves every gap. Remote-only records always flow down. Local-only
//! records flow up unless a [`SyncGuard`] is active:
//! - [`SyncGuard::WipeGuard`] after an operator wipe
//! - [`SyncGuard::AuthoritativeEmpty`] when the remote module is empty while
//!   online, in which case the local copies are evicted instead
//!
//! ### Scheduling
//!
//! The [`SyncScheduler`] runs one full pass at a time over every module and
//! retries failed work through a bounded [`RetryQueue`].
//!
//! ### Active number
//!
//! The [`ActiveNumberBroadcaster`] owns the current registration number. It
//! validates every value against [`NumberFormat`], persists it locally and
//! remotely, listens to remote pushes and to other sessions, and notifies
//! registered [`ConsumerField`]s and event subscribers.
//!
//! ### Tenants
//!
//! Every remote call is scoped to the tenant chosen by [`TenantResolver`].
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use std::sync::Arc;
//! use tandem_engine::{Engine, EngineConfig, LocalKv, LocalStore, MemoryRemote, Module};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // 1. A local cache holding one record
//! let local = LocalStore::from(LocalKv::in_memory().session());
//! local.set_tenant_id("acme").unwrap();
//! local
//!     .put(Module::Diesel, "D-1", &json!({"id": "D-1", "litros": 120}))
//!     .unwrap();
//!
//! // 2. A remote store holding another
//! let remote = Arc::new(MemoryRemote::new());
//! remote.seed("acme", "diesel", "D-2", json!({"id": "D-2", "tenantId": "acme"}));
//!
//! // 3. One full pass converges both sides
//! let engine = Engine::new(EngineConfig::default(), local.clone(), remote.clone(), None);
//! let report = engine.sync_now().await.unwrap();
//! assert!(report.is_clean());
//! assert_eq!(remote.doc_ids("acme", "diesel"), vec!["D-1", "D-2"]);
//! assert_eq!(local.ids(Module::Diesel).unwrap().len(), 2);
//! # }
//! ```
//!
//! ## Logging
//!
//! The engine emits `tracing` events and never installs a subscriber.

pub mod broadcast;
pub mod config;
pub mod engine;
pub mod error;
pub mod local;
pub mod module;
pub mod queue;
pub mod readiness;
pub mod reconcile;
pub mod record;
pub mod remote;
pub mod scheduler;
pub mod tenant;

// Re-export main types at crate root
pub use broadcast::{ActiveNumberBroadcaster, ChangeSource, ConsumerField, FieldSlot, NumberChanged, NumberFormat};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use local::{KeyValueStore, KvSession, LocalKv, LocalStore, StorageEvent};
pub use module::Module;
pub use queue::{RetryItem, RetryQueue};
pub use readiness::Readiness;
pub use reconcile::{
    Inconsistency, InconsistencyKind, ModuleReport, ReconcilePolicy, Reconciler, SyncGuard,
};
pub use record::{IdentifierChain, Origin, Record};
pub use remote::{ActiveNumberDoc, HttpRemote, MemoryRemote, RemoteAdapter, RemoteDocument, RemoteStore, Subscription};
pub use scheduler::{PassReport, SyncScheduler};
pub use tenant::{LicenseSource, TenantResolver, TenantSource};

/// Type aliases for clarity
pub type RecordId = String;
pub type TenantId = String;
