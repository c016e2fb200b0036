//! Reconciliation between the local cache and the remote store.
//!
//! One pass over one module works on a single paired snapshot:
//!
//! 1. Fetch the module's remote records (tenant scoped).
//! 2. Pick a [`SyncGuard`] from the wipe guard flag, whether the remote side
//!    came back empty, and the connectivity probe.
//! 3. Fetch local records, unless the wipe guard is active.
//! 4. Diff both sides by identifier into [`Inconsistency`] values.
//! 5. Resolve each one according to the guard.
//!
//! The local direction (remote to local) is never suppressed. The upstream
//! direction is suppressed by either guard, so nothing deleted on purpose can
//! be resurrected by a device that still holds a copy.
//!
//! Reconciliation never fails the caller. Errors end up in the returned
//! [`ModuleReport`], where the scheduler turns them into retry items.

use crate::local::LocalStore;
use crate::module::Module;
use crate::record::Record;
use crate::remote::RemoteAdapter;
use crate::{RecordId, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Which side is missing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InconsistencyKind {
    /// Present locally, absent remotely
    MissingInRemote,
    /// Present remotely, absent locally
    MissingInLocal,
}

/// A record present on one side only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inconsistency {
    pub kind: InconsistencyKind,
    pub id: RecordId,
    /// The record as read from the side that has it
    pub record: Record,
    pub module: Module,
}

/// Upstream suppression in effect for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncGuard {
    /// Bidirectional
    #[default]
    None,
    /// An operator wiped local data. Local is not read and nothing is
    /// uploaded; remote records still flow down.
    WipeGuard,
    /// The remote store is online and empty for this module. Nothing is
    /// uploaded and local-only records are evicted.
    AuthoritativeEmpty,
}

impl SyncGuard {
    /// Whether local-only records may be pushed upstream.
    pub fn allows_upload(&self) -> bool {
        matches!(self, SyncGuard::None)
    }
}

impl fmt::Display for SyncGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncGuard::None => "none",
            SyncGuard::WipeGuard => "wipe-guard",
            SyncGuard::AuthoritativeEmpty => "authoritative-empty",
        };
        f.write_str(name)
    }
}

/// Which guards are honoured.
///
/// The wipe guard takes precedence over the empty-remote heuristic; both are
/// on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilePolicy {
    pub wipe_guard: bool,
    pub authoritative_empty: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            wipe_guard: true,
            authoritative_empty: true,
        }
    }
}

impl ReconcilePolicy {
    /// Guard for a pass given the observed conditions.
    pub fn select(&self, wipe_flag: bool, remote_empty: bool, online: bool) -> SyncGuard {
        if self.wipe_guard && wipe_flag {
            SyncGuard::WipeGuard
        } else if self.authoritative_empty && remote_empty && online {
            SyncGuard::AuthoritativeEmpty
        } else {
            SyncGuard::None
        }
    }
}

/// Outcome of reconciling one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleReport {
    pub module: Module,
    pub guard: SyncGuard,
    pub local_count: usize,
    pub remote_count: usize,
    /// Records uploaded to the remote store
    pub pushed: usize,
    /// Records written to the local store
    pub pulled: usize,
    /// Local-only records removed under [`SyncGuard::AuthoritativeEmpty`]
    pub evicted: usize,
    /// Inconsistencies whose resolution failed transiently
    pub failures: Vec<Inconsistency>,
    /// Inconsistencies that can never be resolved as they are, such as a
    /// record scoped to another tenant
    pub rejected: usize,
    /// Set when the pass could not start (remote fetch or local read failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModuleReport {
    fn new(module: Module) -> Self {
        Self {
            module,
            guard: SyncGuard::None,
            local_count: 0,
            remote_count: 0,
            pushed: 0,
            pulled: 0,
            evicted: 0,
            failures: Vec::new(),
            rejected: 0,
            error: None,
        }
    }

    /// No errors and no failed inconsistencies.
    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.failures.is_empty()
    }

    /// Total writes performed against either store.
    pub fn writes(&self) -> usize {
        self.pushed + self.pulled + self.evicted
    }
}

/// Diff two snapshots of a module by identifier.
///
/// Local-only records come first, then remote-only ones, each in identifier
/// order. When a side holds several records with one identifier the first
/// one read is kept.
pub fn detect_inconsistencies(
    module: Module,
    local: &[Record],
    remote: &[Record],
) -> Vec<Inconsistency> {
    let local = index(local);
    let remote = index(remote);

    let missing_in_remote = local
        .iter()
        .filter(|(id, _)| !remote.contains_key(*id))
        .map(|(id, record)| Inconsistency {
            kind: InconsistencyKind::MissingInRemote,
            id: (*id).to_string(),
            record: (*record).clone(),
            module,
        });
    let missing_in_local = remote
        .iter()
        .filter(|(id, _)| !local.contains_key(*id))
        .map(|(id, record)| Inconsistency {
            kind: InconsistencyKind::MissingInLocal,
            id: (*id).to_string(),
            record: (*record).clone(),
            module,
        });

    missing_in_remote.chain(missing_in_local).collect()
}

fn index(records: &[Record]) -> BTreeMap<&str, &Record> {
    let mut map = BTreeMap::new();
    for record in records {
        map.entry(record.id.as_str()).or_insert(record);
    }
    map
}

/// Reconciles modules between a [`LocalStore`] and a [`RemoteAdapter`].
#[derive(Clone)]
pub struct Reconciler {
    local: LocalStore,
    remote: RemoteAdapter,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(local: LocalStore, remote: RemoteAdapter) -> Self {
        Self {
            local,
            remote,
            policy: ReconcilePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn remote(&self) -> &RemoteAdapter {
        &self.remote
    }

    /// Reconcile one module. Never fails; see [`ModuleReport`].
    pub async fn reconcile(&self, module: Module) -> ModuleReport {
        let mut report = ModuleReport::new(module);

        let remote = match self.remote.get_all(module).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(module = %module, error = %e, "Remote fetch failed, skipping module");
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.remote_count = remote.len();

        let wipe_flag = match self.local.wipe_guard() {
            Ok(flag) => flag,
            Err(e) => {
                tracing::warn!(module = %module, error = %e, "Failed to read wipe guard, skipping module");
                report.error = Some(e.to_string());
                return report;
            }
        };
        let online = self.remote.is_online();
        report.guard = self.policy.select(wipe_flag, remote.is_empty(), online);

        let local = if report.guard == SyncGuard::WipeGuard {
            Vec::new()
        } else {
            match self.local.get(module) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(module = %module, error = %e, "Local read failed, skipping module");
                    report.error = Some(e.to_string());
                    return report;
                }
            }
        };
        report.local_count = local.len();

        let inconsistencies = detect_inconsistencies(module, &local, &remote);
        if inconsistencies.is_empty() {
            tracing::debug!(module = %module, records = remote.len(), "Module in sync");
            return report;
        }
        tracing::info!(
            module = %module,
            guard = %report.guard,
            inconsistencies = inconsistencies.len(),
            "Resolving inconsistencies"
        );

        for inconsistency in inconsistencies {
            match self.apply(report.guard, &inconsistency).await {
                Ok(Applied::Pushed) => report.pushed += 1,
                Ok(Applied::Pulled) => report.pulled += 1,
                Ok(Applied::Evicted) => report.evicted += 1,
                Ok(Applied::Skipped) => {}
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        module = %module,
                        id = %inconsistency.id,
                        kind = ?inconsistency.kind,
                        error = %e,
                        "Failed to resolve inconsistency"
                    );
                    report.failures.push(inconsistency);
                }
                Err(e) => {
                    tracing::warn!(
                        module = %module,
                        id = %inconsistency.id,
                        kind = ?inconsistency.kind,
                        error = %e,
                        "Inconsistency rejected, not retrying"
                    );
                    report.rejected += 1;
                }
            }
        }

        tracing::info!(
            module = %module,
            pushed = report.pushed,
            pulled = report.pulled,
            evicted = report.evicted,
            failed = report.failures.len(),
            rejected = report.rejected,
            "Module reconciled"
        );
        report
    }

    /// Resolve a single inconsistency outside a full pass, as retries do.
    ///
    /// The wipe guard is read again first: an upload that was queued before
    /// an operator wipe is dropped instead of performed.
    pub async fn resolve(&self, inconsistency: &Inconsistency) -> Result<()> {
        let guard = if self.policy.wipe_guard && self.local.wipe_guard()? {
            SyncGuard::WipeGuard
        } else {
            SyncGuard::None
        };
        if self.apply(guard, inconsistency).await? == Applied::Skipped {
            tracing::info!(
                module = %inconsistency.module,
                id = %inconsistency.id,
                "Wipe guard active, dropping queued upload"
            );
        }
        Ok(())
    }

    async fn apply(&self, guard: SyncGuard, inconsistency: &Inconsistency) -> Result<Applied> {
        let module = inconsistency.module;
        let id = inconsistency.id.as_str();
        let body = &inconsistency.record.body;

        match inconsistency.kind {
            InconsistencyKind::MissingInLocal => {
                let body = with_identifier(module, id, body);
                if self.local.put(module, id, &body)? {
                    Ok(Applied::Pulled)
                } else {
                    Ok(Applied::Skipped)
                }
            }
            InconsistencyKind::MissingInRemote => match guard {
                SyncGuard::None => {
                    self.remote.upsert(module, id, body).await?;
                    Ok(Applied::Pushed)
                }
                SyncGuard::AuthoritativeEmpty => {
                    if self.local.remove(module, id)? {
                        Ok(Applied::Evicted)
                    } else {
                        Ok(Applied::Skipped)
                    }
                }
                SyncGuard::WipeGuard => Ok(Applied::Skipped),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Pushed,
    Pulled,
    Evicted,
    Skipped,
}

/// A remote record identified only by its document key gets the key as
/// `id`, so the local copy resolves to the same identifier.
fn with_identifier(module: Module, id: &str, body: &Value) -> Value {
    let mut body = body.clone();
    if module.identifier_chain().resolve(&body).is_none() {
        if let Value::Object(map) = &mut body {
            map.insert("id".into(), Value::String(id.to_string()));
        }
    }
    body
}
