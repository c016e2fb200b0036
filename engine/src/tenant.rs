//! Tenant resolution.
//!
//! Every remote read and write is scoped by the tenant resolved here, so the
//! priority order is fixed:
//!
//! 1. a just-created tenant (flag plus pending id in the local store)
//! 2. the tenant of an active license
//! 3. the tenant id previously saved in the local store
//! 4. the tenant on the signed-in user's remote profile
//! 5. the demo tenant
//!
//! Resolution never fails. Falling through to the demo tenant is logged at
//! warn level because it trades isolation for availability.

use crate::local::LocalStore;
use crate::remote::RemoteStore;
use crate::TenantId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Default tenant used when nothing else resolves.
pub const DEMO_TENANT: &str = "demo_tenant";

/// Source of licensing information.
pub trait LicenseSource: Send + Sync {
    /// Tenant id of the active license, if a license is active.
    fn active_tenant(&self) -> Option<TenantId>;
}

/// Which step of the chain produced a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantSource {
    PendingTenant,
    License,
    Saved,
    UserProfile,
    Demo,
}

impl fmt::Display for TenantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TenantSource::PendingTenant => "pending-tenant",
            TenantSource::License => "license",
            TenantSource::Saved => "saved",
            TenantSource::UserProfile => "user-profile",
            TenantSource::Demo => "demo",
        };
        f.write_str(name)
    }
}

/// Resolves the tenant every remote call is scoped to.
pub struct TenantResolver {
    local: LocalStore,
    remote: Arc<dyn RemoteStore>,
    license: Option<Arc<dyn LicenseSource>>,
    user_id: Option<String>,
    demo_tenant: TenantId,
    profile_tenant: Mutex<Option<TenantId>>,
}

impl TenantResolver {
    pub fn new(local: LocalStore, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            local,
            remote,
            license: None,
            user_id: None,
            demo_tenant: DEMO_TENANT.to_string(),
            profile_tenant: Mutex::new(None),
        }
    }

    pub fn with_license(mut self, license: Arc<dyn LicenseSource>) -> Self {
        self.license = Some(license);
        self
    }

    /// The signed-in user, whose profile is consulted at step 4.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_demo_tenant(mut self, tenant: impl Into<TenantId>) -> Self {
        self.demo_tenant = tenant.into();
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub async fn resolve(&self) -> TenantId {
        self.resolve_with_source().await.0
    }

    pub async fn resolve_with_source(&self) -> (TenantId, TenantSource) {
        match self.local.pending_tenant() {
            Ok(Some(tenant)) => return (tenant, TenantSource::PendingTenant),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read pending tenant"),
        }

        if let Some(tenant) = self
            .license
            .as_ref()
            .and_then(|license| license.active_tenant())
            .filter(|t| !t.is_empty())
        {
            return (tenant, TenantSource::License);
        }

        match self.local.tenant_id() {
            Ok(Some(tenant)) => return (tenant, TenantSource::Saved),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read saved tenant"),
        }

        if let Some(tenant) = self.profile_tenant().await {
            return (tenant, TenantSource::UserProfile);
        }

        tracing::warn!(
            tenant = %self.demo_tenant,
            "No tenant resolved, falling back to demo tenant"
        );
        (self.demo_tenant.clone(), TenantSource::Demo)
    }

    /// Forget the cached profile lookup, e.g. after a sign-in change.
    pub fn invalidate(&self) {
        *self.profile_tenant.lock() = None;
    }

    async fn profile_tenant(&self) -> Option<TenantId> {
        let user_id = self.user_id.as_deref()?;
        if let Some(cached) = self.profile_tenant.lock().clone() {
            return Some(cached);
        }

        match self.remote.user_tenant(user_id).await {
            Ok(Some(tenant)) if !tenant.is_empty() => {
                *self.profile_tenant.lock() = Some(tenant.clone());
                Some(tenant)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to read tenant from user profile");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalKv;
    use crate::remote::MemoryRemote;

    struct FixedLicense(Option<TenantId>);

    impl LicenseSource for FixedLicense {
        fn active_tenant(&self) -> Option<TenantId> {
            self.0.clone()
        }
    }

    fn setup() -> (LocalStore, Arc<MemoryRemote>) {
        (
            LocalStore::from(LocalKv::in_memory().session()),
            Arc::new(MemoryRemote::new()),
        )
    }

    #[tokio::test]
    async fn demo_is_last_resort() {
        let (local, remote) = setup();
        let resolver = TenantResolver::new(local, remote);
        assert_eq!(
            resolver.resolve_with_source().await,
            (DEMO_TENANT.to_string(), TenantSource::Demo)
        );

        let resolver = resolver.with_demo_tenant("sandbox");
        assert_eq!(resolver.resolve().await, "sandbox");
    }

    #[tokio::test]
    async fn priority_chain_in_order() {
        let (local, remote) = setup();
        remote.set_user_tenant("u-1", "from-profile");

        let resolver = TenantResolver::new(local.clone(), remote.clone()).with_user("u-1");
        assert_eq!(
            resolver.resolve_with_source().await,
            ("from-profile".into(), TenantSource::UserProfile)
        );

        local.set_tenant_id("from-saved").unwrap();
        assert_eq!(
            resolver.resolve_with_source().await,
            ("from-saved".into(), TenantSource::Saved)
        );

        let resolver = TenantResolver::new(local.clone(), remote.clone())
            .with_user("u-1")
            .with_license(Arc::new(FixedLicense(Some("from-license".into()))));
        assert_eq!(
            resolver.resolve_with_source().await,
            ("from-license".into(), TenantSource::License)
        );

        local.mark_pending_tenant("from-new").unwrap();
        assert_eq!(
            resolver.resolve_with_source().await,
            ("from-new".into(), TenantSource::PendingTenant)
        );
    }

    #[tokio::test]
    async fn inactive_license_is_skipped() {
        let (local, remote) = setup();
        local.set_tenant_id("saved").unwrap();
        let resolver =
            TenantResolver::new(local, remote).with_license(Arc::new(FixedLicense(None)));
        assert_eq!(resolver.resolve().await, "saved");
    }

    #[tokio::test]
    async fn profile_failure_falls_back_to_demo() {
        let (local, remote) = setup();
        remote.set_unreachable(true);
        let resolver = TenantResolver::new(local, remote).with_user("u-1");
        assert_eq!(resolver.resolve_with_source().await.1, TenantSource::Demo);
    }

    #[tokio::test]
    async fn profile_lookup_is_cached_until_invalidated() {
        let (local, remote) = setup();
        remote.set_user_tenant("u-1", "first");
        let resolver = TenantResolver::new(local, remote.clone()).with_user("u-1");
        assert_eq!(resolver.resolve().await, "first");

        remote.set_user_tenant("u-1", "second");
        assert_eq!(resolver.resolve().await, "first");

        resolver.invalidate();
        assert_eq!(resolver.resolve().await, "second");
    }
}
