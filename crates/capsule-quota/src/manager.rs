//! The Quota Manager (C7 of `spec.md`): `check`/`allocate`/`deallocate`
//! (§4.7).

use std::collections::BTreeMap;
use std::sync::Arc;

use capsule_core::{log_warn, Scope as LogScope};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::quota::{Limit, Quota, ResourceKind, Scope};

/// Holds every quota known to this manager, keyed by the scope it
/// applies to. `spec.md` §4.7: "missing quotas are treated as absent
/// rather than as infinite" — a scope with no entry here imposes no
/// constraint, it is simply skipped during `check`/`allocate`.
pub struct QuotaManager {
    quotas: Mutex<BTreeMap<Scope, Arc<Mutex<Quota>>>>,
}

impl QuotaManager {
    /// An empty manager with no registered quotas. Callers that want
    /// `spec.md` §4.7's default `Cluster("default")`,
    /// `Namespace("default")`, and `User("default")` quotas call
    /// [`Self::with_defaults`] instead.
    pub fn new() -> Self {
        Self {
            quotas: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers the three default quota scopes named in `spec.md`
    /// §4.7, each starting with no resource limits configured (hence
    /// unconstrained until the operator sets one).
    pub async fn with_defaults() -> Self {
        let manager = Self::new();
        for scope in [
            Scope::Cluster("default".into()),
            Scope::Namespace("default".into()),
            Scope::User("default".into()),
        ] {
            manager
                .register(Quota::new("default", scope, BTreeMap::new()))
                .await;
        }
        manager
    }

    pub async fn register(&self, quota: Quota) {
        self.quotas
            .lock()
            .await
            .insert(quota.scope.clone(), Arc::new(Mutex::new(quota)));
    }

    pub async fn get(&self, scope: &Scope) -> Result<Quota> {
        let guard = self.quotas.lock().await;
        let entry = guard
            .get(scope)
            .ok_or_else(|| Error::QuotaNotFound(scope.to_string()))?;
        Ok(entry.lock().await.clone())
    }

    pub async fn set_limit(&self, scope: &Scope, resource: ResourceKind, limit: Limit) -> Result<()> {
        let guard = self.quotas.lock().await;
        let entry = guard
            .get(scope)
            .ok_or_else(|| Error::QuotaNotFound(scope.to_string()))?
            .clone();
        drop(guard);
        let mut quota = entry.lock().await;
        quota.limits.insert(resource, limit);
        quota.updated_at = capsule_core::time::now();
        Ok(())
    }

    /// `check(scope, resource, amount)` (`spec.md` §4.7): would
    /// allocating `amount` of `resource` against every quota attached
    /// to any of `scopes` violate a hard limit? Emits a warning event
    /// (not an error) if a soft threshold would be crossed.
    pub async fn check(&self, scopes: &[Scope], resource: ResourceKind, amount: u64) -> Result<()> {
        let entries = self.applicable(scopes).await;
        for entry in &entries {
            let quota = entry.lock().await;
            check_one(&quota, resource, amount)?;
        }
        Ok(())
    }

    /// `allocate(scope, resource, amount)`: atomic across every quota
    /// applicable to `scopes` — either every applicable quota is
    /// debited or none are (`spec.md` §4.7). Locks are acquired in a
    /// deterministic order (by quota name, `spec.md` §5) to prevent
    /// deadlock against a concurrent allocation touching an
    /// overlapping set of scopes in a different order.
    pub async fn allocate(&self, scopes: &[Scope], resource: ResourceKind, amount: u64) -> Result<()> {
        let mut entries = self.applicable(scopes).await;
        entries.sort_by(|a, b| quota_name(a).cmp(&quota_name(b)));

        let mut guards = Vec::with_capacity(entries.len());
        for entry in &entries {
            guards.push(entry.lock().await);
        }

        for guard in &guards {
            check_one(guard, resource, amount)?;
        }

        for guard in &mut guards {
            let limit = guard.limits.get_mut(&resource).expect("checked present above");
            limit.used += amount;
            guard.updated_at = capsule_core::time::now();
        }
        Ok(())
    }

    /// `deallocate` is total and never fails: under-flow returns the
    /// resource to zero rather than going negative (`spec.md` §4.7).
    pub async fn deallocate(&self, scopes: &[Scope], resource: ResourceKind, amount: u64) {
        let entries = self.applicable(scopes).await;
        for entry in &entries {
            let mut guard = entry.lock().await;
            if let Some(limit) = guard.limits.get_mut(&resource) {
                limit.used = limit.used.saturating_sub(amount);
                guard.updated_at = capsule_core::time::now();
            }
        }
    }

    async fn applicable(&self, scopes: &[Scope]) -> Vec<Arc<Mutex<Quota>>> {
        let guard = self.quotas.lock().await;
        scopes.iter().filter_map(|s| guard.get(s).cloned()).collect()
    }
}

impl Default for QuotaManager {
    fn default() -> Self {
        Self::new()
    }
}

fn quota_name(entry: &Arc<Mutex<Quota>>) -> String {
    // `try_lock` is safe here: this is only called before any lock in
    // the batch has been acquired, to compute sort order.
    entry
        .try_lock()
        .map(|q| q.name.clone())
        .unwrap_or_default()
}

fn check_one(quota: &Quota, resource: ResourceKind, amount: u64) -> Result<()> {
    let Some(limit) = quota.limits.get(&resource) else {
        return Ok(()); // no limit configured for this resource: absent, not infinite-but-enforced.
    };
    let projected = limit.used + amount;
    if projected > limit.hard {
        return Err(Error::QuotaExceeded {
            scope: quota.scope.to_string(),
            resource,
            used: limit.used,
            requested: amount,
            hard: limit.hard,
        });
    }
    if let Some(soft) = limit.soft {
        if projected > soft {
            log_warn!(
                &LogScope::new("quota", quota.name.clone()),
                resource = ?resource,
                projected,
                soft,
                "soft quota threshold crossed"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denies_over_hard_limit_and_keeps_used_unchanged() {
        let manager = QuotaManager::with_defaults().await;
        let scope = Scope::User("default".into());
        manager
            .set_limit(&scope, ResourceKind::Cpu, Limit::new(16))
            .await
            .unwrap();

        manager.allocate(&[scope.clone()], ResourceKind::Cpu, 12).await.unwrap();
        let err = manager
            .allocate(&[scope.clone()], ResourceKind::Cpu, 6)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));

        let quota = manager.get(&scope).await.unwrap();
        assert_eq!(quota.limits[&ResourceKind::Cpu].used, 12);
    }

    #[tokio::test]
    async fn allocate_is_atomic_across_multiple_scopes() {
        let manager = QuotaManager::with_defaults().await;
        let user = Scope::User("default".into());
        let namespace = Scope::Namespace("default".into());
        manager.set_limit(&user, ResourceKind::Cpu, Limit::new(100)).await.unwrap();
        manager
            .set_limit(&namespace, ResourceKind::Cpu, Limit::new(4))
            .await
            .unwrap();

        let err = manager
            .allocate(&[user.clone(), namespace.clone()], ResourceKind::Cpu, 8)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));

        // Neither quota was debited since the namespace quota failed.
        assert_eq!(manager.get(&user).await.unwrap().limits[&ResourceKind::Cpu].used, 0);
        assert_eq!(
            manager.get(&namespace).await.unwrap().limits[&ResourceKind::Cpu].used,
            0
        );
    }

    #[tokio::test]
    async fn missing_quota_is_absent_not_infinite_but_unenforced() {
        let manager = QuotaManager::new();
        let scope = Scope::Node("n1".into());
        // No quota registered for this scope at all: allocate succeeds
        // silently because there's nothing to check against.
        manager.allocate(&[scope], ResourceKind::Memory, 1_000_000).await.unwrap();
    }

    #[tokio::test]
    async fn deallocate_never_goes_negative() {
        let manager = QuotaManager::with_defaults().await;
        let scope = Scope::Cluster("default".into());
        manager.set_limit(&scope, ResourceKind::Storage, Limit::new(10)).await.unwrap();
        manager.deallocate(&[scope.clone()], ResourceKind::Storage, 999).await;
        assert_eq!(manager.get(&scope).await.unwrap().limits[&ResourceKind::Storage].used, 0);
    }
}
