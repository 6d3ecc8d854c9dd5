use crate::domain::types::AdminPolicy;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Shared handle to the studio-wide admin policy.
///
/// Readers copy the value out and hand it to the reconciler, so a policy
/// change never takes effect halfway through a reconciliation.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicyHandle {
    inner: Arc<RwLock<AdminPolicy>>,
}

impl AdminPolicyHandle {
    pub fn new(policy: AdminPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(policy)),
        }
    }

    pub fn get(&self) -> AdminPolicy {
        *self.inner.read()
    }

    /// Replaces the policy and returns the previous value.
    pub fn set(&self, policy: AdminPolicy) -> AdminPolicy {
        let previous = std::mem::replace(&mut *self.inner.write(), policy);
        if previous != policy {
            info!("Admin policy changed from {} to {}", previous, policy);
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_policy() {
        let handle = AdminPolicyHandle::default();
        let other = handle.clone();
        assert_eq!(handle.get(), AdminPolicy::Override);

        let previous = other.set(AdminPolicy::Deduct);
        assert_eq!(previous, AdminPolicy::Override);
        assert_eq!(handle.get(), AdminPolicy::Deduct);
    }
}
