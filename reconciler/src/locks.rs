// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::OwnedMutexGuard;
use workercluster_authz_types::Identity;

/// Per-identity mutual exclusion for reconciliation passes
///
/// Clones share the same set of locks.  Every pass for an identity holds
/// that identity's [`PassToken`] from aggregation until its last operation,
/// so passes for one identity never interleave while passes for different
/// identities proceed independently.
///
/// An identity's entry only lives as long as someone holds or waits for
/// it: the last [`PassToken`] to drop removes it.
#[derive(Clone, Debug, Default)]
pub struct IdentityLocks {
    locks: Arc<Mutex<BTreeMap<Identity, Arc<tokio::sync::Mutex<()>>>>>,
}

impl IdentityLocks {
    pub fn new() -> IdentityLocks {
        IdentityLocks::default()
    }

    fn lock_for(&self, identity: &Identity) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(identity.clone()).or_default())
    }

    fn token(
        &self,
        identity: &Identity,
        guard: OwnedMutexGuard<()>,
    ) -> PassToken {
        PassToken {
            identity: identity.clone(),
            locks: self.clone(),
            guard: Some(guard),
        }
    }

    /// Wait until no other pass holds `identity`, then hold it.
    pub async fn acquire(&self, identity: &Identity) -> PassToken {
        let guard = self.lock_for(identity).lock_owned().await;
        self.token(identity, guard)
    }

    /// Hold `identity` if no other pass does.
    pub fn try_acquire(&self, identity: &Identity) -> Option<PassToken> {
        let guard = self.lock_for(identity).try_lock_owned().ok()?;
        Some(self.token(identity, guard))
    }

    /// Number of identities currently held or waited for
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Drop `identity`'s entry unless a token or waiter still refers to it.
    // Clones of the entry are only taken with the map locked, so the count
    // can't grow while we look at it.
    fn prune(&self, identity: &Identity) {
        let mut locks = self.locks.lock().unwrap();
        if locks.get(identity).is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(identity);
        }
    }
}

/// Exclusive right to reconcile one identity, released on drop
#[derive(Debug)]
pub struct PassToken {
    identity: Identity,
    locks: IdentityLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PassToken {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl Drop for PassToken {
    fn drop(&mut self) {
        // The guard holds a reference to the entry; release it first.
        drop(self.guard.take());
        self.locks.prune(&self.identity);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn tokens_exclude_per_identity() {
        let locks = IdentityLocks::new();
        let a = Identity::new("ns", "a");
        let b = Identity::new("ns", "b");

        let token = locks.acquire(&a).await;
        assert_eq!(token.identity(), &a);
        assert!(locks.try_acquire(&a).is_none());
        assert!(locks.clone().try_acquire(&a).is_none());

        let other = locks.try_acquire(&b).expect("b is free");
        drop(token);
        assert!(locks.try_acquire(&a).is_some());
        drop(other);
    }

    #[tokio::test]
    async fn released_identities_are_forgotten() {
        let locks = IdentityLocks::new();
        for i in 0..100 {
            let identity = Identity::new("ephemeral", format!("agent-{i}"));
            let token = locks.acquire(&identity).await;
            assert_eq!(locks.len(), 1);
            drop(token);
        }
        assert!(locks.is_empty());

        // A failed attempt leaves nothing behind either.
        let a = Identity::new("ns", "a");
        let token = locks.try_acquire(&a).expect("a is free");
        assert!(locks.try_acquire(&a).is_none());
        assert_eq!(locks.len(), 1);
        drop(token);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_outlives_token_while_contended() {
        let locks = IdentityLocks::new();
        let a = Identity::new("ns", "a");

        let token = locks.acquire(&a).await;
        let waiter = tokio::spawn({
            let locks = locks.clone();
            let a = a.clone();
            async move {
                let token = locks.acquire(&a).await;
                // The first holder is gone but this one still needs it.
                assert_eq!(locks.len(), 1);
                drop(token);
            }
        });

        // Give the waiter time to queue on the lock.
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(token);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
