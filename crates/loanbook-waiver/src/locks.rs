use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use loanbook_core::{AccountId, WaiverError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

type LockMap = HashMap<AccountId, Arc<Mutex<()>>>;

/// One async mutex per account. Work on different accounts never contends.
///
/// An account's entry lives only while someone holds or waits for its lock.
#[derive(Default)]
pub struct AccountLocks {
    locks: Arc<StdMutex<LockMap>>,
}

/// Held for the duration of one account operation.
pub struct AccountLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    account_id: AccountId,
    locks: Arc<StdMutex<LockMap>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(
        &self,
        account_id: AccountId,
        timeout: Duration,
    ) -> Result<AccountLockGuard, WaiverError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(account_id).or_default().clone()
        };

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(AccountLockGuard {
                guard: Some(guard),
                account_id,
                locks: self.locks.clone(),
            }),
            Err(_) => {
                warn!(account_id, ?timeout, "timed out waiting for account lock");
                release_if_idle(&self.locks, account_id);
                Err(WaiverError::ConcurrentMutationConflict {
                    account_id,
                    attempts: 1,
                })
            }
        }
    }
}

impl Drop for AccountLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        release_if_idle(&self.locks, self.account_id);
    }
}

// Waiters clone the entry under the map lock, so a count of one here means
// nobody else holds or waits for it.
fn release_if_idle(locks: &StdMutex<LockMap>, account_id: AccountId) {
    let mut locks = locks.lock().unwrap_or_else(PoisonError::into_inner);
    if locks
        .get(&account_id)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(&account_id);
    }
}
