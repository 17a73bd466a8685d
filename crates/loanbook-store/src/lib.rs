use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use loanbook_core::{
    AccountId, AccountLedger, AccountState, ChangeSet, Clock, Notifier, ServicingStore,
    StoreError, WaiverEvent, storage::upsert,
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryServicingStore {
    accounts: RwLock<HashMap<AccountId, AccountState>>,
    request_index: RwLock<HashMap<Uuid, AccountId>>,
}

impl InMemoryServicingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an account's ledger with no waiver history.
    pub async fn seed_account(&self, ledger: AccountLedger) {
        let mut accounts = self.accounts.write().await;
        accounts.insert(ledger.account_id, AccountState::new(ledger));
    }

    pub async fn snapshot(&self, account_id: AccountId) -> Option<AccountState> {
        let accounts = self.accounts.read().await;
        accounts.get(&account_id).cloned()
    }
}

#[async_trait]
impl ServicingStore for InMemoryServicingStore {
    async fn load_account(&self, account_id: AccountId) -> Result<AccountState, StoreError> {
        let accounts = self.accounts.read().await;
        accounts
            .get(&account_id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(account_id))
    }

    async fn find_request_account(
        &self,
        request_id: Uuid,
    ) -> Result<Option<AccountId>, StoreError> {
        let index = self.request_index.read().await;
        Ok(index.get(&request_id).copied())
    }

    async fn commit(
        &self,
        account_id: AccountId,
        expected_version: u64,
        changes: ChangeSet,
    ) -> Result<u64, StoreError> {
        let mut accounts = self.accounts.write().await;
        let current = accounts
            .get(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;

        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                account_id,
                expected: expected_version,
                found: current.version,
            });
        }

        // Work on a copy so a failing mutation leaves the stored state untouched.
        let mut next = current.clone();
        for mutation in &changes.ledger {
            next.ledger
                .apply(mutation)
                .map_err(|err| StoreError::Backend(anyhow::anyhow!(err)))?;
        }
        for request in &changes.requests {
            upsert(&mut next.requests, request.clone(), |record| record.id);
        }
        for approval in &changes.approvals {
            if next.approvals.iter().any(|existing| existing.id == approval.id) {
                return Err(StoreError::Backend(anyhow::anyhow!(
                    "approval {} already recorded",
                    approval.id
                )));
            }
            next.approvals.push(approval.clone());
        }
        for pending in &changes.pending_waivers {
            upsert(&mut next.pending_waivers, pending.clone(), |record| record.id);
        }
        for entry in &changes.ptp_schedules {
            upsert(&mut next.ptp_schedules, entry.clone(), |record| record.id);
        }
        next.version += 1;
        let version = next.version;

        let mut index = self.request_index.write().await;
        for request in &changes.requests {
            index.insert(request.id, account_id);
        }
        accounts.insert(account_id, next);

        debug!(account_id, version, "committed account change set");
        Ok(version)
    }

    async fn accounts_with_open_waivers(&self) -> Result<Vec<AccountId>, StoreError> {
        let accounts = self.accounts.read().await;
        let mut ids: Vec<AccountId> = accounts
            .values()
            .filter(|state| state.has_open_waivers())
            .map(AccountState::account_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[derive(Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: &WaiverEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps every event it is handed; used to assert on notifications.
#[derive(Default)]
pub struct RecordingNotifier {
    events: RwLock<Vec<WaiverEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<WaiverEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &WaiverEvent) -> anyhow::Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
