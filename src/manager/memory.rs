//! In-memory store and notifier.
//!
//! `MemoryStore` is the reference implementation of the persistence seams:
//! request snapshots and user accounts live in maps behind mutexes, and
//! `compare_and_set` gives the same optimistic-concurrency guarantee a
//! database row version would. `RecordingNotifier` captures deliveries for
//! inspection and can be flipped into a failing mode to exercise the
//! commit-then-report path.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use crate::domain::account::{UserAccount, UserId};
use crate::domain::request::events::Notification;
use crate::domain::request::state::{AnyRequest, RequestId, RequestStatus};
use crate::error::{KarigarError, Result};
use crate::manager::{Notifier, RequestStore, UserCounterStore};

/// Map-backed request and account storage.
///
/// Clones share the underlying maps, so a clone handed to a manager and one
/// kept by a test observe the same state.
#[derive(Clone)]
pub struct MemoryStore {
    requests: Arc<Mutex<HashMap<RequestId, AnyRequest>>>,
    accounts: Arc<Mutex<HashMap<UserId, UserAccount>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            accounts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Install an account snapshot, replacing whatever was there.
    ///
    /// Lets tests start a user off with prior cancellations or an existing
    /// ban instead of replaying the history that would produce them.
    pub fn seed_account(&self, account: UserAccount) {
        self.accounts.lock().insert(account.id, account);
    }

    /// Number of stored requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert(&self, request: AnyRequest) -> Result<()> {
        self.requests.lock().insert(request.id(), request);
        Ok(())
    }

    async fn get(&self, id: RequestId) -> Result<AnyRequest> {
        self.requests
            .lock()
            .get(&id)
            .cloned()
            .ok_or(KarigarError::RequestNotFound(id))
    }

    async fn compare_and_set(
        &self,
        id: RequestId,
        expected: RequestStatus,
        updated: AnyRequest,
    ) -> Result<()> {
        let mut requests = self.requests.lock();
        let stored = requests
            .get_mut(&id)
            .ok_or(KarigarError::RequestNotFound(id))?;
        if stored.status() != expected {
            return Err(KarigarError::ConcurrentModification(id));
        }
        *stored = updated;
        Ok(())
    }

    async fn active_requests(&self, customer: UserId) -> Result<Vec<AnyRequest>> {
        Ok(self
            .requests
            .lock()
            .values()
            .filter(|r| r.is_active() && r.data().customer_id == customer)
            .cloned()
            .collect())
    }

    async fn expirable(
        &self,
        created_before: DateTime<Utc>,
        service_before: NaiveDate,
    ) -> Result<Vec<AnyRequest>> {
        Ok(self
            .requests
            .lock()
            .values()
            .filter(|r| match r {
                AnyRequest::Requested(r) => r.data.created_at < created_before,
                AnyRequest::Confirmed(r) => r.data.requested_date < service_before,
                _ => false,
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserCounterStore for MemoryStore {
    async fn account(&self, user: UserId) -> Result<UserAccount> {
        Ok(self
            .accounts
            .lock()
            .entry(user)
            .or_insert_with(|| UserAccount::new(user))
            .clone())
    }

    async fn increment_cancel_count(&self, user: UserId) -> Result<u32> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .entry(user)
            .or_insert_with(|| UserAccount::new(user));
        account.cancel_count += 1;
        Ok(account.cancel_count)
    }

    async fn adjust_active_requests(&self, user: UserId, delta: i32) -> Result<u32> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .entry(user)
            .or_insert_with(|| UserAccount::new(user));
        account.active_request_count = if delta >= 0 {
            account.active_request_count.saturating_add(delta as u32)
        } else {
            account.active_request_count.saturating_sub(delta.unsigned_abs())
        };
        Ok(account.active_request_count)
    }

    async fn set_banned_until(&self, user: UserId, until: Option<DateTime<Utc>>) -> Result<()> {
        self.accounts
            .lock()
            .entry(user)
            .or_insert_with(|| UserAccount::new(user))
            .banned_until = until;
        Ok(())
    }
}

/// Notifier that records every delivery instead of sending anything.
#[derive(Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(UserId, Notification)>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent send fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every delivery recorded so far, in send order.
    pub fn sent(&self) -> Vec<(UserId, Notification)> {
        self.sent.lock().clone()
    }

    /// Deliveries addressed to one user, in send order.
    pub fn sent_to(&self, user: UserId) -> Vec<Notification> {
        self.sent
            .lock()
            .iter()
            .filter(|(target, _)| *target == user)
            .map(|(_, notification)| notification.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, target: UserId, notification: Notification) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(KarigarError::Other(anyhow::anyhow!(
                "notification channel unavailable"
            )));
        }
        self.sent.lock().push((target, notification));
        Ok(())
    }
}
