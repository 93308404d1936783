//! Trait seams and the booking manager.
//!
//! This module defines the `RequestStore`, `UserCounterStore`, and `Notifier`
//! traits, plus the [`BookingManager`] that drives the lifecycle machine
//! against them: read a snapshot, run the pure machine, commit with a
//! compare-and-set on the status, then apply the returned side effects.
//!
//! The commit is the linearization point. A side effect that fails after it
//! is logged and reported in the [`TransitionReceipt`]; the transition is
//! never rolled back. Counters and notifications may therefore lag the
//! request state, which callers reconcile from the receipt.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::domain::account::{Actor, Party, UserAccount, UserId};
use crate::domain::penalty::{self, PenaltyAssessment, THRESHOLD_BAN_DAYS, ThresholdVerdict};
use crate::domain::request::events::{
    Notification, SideEffect, TransitionEvent, TransitionIntent,
};
use crate::domain::request::state::{
    AnyRequest, RequestData, RequestId, RequestStatus, Requested, ServiceRequest, TimeSlot,
};
use crate::error::{KarigarError, Result};

pub mod memory;

/// Persistence seam for request snapshots.
///
/// The type system enforces valid state transitions before anything reaches
/// this trait, so implementations only guard against concurrent writers:
/// `compare_and_set` is the sole mutation path after insert.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Store a freshly created request.
    async fn insert(&self, request: AnyRequest) -> Result<()>;

    /// Fetch the current snapshot of a request.
    async fn get(&self, id: RequestId) -> Result<AnyRequest>;

    /// Replace the stored request only if its status still equals `expected`.
    ///
    /// Fails with `ConcurrentModification` when another writer got there
    /// first, and `RequestNotFound` for unknown ids.
    async fn compare_and_set(
        &self,
        id: RequestId,
        expected: RequestStatus,
        updated: AnyRequest,
    ) -> Result<()>;

    /// Bookings currently holding the customer's active quota.
    async fn active_requests(&self, customer: UserId) -> Result<Vec<AnyRequest>>;

    /// Bookings the sweep should expire.
    ///
    /// Selects `Requested` bookings created before `created_before` and
    /// `Confirmed` bookings whose service date is before `service_before`.
    async fn expirable(
        &self,
        created_before: DateTime<Utc>,
        service_before: NaiveDate,
    ) -> Result<Vec<AnyRequest>>;
}

/// Per-user counter updates driven by transition side effects.
#[async_trait]
pub trait UserCounterStore: Send + Sync {
    /// The user's account snapshot, created zeroed on first touch.
    async fn account(&self, user: UserId) -> Result<UserAccount>;

    /// Charge one cancellation to the user. Returns the new lifetime count.
    async fn increment_cancel_count(&self, user: UserId) -> Result<u32>;

    /// Move the user's active-booking counter by `delta`, flooring at zero.
    /// Returns the new count.
    async fn adjust_active_requests(&self, user: UserId, delta: i32) -> Result<u32>;

    /// Set or clear the user's creation ban.
    async fn set_banned_until(&self, user: UserId, until: Option<DateTime<Utc>>) -> Result<()>;
}

/// Delivery seam for user-facing notifications.
///
/// Delivery is best effort; a failed send surfaces in the receipt and is
/// never retried by the manager.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, target: UserId, notification: Notification) -> Result<()>;
}

/// Tunable policy for the booking manager.
#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// Maximum bookings a customer may hold open at once.
    pub max_active_requests: u32,

    /// Hours an unanswered request stays open before the sweep expires it.
    pub expiry_window_hours: i64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            max_active_requests: 3,
            expiry_window_hours: 24,
        }
    }
}

/// Input for creating a booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequest {
    pub customer_id: UserId,
    pub provider_id: UserId,
    pub service_type: String,
    pub description: String,
    pub requested_date: NaiveDate,
    pub time_slot: TimeSlot,
}

/// Input for the customer's post-service review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewInput {
    /// Star rating, 1 to 5.
    pub rating: u8,
    pub comment: String,
}

/// A side effect that failed after the transition had committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideEffectFailure {
    pub effect: SideEffect,
    pub error: String,
}

/// What a committed operation did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionReceipt {
    pub request_id: RequestId,
    pub new_status: RequestStatus,

    /// Date-based penalty assessed; present on unilateral cancellations.
    pub penalty: Option<PenaltyAssessment>,

    /// Count-based threshold verdict; present on unilateral cancellations.
    pub threshold: Option<ThresholdVerdict>,

    /// Every effect the transition asked for, threshold additions included.
    pub side_effects: Vec<SideEffect>,

    /// Effects that failed to apply. The transition itself stays committed.
    pub failures: Vec<SideEffectFailure>,
}

/// Drives the booking lifecycle against a store and a notifier.
///
/// Holds no request state of its own; every operation reads a fresh snapshot
/// and commits through the store's compare-and-set.
pub struct BookingManager<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    config: BookingConfig,
}

impl<S, N> BookingManager<S, N>
where
    S: RequestStore + UserCounterStore,
    N: Notifier,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: BookingConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    /// Create a booking in the `Requested` state.
    ///
    /// Gates, in order: non-empty description, service date not in the past,
    /// customer not banned, customer under the active-booking limit. On
    /// success the customer's active count goes up by one. The provider is
    /// not notified at creation; their dashboard polls open requests.
    pub async fn submit_request(&self, input: NewRequest) -> Result<AnyRequest> {
        let now = Utc::now();

        if input.description.trim().is_empty() {
            return Err(KarigarError::ValidationError(
                "description must not be empty".to_string(),
            ));
        }
        if input.requested_date < now.date_naive() {
            return Err(KarigarError::ValidationError(format!(
                "requested date {} is in the past",
                input.requested_date
            )));
        }

        let account = self.store.account(input.customer_id).await?;
        if let Some(until) = account.banned_until
            && penalty::is_banned(Some(until), now)
        {
            counter!("karigar_requests_denied_total", "reason" => "banned").increment(1);
            tracing::warn!(
                customer_id = %input.customer_id,
                until = %until,
                "Denied request creation: customer is banned"
            );
            return Err(KarigarError::UserBanned {
                user: input.customer_id,
                until,
            });
        }
        if account.active_request_count >= self.config.max_active_requests {
            counter!("karigar_requests_denied_total", "reason" => "active_limit").increment(1);
            tracing::warn!(
                customer_id = %input.customer_id,
                count = account.active_request_count,
                limit = self.config.max_active_requests,
                "Denied request creation: active limit reached"
            );
            return Err(KarigarError::ActiveLimitExceeded {
                user: input.customer_id,
                count: account.active_request_count,
                limit: self.config.max_active_requests,
            });
        }

        let data = RequestData {
            id: RequestId::new(),
            customer_id: input.customer_id,
            provider_id: input.provider_id,
            service_type: input.service_type,
            description: input.description,
            requested_date: input.requested_date,
            time_slot: input.time_slot,
            created_at: now,
        };
        let request: AnyRequest = ServiceRequest {
            state: Requested {},
            data,
        }
        .into();

        self.store.insert(request.clone()).await?;
        self.store
            .adjust_active_requests(input.customer_id, 1)
            .await?;

        counter!("karigar_requests_created_total").increment(1);
        tracing::info!(
            request_id = %request.id(),
            customer_id = %request.data().customer_id,
            provider_id = %request.data().provider_id,
            requested_date = %request.data().requested_date,
            "Created service request"
        );
        Ok(request)
    }

    /// Run one lifecycle event end to end.
    ///
    /// Reads the snapshot, lets the pure machine decide, folds in the
    /// cancellation-count threshold for unilateral cancels, commits with a
    /// compare-and-set, then applies side effects. Rejections and CAS
    /// conflicts leave every counter and notification untouched.
    pub async fn apply_transition(
        &self,
        id: RequestId,
        event: TransitionEvent,
        actor: &Actor,
    ) -> Result<TransitionReceipt> {
        let now = Utc::now();
        let snapshot = self.store.get(id).await?;
        let mut intent = snapshot.apply(event, actor, now)?;

        let threshold = self.fold_in_threshold(&mut intent, now).await?;

        let new_status = intent.request.status();
        self.store
            .compare_and_set(id, intent.expected, intent.request.clone())
            .await?;

        counter!("karigar_transitions_total", "event" => event.kind().as_str()).increment(1);
        tracing::info!(
            request_id = %id,
            event = %event.kind(),
            from = %intent.expected,
            to = %new_status,
            "Applied transition"
        );

        let failures = self.apply_side_effects(id, &intent.side_effects).await;

        Ok(TransitionReceipt {
            request_id: id,
            new_status,
            penalty: intent.penalty,
            threshold,
            side_effects: intent.side_effects,
            failures,
        })
    }

    /// Evaluate the cancellation-count threshold for a unilateral cancel and
    /// fold its consequences into the intent.
    ///
    /// The machine cannot see the canceller's lifetime count, so this lives
    /// here. A threshold ban spans [`THRESHOLD_BAN_DAYS`] days; when the
    /// date-based ban already ends later, nothing is added.
    async fn fold_in_threshold(
        &self,
        intent: &mut TransitionIntent,
        now: DateTime<Utc>,
    ) -> Result<Option<ThresholdVerdict>> {
        let (cancelled, penalty) = match (&intent.request, intent.penalty) {
            (AnyRequest::Cancelled(r), Some(penalty)) => (r, penalty),
            _ => return Ok(None),
        };
        let canceller = cancelled.data.party_id(cancelled.state.cancelled_by);
        let account = self.store.account(canceller).await?;
        let verdict = penalty::cancellation_threshold(account.cancel_count);

        if verdict.should_ban {
            let threshold_until = penalty::ban_end_date(THRESHOLD_BAN_DAYS, now);
            if let Some(until) = threshold_until
                && penalty.banned_until.is_none_or(|date_based| until > date_based)
            {
                intent.side_effects.push(SideEffect::SetBannedUntil {
                    user: canceller,
                    until,
                });
            }
        }
        if verdict.should_warn
            && let Some(message) = verdict.message.clone()
        {
            intent.side_effects.push(SideEffect::Notify {
                user: canceller,
                notification: Notification::cancellation_warning(cancelled.data.id, message),
            });
        }

        Ok(Some(verdict))
    }

    /// Apply side effects in order, collecting failures instead of aborting.
    async fn apply_side_effects(
        &self,
        id: RequestId,
        effects: &[SideEffect],
    ) -> Vec<SideEffectFailure> {
        let mut failures = Vec::new();
        for effect in effects {
            if let Err(error) = self.apply_side_effect(effect).await {
                counter!(
                    "karigar_side_effect_failures_total",
                    "effect" => effect.label()
                )
                .increment(1);
                tracing::warn!(
                    request_id = %id,
                    effect = effect.label(),
                    error = %error,
                    "Side effect failed after commit; transition stays applied"
                );
                failures.push(SideEffectFailure {
                    effect: effect.clone(),
                    error: error.to_string(),
                });
            }
        }
        failures
    }

    async fn apply_side_effect(&self, effect: &SideEffect) -> Result<()> {
        match effect {
            SideEffect::AdjustActiveRequests { user, delta } => {
                self.store.adjust_active_requests(*user, *delta).await?;
            }
            SideEffect::IncrementCancelCount { user } => {
                self.store.increment_cancel_count(*user).await?;
            }
            SideEffect::SetBannedUntil { user, until } => {
                self.store.set_banned_until(*user, Some(*until)).await?;
                counter!("karigar_bans_applied_total").increment(1);
                tracing::info!(user_id = %user, until = %until, "Applied cancellation ban");
            }
            SideEffect::Notify { user, notification } => {
                self.notifier.send(*user, notification.clone()).await?;
            }
        }
        Ok(())
    }

    /// File the customer's review for a completed or paid booking.
    ///
    /// Flips the review flag through the same compare-and-set path as the
    /// lifecycle, so a racing transition loses nothing: the CAS fails and
    /// the caller retries against the fresh snapshot. The provider is
    /// notified of the new review.
    pub async fn file_review(
        &self,
        id: RequestId,
        actor: &Actor,
        input: ReviewInput,
    ) -> Result<TransitionReceipt> {
        if !(1..=5).contains(&input.rating) {
            return Err(KarigarError::ValidationError(format!(
                "rating must be between 1 and 5, got {}",
                input.rating
            )));
        }

        let snapshot = self.store.get(id).await?;
        let provider_id = snapshot.data().provider_id;
        let customer_id = snapshot.data().customer_id;

        let updated: AnyRequest = match snapshot {
            AnyRequest::Completed(mut r) => {
                require_reviewer(id, actor, customer_id, provider_id)?;
                if r.state.has_review {
                    return Err(KarigarError::ReviewAlreadyFiled(id));
                }
                r.state.has_review = true;
                r.into()
            }
            AnyRequest::Paid(mut r) => {
                require_reviewer(id, actor, customer_id, provider_id)?;
                if r.state.has_review {
                    return Err(KarigarError::ReviewAlreadyFiled(id));
                }
                r.state.has_review = true;
                r.into()
            }
            other => {
                return Err(KarigarError::ReviewNotAvailable {
                    id,
                    status: other.status(),
                });
            }
        };

        // Status is unchanged; the CAS still fences off racing transitions.
        let status = updated.status();
        self.store.compare_and_set(id, status, updated).await?;

        counter!("karigar_reviews_filed_total").increment(1);
        tracing::info!(request_id = %id, rating = input.rating, "Filed review");

        let effects = vec![SideEffect::Notify {
            user: provider_id,
            notification: Notification::review(id, input.rating),
        }];
        let failures = self.apply_side_effects(id, &effects).await;

        Ok(TransitionReceipt {
            request_id: id,
            new_status: status,
            penalty: None,
            threshold: None,
            side_effects: effects,
            failures,
        })
    }

    /// Expire every overdue booking: `Requested` past the expiry window and
    /// `Confirmed` past its service date.
    ///
    /// Each candidate goes through the ordinary transition path, so holds
    /// are released and conflicts resolve the usual way. A booking that a
    /// user touches mid-sweep is simply skipped. Returns the ids actually
    /// expired.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>> {
        let created_before = now - chrono::Duration::hours(self.config.expiry_window_hours);
        let service_before = now.date_naive();
        let candidates = self.store.expirable(created_before, service_before).await?;
        tracing::debug!(count = candidates.len(), "Expiry sweep selected candidates");

        let mut expired = Vec::new();
        for candidate in candidates {
            let id = candidate.id();
            match self
                .apply_transition(id, TransitionEvent::Expire, &Actor::System)
                .await
            {
                Ok(_) => expired.push(id),
                Err(
                    KarigarError::ConcurrentModification(_)
                    | KarigarError::InvalidTransition { .. },
                ) => {
                    tracing::debug!(
                        request_id = %id,
                        "Skipping expiry; request changed underneath the sweep"
                    );
                }
                Err(error) => {
                    tracing::warn!(request_id = %id, error = %error, "Failed to expire request");
                }
            }
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired overdue requests");
        }
        Ok(expired)
    }
}

/// Reviews come only from the booking's customer.
fn require_reviewer(
    id: RequestId,
    actor: &Actor,
    customer_id: UserId,
    provider_id: UserId,
) -> Result<()> {
    if actor.party_of(customer_id, provider_id) == Some(Party::Customer) {
        Ok(())
    } else {
        Err(KarigarError::WrongActor {
            id,
            event: "file_review".to_string(),
            actor: actor.to_string(),
        })
    }
}
