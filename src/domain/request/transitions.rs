//! State transitions for service requests using the typestate pattern.
//!
//! This module implements the booking lifecycle using Rust's type system to
//! enforce valid state transitions at compile time. Each request state is a
//! distinct type parameter on `ServiceRequest<State>`.
//!
//! # Typestate Pattern
//!
//! A `ServiceRequest<Requested>` can only call methods available while the
//! provider's answer is pending, and transitions return different types:
//!
//! ```text
//! ServiceRequest<Requested> ──accept()──> ServiceRequest<Confirmed>
//!       │                                        │
//!       ├──decline()──> ServiceRequest<Cancelled>├──complete()──> ServiceRequest<Completed>
//!       ├──cancel()───> ServiceRequest<Cancelled>│                       │
//!       └──expire()───> ServiceRequest<Expired>  │                       └──mark_paid()──> ServiceRequest<Paid>
//!                                                ├──cancel()───> ServiceRequest<Cancelled>
//!                                                ├──expire()───> ServiceRequest<Expired>
//!                                                └──request_mutual_cancel()──> ServiceRequest<PendingMutualCancel>
//!                                                                                    │
//!                                                       accept_mutual_cancel()──> Cancelled
//!                                                       decline_mutual_cancel()─> Confirmed
//! ```
//!
//! # Purity
//!
//! The typed methods and the [`AnyRequest::apply`] dispatcher perform no
//! I/O: they take `now` explicitly and return the next state together with
//! the [`SideEffect`]s the caller must apply after committing. Persistence
//! and effect application live in the manager.
//!
//! # Who may do what
//!
//! Each edge is guarded by the acting party: providers answer and complete,
//! customers pay, either party may cancel or propose a mutual cancellation,
//! and only the other party may answer such a proposal. The system actor is
//! accepted solely for expiry. Guard failures are [`WrongActor`]; an event
//! that is not legal from the current status at all is
//! [`InvalidTransition`], checked first.
//!
//! [`WrongActor`]: crate::error::KarigarError::WrongActor
//! [`InvalidTransition`]: crate::error::KarigarError::InvalidTransition

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::domain::account::{Actor, Party};
use crate::domain::penalty::{CancellationType, PenaltyAssessment};
use crate::domain::request::events::{
    EventKind, Notification, SideEffect, TransitionEvent, TransitionIntent,
};
use crate::domain::request::state::{
    AnyRequest, Cancelled, Completed, Confirmed, Expired, Paid, PendingMutualCancel, RequestData,
    RequestId, RequestState, RequestStatus, Requested, ServiceRequest,
};
use crate::error::{KarigarError, Result};

impl ServiceRequest<Requested> {
    /// Provider takes the booking.
    pub fn accept(self, now: DateTime<Utc>) -> (ServiceRequest<Confirmed>, Vec<SideEffect>) {
        let effects = vec![SideEffect::Notify {
            user: self.data.customer_id,
            notification: Notification::request_accepted(self.data.id),
        }];
        let request = ServiceRequest {
            state: Confirmed { confirmed_at: now },
            data: self.data,
        };
        (request, effects)
    }

    /// Provider turns the booking down.
    ///
    /// Recorded as a provider cancellation so the type invariant holds, but
    /// deliberately outside the penalty machinery: no cancel-count charge,
    /// no ban. The customer's hold on the booking is released.
    pub fn decline(self, now: DateTime<Utc>) -> (ServiceRequest<Cancelled>, Vec<SideEffect>) {
        let effects = vec![
            SideEffect::AdjustActiveRequests {
                user: self.data.customer_id,
                delta: -1,
            },
            SideEffect::Notify {
                user: self.data.customer_id,
                notification: Notification::request_rejected(self.data.id),
            },
        ];
        let request = ServiceRequest {
            state: Cancelled {
                cancelled_by: Party::Provider,
                cancellation_type: CancellationType::WithoutAgreement,
                cancelled_at: now,
                confirmed_at: None,
                mutual_cancel_accepted: false,
            },
            data: self.data,
        };
        (request, effects)
    }

    /// Either party walks away before the provider has answered.
    pub fn cancel(
        self,
        cancelled_by: Party,
        cancellation_type: CancellationType,
        now: DateTime<Utc>,
    ) -> (
        ServiceRequest<Cancelled>,
        Vec<SideEffect>,
        PenaltyAssessment,
    ) {
        let (effects, penalty) =
            unilateral_cancel_effects(&self.data, cancelled_by, cancellation_type, now);
        let request = ServiceRequest {
            state: Cancelled {
                cancelled_by,
                cancellation_type,
                cancelled_at: now,
                confirmed_at: None,
                mutual_cancel_accepted: false,
            },
            data: self.data,
        };
        (request, effects, penalty)
    }

    /// Nobody answered inside the expiry window.
    pub fn expire(self, now: DateTime<Utc>) -> (ServiceRequest<Expired>, Vec<SideEffect>) {
        let effects = vec![SideEffect::AdjustActiveRequests {
            user: self.data.customer_id,
            delta: -1,
        }];
        let request = ServiceRequest {
            state: Expired {
                expired_at: now,
                confirmed_at: None,
            },
            data: self.data,
        };
        (request, effects)
    }
}

impl ServiceRequest<Confirmed> {
    /// Either party walks away from a confirmed booking.
    pub fn cancel(
        self,
        cancelled_by: Party,
        cancellation_type: CancellationType,
        now: DateTime<Utc>,
    ) -> (
        ServiceRequest<Cancelled>,
        Vec<SideEffect>,
        PenaltyAssessment,
    ) {
        let (effects, penalty) =
            unilateral_cancel_effects(&self.data, cancelled_by, cancellation_type, now);
        let request = ServiceRequest {
            state: Cancelled {
                cancelled_by,
                cancellation_type,
                cancelled_at: now,
                confirmed_at: Some(self.state.confirmed_at),
                mutual_cancel_accepted: false,
            },
            data: self.data,
        };
        (request, effects, penalty)
    }

    /// One party proposes cancelling by mutual agreement.
    ///
    /// The booking keeps its confirmed timestamps; only the other party may
    /// answer the proposal.
    pub fn request_mutual_cancel(
        self,
        requested_by: Party,
        now: DateTime<Utc>,
    ) -> (ServiceRequest<PendingMutualCancel>, Vec<SideEffect>) {
        let other = self.data.party_id(requested_by.other());
        let effects = vec![SideEffect::Notify {
            user: other,
            notification: Notification::mutual_cancel_requested(self.data.id, requested_by),
        }];
        let request = ServiceRequest {
            state: PendingMutualCancel {
                confirmed_at: self.state.confirmed_at,
                requested_by,
                requested_at: now,
            },
            data: self.data,
        };
        (request, effects)
    }

    /// Provider marks the work done; the customer's hold is released.
    pub fn complete(self, now: DateTime<Utc>) -> (ServiceRequest<Completed>, Vec<SideEffect>) {
        let effects = vec![
            SideEffect::AdjustActiveRequests {
                user: self.data.customer_id,
                delta: -1,
            },
            SideEffect::Notify {
                user: self.data.customer_id,
                notification: Notification::request_completed(self.data.id),
            },
        ];
        let request = ServiceRequest {
            state: Completed {
                confirmed_at: self.state.confirmed_at,
                completed_at: now,
                has_review: false,
            },
            data: self.data,
        };
        (request, effects)
    }

    /// The service date passed without the work being resolved.
    pub fn expire(self, now: DateTime<Utc>) -> (ServiceRequest<Expired>, Vec<SideEffect>) {
        let effects = vec![SideEffect::AdjustActiveRequests {
            user: self.data.customer_id,
            delta: -1,
        }];
        let request = ServiceRequest {
            state: Expired {
                expired_at: now,
                confirmed_at: Some(self.state.confirmed_at),
            },
            data: self.data,
        };
        (request, effects)
    }
}

impl ServiceRequest<PendingMutualCancel> {
    /// The other party agrees; the booking cancels with no penalty.
    ///
    /// Attribution goes to the requester of the mutual cancellation. Both
    /// parties release their hold. Nobody is charged a cancellation and no
    /// notification goes out; both sides took part.
    pub fn accept_mutual_cancel(
        self,
        now: DateTime<Utc>,
    ) -> (ServiceRequest<Cancelled>, Vec<SideEffect>) {
        let effects = vec![
            SideEffect::AdjustActiveRequests {
                user: self.data.customer_id,
                delta: -1,
            },
            SideEffect::AdjustActiveRequests {
                user: self.data.provider_id,
                delta: -1,
            },
        ];
        let request = ServiceRequest {
            state: Cancelled {
                cancelled_by: self.state.requested_by,
                cancellation_type: CancellationType::MutualAgreement,
                cancelled_at: now,
                confirmed_at: Some(self.state.confirmed_at),
                mutual_cancel_accepted: true,
            },
            data: self.data,
        };
        (request, effects)
    }

    /// The other party refuses; the booking returns to confirmed.
    ///
    /// The pending-request metadata is dropped with the state; the original
    /// confirmation timestamp survives.
    pub fn decline_mutual_cancel(self) -> ServiceRequest<Confirmed> {
        ServiceRequest {
            state: Confirmed {
                confirmed_at: self.state.confirmed_at,
            },
            data: self.data,
        }
    }
}

impl ServiceRequest<Completed> {
    /// Provider confirms the bill was settled. Terminal.
    pub fn mark_paid(self, now: DateTime<Utc>) -> ServiceRequest<Paid> {
        ServiceRequest {
            state: Paid {
                confirmed_at: self.state.confirmed_at,
                completed_at: self.state.completed_at,
                paid_at: now,
                has_review: self.state.has_review,
            },
            data: self.data,
        }
    }
}

/// Effects shared by every unilateral cancellation: the canceller is charged
/// a cancellation and banned per the date rules, the customer's hold is
/// released, the other party is told.
fn unilateral_cancel_effects(
    data: &RequestData,
    cancelled_by: Party,
    cancellation_type: CancellationType,
    now: DateTime<Utc>,
) -> (Vec<SideEffect>, PenaltyAssessment) {
    let canceller = data.party_id(cancelled_by);
    let other = data.party_id(cancelled_by.other());
    let penalty = PenaltyAssessment::assess(data.requested_date, cancellation_type, now);

    let mut effects = vec![
        SideEffect::IncrementCancelCount { user: canceller },
        SideEffect::AdjustActiveRequests {
            user: data.customer_id,
            delta: -1,
        },
    ];
    if let Some(until) = penalty.banned_until {
        effects.push(SideEffect::SetBannedUntil {
            user: canceller,
            until,
        });
    }
    effects.push(SideEffect::Notify {
        user: other,
        notification: Notification::cancellation(data.id, cancelled_by, cancellation_type),
    });

    (effects, penalty)
}

impl AnyRequest {
    /// Run one lifecycle event against a request snapshot.
    ///
    /// Returns the [`TransitionIntent`] to commit, or the rejection. Events
    /// that are not legal from the current status are rejected before any
    /// actor check, so a terminal request answers `InvalidTransition` to
    /// everyone. Repeating a cancel against an already-cancelled request
    /// lands there too, which is what keeps retried cancellations from
    /// charging anyone twice.
    pub fn apply(
        self,
        event: TransitionEvent,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<TransitionIntent> {
        let kind = event.kind();
        match (self, event) {
            (AnyRequest::Requested(r), TransitionEvent::Accept) => {
                require_party(&r, actor, Party::Provider, kind)?;
                let (request, side_effects) = r.accept(now);
                Ok(TransitionIntent {
                    request: request.into(),
                    expected: RequestStatus::Requested,
                    side_effects,
                    penalty: None,
                })
            }
            (AnyRequest::Requested(r), TransitionEvent::Decline) => {
                require_party(&r, actor, Party::Provider, kind)?;
                let (request, side_effects) = r.decline(now);
                Ok(TransitionIntent {
                    request: request.into(),
                    expected: RequestStatus::Requested,
                    side_effects,
                    penalty: None,
                })
            }
            (AnyRequest::Requested(r), TransitionEvent::Cancel { cancellation_type }) => {
                let cancelled_by = acting_party(&r.data, actor, kind)?;
                let (request, side_effects, penalty) = r.cancel(cancelled_by, cancellation_type, now);
                Ok(TransitionIntent {
                    request: request.into(),
                    expected: RequestStatus::Requested,
                    side_effects,
                    penalty: Some(penalty),
                })
            }
            (AnyRequest::Requested(r), TransitionEvent::Expire) => {
                require_system(&r.data, actor, kind)?;
                let (request, side_effects) = r.expire(now);
                Ok(TransitionIntent {
                    request: request.into(),
                    expected: RequestStatus::Requested,
                    side_effects,
                    penalty: None,
                })
            }
            (AnyRequest::Confirmed(r), TransitionEvent::Cancel { cancellation_type }) => {
                let cancelled_by = acting_party(&r.data, actor, kind)?;
                let (request, side_effects, penalty) = r.cancel(cancelled_by, cancellation_type, now);
                Ok(TransitionIntent {
                    request: request.into(),
                    expected: RequestStatus::Confirmed,
                    side_effects,
                    penalty: Some(penalty),
                })
            }
            (AnyRequest::Confirmed(r), TransitionEvent::RequestMutualCancel) => {
                let requested_by = acting_party(&r.data, actor, kind)?;
                let (request, side_effects) = r.request_mutual_cancel(requested_by, now);
                Ok(TransitionIntent {
                    request: request.into(),
                    expected: RequestStatus::Confirmed,
                    side_effects,
                    penalty: None,
                })
            }
            (AnyRequest::Confirmed(r), TransitionEvent::MarkCompleted) => {
                require_party(&r, actor, Party::Provider, kind)?;
                let (request, side_effects) = r.complete(now);
                Ok(TransitionIntent {
                    request: request.into(),
                    expected: RequestStatus::Confirmed,
                    side_effects,
                    penalty: None,
                })
            }
            (AnyRequest::Confirmed(r), TransitionEvent::Expire) => {
                require_system(&r.data, actor, kind)?;
                let (request, side_effects) = r.expire(now);
                Ok(TransitionIntent {
                    request: request.into(),
                    expected: RequestStatus::Confirmed,
                    side_effects,
                    penalty: None,
                })
            }
            (AnyRequest::PendingMutualCancel(r), TransitionEvent::AcceptMutualCancel) => {
                require_answering_party(&r, actor, kind)?;
                let (request, side_effects) = r.accept_mutual_cancel(now);
                Ok(TransitionIntent {
                    request: request.into(),
                    expected: RequestStatus::PendingMutualCancel,
                    side_effects,
                    penalty: None,
                })
            }
            (AnyRequest::PendingMutualCancel(r), TransitionEvent::DeclineMutualCancel) => {
                require_answering_party(&r, actor, kind)?;
                let request = r.decline_mutual_cancel();
                Ok(TransitionIntent {
                    request: request.into(),
                    expected: RequestStatus::PendingMutualCancel,
                    side_effects: Vec::new(),
                    penalty: None,
                })
            }
            (AnyRequest::Completed(r), TransitionEvent::MarkPaid) => {
                require_party(&r, actor, Party::Provider, kind)?;
                let request = r.mark_paid(now);
                Ok(TransitionIntent {
                    request: request.into(),
                    expected: RequestStatus::Completed,
                    side_effects: Vec::new(),
                    penalty: None,
                })
            }
            (request, _) => Err(reject_invalid(&request, kind)),
        }
    }
}

/// Resolve which party the actor is, rejecting outsiders.
fn acting_party(data: &RequestData, actor: &Actor, kind: EventKind) -> Result<Party> {
    actor
        .party_of(data.customer_id, data.provider_id)
        .ok_or_else(|| reject_actor(data.id, kind, actor))
}

/// The edge belongs to exactly one side of the booking.
fn require_party<S: RequestState>(
    request: &ServiceRequest<S>,
    actor: &Actor,
    required: Party,
    kind: EventKind,
) -> Result<()> {
    if acting_party(&request.data, actor, kind)? == required {
        Ok(())
    } else {
        Err(reject_actor(request.data.id, kind, actor))
    }
}

/// A pending mutual cancellation may only be answered by the party who did
/// not request it.
fn require_answering_party(
    request: &ServiceRequest<PendingMutualCancel>,
    actor: &Actor,
    kind: EventKind,
) -> Result<()> {
    if acting_party(&request.data, actor, kind)? == request.state.requested_by.other() {
        Ok(())
    } else {
        Err(reject_actor(request.data.id, kind, actor))
    }
}

/// Only the sweep may expire bookings.
fn require_system(data: &RequestData, actor: &Actor, kind: EventKind) -> Result<()> {
    if actor.is_system() {
        Ok(())
    } else {
        Err(reject_actor(data.id, kind, actor))
    }
}

fn reject_actor(id: RequestId, kind: EventKind, actor: &Actor) -> KarigarError {
    counter!(
        "karigar_transitions_rejected_total",
        "event" => kind.as_str(),
        "reason" => "wrong_actor"
    )
    .increment(1);
    tracing::warn!(
        request_id = %id,
        event = %kind,
        actor = %actor,
        "Rejected transition: actor may not perform this event"
    );
    KarigarError::WrongActor {
        id,
        event: kind.to_string(),
        actor: actor.to_string(),
    }
}

fn reject_invalid(request: &AnyRequest, kind: EventKind) -> KarigarError {
    let status = request.status();
    counter!(
        "karigar_transitions_rejected_total",
        "event" => kind.as_str(),
        "reason" => "invalid_transition"
    )
    .increment(1);
    tracing::warn!(
        request_id = %request.id(),
        event = %kind,
        status = %status,
        "Rejected transition: event not legal from this status"
    );
    KarigarError::InvalidTransition {
        id: request.id(),
        event: kind,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::UserId;
    use crate::domain::request::events::NotificationKind;
    use crate::domain::request::state::TimeSlot;
    use chrono::{NaiveDate, TimeZone};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        customer: UserId,
        provider: UserId,
        data: RequestData,
    }

    fn fixture(scheduled: NaiveDate) -> Fixture {
        let customer = UserId::new();
        let provider = UserId::new();
        let data = RequestData {
            id: RequestId::new(),
            customer_id: customer,
            provider_id: provider,
            service_type: "plumbing".to_string(),
            description: "Leaking kitchen tap".to_string(),
            requested_date: scheduled,
            time_slot: TimeSlot::MidMorning,
            created_at: fixed_now() - chrono::Duration::hours(2),
        };
        Fixture {
            customer,
            provider,
            data,
        }
    }

    fn requested(fx: &Fixture) -> ServiceRequest<Requested> {
        ServiceRequest {
            state: Requested {},
            data: fx.data.clone(),
        }
    }

    fn confirmed(fx: &Fixture) -> ServiceRequest<Confirmed> {
        ServiceRequest {
            state: Confirmed {
                confirmed_at: fixed_now() - chrono::Duration::hours(1),
            },
            data: fx.data.clone(),
        }
    }

    fn has_adjust(effects: &[SideEffect], user: UserId, delta: i32) -> bool {
        effects
            .iter()
            .any(|e| matches!(e, SideEffect::AdjustActiveRequests { user: u, delta: d } if *u == user && *d == delta))
    }

    fn notified(effects: &[SideEffect], user: UserId) -> Option<&Notification> {
        effects.iter().find_map(|e| match e {
            SideEffect::Notify {
                user: u,
                notification,
            } if *u == user => Some(notification),
            _ => None,
        })
    }

    #[test]
    fn accept_confirms_and_notifies_customer() {
        let fx = fixture(date(2025, 6, 15));
        let (request, effects) = requested(&fx).accept(fixed_now());
        assert_eq!(request.state.confirmed_at, fixed_now());
        let note = notified(&effects, fx.customer).unwrap();
        assert_eq!(
            note.kind,
            NotificationKind::RequestAccepted
        );
        assert!(!has_adjust(&effects, fx.customer, -1));
    }

    #[test]
    fn decline_releases_hold_without_penalty() {
        let fx = fixture(date(2025, 6, 15));
        let (request, effects) = requested(&fx).decline(fixed_now());
        assert_eq!(request.state.cancelled_by, Party::Provider);
        assert_eq!(
            request.state.cancellation_type,
            CancellationType::WithoutAgreement
        );
        assert!(!request.state.mutual_cancel_accepted);
        assert!(has_adjust(&effects, fx.customer, -1));
        assert!(
            !effects
                .iter()
                .any(|e| matches!(e, SideEffect::IncrementCancelCount { .. }))
        );
        assert!(
            !effects
                .iter()
                .any(|e| matches!(e, SideEffect::SetBannedUntil { .. }))
        );
        let note = notified(&effects, fx.customer).unwrap();
        assert_eq!(
            note.kind,
            NotificationKind::RequestRejected
        );
    }

    #[test]
    fn same_day_customer_cancel_assesses_two_day_ban() {
        let fx = fixture(date(2025, 6, 10));
        let intent = AnyRequest::from(confirmed(&fx))
            .apply(
                TransitionEvent::Cancel {
                    cancellation_type: CancellationType::WithoutAgreement,
                },
                &Actor::Customer(fx.customer),
                fixed_now(),
            )
            .unwrap();

        assert_eq!(intent.expected, RequestStatus::Confirmed);
        assert_eq!(intent.request.status(), RequestStatus::Cancelled);

        let penalty = intent.penalty.unwrap();
        assert_eq!(penalty.days_until_service, 0);
        assert_eq!(penalty.ban_days, 2);
        let until = penalty.banned_until.unwrap();
        assert_eq!(until.date_naive(), date(2025, 6, 12));

        assert!(intent.side_effects.iter().any(
            |e| matches!(e, SideEffect::IncrementCancelCount { user } if *user == fx.customer)
        ));
        assert!(has_adjust(&intent.side_effects, fx.customer, -1));
        assert!(!has_adjust(&intent.side_effects, fx.provider, -1));
        assert!(intent.side_effects.iter().any(
            |e| matches!(e, SideEffect::SetBannedUntil { user, until: u } if *user == fx.customer && *u == until)
        ));
        let note = notified(&intent.side_effects, fx.provider).unwrap();
        assert_eq!(
            note.kind,
            NotificationKind::Cancellation
        );
        assert_eq!(note.message, "The customer cancelled the service request");
    }

    #[test]
    fn provider_cancel_charges_provider_and_releases_customer() {
        let fx = fixture(date(2025, 6, 11));
        let intent = AnyRequest::from(confirmed(&fx))
            .apply(
                TransitionEvent::Cancel {
                    cancellation_type: CancellationType::WithoutAgreement,
                },
                &Actor::Provider(fx.provider),
                fixed_now(),
            )
            .unwrap();

        let penalty = intent.penalty.unwrap();
        assert_eq!(penalty.ban_days, 1);
        assert!(intent.side_effects.iter().any(
            |e| matches!(e, SideEffect::IncrementCancelCount { user } if *user == fx.provider)
        ));
        // The customer held the booking, so the release is theirs
        assert!(has_adjust(&intent.side_effects, fx.customer, -1));
        assert!(intent.side_effects.iter().any(
            |e| matches!(e, SideEffect::SetBannedUntil { user, .. } if *user == fx.provider)
        ));
        assert!(notified(&intent.side_effects, fx.customer).is_some());
    }

    #[test]
    fn cancel_with_notice_carries_no_ban() {
        let fx = fixture(date(2025, 6, 13));
        let intent = AnyRequest::from(requested(&fx))
            .apply(
                TransitionEvent::Cancel {
                    cancellation_type: CancellationType::WithoutAgreement,
                },
                &Actor::Customer(fx.customer),
                fixed_now(),
            )
            .unwrap();
        let penalty = intent.penalty.unwrap();
        assert_eq!(penalty.days_until_service, 3);
        assert_eq!(penalty.ban_days, 0);
        assert_eq!(penalty.banned_until, None);
        assert!(
            !intent
                .side_effects
                .iter()
                .any(|e| matches!(e, SideEffect::SetBannedUntil { .. }))
        );
    }

    #[test]
    fn mutual_type_cancel_still_charges_the_count() {
        // Cancellation count is charged for every unilateral cancel; only
        // the ban depends on the type.
        let fx = fixture(date(2025, 6, 10));
        let intent = AnyRequest::from(confirmed(&fx))
            .apply(
                TransitionEvent::Cancel {
                    cancellation_type: CancellationType::MutualAgreement,
                },
                &Actor::Customer(fx.customer),
                fixed_now(),
            )
            .unwrap();
        let penalty = intent.penalty.unwrap();
        assert_eq!(penalty.ban_days, 0);
        assert!(
            intent
                .side_effects
                .iter()
                .any(|e| matches!(e, SideEffect::IncrementCancelCount { .. }))
        );
        let note = notified(&intent.side_effects, fx.provider).unwrap();
        assert!(note.message.ends_with("(mutual agreement)"));
    }

    #[test]
    fn mutual_cancel_accept_releases_both_and_stays_silent() {
        let fx = fixture(date(2025, 6, 15));
        let (pending, request_effects) =
            confirmed(&fx).request_mutual_cancel(Party::Customer, fixed_now());
        assert!(notified(&request_effects, fx.provider).is_some());

        let (request, effects) =
            pending.accept_mutual_cancel(fixed_now() + chrono::Duration::hours(1));
        assert_eq!(request.state.cancelled_by, Party::Customer);
        assert_eq!(
            request.state.cancellation_type,
            CancellationType::MutualAgreement
        );
        assert!(request.state.mutual_cancel_accepted);
        assert!(request.state.confirmed_at.is_some());
        assert!(has_adjust(&effects, fx.customer, -1));
        assert!(has_adjust(&effects, fx.provider, -1));
        assert!(
            !effects
                .iter()
                .any(|e| matches!(e, SideEffect::Notify { .. }))
        );
        assert!(
            !effects
                .iter()
                .any(|e| matches!(e, SideEffect::IncrementCancelCount { .. }))
        );
    }

    #[test]
    fn mutual_cancel_decline_restores_confirmed() {
        let fx = fixture(date(2025, 6, 15));
        let confirmed_at = confirmed(&fx).state.confirmed_at;
        let (pending, _) = confirmed(&fx).request_mutual_cancel(Party::Provider, fixed_now());
        let restored = pending.decline_mutual_cancel();
        assert_eq!(restored.state.confirmed_at, confirmed_at);
    }

    #[test]
    fn complete_then_mark_paid() {
        let fx = fixture(date(2025, 6, 9));
        let (completed, effects) = confirmed(&fx).complete(fixed_now());
        assert!(!completed.state.has_review);
        assert!(has_adjust(&effects, fx.customer, -1));
        let note = notified(&effects, fx.customer).unwrap();
        assert_eq!(
            note.kind,
            NotificationKind::RequestCompleted
        );

        let paid_at = fixed_now() + chrono::Duration::days(1);
        let paid = completed.mark_paid(paid_at);
        assert_eq!(paid.state.paid_at, paid_at);
        assert!(!paid.state.has_review);
    }

    #[test]
    fn provider_marks_paid_with_no_side_effects() {
        let fx = fixture(date(2025, 6, 9));
        let (completed, _) = confirmed(&fx).complete(fixed_now());
        let intent = AnyRequest::from(completed)
            .apply(
                TransitionEvent::MarkPaid,
                &Actor::Provider(fx.provider),
                fixed_now(),
            )
            .unwrap();
        assert_eq!(intent.request.status(), RequestStatus::Paid);
        assert!(intent.side_effects.is_empty());
        assert_eq!(intent.penalty, None);
    }

    #[test]
    fn expire_releases_customer_without_notifying() {
        let fx = fixture(date(2025, 6, 9));
        for request in [
            AnyRequest::from(requested(&fx)),
            AnyRequest::from(confirmed(&fx)),
        ] {
            let intent = request
                .apply(TransitionEvent::Expire, &Actor::System, fixed_now())
                .unwrap();
            assert_eq!(intent.request.status(), RequestStatus::Expired);
            assert!(has_adjust(&intent.side_effects, fx.customer, -1));
            assert!(
                !intent
                    .side_effects
                    .iter()
                    .any(|e| matches!(e, SideEffect::Notify { .. }))
            );
            assert_eq!(intent.penalty, None);
        }
    }

    #[test]
    fn wrong_actor_rejected_on_legal_edges() {
        let fx = fixture(date(2025, 6, 15));
        let stranger = UserId::new();

        // Customer cannot answer their own request
        let err = AnyRequest::from(requested(&fx))
            .apply(
                TransitionEvent::Accept,
                &Actor::Customer(fx.customer),
                fixed_now(),
            )
            .unwrap_err();
        assert!(matches!(err, KarigarError::WrongActor { .. }));

        // A provider id presented as a customer role is not a party
        let err = AnyRequest::from(requested(&fx))
            .apply(
                TransitionEvent::Accept,
                &Actor::Provider(fx.customer),
                fixed_now(),
            )
            .unwrap_err();
        assert!(matches!(err, KarigarError::WrongActor { .. }));

        // Strangers cannot cancel
        let err = AnyRequest::from(confirmed(&fx))
            .apply(
                TransitionEvent::Cancel {
                    cancellation_type: CancellationType::WithoutAgreement,
                },
                &Actor::Customer(stranger),
                fixed_now(),
            )
            .unwrap_err();
        assert!(matches!(err, KarigarError::WrongActor { .. }));

        // Admin is accepted nowhere
        let err = AnyRequest::from(requested(&fx))
            .apply(
                TransitionEvent::Accept,
                &Actor::Admin(fx.provider),
                fixed_now(),
            )
            .unwrap_err();
        assert!(matches!(err, KarigarError::WrongActor { .. }));

        // Expiry is system-only
        let err = AnyRequest::from(requested(&fx))
            .apply(
                TransitionEvent::Expire,
                &Actor::Provider(fx.provider),
                fixed_now(),
            )
            .unwrap_err();
        assert!(matches!(err, KarigarError::WrongActor { .. }));

        // Payment is confirmed from the provider's side
        let (completed, _) = confirmed(&fx).complete(fixed_now());
        let err = AnyRequest::from(completed)
            .apply(
                TransitionEvent::MarkPaid,
                &Actor::Customer(fx.customer),
                fixed_now(),
            )
            .unwrap_err();
        assert!(matches!(err, KarigarError::WrongActor { .. }));
    }

    #[test]
    fn requester_cannot_answer_own_mutual_cancel() {
        let fx = fixture(date(2025, 6, 15));
        let (pending, _) = confirmed(&fx).request_mutual_cancel(Party::Customer, fixed_now());
        let err = AnyRequest::from(pending)
            .apply(
                TransitionEvent::AcceptMutualCancel,
                &Actor::Customer(fx.customer),
                fixed_now(),
            )
            .unwrap_err();
        assert!(matches!(err, KarigarError::WrongActor { .. }));
    }

    #[test]
    fn illegal_event_beats_wrong_actor() {
        // Status legality is checked before the actor, so even a stranger
        // probing a terminal request learns only InvalidTransition.
        let fx = fixture(date(2025, 6, 15));
        let (cancelled, _) = requested(&fx).decline(fixed_now());
        let err = AnyRequest::from(cancelled)
            .apply(TransitionEvent::Accept, &Actor::System, fixed_now())
            .unwrap_err();
        assert!(matches!(err, KarigarError::InvalidTransition { .. }));
    }

    #[test]
    fn cancel_not_legal_while_mutual_cancel_pending() {
        let fx = fixture(date(2025, 6, 15));
        let (pending, _) = confirmed(&fx).request_mutual_cancel(Party::Customer, fixed_now());
        let err = AnyRequest::from(pending)
            .apply(
                TransitionEvent::Cancel {
                    cancellation_type: CancellationType::WithoutAgreement,
                },
                &Actor::Customer(fx.customer),
                fixed_now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            KarigarError::InvalidTransition {
                status: RequestStatus::PendingMutualCancel,
                ..
            }
        ));
    }

    #[test]
    fn second_cancel_is_rejected_with_no_effects() {
        let fx = fixture(date(2025, 6, 10));
        let intent = AnyRequest::from(confirmed(&fx))
            .apply(
                TransitionEvent::Cancel {
                    cancellation_type: CancellationType::WithoutAgreement,
                },
                &Actor::Customer(fx.customer),
                fixed_now(),
            )
            .unwrap();

        let err = intent
            .request
            .apply(
                TransitionEvent::Cancel {
                    cancellation_type: CancellationType::WithoutAgreement,
                },
                &Actor::Customer(fx.customer),
                fixed_now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            KarigarError::InvalidTransition {
                status: RequestStatus::Cancelled,
                ..
            }
        ));
    }

    // ========================================================================
    // Exhaustive grid
    // ========================================================================

    /// The full legal edge set: (from, event, to).
    const EDGES: [(RequestStatus, EventKind, RequestStatus); 10] = [
        (
            RequestStatus::Requested,
            EventKind::Accept,
            RequestStatus::Confirmed,
        ),
        (
            RequestStatus::Requested,
            EventKind::Decline,
            RequestStatus::Cancelled,
        ),
        (
            RequestStatus::Requested,
            EventKind::Cancel,
            RequestStatus::Cancelled,
        ),
        (
            RequestStatus::Requested,
            EventKind::Expire,
            RequestStatus::Expired,
        ),
        (
            RequestStatus::Confirmed,
            EventKind::Cancel,
            RequestStatus::Cancelled,
        ),
        (
            RequestStatus::Confirmed,
            EventKind::RequestMutualCancel,
            RequestStatus::PendingMutualCancel,
        ),
        (
            RequestStatus::Confirmed,
            EventKind::MarkCompleted,
            RequestStatus::Completed,
        ),
        (
            RequestStatus::Confirmed,
            EventKind::Expire,
            RequestStatus::Expired,
        ),
        (
            RequestStatus::PendingMutualCancel,
            EventKind::AcceptMutualCancel,
            RequestStatus::Cancelled,
        ),
        (
            RequestStatus::PendingMutualCancel,
            EventKind::DeclineMutualCancel,
            RequestStatus::Confirmed,
        ),
    ];

    // MarkPaid is the eleventh edge; listed separately because the array
    // above is also used to assert terminal statuses have no outgoing edges.
    const PAID_EDGE: (RequestStatus, EventKind, RequestStatus) = (
        RequestStatus::Completed,
        EventKind::MarkPaid,
        RequestStatus::Paid,
    );

    fn all_edges() -> Vec<(RequestStatus, EventKind, RequestStatus)> {
        let mut edges = EDGES.to_vec();
        edges.push(PAID_EDGE);
        edges
    }

    fn snapshot(fx: &Fixture, status: RequestStatus) -> AnyRequest {
        let now = fixed_now();
        match status {
            RequestStatus::Requested => requested(fx).into(),
            RequestStatus::Confirmed => confirmed(fx).into(),
            RequestStatus::PendingMutualCancel => {
                confirmed(fx)
                    .request_mutual_cancel(Party::Customer, now)
                    .0
                    .into()
            }
            RequestStatus::Completed => confirmed(fx).complete(now).0.into(),
            RequestStatus::Paid => confirmed(fx).complete(now).0.mark_paid(now).into(),
            RequestStatus::Cancelled => requested(fx).decline(now).0.into(),
            RequestStatus::Expired => requested(fx).expire(now).0.into(),
        }
    }

    fn event_of(kind: EventKind) -> TransitionEvent {
        match kind {
            EventKind::Accept => TransitionEvent::Accept,
            EventKind::Decline => TransitionEvent::Decline,
            EventKind::Cancel => TransitionEvent::Cancel {
                cancellation_type: CancellationType::WithoutAgreement,
            },
            EventKind::RequestMutualCancel => TransitionEvent::RequestMutualCancel,
            EventKind::AcceptMutualCancel => TransitionEvent::AcceptMutualCancel,
            EventKind::DeclineMutualCancel => TransitionEvent::DeclineMutualCancel,
            EventKind::MarkCompleted => TransitionEvent::MarkCompleted,
            EventKind::MarkPaid => TransitionEvent::MarkPaid,
            EventKind::Expire => TransitionEvent::Expire,
        }
    }

    const STATUSES: [RequestStatus; 7] = [
        RequestStatus::Requested,
        RequestStatus::Confirmed,
        RequestStatus::PendingMutualCancel,
        RequestStatus::Completed,
        RequestStatus::Paid,
        RequestStatus::Cancelled,
        RequestStatus::Expired,
    ];

    /// Every (status, event, actor) combination behaves per the edge table:
    /// accepted transitions land exactly on the declared edges with an
    /// allowed actor, everything else is rejected with the right error.
    #[test]
    fn exhaustive_transition_grid() {
        let fx = fixture(date(2025, 6, 15));
        let stranger = UserId::new();
        let actors = [
            Actor::Customer(fx.customer),
            Actor::Provider(fx.provider),
            Actor::Customer(stranger),
            Actor::Admin(fx.provider),
            Actor::System,
        ];
        let edges = all_edges();

        for status in STATUSES {
            for kind in EventKind::ALL {
                let edge = edges
                    .iter()
                    .find(|(from, event, _)| *from == status && *event == kind);
                for actor in &actors {
                    let result =
                        snapshot(&fx, status).apply(event_of(kind), actor, fixed_now());
                    match (edge, result) {
                        (None, Err(KarigarError::InvalidTransition { status: s, event, .. })) => {
                            assert_eq!(s, status);
                            assert_eq!(event, kind);
                        }
                        (None, other) => {
                            panic!(
                                "{status:?} + {kind:?} by {actor:?}: expected InvalidTransition, got {other:?}"
                            );
                        }
                        (Some((_, _, to)), Ok(intent)) => {
                            assert!(
                                actor_allowed(&fx, status, kind, actor),
                                "{status:?} + {kind:?} accepted disallowed actor {actor:?}"
                            );
                            assert_eq!(intent.request.status(), *to);
                            assert_eq!(intent.expected, status);
                        }
                        (Some(_), Err(KarigarError::WrongActor { .. })) => {
                            assert!(
                                !actor_allowed(&fx, status, kind, actor),
                                "{status:?} + {kind:?} rejected allowed actor {actor:?}"
                            );
                        }
                        (Some(_), Err(other)) => {
                            panic!("{status:?} + {kind:?} by {actor:?}: unexpected error {other:?}");
                        }
                    }
                }
            }
        }
    }

    /// Mirror of the actor guards, kept independent of the production code.
    fn actor_allowed(fx: &Fixture, status: RequestStatus, kind: EventKind, actor: &Actor) -> bool {
        let as_customer = *actor == Actor::Customer(fx.customer);
        let as_provider = *actor == Actor::Provider(fx.provider);
        match kind {
            EventKind::Accept
            | EventKind::Decline
            | EventKind::MarkCompleted
            | EventKind::MarkPaid => as_provider,
            EventKind::Cancel | EventKind::RequestMutualCancel => as_customer || as_provider,
            // Grid fixtures always have the customer as requester
            EventKind::AcceptMutualCancel | EventKind::DeclineMutualCancel => {
                status == RequestStatus::PendingMutualCancel && as_provider
            }
            EventKind::Expire => actor.is_system(),
        }
    }
}
