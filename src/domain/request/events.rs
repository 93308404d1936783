//! Transition events, side-effect intents, and notifications.
//!
//! The lifecycle machine consumes a [`TransitionEvent`] and produces a
//! [`TransitionIntent`]: the post-transition request plus the side effects
//! the caller must apply. The machine itself never performs them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::account::{Party, UserId};
use crate::domain::penalty::{CancellationType, PenaltyAssessment};
use crate::domain::request::state::{AnyRequest, RequestId, RequestStatus};

/// What a caller asks the lifecycle machine to do.
///
/// Payloads ride in the variants, so an event that needs one cannot be
/// submitted without it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransitionEvent {
    /// Provider accepts the booking.
    Accept,
    /// Provider turns the booking down. Penalty-free.
    Decline,
    /// Either party walks away, with the agreed-upon type.
    Cancel { cancellation_type: CancellationType },
    /// Either party proposes cancelling by mutual agreement.
    RequestMutualCancel,
    /// The other party agrees to the proposal.
    AcceptMutualCancel,
    /// The other party refuses; the booking stands.
    DeclineMutualCancel,
    /// Provider marks the work done.
    MarkCompleted,
    /// Provider records that the bill was settled.
    MarkPaid,
    /// The sweep retires a booking nobody resolved.
    Expire,
}

impl TransitionEvent {
    /// The payload-free name of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            TransitionEvent::Accept => EventKind::Accept,
            TransitionEvent::Decline => EventKind::Decline,
            TransitionEvent::Cancel { .. } => EventKind::Cancel,
            TransitionEvent::RequestMutualCancel => EventKind::RequestMutualCancel,
            TransitionEvent::AcceptMutualCancel => EventKind::AcceptMutualCancel,
            TransitionEvent::DeclineMutualCancel => EventKind::DeclineMutualCancel,
            TransitionEvent::MarkCompleted => EventKind::MarkCompleted,
            TransitionEvent::MarkPaid => EventKind::MarkPaid,
            TransitionEvent::Expire => EventKind::Expire,
        }
    }
}

/// Event names without payloads, for error reporting and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Accept,
    Decline,
    Cancel,
    RequestMutualCancel,
    AcceptMutualCancel,
    DeclineMutualCancel,
    MarkCompleted,
    MarkPaid,
    Expire,
}

impl EventKind {
    /// Every event, for exhaustive checks.
    pub const ALL: [EventKind; 9] = [
        EventKind::Accept,
        EventKind::Decline,
        EventKind::Cancel,
        EventKind::RequestMutualCancel,
        EventKind::AcceptMutualCancel,
        EventKind::DeclineMutualCancel,
        EventKind::MarkCompleted,
        EventKind::MarkPaid,
        EventKind::Expire,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Accept => "accept",
            EventKind::Decline => "decline",
            EventKind::Cancel => "cancel",
            EventKind::RequestMutualCancel => "request_mutual_cancel",
            EventKind::AcceptMutualCancel => "accept_mutual_cancel",
            EventKind::DeclineMutualCancel => "decline_mutual_cancel",
            EventKind::MarkCompleted => "mark_completed",
            EventKind::MarkPaid => "mark_paid",
            EventKind::Expire => "expire",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Category of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RequestAccepted,
    RequestRejected,
    RequestCompleted,
    Cancellation,
    MutualCancelRequested,
    Review,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::RequestAccepted => write!(f, "request_accepted"),
            NotificationKind::RequestRejected => write!(f, "request_rejected"),
            NotificationKind::RequestCompleted => write!(f, "request_completed"),
            NotificationKind::Cancellation => write!(f, "cancellation"),
            NotificationKind::MutualCancelRequested => write!(f, "mutual_cancel_requested"),
            NotificationKind::Review => write!(f, "review"),
        }
    }
}

/// A message for one user about one booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub request_id: RequestId,
}

impl Notification {
    pub fn request_accepted(request_id: RequestId) -> Self {
        Notification {
            kind: NotificationKind::RequestAccepted,
            message: "Your service request was accepted!".to_string(),
            request_id,
        }
    }

    pub fn request_rejected(request_id: RequestId) -> Self {
        Notification {
            kind: NotificationKind::RequestRejected,
            message: "The provider couldn't accept your request".to_string(),
            request_id,
        }
    }

    pub fn request_completed(request_id: RequestId) -> Self {
        Notification {
            kind: NotificationKind::RequestCompleted,
            message: "Your service was marked as completed!".to_string(),
            request_id,
        }
    }

    pub fn cancellation(
        request_id: RequestId,
        cancelled_by: Party,
        cancellation_type: CancellationType,
    ) -> Self {
        let suffix = match cancellation_type {
            CancellationType::MutualAgreement => " (mutual agreement)",
            CancellationType::WithoutAgreement => "",
        };
        Notification {
            kind: NotificationKind::Cancellation,
            message: format!("The {} cancelled the service request{}", cancelled_by, suffix),
            request_id,
        }
    }

    /// Warning sent to the canceller when they cross a cancellation threshold.
    pub fn cancellation_warning(request_id: RequestId, message: String) -> Self {
        Notification {
            kind: NotificationKind::Cancellation,
            message,
            request_id,
        }
    }

    pub fn mutual_cancel_requested(request_id: RequestId, requested_by: Party) -> Self {
        Notification {
            kind: NotificationKind::MutualCancelRequested,
            message: format!(
                "The {} asked to cancel this booking by mutual agreement",
                requested_by
            ),
            request_id,
        }
    }

    pub fn review(request_id: RequestId, rating: u8) -> Self {
        Notification {
            kind: NotificationKind::Review,
            message: format!("A customer left you a {}-star review!", rating),
            request_id,
        }
    }
}

/// A state change the machine wants applied after the transition commits.
///
/// Effects are data so the machine stays pure; the manager applies them in
/// order once the compare-and-set has gone through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum SideEffect {
    /// Move a user's active-booking counter by `delta` (floors at zero).
    AdjustActiveRequests { user: UserId, delta: i32 },
    /// Charge one cancellation to the user's lifetime count.
    IncrementCancelCount { user: UserId },
    /// Ban the user from creating bookings until `until`.
    SetBannedUntil { user: UserId, until: DateTime<Utc> },
    /// Deliver a notification to the user.
    Notify {
        user: UserId,
        notification: Notification,
    },
}

impl SideEffect {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SideEffect::AdjustActiveRequests { .. } => "adjust_active_requests",
            SideEffect::IncrementCancelCount { .. } => "increment_cancel_count",
            SideEffect::SetBannedUntil { .. } => "set_banned_until",
            SideEffect::Notify { .. } => "notify",
        }
    }
}

/// Everything the machine decided for one transition, not yet persisted.
#[derive(Debug, Clone)]
pub struct TransitionIntent {
    /// The request after the transition.
    pub request: AnyRequest,
    /// The status the stored request must still hold for the commit to win.
    pub expected: RequestStatus,
    /// Effects to apply once the commit succeeds.
    pub side_effects: Vec<SideEffect>,
    /// Date-based penalty, present on unilateral cancellations only.
    pub penalty: Option<PenaltyAssessment>,
}
