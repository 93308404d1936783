//! Core types for the booking lifecycle.
//!
//! This module defines the type-safe request lifecycle using the typestate pattern.
//! Each service request progresses through distinct states, enforced at compile time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::account::{Party, UserId};
use crate::domain::penalty::CancellationType;

/// Unique identifier for a service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        RequestId(uuid)
    }
}

impl std::ops::Deref for RequestId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Flat status of a request, as stored and filtered on.
///
/// This is the untyped view of the typestate machine below; `AnyRequest::status`
/// maps each state to its status value. Wire strings are snake_case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Requested,
    Confirmed,
    PendingMutualCancel,
    Completed,
    Paid,
    Cancelled,
    Expired,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Requested => write!(f, "requested"),
            RequestStatus::Confirmed => write!(f, "confirmed"),
            RequestStatus::PendingMutualCancel => write!(f, "pending_mutual_cancel"),
            RequestStatus::Completed => write!(f, "completed"),
            RequestStatus::Paid => write!(f, "paid"),
            RequestStatus::Cancelled => write!(f, "cancelled"),
            RequestStatus::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requested" => Ok(RequestStatus::Requested),
            "confirmed" => Ok(RequestStatus::Confirmed),
            "pending_mutual_cancel" => Ok(RequestStatus::PendingMutualCancel),
            "completed" => Ok(RequestStatus::Completed),
            "paid" => Ok(RequestStatus::Paid),
            "cancelled" => Ok(RequestStatus::Cancelled),
            "expired" => Ok(RequestStatus::Expired),
            _ => Err(format!("Invalid request status: {}", s)),
        }
    }
}

/// Bookable two-hour service window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeSlot {
    #[serde(rename = "08:00-10:00")]
    EarlyMorning,
    #[serde(rename = "10:00-12:00")]
    MidMorning,
    #[serde(rename = "12:00-14:00")]
    Midday,
    #[serde(rename = "14:00-16:00")]
    EarlyAfternoon,
    #[serde(rename = "16:00-18:00")]
    LateAfternoon,
    #[serde(rename = "18:00-20:00")]
    Evening,
}

impl TimeSlot {
    /// All slots in day order.
    pub const ALL: [TimeSlot; 6] = [
        TimeSlot::EarlyMorning,
        TimeSlot::MidMorning,
        TimeSlot::Midday,
        TimeSlot::EarlyAfternoon,
        TimeSlot::LateAfternoon,
        TimeSlot::Evening,
    ];
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSlot::EarlyMorning => write!(f, "08:00-10:00"),
            TimeSlot::MidMorning => write!(f, "10:00-12:00"),
            TimeSlot::Midday => write!(f, "12:00-14:00"),
            TimeSlot::EarlyAfternoon => write!(f, "14:00-16:00"),
            TimeSlot::LateAfternoon => write!(f, "16:00-18:00"),
            TimeSlot::Evening => write!(f, "18:00-20:00"),
        }
    }
}

impl FromStr for TimeSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "08:00-10:00" => Ok(TimeSlot::EarlyMorning),
            "10:00-12:00" => Ok(TimeSlot::MidMorning),
            "12:00-14:00" => Ok(TimeSlot::Midday),
            "14:00-16:00" => Ok(TimeSlot::EarlyAfternoon),
            "16:00-18:00" => Ok(TimeSlot::LateAfternoon),
            "18:00-20:00" => Ok(TimeSlot::Evening),
            _ => Err(format!("Invalid time slot: {}", s)),
        }
    }
}

/// Marker trait for valid request states.
///
/// This trait enables the typestate pattern, ensuring that operations
/// are only performed on requests in valid states.
pub trait RequestState: Send + Sync {}

/// A service request between a customer and a provider.
///
/// Uses the typestate pattern to ensure type-safe state transitions.
/// The generic parameter `T` represents the current state of the request.
///
/// # Example
/// ```ignore
/// let request = ServiceRequest {
///     state: Requested {},
///     data: request_data,
/// };
/// // Can only call operations valid for the Requested state
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest<T: RequestState> {
    /// The current state of the request.
    pub state: T,
    /// The booking data shared by every state.
    pub data: RequestData,
}

/// Booking data carried through every state of a service request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    /// The ID with which the request was created.
    pub id: RequestId,

    /// The customer who booked the service.
    pub customer_id: UserId,

    /// The provider booked to perform it.
    pub provider_id: UserId,

    /// Free-form service category label (e.g. "plumbing").
    pub service_type: String,

    /// What the customer asked for.
    pub description: String,

    /// The calendar date the service is scheduled for.
    pub requested_date: NaiveDate,

    /// The two-hour window on that date.
    pub time_slot: TimeSlot,

    /// When the booking was created.
    pub created_at: DateTime<Utc>,
}

impl RequestData {
    /// The user id on the given side of this booking.
    pub fn party_id(&self, party: Party) -> UserId {
        match party {
            Party::Customer => self.customer_id,
            Party::Provider => self.provider_id,
        }
    }
}

// ============================================================================
// Request States
// ============================================================================

/// Booking is awaiting the provider's answer.
///
/// This is the initial state for all newly created requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requested {}

impl RequestState for Requested {}

/// Provider accepted the booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confirmed {
    pub confirmed_at: DateTime<Utc>,
}

impl RequestState for Confirmed {}

/// One party asked the other to cancel by mutual agreement.
///
/// The booking stays effectively confirmed until the other party answers;
/// no penalty machinery runs while the offer is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMutualCancel {
    pub confirmed_at: DateTime<Utc>,
    /// Which side asked for the mutual cancellation.
    pub requested_by: Party,
    pub requested_at: DateTime<Utc>,
}

impl RequestState for PendingMutualCancel {}

/// Provider marked the work as done.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completed {
    pub confirmed_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Whether the customer has filed their review.
    pub has_review: bool,
}

impl RequestState for Completed {}

/// Provider confirmed the bill was settled. Terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paid {
    pub confirmed_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub paid_at: DateTime<Utc>,
    /// Whether the customer has filed their review.
    pub has_review: bool,
}

impl RequestState for Paid {}

/// Booking was cancelled. Terminal.
///
/// `cancelled_by` and `cancellation_type` are always present together; a
/// cancellation without a recorded type is unrepresentable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cancelled {
    /// Which side the cancellation is attributed to.
    pub cancelled_by: Party,
    pub cancellation_type: CancellationType,
    pub cancelled_at: DateTime<Utc>,
    /// Set when the booking had been confirmed before cancellation.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// True when the cancellation went through the mutual-agreement flow.
    pub mutual_cancel_accepted: bool,
}

impl RequestState for Cancelled {}

/// Booking lapsed without resolution. Terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expired {
    pub expired_at: DateTime<Utc>,
    /// Set when the booking had been confirmed before expiring.
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl RequestState for Expired {}

// ============================================================================
// Unified Request Representation
// ============================================================================

/// Enum that can hold a request in any state.
///
/// This is used for storage and manager dispatch where requests must be
/// handled uniformly regardless of their current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "request", rename_all = "snake_case")]
pub enum AnyRequest {
    Requested(ServiceRequest<Requested>),
    Confirmed(ServiceRequest<Confirmed>),
    PendingMutualCancel(ServiceRequest<PendingMutualCancel>),
    Completed(ServiceRequest<Completed>),
    Paid(ServiceRequest<Paid>),
    Cancelled(ServiceRequest<Cancelled>),
    Expired(ServiceRequest<Expired>),
}

impl AnyRequest {
    /// Get the request ID regardless of state.
    pub fn id(&self) -> RequestId {
        self.data().id
    }

    /// Get the flat status of the current state.
    pub fn status(&self) -> RequestStatus {
        match self {
            AnyRequest::Requested(_) => RequestStatus::Requested,
            AnyRequest::Confirmed(_) => RequestStatus::Confirmed,
            AnyRequest::PendingMutualCancel(_) => RequestStatus::PendingMutualCancel,
            AnyRequest::Completed(_) => RequestStatus::Completed,
            AnyRequest::Paid(_) => RequestStatus::Paid,
            AnyRequest::Cancelled(_) => RequestStatus::Cancelled,
            AnyRequest::Expired(_) => RequestStatus::Expired,
        }
    }

    /// Get the booking data regardless of state.
    pub fn data(&self) -> &RequestData {
        match self {
            AnyRequest::Requested(r) => &r.data,
            AnyRequest::Confirmed(r) => &r.data,
            AnyRequest::PendingMutualCancel(r) => &r.data,
            AnyRequest::Completed(r) => &r.data,
            AnyRequest::Paid(r) => &r.data,
            AnyRequest::Cancelled(r) => &r.data,
            AnyRequest::Expired(r) => &r.data,
        }
    }

    /// Check if this request is in a terminal state (Paid, Cancelled, or Expired).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnyRequest::Paid(_) | AnyRequest::Cancelled(_) | AnyRequest::Expired(_)
        )
    }

    /// Check if this request counts against the customer's active limit.
    ///
    /// A booking is held active from creation until it resolves; the pending
    /// mutual-cancel state keeps the hold taken at creation, so only the
    /// opening states answer true here.
    pub fn is_active(&self) -> bool {
        matches!(self, AnyRequest::Requested(_) | AnyRequest::Confirmed(_))
    }

    /// Review flag, for states that can carry one.
    pub fn has_review(&self) -> Option<bool> {
        match self {
            AnyRequest::Completed(r) => Some(r.state.has_review),
            AnyRequest::Paid(r) => Some(r.state.has_review),
            _ => None,
        }
    }
}

// Conversion traits for going from typed ServiceRequest to AnyRequest

impl From<ServiceRequest<Requested>> for AnyRequest {
    fn from(r: ServiceRequest<Requested>) -> Self {
        AnyRequest::Requested(r)
    }
}

impl From<ServiceRequest<Confirmed>> for AnyRequest {
    fn from(r: ServiceRequest<Confirmed>) -> Self {
        AnyRequest::Confirmed(r)
    }
}

impl From<ServiceRequest<PendingMutualCancel>> for AnyRequest {
    fn from(r: ServiceRequest<PendingMutualCancel>) -> Self {
        AnyRequest::PendingMutualCancel(r)
    }
}

impl From<ServiceRequest<Completed>> for AnyRequest {
    fn from(r: ServiceRequest<Completed>) -> Self {
        AnyRequest::Completed(r)
    }
}

impl From<ServiceRequest<Paid>> for AnyRequest {
    fn from(r: ServiceRequest<Paid>) -> Self {
        AnyRequest::Paid(r)
    }
}

impl From<ServiceRequest<Cancelled>> for AnyRequest {
    fn from(r: ServiceRequest<Cancelled>) -> Self {
        AnyRequest::Cancelled(r)
    }
}

impl From<ServiceRequest<Expired>> for AnyRequest {
    fn from(r: ServiceRequest<Expired>) -> Self {
        AnyRequest::Expired(r)
    }
}
