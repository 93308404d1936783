//! Users, parties, and actors.
//!
//! A booking joins two parties (customer and provider); an actor is whoever
//! is attempting an operation, which may be neither of them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a user (customer or provider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        UserId(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        UserId(uuid)
    }
}

impl std::ops::Deref for UserId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Which side of a booking a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Customer,
    Provider,
}

impl Party {
    /// The opposite side of the booking.
    pub fn other(&self) -> Party {
        match self {
            Party::Customer => Party::Provider,
            Party::Provider => Party::Customer,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Customer => write!(f, "customer"),
            Party::Provider => write!(f, "provider"),
        }
    }
}

/// Who is attempting an operation.
///
/// Customer and Provider actors carry the user id claimed by the caller; the
/// transition guards check it against the request's own party ids. `System`
/// is reserved for scheduled work (the expiry sweep). `Admin` exists in the
/// taxonomy but no lifecycle transition accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "user", rename_all = "snake_case")]
pub enum Actor {
    Customer(UserId),
    Provider(UserId),
    Admin(UserId),
    System,
}

impl Actor {
    /// The user id behind this actor, when there is one.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::Customer(id) | Actor::Provider(id) | Actor::Admin(id) => Some(*id),
            Actor::System => None,
        }
    }

    /// Resolve which party of a given booking this actor is.
    ///
    /// Returns `None` when the actor is not a party to the booking: system
    /// and admin actors, role/id mismatches, and strangers all land there.
    pub fn party_of(&self, customer_id: UserId, provider_id: UserId) -> Option<Party> {
        match self {
            Actor::Customer(id) if *id == customer_id => Some(Party::Customer),
            Actor::Provider(id) if *id == provider_id => Some(Party::Provider),
            _ => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Actor::System)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Customer(id) => write!(f, "customer {}", id),
            Actor::Provider(id) => write!(f, "provider {}", id),
            Actor::Admin(id) => write!(f, "admin {}", id),
            Actor::System => write!(f, "system"),
        }
    }
}

/// Per-user counters the penalty machinery reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,

    /// Lifetime cancellations charged to this user.
    pub cancel_count: u32,

    /// Bookings currently held open as customer.
    pub active_request_count: u32,

    /// When set and in the future, the user may not create new bookings.
    pub banned_until: Option<DateTime<Utc>>,
}

impl UserAccount {
    /// A fresh account with zeroed counters.
    pub fn new(id: UserId) -> Self {
        UserAccount {
            id,
            cancel_count: 0,
            active_request_count: 0,
            banned_until: None,
        }
    }
}
