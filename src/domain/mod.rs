//! Core domain types for the karigar booking engine.
//!
//! This module contains pure domain types with no persistence dependencies:
//! - User accounts, parties, and actors
//! - The cancellation penalty calculator
//! - The service-request typestate machine and its events

pub mod account;
pub mod penalty;
pub mod request;
