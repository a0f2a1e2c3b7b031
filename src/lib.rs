//! openslot — availability & booking concurrency core for a
//! multi-tenant salon-booking backend.
//!
//! Derives open time slots from recurring work schedules, one-off
//! overrides/time-off, and committed bookings; prevents double booking
//! through short-TTL reservation holds; and runs a waitlist that reacts
//! when calendar space frees up. The authoritative state lives behind
//! the [`store`] traits in the surrounding application's relational
//! store; the [`cache`] layer is derived, invalidated-on-write state and
//! never decides the overlap invariant.

pub mod availability;
pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod hold;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod schedule;
pub mod store;
pub mod sweeper;
pub mod waitlist;

pub use crate::config::CoreConfig;
pub use crate::core::BookingCore;
pub use crate::error::CoreError;
