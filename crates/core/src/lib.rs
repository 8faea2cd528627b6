//! `storefront-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod clock;
pub mod email;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use email::EmailAddress;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId};
pub use value_object::ValueObject;
