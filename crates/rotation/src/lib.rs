//! Relay rotation for outbound email.
//!
//! [`SmtpRotation`] picks the relay that carries the next email (primary
//! first, then by priority, skipping relays whose hourly or daily quota is
//! spent), counts sends against those quotas, and manages the relay set.

pub mod error;
pub mod rotation;

pub use error::RotationError;
pub use rotation::SmtpRotation;
