//! Authorization and channel registration surface for Archivist.
//!
//! Resolves bot-wide admins, per-channel local admins, and designated batch
//! admin channels from an explicit [`AuthorizationContext`] value.
pub mod authorization;
pub mod channel_registration;

pub use authorization::*;
pub use channel_registration::*;
