/// Shareable access codes
///
/// This module handles guest onboarding:
/// - Minting codes with a fixed data and time allowance
/// - Atomic redemption into a guest session bound to that allowance
/// - Revocation, which also ends every live session redeemed from the code

pub mod redeemer;
pub mod types;

pub use redeemer::{AccessCodeRedeemer, GuestPass};
pub use types::{AccessCode, CodeRejection, NewAccessCode};
