//! Access session lifecycle
//!
//! `Active <-> Paused`, and from either live state into one of the terminal
//! states `Expired`, `Terminated` or `QuotaExceeded`. Terminal sessions never
//! change again.

pub mod machine;
pub mod types;

pub use machine::{SessionManager, UsageReceipt};
pub use types::{AccessSession, QuotaCeiling, SessionStart, SessionStatus, TerminationCause};
