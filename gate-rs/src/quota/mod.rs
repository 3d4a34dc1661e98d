/// Quota accounting
///
/// This module tracks consumption per principal:
/// - Rolling daily, weekly and monthly windows for data and connected time
/// - Lazy rollover on every ledger access
/// - One-shot ceilings for guest sessions redeemed from access codes

pub mod ledger;
pub mod policy;
pub mod types;

pub use ledger::QuotaLedger;
pub use policy::{OneShotPolicy, QuotaPolicies, QuotaPolicy, RollingWindowPolicy};
pub use types::{
    DataMb, Metric, QuotaCheck, QuotaLimits, QuotaScope, QuotaStatus, QuotaWindow, Remaining,
    Usage, WindowType,
};
