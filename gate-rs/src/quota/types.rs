use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{GateError, Result};
use crate::principal::PrincipalId;

/// Rolling accounting window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    Daily,
    Weekly,
    Monthly,
}

impl WindowType {
    pub const ALL: [WindowType; 3] = [WindowType::Daily, WindowType::Weekly, WindowType::Monthly];

    /// Fixed window length; months are accounted as 30 days
    pub fn length(&self) -> Duration {
        match self {
            WindowType::Daily => Duration::days(1),
            WindowType::Weekly => Duration::days(7),
            WindowType::Monthly => Duration::days(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowType::Daily => "daily",
            WindowType::Weekly => "weekly",
            WindowType::Monthly => "monthly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "daily" => Some(WindowType::Daily),
            "weekly" => Some(WindowType::Weekly),
            "monthly" => Some(WindowType::Monthly),
            _ => None,
        }
    }
}

impl std::fmt::Display for WindowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data volume with 0.01 MB resolution
///
/// Stored as whole hundredths of a megabyte so repeated commits never drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataMb(i64);

impl DataMb {
    pub const ZERO: DataMb = DataMb(0);

    pub fn from_centi(centi: i64) -> Self {
        DataMb(centi)
    }

    pub fn from_mb(mb: f64) -> Self {
        DataMb((mb * 100.0).round() as i64)
    }

    pub fn whole(mb: i64) -> Self {
        DataMb(mb.saturating_mul(100))
    }

    pub fn centi(&self) -> i64 {
        self.0
    }

    pub fn as_mb(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn saturating_add(self, other: DataMb) -> DataMb {
        DataMb(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: DataMb) -> DataMb {
        DataMb(self.0.saturating_sub(other.0))
    }
}

impl std::fmt::Display for DataMb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} MB", self.as_mb())
    }
}

impl Serialize for DataMb {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_mb())
    }
}

impl<'de> Deserialize<'de> for DataMb {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mb = f64::deserialize(deserializer)?;
        Ok(DataMb::from_mb(mb))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Data,
    Time,
}

/// An amount of one metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    Data(DataMb),
    Minutes(i64),
}

impl Usage {
    pub fn metric(&self) -> Metric {
        match self {
            Usage::Data(_) => Metric::Data,
            Usage::Minutes(_) => Metric::Time,
        }
    }

    pub fn zero(metric: Metric) -> Self {
        match metric {
            Metric::Data => Usage::Data(DataMb::ZERO),
            Metric::Time => Usage::Minutes(0),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let negative = match self {
            Usage::Data(d) => d.is_negative(),
            Usage::Minutes(m) => *m < 0,
        };
        if negative {
            return Err(GateError::Validation(
                "Usage amounts cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-window ceilings; `None` means unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    #[serde(rename = "data_mb")]
    pub data: Option<DataMb>,
    #[serde(rename = "time_minutes")]
    pub minutes: Option<i64>,
}

impl QuotaLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.data.map(|d| d.is_negative()).unwrap_or(false) {
            return Err(GateError::Validation(
                "Data limit cannot be negative".to_string(),
            ));
        }
        if self.minutes.map(|m| m < 0).unwrap_or(false) {
            return Err(GateError::Validation(
                "Time limit cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Headroom left; `None` means unlimited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Remaining {
    pub data_mb: Option<DataMb>,
    pub time_minutes: Option<i64>,
}

impl Remaining {
    /// Tighter of two headrooms, metric by metric
    pub fn min(self, other: Remaining) -> Remaining {
        fn tighter<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, None) => a,
                (None, b) => b,
            }
        }
        Remaining {
            data_mb: tighter(self.data_mb, other.data_mb),
            time_minutes: tighter(self.time_minutes, other.time_minutes),
        }
    }
}

/// Consumption of one principal over one rolling window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaWindow {
    pub principal_id: PrincipalId,
    pub window_type: WindowType,
    pub limits: QuotaLimits,
    pub consumed_data: DataMb,
    pub consumed_minutes: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl QuotaWindow {
    /// Fresh window anchored at UTC midnight of `now`
    pub fn open(
        principal_id: PrincipalId,
        window_type: WindowType,
        limits: QuotaLimits,
        now: DateTime<Utc>,
    ) -> Self {
        let window_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(now);
        QuotaWindow {
            principal_id,
            window_type,
            limits,
            consumed_data: DataMb::ZERO,
            consumed_minutes: 0,
            window_start,
            window_end: window_start + window_type.length(),
        }
    }

    /// Advance past every elapsed window in a single step.
    ///
    /// Returns true when boundaries moved. Calling again with the same `now`
    /// is a no-op.
    pub fn roll_forward(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.window_end {
            return false;
        }
        let length = self.window_type.length().num_seconds();
        let elapsed = (now - self.window_start).num_seconds();
        let periods = elapsed / length;

        self.window_start += Duration::seconds(periods * length);
        self.window_end = self.window_start + self.window_type.length();
        self.consumed_data = DataMb::ZERO;
        self.consumed_minutes = 0;
        true
    }

    pub fn apply(&mut self, usage: Usage) {
        match usage {
            Usage::Data(d) => self.consumed_data = self.consumed_data.saturating_add(d),
            Usage::Minutes(m) => self.consumed_minutes = self.consumed_minutes.saturating_add(m),
        }
    }

    /// Take back usage applied earlier; never drops below zero
    pub fn unapply(&mut self, usage: Usage) {
        match usage {
            Usage::Data(d) => {
                self.consumed_data = self.consumed_data.saturating_sub(d).max(DataMb::ZERO)
            }
            Usage::Minutes(m) => {
                self.consumed_minutes = self.consumed_minutes.saturating_sub(m).max(0)
            }
        }
    }

    pub fn is_exceeded(&self) -> bool {
        let data = self
            .limits
            .data
            .map(|limit| self.consumed_data > limit)
            .unwrap_or(false);
        let time = self
            .limits
            .minutes
            .map(|limit| self.consumed_minutes > limit)
            .unwrap_or(false);
        data || time
    }

    /// Whether adding `usage` would push this window past its limit
    pub fn would_exceed(&self, usage: Usage) -> bool {
        match usage {
            Usage::Data(d) => self
                .limits
                .data
                .map(|limit| self.consumed_data.saturating_add(d) > limit)
                .unwrap_or(false),
            Usage::Minutes(m) => self
                .limits
                .minutes
                .map(|limit| self.consumed_minutes.saturating_add(m) > limit)
                .unwrap_or(false),
        }
    }

    pub fn remaining(&self) -> Remaining {
        Remaining {
            data_mb: self
                .limits
                .data
                .map(|limit| limit.saturating_sub(self.consumed_data).max(DataMb::ZERO)),
            time_minutes: self
                .limits
                .minutes
                .map(|limit| (limit - self.consumed_minutes).max(0)),
        }
    }
}

/// Which quota a violation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    Window(WindowType),
    /// The single ceiling attached to a guest session
    OneShot,
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaScope::Window(w) => write!(f, "{}", w),
            QuotaScope::OneShot => write!(f, "one-shot"),
        }
    }
}

/// Quota check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaStatus {
    Ok,
    Exceeded(QuotaScope),
}

impl QuotaStatus {
    pub fn is_exceeded(&self) -> bool {
        matches!(self, QuotaStatus::Exceeded(_))
    }

    /// Status of a set of windows, tagged with the shortest violated window
    pub fn of_windows(windows: &[QuotaWindow]) -> Self {
        windows
            .iter()
            .filter(|w| w.is_exceeded())
            .map(|w| w.window_type)
            .min()
            .map(|w| QuotaStatus::Exceeded(QuotaScope::Window(w)))
            .unwrap_or(QuotaStatus::Ok)
    }
}

/// Result of a side-effect-free pre-check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub remaining: Remaining,
    /// Shortest window that would be pushed over its limit
    pub blocking: Option<WindowType>,
}
