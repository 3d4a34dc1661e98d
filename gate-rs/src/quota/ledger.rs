use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{QuotaCheck, QuotaLimits, QuotaStatus, QuotaWindow, Remaining, Usage, WindowType};
use crate::clock::Clock;
use crate::config::QuotaConfig;
use crate::error::{GateError, Result};
use crate::locks::KeyedLocks;
use crate::principal::PrincipalId;
use crate::store::QuotaStore;

/// Rolling-window consumption ledger
///
/// Mutations for one principal are serialized by a per-principal lock held
/// across the load and the save; checks read without locking and never write.
pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    defaults: QuotaConfig,
    locks: KeyedLocks,
}

impl QuotaLedger {
    /// Create new ledger; windows opened on first touch take `defaults`
    pub fn new(store: Arc<dyn QuotaStore>, clock: Arc<dyn Clock>, defaults: QuotaConfig) -> Self {
        QuotaLedger {
            store,
            clock,
            defaults,
            locks: KeyedLocks::new(),
        }
    }

    /// Create ledger with the built-in default limits
    pub fn with_defaults(store: Arc<dyn QuotaStore>, clock: Arc<dyn Clock>) -> Self {
        Self::new(store, clock, QuotaConfig::default())
    }

    /// All windows of a principal, opened and rolled to `now`.
    ///
    /// The boolean is true when the result differs from what is stored.
    async fn current_windows(
        &self,
        principal: &PrincipalId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(Vec<QuotaWindow>, bool)> {
        let mut stored = self.store.load_windows(principal).await?;
        let mut windows = Vec::with_capacity(WindowType::ALL.len());
        let mut dirty = false;

        for window_type in WindowType::ALL {
            let mut window = match stored.iter().position(|w| w.window_type == window_type) {
                Some(i) => stored.swap_remove(i),
                None => {
                    dirty = true;
                    QuotaWindow::open(
                        principal.clone(),
                        window_type,
                        self.defaults.limits_for(window_type),
                        now,
                    )
                }
            };
            if window.roll_forward(now) {
                debug!(
                    principal = %principal,
                    window = %window_type,
                    window_start = %window.window_start,
                    "Quota window rolled over"
                );
                dirty = true;
            }
            windows.push(window);
        }

        Ok((windows, dirty))
    }

    /// Would `usage` fit in every window? Reads only.
    pub async fn check_and_reserve(
        &self,
        principal: &PrincipalId,
        usage: Usage,
    ) -> Result<QuotaCheck> {
        usage.validate()?;
        let now = self.clock.now();
        let (windows, _) = self.current_windows(principal, now).await?;

        let blocking = windows
            .iter()
            .filter(|w| w.would_exceed(usage))
            .map(|w| w.window_type)
            .min();
        let remaining = windows
            .iter()
            .map(QuotaWindow::remaining)
            .fold(Remaining::default(), Remaining::min);

        Ok(QuotaCheck {
            allowed: blocking.is_none(),
            remaining,
            blocking,
        })
    }

    /// Add `usage` to every window of the principal.
    ///
    /// Usage is recorded even when it overshoots a limit; the returned status
    /// reports the violation. A zero amount still persists any rollover.
    pub async fn commit(&self, principal: &PrincipalId, usage: Usage) -> Result<QuotaStatus> {
        usage.validate()?;
        let _guard = self.locks.lock(principal.as_str()).await;
        let now = self.clock.now();
        let (mut windows, rolled) = self.current_windows(principal, now).await?;

        let is_zero = usage == Usage::zero(usage.metric());
        if !is_zero {
            for window in windows.iter_mut() {
                window.apply(usage);
            }
        }
        if rolled || !is_zero {
            self.store.save_windows(&windows).await?;
        }

        let status = QuotaStatus::of_windows(&windows);
        if let QuotaStatus::Exceeded(scope) = status {
            warn!(principal = %principal, window = %scope, "Quota exceeded");
        }
        Ok(status)
    }

    /// Give back usage committed by an operation that failed afterwards
    pub async fn refund(&self, principal: &PrincipalId, usage: Usage) -> Result<()> {
        usage.validate()?;
        let _guard = self.locks.lock(principal.as_str()).await;
        let now = self.clock.now();
        let (mut windows, _) = self.current_windows(principal, now).await?;

        for window in windows.iter_mut() {
            window.unapply(usage);
        }
        self.store.save_windows(&windows).await?;
        info!(principal = %principal, usage = ?usage, "Quota usage refunded");
        Ok(())
    }

    /// Current status without recording anything
    pub async fn status(&self, principal: &PrincipalId) -> Result<QuotaStatus> {
        let now = self.clock.now();
        let (windows, _) = self.current_windows(principal, now).await?;
        Ok(QuotaStatus::of_windows(&windows))
    }

    /// Rolled view of every window, shortest first
    pub async fn snapshot(&self, principal: &PrincipalId) -> Result<Vec<QuotaWindow>> {
        let now = self.clock.now();
        let (windows, _) = self.current_windows(principal, now).await?;
        Ok(windows)
    }

    /// Replace the limits of one window, keeping its consumption
    pub async fn adjust_limits(
        &self,
        principal: &PrincipalId,
        window_type: WindowType,
        limits: QuotaLimits,
    ) -> Result<QuotaWindow> {
        limits.validate()?;
        let _guard = self.locks.lock(principal.as_str()).await;
        let now = self.clock.now();
        let (mut windows, _) = self.current_windows(principal, now).await?;

        for window in windows.iter_mut().filter(|w| w.window_type == window_type) {
            window.limits = limits;
        }
        self.store.save_windows(&windows).await?;

        info!(
            principal = %principal,
            window = %window_type,
            data_mb = ?limits.data.map(|d| d.as_mb()),
            time_minutes = ?limits.minutes,
            "Quota limits adjusted"
        );

        windows
            .into_iter()
            .find(|w| w.window_type == window_type)
            .ok_or_else(|| GateError::Storage("window missing after load".to_string()))
    }

    /// Drop lock entries nobody holds
    pub fn prune_locks(&self) -> usize {
        self.locks.prune_idle()
    }
}
