//! Offline earnings reconciliation.
//!
//! Run once per session start, after the saved game has been applied and
//! before the sync scheduler is built. The scheduler takes a
//! [`ReconciliationReceipt`], which only exists once the computed reward has
//! been accepted or discarded; a save can therefore never overwrite the
//! server's last-update timestamp while a reward is still undecided.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;

use super::{SnapshotConsumer, OFFLINE_GRACE_SECS};

/// Reward computed from time spent offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineEarnings {
    pub amount: u64,
    pub resolved: bool,
}

/// Proof that offline earnings were resolved for this session.
#[derive(Debug, PartialEq, Eq)]
pub struct ReconciliationReceipt {
    earnings: OfflineEarnings,
    applied: bool,
}

impl ReconciliationReceipt {
    fn settled(amount: u64, applied: bool) -> Self {
        Self {
            earnings: OfflineEarnings {
                amount,
                resolved: true,
            },
            applied,
        }
    }

    pub fn earnings(&self) -> OfflineEarnings {
        self.earnings
    }

    /// Whether a reward was credited to the game state.
    pub fn applied(&self) -> bool {
        self.applied
    }
}

/// A non-zero reward waiting for the player to accept or discard it.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "offline earnings must be accepted or discarded before saving can start"]
pub struct PendingOfflineEarnings {
    amount: u64,
    elapsed_secs: i64,
}

impl PendingOfflineEarnings {
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn elapsed_secs(&self) -> i64 {
        self.elapsed_secs
    }

    pub fn earnings(&self) -> OfflineEarnings {
        OfflineEarnings {
            amount: self.amount,
            resolved: false,
        }
    }

    /// Credit the reward to the game state and resolve.
    pub fn accept<C>(self, consumer: &C) -> ReconciliationReceipt
    where
        C: SnapshotConsumer + ?Sized,
    {
        consumer.apply_offline_reward(self.amount);
        debug!("[OfflineEarnings] Accepted reward of {}", self.amount);
        ReconciliationReceipt::settled(self.amount, true)
    }

    /// Drop the reward and resolve.
    pub fn discard(self) -> ReconciliationReceipt {
        debug!("[OfflineEarnings] Discarded reward of {}", self.amount);
        ReconciliationReceipt::settled(self.amount, false)
    }
}

/// Outcome of reconciling offline time.
///
/// Only reconciliation produces one, so a receipt always stands for a
/// completed decision:
///
/// ```compile_fail
/// let _ = tapvault_core::sync::Reconciliation::nothing_owed();
/// ```
#[derive(Debug, PartialEq, Eq)]
pub enum Reconciliation {
    /// Nothing to decide; saving may start right away.
    Settled(ReconciliationReceipt),
    /// The player must accept or discard the reward first.
    Pending(PendingOfflineEarnings),
}

impl Reconciliation {
    /// Receipt for sessions that need no player decision.
    pub(crate) fn nothing_owed() -> Self {
        Self::Settled(ReconciliationReceipt::settled(0, false))
    }

    /// The receipt if already settled, otherwise the pending reward.
    pub fn into_receipt(self) -> Result<ReconciliationReceipt, PendingOfflineEarnings> {
        match self {
            Self::Settled(receipt) => Ok(receipt),
            Self::Pending(pending) => Err(pending),
        }
    }
}

/// Parse a server `lastUpdateTime`.
///
/// Accepts RFC 3339 and offset-less `YYYY-MM-DDTHH:MM:SS[.fff]` or
/// `YYYY-MM-DD HH:MM:SS[.fff]`, which are read as UTC.
pub fn parse_server_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Whole seconds between `last_update` and `now`, if the timestamp parses.
pub fn offline_elapsed_secs(last_update: Option<&str>, now: DateTime<Utc>) -> Option<i64> {
    let last = parse_server_timestamp(last_update?)?;
    Some((now - last).num_seconds())
}

/// Reward for `elapsed_secs` offline at `per_second_rate`, with a grace window.
pub fn offline_reward_for(elapsed_secs: i64, per_second_rate: f64, grace_secs: i64) -> u64 {
    if elapsed_secs <= grace_secs || elapsed_secs < 0 {
        return 0;
    }
    if !per_second_rate.is_finite() || per_second_rate <= 0.0 {
        return 0;
    }
    let reward = (per_second_rate * elapsed_secs as f64).floor();
    if reward >= u64::MAX as f64 {
        u64::MAX
    } else {
        reward as u64
    }
}

/// Compute the offline reward for a session start.
pub fn compute_offline_reward(
    last_update: Option<&str>,
    now: DateTime<Utc>,
    per_second_rate: f64,
) -> u64 {
    offline_elapsed_secs(last_update, now)
        .map(|elapsed| offline_reward_for(elapsed, per_second_rate, OFFLINE_GRACE_SECS))
        .unwrap_or(0)
}

/// Reconcile offline time using the default grace window.
pub fn reconcile_offline_earnings(
    last_update: Option<&str>,
    now: DateTime<Utc>,
    per_second_rate: f64,
) -> Reconciliation {
    reconcile_offline_earnings_with_grace(last_update, now, per_second_rate, OFFLINE_GRACE_SECS)
}

pub fn reconcile_offline_earnings_with_grace(
    last_update: Option<&str>,
    now: DateTime<Utc>,
    per_second_rate: f64,
    grace_secs: i64,
) -> Reconciliation {
    let Some(elapsed_secs) = offline_elapsed_secs(last_update, now) else {
        debug!("[OfflineEarnings] No usable last update time; nothing owed");
        return Reconciliation::nothing_owed();
    };

    let amount = offline_reward_for(elapsed_secs, per_second_rate, grace_secs);
    if amount == 0 {
        debug!(
            "[OfflineEarnings] Offline for {}s; below threshold or no income",
            elapsed_secs
        );
        return Reconciliation::nothing_owed();
    }

    debug!(
        "[OfflineEarnings] Offline for {}s at {}/s; reward {} pending",
        elapsed_secs, per_second_rate, amount
    );
    Reconciliation::Pending(PendingOfflineEarnings {
        amount,
        elapsed_secs,
    })
}
