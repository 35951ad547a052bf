//! Dual-window quota limiter.
//!
//! Every remote call is paid for up front from two counters: one per UTC
//! day shared by everybody using the store (GLOBAL) and one per second
//! (CALLER). A reservation is granted only when it fits under both
//! ceilings, and a rejected reservation leaves both counters untouched.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, SubsecRound, TimeDelta, Utc};
use thiserror::Error;

use crate::config::QuotaConfig;
use crate::db::StoreError;
use crate::models::{Charge, QuotaScope};
use crate::store::CounterStore;

#[derive(Error, Debug)]
pub enum QuotaError {
    /// The cost alone is larger than a ceiling and can never be granted.
    #[error("Cost {cost} exceeds the {scope} ceiling of {ceiling}")]
    CostExceedsCeiling {
        scope: QuotaScope,
        cost: u64,
        ceiling: u64,
    },

    #[error("Quota counter storage failed: {0}")]
    Store(#[from] StoreError),
}

/// Start of the GLOBAL window containing `now`.
pub fn day_bucket(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Start of the CALLER window containing `now`.
pub fn second_bucket(now: DateTime<Utc>) -> DateTime<Utc> {
    now.trunc_subsecs(0)
}

#[derive(Clone)]
pub struct QuotaLimiter {
    counters: Arc<dyn CounterStore>,
    daily_ceiling: u64,
    per_second_ceiling: u64,
    backoff: Duration,
}

impl QuotaLimiter {
    pub fn new(counters: Arc<dyn CounterStore>, config: &QuotaConfig) -> Self {
        Self {
            counters,
            daily_ceiling: config.daily_ceiling,
            per_second_ceiling: config.per_second_ceiling,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Tries to reserve `cost` units in the windows containing the current time.
    pub fn reserve(&self, cost: u64) -> Result<bool, QuotaError> {
        self.reserve_at(cost, Utc::now())
    }

    /// Tries to reserve `cost` units in the windows containing `now`.
    pub fn reserve_at(&self, cost: u64, now: DateTime<Utc>) -> Result<bool, QuotaError> {
        let charges = [
            Charge {
                scope: QuotaScope::Global,
                bucket_start: day_bucket(now),
                cost,
                ceiling: self.daily_ceiling,
            },
            Charge {
                scope: QuotaScope::Caller,
                bucket_start: second_bucket(now),
                cost,
                ceiling: self.per_second_ceiling,
            },
        ];

        if let Some(charge) = charges.iter().find(|c| c.cost > c.ceiling) {
            return Err(QuotaError::CostExceedsCeiling {
                scope: charge.scope,
                cost,
                ceiling: charge.ceiling,
            });
        }

        Ok(self.counters.try_charge(&charges)?)
    }

    /// Blocks until `cost` units were reserved, sleeping the fixed backoff
    /// between attempts.
    pub fn wait_for_reservation(&self, cost: u64) -> Result<(), QuotaError> {
        let mut attempts: u64 = 0;
        while !self.reserve(cost)? {
            attempts += 1;
            log::debug!(
                "Quota exhausted, backing off {:?} (attempt {})",
                self.backoff,
                attempts
            );
            thread::sleep(self.backoff);
        }
        Ok(())
    }

    /// Deletes counters whose window ended more than one window before `now`.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, QuotaError> {
        let global = self
            .counters
            .prune(QuotaScope::Global, day_bucket(now) - TimeDelta::days(1))?;
        let caller = self
            .counters
            .prune(QuotaScope::Caller, second_bucket(now) - TimeDelta::minutes(1))?;
        if global + caller > 0 {
            log::debug!("Pruned {} expired quota counters", global + caller);
        }
        Ok(global + caller)
    }
}
