//! Conditional increments on `quota_counters`.

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::{encode_timestamp, Database, StoreError};
use crate::models::{Charge, QuotaScope};

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Applies every charge or none of them.
///
/// Each charge is a conditional upsert that only writes when the new total
/// stays within the ceiling. The whole batch runs in one `BEGIN IMMEDIATE`
/// transaction, which is rolled back as soon as one charge does not fit.
pub fn try_charge(db: &Database, charges: &[Charge]) -> Result<bool, StoreError> {
    if charges.iter().any(|c| c.cost > c.ceiling) {
        return Ok(false);
    }

    db.with_conn(|conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for charge in charges {
            let applied = tx.execute(
                "INSERT INTO quota_counters (scope, bucket_start, used) VALUES (?1, ?2, ?3)
                 ON CONFLICT(scope, bucket_start) DO UPDATE SET used = used + excluded.used
                 WHERE used + excluded.used <= ?4",
                params![
                    charge.scope.as_str(),
                    encode_timestamp(&charge.bucket_start),
                    to_sql_int(charge.cost),
                    to_sql_int(charge.ceiling),
                ],
            )?;
            if applied == 0 {
                // Dropping the transaction rolls back earlier charges.
                return Ok(false);
            }
        }
        tx.commit()?;
        Ok(true)
    })
}

/// Reads one counter, zero when absent.
pub fn find_count(
    db: &Database,
    scope: QuotaScope,
    bucket_start: &DateTime<Utc>,
) -> Result<u64, StoreError> {
    db.with_conn(|conn| {
        let used: Option<u64> = conn
            .query_row(
                "SELECT used FROM quota_counters WHERE scope = ?1 AND bucket_start = ?2",
                params![scope.as_str(), encode_timestamp(bucket_start)],
                |r| r.get(0),
            )
            .optional()?;
        Ok(used.unwrap_or(0))
    })
}

/// Deletes counters of `scope` whose bucket started before `before`.
pub fn delete_before(
    db: &Database,
    scope: QuotaScope,
    before: &DateTime<Utc>,
) -> Result<u64, StoreError> {
    db.with_conn(|conn| {
        // Whole-second UTC RFC 3339 text sorts chronologically.
        let deleted = conn.execute(
            "DELETE FROM quota_counters WHERE scope = ?1 AND bucket_start < ?2",
            params![scope.as_str(), encode_timestamp(&before.trunc_subsecs(0))],
        )?;
        Ok(deleted as u64)
    })
}
