//! State transitions over the `jobs` table.

use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use super::{decode_timestamp, encode_timestamp, Database, StoreError};
use crate::models::{ClaimQuery, JobRecord, JobStatus, ReportRow, RequeueSummary};
use crate::store::{validate_advance, validate_new};

const RECORD_COLUMNS: &str = "id, status, from_addr, to_addr, created";

fn record_from_row(row: &Row<'_>) -> Result<JobRecord, rusqlite::Error> {
    let status: String = row.get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    let created: Option<String> = row.get("created")?;
    let created = created
        .as_deref()
        .map(decode_timestamp)
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(JobRecord {
        id: row.get("id")?,
        status,
        from: row.get("from_addr")?,
        to: row.get("to_addr")?,
        created,
    })
}

/// Inserts a new `NEW` record, failing with `Duplicate` if the id exists.
pub fn insert(db: &Database, record: &JobRecord) -> Result<(), StoreError> {
    validate_new(record)?;
    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT INTO jobs (id, status) VALUES (?1, ?2) ON CONFLICT(id) DO NOTHING",
            params![record.id, JobStatus::New.as_str()],
        )?;
        if inserted == 0 {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        Ok(())
    })
}

/// Moves the oldest record matching `query` into `target` in one statement.
pub fn claim_one(
    db: &Database,
    query: &ClaimQuery,
    target: JobStatus,
) -> Result<Option<JobRecord>, StoreError> {
    db.with_conn(|conn| {
        let claimed = match query {
            ClaimQuery::Any(source) => conn
                .query_row(
                    &format!(
                        "UPDATE jobs SET status = ?1
                         WHERE seq = (SELECT seq FROM jobs WHERE status = ?2 ORDER BY seq LIMIT 1)
                         RETURNING {RECORD_COLUMNS}"
                    ),
                    params![target.as_str(), source.as_str()],
                    record_from_row,
                )
                .optional()?,
            ClaimQuery::BySender { source, sender } => conn
                .query_row(
                    &format!(
                        "UPDATE jobs SET status = ?1
                         WHERE seq = (SELECT seq FROM jobs WHERE status = ?2 AND from_addr = ?3
                                      ORDER BY seq LIMIT 1)
                         RETURNING {RECORD_COLUMNS}"
                    ),
                    params![target.as_str(), source.as_str(), sender],
                    record_from_row,
                )
                .optional()?,
        };
        Ok(claimed)
    })
}

/// Writes the record into its status partition if it is still in the
/// in-progress predecessor partition.
pub fn advance(db: &Database, record: &JobRecord) -> Result<bool, StoreError> {
    let predecessor = validate_advance(record)?;
    let created = record.created.as_ref().map(encode_timestamp);
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE jobs SET status = ?2, from_addr = ?3, to_addr = ?4, created = ?5
             WHERE id = ?1 AND status = ?6",
            params![
                record.id,
                record.status.as_str(),
                record.from,
                record.to,
                created,
                predecessor.as_str(),
            ],
        )?;
        Ok(updated > 0)
    })
}

/// Deletes a record on the delete path. Missing ids are ignored.
pub fn remove(db: &Database, id: &str) -> Result<(), StoreError> {
    db.with_conn(|conn| {
        conn.execute(
            "DELETE FROM jobs WHERE id = ?1 AND status IN (?2, ?3)",
            params![id, JobStatus::Fetched.as_str(), JobStatus::Deleting.as_str()],
        )?;
        Ok(())
    })
}

/// Sender counts over `FETCHED`, most frequent first, ties by sender.
pub fn summarize(db: &Database, limit: usize) -> Result<Vec<ReportRow>, StoreError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT from_addr, COUNT(*) AS total FROM jobs WHERE status = ?1
             GROUP BY from_addr ORDER BY total DESC, from_addr ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![JobStatus::Fetched.as_str(), limit], |row| {
                Ok(ReportRow {
                    from: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts records in one partition.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, StoreError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Finds a record by its id, whatever its partition.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRecord>, StoreError> {
    db.with_conn(|conn| {
        let found = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                record_from_row,
            )
            .optional()?;
        Ok(found)
    })
}

/// Returns `FETCHING` records to `NEW` and `DELETING` records to `FETCHED`.
pub fn requeue_stale(db: &Database) -> Result<RequeueSummary, StoreError> {
    db.with_conn(|conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let fetching = tx.execute(
            "UPDATE jobs SET status = ?1, from_addr = '', to_addr = '', created = NULL
             WHERE status = ?2",
            params![JobStatus::New.as_str(), JobStatus::Fetching.as_str()],
        )?;
        let deleting = tx.execute(
            "UPDATE jobs SET status = ?1 WHERE status = ?2",
            params![JobStatus::Fetched.as_str(), JobStatus::Deleting.as_str()],
        )?;
        tx.commit()?;
        Ok(RequeueSummary {
            fetching: fetching as u64,
            deleting: deleting as u64,
        })
    })
}
