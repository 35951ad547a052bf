//! Sender frequency report over fetched records.

use std::io::{self, Write};

use crate::db::StoreError;
use crate::models::ReportRow;
use crate::store::JobStore;

pub const REPORT_HEADER: &str = "From,Count";

/// Loads the top `limit` senders.
pub fn summarize(jobs: &dyn JobStore, limit: usize) -> Result<Vec<ReportRow>, StoreError> {
    jobs.summarize(limit)
}

/// Writes the rows as `From,Count` lines, most frequent sender first.
pub fn write_report<W: Write>(out: &mut W, rows: &[ReportRow]) -> io::Result<()> {
    writeln!(out, "{REPORT_HEADER}")?;
    for row in rows {
        writeln!(out, "{},{}", row.from, row.count)?;
    }
    out.flush()
}
