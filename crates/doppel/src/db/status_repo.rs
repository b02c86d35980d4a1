//! Status report repository, upsert keyed by (source, link).
//!
//! Each crawled item has exactly one row. Re-processing the same item
//! overwrites the previous row, so replayed deliveries are absorbed
//! without growing the table.

use rusqlite::{params, Row};

use crate::messages::{ImageStatus, StatusReport};

use super::{Database, DatabaseError};

/// A raw status row from the database.
#[derive(Debug, Clone)]
pub struct StatusRow {
    pub source: String,
    pub link: String,
    pub timestamp: String,
    pub service_name: String,
    pub status: String,
    pub message: String,
}

impl StatusRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            source: row.get("source")?,
            link: row.get("link")?,
            timestamp: row.get("timestamp")?,
            service_name: row.get("service_name")?,
            status: row.get("status")?,
            message: row.get("message")?,
        })
    }
}

/// Inserts or overwrites the status row for the report's (source, link).
pub fn upsert(db: &Database, report: &StatusReport) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO status_reports (source, link, timestamp, service_name, status, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (source, link) DO UPDATE SET
                 timestamp = excluded.timestamp,
                 service_name = excluded.service_name,
                 status = excluded.status,
                 message = excluded.message",
            params![
                report.source.as_str(),
                report.link.as_str(),
                report.timestamp.to_rfc3339(),
                report.service_name,
                report.status.as_str(),
                report.message,
            ],
        )?;
        Ok(())
    })
}

/// Finds the status row for a (source, link) pair.
pub fn find(db: &Database, source: &str, link: &str) -> Result<Option<StatusRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM status_reports WHERE source = ?1 AND link = ?2")?;
        let mut rows = stmt.query_map(params![source, link], StatusRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns the most recently updated rows, newest first.
pub fn recent(db: &Database, limit: u32) -> Result<Vec<StatusRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM status_reports ORDER BY timestamp DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit], StatusRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    })
}

/// Counts status rows in the given state.
pub fn count_by_status(db: &Database, status: ImageStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM status_reports WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
