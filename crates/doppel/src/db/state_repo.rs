//! Service state repository holding collector resume points.
//!
//! One row per collector service name. The resume point is an opaque
//! string owned by the collector (a post id, a file path).

use rusqlite::params;

use super::{Database, DatabaseError};

/// Returns the stored resume point for a service, if any.
pub fn resume_point(db: &Database, name: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT resume_point FROM service_states WHERE name = ?1")?;
        let mut rows = stmt.query_map(params![name], |row| row.get::<_, Option<String>>(0))?;
        match rows.next() {
            Some(Ok(point)) => Ok(point),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Stores (or overwrites) the resume point for a service.
pub fn set_resume_point(
    db: &Database,
    name: &str,
    resume_point: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO service_states (name, resume_point) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET resume_point = excluded.resume_point",
            params![name, resume_point],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_resume_point_absent() {
        let db = test_db();
        assert!(resume_point(&db, "booru").unwrap().is_none());
    }

    #[test]
    fn test_set_and_get_resume_point() {
        let db = test_db();
        set_resume_point(&db, "booru", "4100").unwrap();
        assert_eq!(resume_point(&db, "booru").unwrap().as_deref(), Some("4100"));
    }

    #[test]
    fn test_set_overwrites_previous_point() {
        let db = test_db();
        set_resume_point(&db, "booru", "4100").unwrap();
        set_resume_point(&db, "booru", "4200").unwrap();
        assert_eq!(resume_point(&db, "booru").unwrap().as_deref(), Some("4200"));

        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM service_states", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_services_are_independent() {
        let db = test_db();
        set_resume_point(&db, "booru", "4100").unwrap();
        set_resume_point(&db, "archive", "/mnt/photos/z.png").unwrap();

        assert_eq!(resume_point(&db, "booru").unwrap().as_deref(), Some("4100"));
        assert_eq!(
            resume_point(&db, "archive").unwrap().as_deref(),
            Some("/mnt/photos/z.png")
        );
    }
}
