//! Per-student statistics over the attempt ledger.
//!
//! The ledger (`student_question_attempts`) is the source of truth; the
//! `student_stats` table is a derived cache kept in sync inside the same
//! transaction as each attempt insert, and fully recomputable with
//! [`rebuild_student`] at any time.

use rusqlite::Connection;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsType {
    Concept,
    SubUnit,
    Unit,
    Grade,
    Level,
    Overall,
}

impl StatsType {
    pub const ALL: [StatsType; 6] = [
        StatsType::Concept,
        StatsType::SubUnit,
        StatsType::Unit,
        StatsType::Grade,
        StatsType::Level,
        StatsType::Overall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatsType::Concept => "CONCEPT",
            StatsType::SubUnit => "SUB_UNIT",
            StatsType::Unit => "UNIT",
            StatsType::Grade => "GRADE",
            StatsType::Level => "LEVEL",
            StatsType::Overall => "OVERALL",
        }
    }

    pub fn parse(s: &str) -> ServiceResult<StatsType> {
        match s {
            "CONCEPT" => Ok(StatsType::Concept),
            "SUB_UNIT" => Ok(StatsType::SubUnit),
            "UNIT" => Ok(StatsType::Unit),
            "GRADE" => Ok(StatsType::Grade),
            "LEVEL" => Ok(StatsType::Level),
            "OVERALL" => Ok(StatsType::Overall),
            other => Err(ServiceError::BadParams(format!(
                "unknown statsType: {}",
                other
            ))),
        }
    }

    /// Ledger column holding this rollup's entity id; None for OVERALL.
    pub fn ledger_column(self) -> Option<&'static str> {
        match self {
            StatsType::Concept => Some("concept_id"),
            StatsType::SubUnit => Some("sub_unit_id"),
            StatsType::Unit => Some("unit_id"),
            StatsType::Grade => Some("grade_id"),
            StatsType::Level => Some("level_id"),
            StatsType::Overall => None,
        }
    }
}

pub fn correct_rate(attempt_count: i64, correct_count: i64) -> f64 {
    if attempt_count == 0 {
        0.0
    } else {
        correct_count as f64 * 100.0 / attempt_count as f64
    }
}

/// Fold one attempt into the cache row for (student, stats_type, entity).
/// Must run inside the same transaction as the ledger insert. OVERALL rows
/// are keyed with entity_id = ''.
pub fn apply_attempt(
    conn: &Connection,
    student_id: &str,
    stats_type: StatsType,
    entity_id: Option<&str>,
    is_correct: bool,
) -> rusqlite::Result<()> {
    let correct = if is_correct { 1i64 } else { 0i64 };
    conn.execute(
        "INSERT INTO student_stats(
           id, student_id, stats_type, entity_id,
           attempt_count, correct_count, correct_rate, last_updated
         ) VALUES(?, ?, ?, ?, 1, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(student_id, stats_type, entity_id) DO UPDATE SET
           attempt_count = attempt_count + 1,
           correct_count = correct_count + excluded.correct_count,
           correct_rate = (correct_count + excluded.correct_count) * 100.0
                          / (attempt_count + 1),
           last_updated = excluded.last_updated",
        (
            Uuid::new_v4().to_string(),
            student_id,
            stats_type.as_str(),
            entity_id.unwrap_or(""),
            correct,
            correct_rate(1, correct),
        ),
    )?;
    Ok(())
}

/// Drop and recompute every cache row for one student from the ledger.
/// Idempotent; safe to run at any time.
pub fn rebuild_student(conn: &Connection, student_id: &str) -> ServiceResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM student_stats WHERE student_id = ?", [student_id])?;

    for stats_type in StatsType::ALL {
        match stats_type.ledger_column() {
            Some(col) => {
                let groups: Vec<(String, i64, i64)> = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {}, COUNT(*), COALESCE(SUM(is_correct), 0)
                         FROM student_question_attempts
                         WHERE student_id = ? AND {} IS NOT NULL
                         GROUP BY {}",
                        col, col, col
                    ))?;
                    let rows = stmt
                        .query_map([student_id], |r| {
                            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                };
                for (entity_id, attempts, correct) in groups {
                    insert_stats_row(&tx, student_id, stats_type, &entity_id, attempts, correct)?;
                }
            }
            None => {
                let (attempts, correct): (i64, i64) = tx.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(is_correct), 0)
                     FROM student_question_attempts
                     WHERE student_id = ?",
                    [student_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?;
                if attempts > 0 {
                    insert_stats_row(&tx, student_id, stats_type, "", attempts, correct)?;
                }
            }
        }
    }

    tx.commit()?;
    Ok(())
}

fn insert_stats_row(
    conn: &Connection,
    student_id: &str,
    stats_type: StatsType,
    entity_id: &str,
    attempts: i64,
    correct: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO student_stats(
           id, student_id, stats_type, entity_id,
           attempt_count, correct_count, correct_rate, last_updated
         ) VALUES(?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            Uuid::new_v4().to_string(),
            student_id,
            stats_type.as_str(),
            entity_id,
            attempts,
            correct,
            correct_rate(attempts, correct),
        ),
    )?;
    Ok(())
}

/// Item analysis for one question: distinct students who attempted it and
/// distinct students with at least one correct attempt.
pub fn question_item_stats(
    conn: &Connection,
    question_id: &str,
) -> ServiceResult<(i64, i64, f64)> {
    let attempted: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT student_id)
         FROM student_question_attempts
         WHERE question_id = ?",
        [question_id],
        |r| r.get(0),
    )?;
    let correct: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT student_id)
         FROM student_question_attempts
         WHERE question_id = ? AND is_correct = 1",
        [question_id],
        |r| r.get(0),
    )?;
    Ok((attempted, correct, correct_rate(attempted, correct)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        crate::db::init_schema(&conn).expect("init schema");
        conn.execute(
            "INSERT INTO users(id, username, email, password_hash, full_name, role, active)
             VALUES('s1', 'kim', 'kim@example.com', 'x', 'Kim', 'STUDENT', 1)",
            [],
        )
        .expect("insert user");
        conn
    }

    fn record(conn: &Connection, correct: bool, concept: Option<&str>, level: Option<&str>) {
        let tx = conn.unchecked_transaction().expect("tx");
        tx.execute(
            "INSERT INTO student_question_attempts(
               id, student_id, question_id, is_correct, user_answer, attempted_at,
               concept_id, level_id
             ) VALUES(?, 's1', 'q1', ?, 'ans', strftime('%Y-%m-%dT%H:%M:%SZ','now'), ?, ?)",
            (
                Uuid::new_v4().to_string(),
                correct as i64,
                concept,
                level,
            ),
        )
        .expect("insert attempt");
        if let Some(c) = concept {
            apply_attempt(&tx, "s1", StatsType::Concept, Some(c), correct).expect("concept");
        }
        if let Some(l) = level {
            apply_attempt(&tx, "s1", StatsType::Level, Some(l), correct).expect("level");
        }
        apply_attempt(&tx, "s1", StatsType::Overall, None, correct).expect("overall");
        tx.commit().expect("commit");
    }

    fn cache_row(conn: &Connection, stats_type: StatsType, entity: &str) -> (i64, i64, f64) {
        conn.query_row(
            "SELECT attempt_count, correct_count, correct_rate
             FROM student_stats
             WHERE student_id = 's1' AND stats_type = ? AND entity_id = ?",
            (stats_type.as_str(), entity),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .expect("cache row")
    }

    #[test]
    fn rate_is_zero_without_attempts() {
        assert_eq!(correct_rate(0, 0), 0.0);
    }

    #[test]
    fn rate_is_percentage() {
        assert_eq!(correct_rate(4, 3), 75.0);
        assert_eq!(correct_rate(3, 3), 100.0);
    }

    #[test]
    fn incremental_upserts_accumulate() {
        let conn = test_conn();
        record(&conn, true, Some("c1"), Some("l1"));
        record(&conn, false, Some("c1"), Some("l1"));
        record(&conn, true, Some("c2"), Some("l1"));

        assert_eq!(cache_row(&conn, StatsType::Concept, "c1"), (2, 1, 50.0));
        assert_eq!(cache_row(&conn, StatsType::Concept, "c2"), (1, 1, 100.0));
        assert_eq!(cache_row(&conn, StatsType::Level, "l1"), (3, 2, 200.0 / 3.0));
        assert_eq!(cache_row(&conn, StatsType::Overall, ""), (3, 2, 200.0 / 3.0));
    }

    #[test]
    fn rebuild_matches_incremental_cache() {
        let conn = test_conn();
        record(&conn, true, Some("c1"), Some("l1"));
        record(&conn, false, None, Some("l1"));
        record(&conn, false, Some("c1"), Some("l1"));
        record(&conn, true, Some("c2"), None);

        let before: Vec<(String, String, i64, i64, f64)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT stats_type, entity_id, attempt_count, correct_count, correct_rate
                     FROM student_stats
                     WHERE student_id = 's1'
                     ORDER BY stats_type, entity_id",
                )
                .expect("prepare");
            stmt.query_map([], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
            })
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("collect")
        };

        rebuild_student(&conn, "s1").expect("rebuild");

        let after: Vec<(String, String, i64, i64, f64)> = {
            let mut stmt = conn
                .prepare(
                    "SELECT stats_type, entity_id, attempt_count, correct_count, correct_rate
                     FROM student_stats
                     WHERE student_id = 's1'
                     ORDER BY stats_type, entity_id",
                )
                .expect("prepare");
            stmt.query_map([], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
            })
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("collect")
        };

        assert_eq!(before, after);
        // Rebuild twice: idempotent.
        rebuild_student(&conn, "s1").expect("rebuild again");
        let again = {
            let mut stmt = conn
                .prepare(
                    "SELECT stats_type, entity_id, attempt_count, correct_count, correct_rate
                     FROM student_stats
                     WHERE student_id = 's1'
                     ORDER BY stats_type, entity_id",
                )
                .expect("prepare");
            stmt.query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, f64>(4)?,
                ))
            })
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("collect")
        };
        assert_eq!(after, again);
    }

    #[test]
    fn item_stats_count_distinct_students() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO users(id, username, email, password_hash, full_name, role, active)
             VALUES('s2', 'lee', 'lee@example.com', 'x', 'Lee', 'STUDENT', 1)",
            [],
        )
        .expect("second user");
        for (student, correct) in [("s1", 0), ("s1", 1), ("s2", 0)] {
            conn.execute(
                "INSERT INTO student_question_attempts(
                   id, student_id, question_id, is_correct, attempted_at
                 ) VALUES(?, ?, 'q9', ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
                (Uuid::new_v4().to_string(), student, correct),
            )
            .expect("attempt");
        }

        let (attempted, correct, rate) =
            question_item_stats(&conn, "q9").expect("item stats");
        assert_eq!(attempted, 2);
        assert_eq!(correct, 1);
        assert_eq!(rate, 50.0);

        let (a0, c0, r0) = question_item_stats(&conn, "missing").expect("empty");
        assert_eq!((a0, c0, r0), (0, 0, 0.0));
    }
}
