use std::path::Path;

use anyhow::{bail, Result};
use chrono::NaiveTime;
use rusqlite::{params, Connection, OptionalExtension};

use crate::periods::parse_hhmm;

const DB_PATH: &str = "data/school.sqlite";

pub fn connect() -> Result<Connection> {
    if let Some(dir) = Path::new(DB_PATH).parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS floors (
            id     INTEGER PRIMARY KEY,
            name   TEXT NOT NULL,
            number INTEGER NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS classes (
            id       INTEGER PRIMARY KEY,
            name     TEXT NOT NULL,
            floor_id INTEGER NOT NULL REFERENCES floors(id) ON DELETE CASCADE,
            UNIQUE(name, floor_id)
        );
        CREATE INDEX IF NOT EXISTS idx_classes_floor ON classes(floor_id);

        CREATE TABLE IF NOT EXISTS teachers (
            id   INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS subjects (
            id   INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS schedules (
            id          INTEGER PRIMARY KEY,
            class_id    INTEGER NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
            teacher_id  INTEGER NOT NULL REFERENCES teachers(id),
            subject_id  INTEGER NOT NULL REFERENCES subjects(id),
            day_of_week INTEGER NOT NULL CHECK(day_of_week BETWEEN 0 AND 6),
            start_time  TEXT NOT NULL,
            end_time    TEXT NOT NULL,
            UNIQUE(class_id, day_of_week, start_time, end_time)
        );
        CREATE INDEX IF NOT EXISTS idx_schedules_teacher ON schedules(teacher_id);
        CREATE INDEX IF NOT EXISTS idx_schedules_subject ON schedules(subject_id);

        CREATE TABLE IF NOT EXISTS attendance (
            id           INTEGER PRIMARY KEY,
            schedule_id  INTEGER NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
            class_id     INTEGER NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
            teacher_id   INTEGER NOT NULL REFERENCES teachers(id),
            date         TEXT NOT NULL,
            status       TEXT NOT NULL CHECK(status IN ('Present','Late','Absent')),
            actual_time  TEXT,
            minutes_late INTEGER,
            notes        TEXT,
            UNIQUE(schedule_id, date)
        );
        CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
        ",
    )?;
    Ok(())
}

// ── Entity resolution ──

/// Get-or-create by floor number. Freshly created floors get the standard
/// localized display name.
pub fn get_or_create_floor(conn: &Connection, number: i64) -> Result<(i64, bool)> {
    let existing = conn
        .query_row("SELECT id FROM floors WHERE number = ?1", [number], |r| {
            r.get(0)
        })
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }
    conn.execute(
        "INSERT INTO floors (name, number) VALUES (?1, ?2)",
        params![format!("الطابق {number}"), number],
    )?;
    Ok((conn.last_insert_rowid(), true))
}

/// Class names are scoped per floor.
pub fn get_or_create_class(conn: &Connection, name: &str, floor_id: i64) -> Result<(i64, bool)> {
    let existing = conn
        .query_row(
            "SELECT id FROM classes WHERE name = ?1 AND floor_id = ?2",
            params![name, floor_id],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }
    conn.execute(
        "INSERT INTO classes (name, floor_id) VALUES (?1, ?2)",
        params![name, floor_id],
    )?;
    Ok((conn.last_insert_rowid(), true))
}

pub fn get_or_create_teacher(conn: &Connection, name: &str) -> Result<(i64, bool)> {
    let existing = conn
        .query_row("SELECT id FROM teachers WHERE name = ?1", [name], |r| {
            r.get(0)
        })
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }
    conn.execute("INSERT INTO teachers (name) VALUES (?1)", [name])?;
    Ok((conn.last_insert_rowid(), true))
}

pub fn get_or_create_subject(conn: &Connection, name: &str) -> Result<(i64, bool)> {
    let existing = conn
        .query_row("SELECT id FROM subjects WHERE name = ?1", [name], |r| {
            r.get(0)
        })
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }
    conn.execute("INSERT INTO subjects (name) VALUES (?1)", [name])?;
    Ok((conn.last_insert_rowid(), true))
}

// ── Schedules ──

pub struct ExistingSchedule {
    pub id: i64,
    pub teacher_id: i64,
    pub subject_id: i64,
}

/// Look up a schedule by its natural key (class, day, start, end).
pub fn find_schedule(
    conn: &Connection,
    class_id: i64,
    day: u8,
    start: &str,
    end: &str,
) -> Result<Option<ExistingSchedule>> {
    let row = conn
        .query_row(
            "SELECT id, teacher_id, subject_id FROM schedules
             WHERE class_id = ?1 AND day_of_week = ?2 AND start_time = ?3 AND end_time = ?4",
            params![class_id, day, start, end],
            |r| {
                Ok(ExistingSchedule {
                    id: r.get(0)?,
                    teacher_id: r.get(1)?,
                    subject_id: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn insert_schedule(
    conn: &Connection,
    class_id: i64,
    teacher_id: i64,
    subject_id: i64,
    day: u8,
    start: &str,
    end: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO schedules (class_id, teacher_id, subject_id, day_of_week, start_time, end_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![class_id, teacher_id, subject_id, day, start, end],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Drop every schedule belonging to the floor's classes. Callers wrap this
/// in a transaction so a failed clear leaves the old rows intact.
pub fn clear_floor_schedules(conn: &Connection, floor_id: i64) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM schedules
         WHERE class_id IN (SELECT id FROM classes WHERE floor_id = ?1)",
        [floor_id],
    )?;
    Ok(removed)
}

// ── Deletes (user-initiated; the import engine never deletes) ──

pub fn delete_floor(conn: &Connection, floor_id: i64) -> Result<()> {
    let n = conn.execute("DELETE FROM floors WHERE id = ?1", [floor_id])?;
    if n == 0 {
        bail!("floor {} not found", floor_id);
    }
    Ok(())
}

pub fn delete_class(conn: &Connection, class_id: i64) -> Result<()> {
    let n = conn.execute("DELETE FROM classes WHERE id = ?1", [class_id])?;
    if n == 0 {
        bail!("class {} not found", class_id);
    }
    Ok(())
}

/// Teachers referenced by any schedule may not be deleted.
pub fn delete_teacher(conn: &Connection, teacher_id: i64) -> Result<()> {
    let refs: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schedules WHERE teacher_id = ?1",
        [teacher_id],
        |r| r.get(0),
    )?;
    if refs > 0 {
        bail!("teacher {} is referenced by {} schedules", teacher_id, refs);
    }
    let n = conn.execute("DELETE FROM teachers WHERE id = ?1", [teacher_id])?;
    if n == 0 {
        bail!("teacher {} not found", teacher_id);
    }
    Ok(())
}

/// Same guard as teachers: never delete a subject in use.
pub fn delete_subject(conn: &Connection, subject_id: i64) -> Result<()> {
    let refs: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schedules WHERE subject_id = ?1",
        [subject_id],
        |r| r.get(0),
    )?;
    if refs > 0 {
        bail!("subject {} is referenced by {} schedules", subject_id, refs);
    }
    let n = conn.execute("DELETE FROM subjects WHERE id = ?1", [subject_id])?;
    if n == 0 {
        bail!("subject {} not found", subject_id);
    }
    Ok(())
}

// ── Verification ──

pub struct EntityCounts {
    pub floors: i64,
    pub classes: i64,
    pub teachers: i64,
    pub subjects: i64,
    pub schedules: i64,
}

pub fn entity_counts(conn: &Connection) -> Result<EntityCounts> {
    let count = |table: &str| -> Result<i64> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
    };
    Ok(EntityCounts {
        floors: count("floors")?,
        classes: count("classes")?,
        teachers: count("teachers")?,
        subjects: count("subjects")?,
        schedules: count("schedules")?,
    })
}

pub struct FloorSummary {
    pub name: String,
    pub number: i64,
    /// (class name, schedule count) per class on this floor.
    pub classes: Vec<(String, i64)>,
}

pub fn floor_summaries(conn: &Connection) -> Result<Vec<FloorSummary>> {
    let mut stmt = conn.prepare("SELECT id, name, number FROM floors ORDER BY number")?;
    let floors = stmt
        .query_map([], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut class_stmt = conn.prepare(
        "SELECT c.name, COUNT(s.id)
         FROM classes c LEFT JOIN schedules s ON s.class_id = c.id
         WHERE c.floor_id = ?1
         GROUP BY c.id ORDER BY c.name",
    )?;

    let mut summaries = Vec::with_capacity(floors.len());
    for (floor_id, name, number) in floors {
        let classes = class_stmt
            .query_map([floor_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        summaries.push(FloorSummary {
            name,
            number,
            classes,
        });
    }
    Ok(summaries)
}

/// (name, schedule count) for every teacher, by name.
pub fn teacher_usage(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT t.name, COUNT(s.id)
         FROM teachers t LEFT JOIN schedules s ON s.teacher_id = t.id
         GROUP BY t.id ORDER BY t.name",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn subject_usage(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT sub.name, COUNT(s.id)
         FROM subjects sub LEFT JOIN schedules s ON s.subject_id = sub.id
         GROUP BY sub.id ORDER BY sub.name",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn day_distribution(conn: &Connection) -> Result<[i64; 7]> {
    let mut dist = [0i64; 7];
    let mut stmt =
        conn.prepare("SELECT day_of_week, COUNT(*) FROM schedules GROUP BY day_of_week")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (day, count) in rows {
        if (0..7).contains(&day) {
            dist[day as usize] = count;
        }
    }
    Ok(dist)
}

/// One (class, day) group with its schedule start times in order, for the
/// missing-period report.
pub struct ClassDaySessions {
    pub floor_number: i64,
    pub class_name: String,
    pub day: u8,
    pub start_times: Vec<String>,
}

pub fn class_day_sessions(conn: &Connection) -> Result<Vec<ClassDaySessions>> {
    let mut stmt = conn.prepare(
        "SELECT f.number, c.name, s.day_of_week, s.start_time
         FROM schedules s
         JOIN classes c ON c.id = s.class_id
         JOIN floors f ON f.id = c.floor_id
         ORDER BY f.number, c.name, s.day_of_week, s.start_time",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut groups: Vec<ClassDaySessions> = Vec::new();
    for (floor_number, class_name, day, start) in rows {
        let day = day as u8;
        if let Some(g) = groups.last_mut() {
            if g.floor_number == floor_number && g.class_name == class_name && g.day == day {
                g.start_times.push(start);
                continue;
            }
        }
        groups.push(ClassDaySessions {
            floor_number,
            class_name,
            day,
            start_times: vec![start],
        });
    }
    Ok(groups)
}

// ── Attendance ──

pub struct ScheduleRef {
    pub id: i64,
    pub class_id: i64,
    pub teacher_id: i64,
    pub start_time: String,
}

pub fn schedule_ref(conn: &Connection, schedule_id: i64) -> Result<Option<ScheduleRef>> {
    let row = conn
        .query_row(
            "SELECT id, class_id, teacher_id, start_time FROM schedules WHERE id = ?1",
            [schedule_id],
            |r| {
                Ok(ScheduleRef {
                    id: r.get(0)?,
                    class_id: r.get(1)?,
                    teacher_id: r.get(2)?,
                    start_time: r.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Record attendance for one schedule on one date, replacing any earlier
/// record for that (schedule, date). Lateness is minutes past the scheduled
/// start, clamped at zero; it is only stored for Late with an arrival time.
pub fn record_attendance(
    conn: &Connection,
    schedule: &ScheduleRef,
    date: &str,
    status: &str,
    actual_time: Option<NaiveTime>,
    notes: &str,
) -> Result<Option<i64>> {
    let minutes_late = match (status, actual_time) {
        ("Late", Some(arrival)) => {
            let scheduled = parse_hhmm(&schedule.start_time)
                .ok_or_else(|| anyhow::anyhow!("schedule {} has bad start time", schedule.id))?;
            Some((arrival - scheduled).num_minutes().max(0))
        }
        _ => None,
    };
    let actual = match status {
        "Late" => actual_time.map(|t| t.format("%H:%M").to_string()),
        _ => None,
    };

    conn.execute(
        "INSERT OR REPLACE INTO attendance
         (schedule_id, class_id, teacher_id, date, status, actual_time, minutes_late, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            schedule.id,
            schedule.class_id,
            schedule.teacher_id,
            date,
            status,
            actual,
            minutes_late,
            notes,
        ],
    )?;
    Ok(minutes_late)
}

pub struct DailyAttendanceSummary {
    pub total: i64,
    pub present: i64,
    pub late: i64,
    pub absent: i64,
    pub total_minutes_late: i64,
}

pub fn daily_attendance_summary(conn: &Connection, date: &str) -> Result<DailyAttendanceSummary> {
    conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(status = 'Present'), 0),
                COALESCE(SUM(status = 'Late'), 0),
                COALESCE(SUM(status = 'Absent'), 0),
                COALESCE(SUM(minutes_late), 0)
         FROM attendance WHERE date = ?1",
        [date],
        |r| {
            Ok(DailyAttendanceSummary {
                total: r.get(0)?,
                present: r.get(1)?,
                late: r.get(2)?,
                absent: r.get(3)?,
                total_minutes_late: r.get(4)?,
            })
        },
    )
    .map_err(Into::into)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn floor_resolution_is_idempotent() {
        let conn = test_conn();
        let (id1, created1) = get_or_create_floor(&conn, 2).unwrap();
        let (id2, created2) = get_or_create_floor(&conn, 2).unwrap();
        assert!(created1);
        assert!(!created2);
        assert_eq!(id1, id2);

        let name: String = conn
            .query_row("SELECT name FROM floors WHERE id = ?1", [id1], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "الطابق 2");
    }

    #[test]
    fn class_resolution_scoped_by_floor() {
        let conn = test_conn();
        let (f1, _) = get_or_create_floor(&conn, 1).unwrap();
        let (f2, _) = get_or_create_floor(&conn, 2).unwrap();
        let (a, _) = get_or_create_class(&conn, "5A", f1).unwrap();
        let (b, _) = get_or_create_class(&conn, "5A", f2).unwrap();
        let (a_again, created) = get_or_create_class(&conn, "5A", f1).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a_again);
        assert!(!created);
    }

    #[test]
    fn teacher_and_subject_resolution() {
        let conn = test_conn();
        let (t1, c1) = get_or_create_teacher(&conn, "Mr. Ali").unwrap();
        let (t2, c2) = get_or_create_teacher(&conn, "Mr. Ali").unwrap();
        assert_eq!(t1, t2);
        assert!(c1 && !c2);

        let (s1, _) = get_or_create_subject(&conn, "Math").unwrap();
        let (s2, _) = get_or_create_subject(&conn, "Math").unwrap();
        assert_eq!(s1, s2);
    }

    fn seed_schedule(conn: &Connection) -> (i64, i64, i64) {
        let (floor, _) = get_or_create_floor(conn, 2).unwrap();
        let (class, _) = get_or_create_class(conn, "5A", floor).unwrap();
        let (teacher, _) = get_or_create_teacher(conn, "Mr. Ali").unwrap();
        let (subject, _) = get_or_create_subject(conn, "Math").unwrap();
        insert_schedule(conn, class, teacher, subject, 0, "08:30", "09:05").unwrap();
        (class, teacher, subject)
    }

    #[test]
    fn natural_key_is_unique() {
        let conn = test_conn();
        let (class, teacher, subject) = seed_schedule(&conn);
        // Same key, different teacher/subject still collides.
        let (other_t, _) = get_or_create_teacher(&conn, "Ms. Sara").unwrap();
        let err = insert_schedule(&conn, class, other_t, subject, 0, "08:30", "09:05");
        assert!(err.is_err());

        let found = find_schedule(&conn, class, 0, "08:30", "09:05").unwrap().unwrap();
        assert_eq!(found.teacher_id, teacher);
        assert!(find_schedule(&conn, class, 1, "08:30", "09:05").unwrap().is_none());
    }

    #[test]
    fn day_out_of_range_rejected() {
        let conn = test_conn();
        let (class, teacher, subject) = seed_schedule(&conn);
        assert!(insert_schedule(&conn, class, teacher, subject, 7, "09:05", "09:40").is_err());
    }

    #[test]
    fn clear_is_scoped_to_one_floor() {
        let conn = test_conn();
        seed_schedule(&conn);
        let (other_floor, _) = get_or_create_floor(&conn, 3).unwrap();
        let (other_class, _) = get_or_create_class(&conn, "7C", other_floor).unwrap();
        let (t, _) = get_or_create_teacher(&conn, "Ms. Sara").unwrap();
        let (s, _) = get_or_create_subject(&conn, "Science").unwrap();
        insert_schedule(&conn, other_class, t, s, 1, "08:30", "09:05").unwrap();

        let (floor2, _) = get_or_create_floor(&conn, 2).unwrap();
        let removed = clear_floor_schedules(&conn, floor2).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(entity_counts(&conn).unwrap().schedules, 1);
        assert!(find_schedule(&conn, other_class, 1, "08:30", "09:05").unwrap().is_some());
    }

    #[test]
    fn referenced_teacher_cannot_be_deleted() {
        let conn = test_conn();
        let (class, teacher, subject) = seed_schedule(&conn);
        assert!(delete_teacher(&conn, teacher).is_err());
        assert!(delete_subject(&conn, subject).is_err());
        // Teacher and schedule untouched by the failed delete.
        assert_eq!(entity_counts(&conn).unwrap().teachers, 1);
        assert_eq!(entity_counts(&conn).unwrap().schedules, 1);

        conn.execute("DELETE FROM schedules", []).unwrap();
        delete_teacher(&conn, teacher).unwrap();
        delete_subject(&conn, subject).unwrap();
        let _ = class;
    }

    #[test]
    fn floor_delete_cascades_to_classes_and_schedules() {
        let conn = test_conn();
        seed_schedule(&conn);
        let (floor, _) = get_or_create_floor(&conn, 2).unwrap();
        delete_floor(&conn, floor).unwrap();
        let counts = entity_counts(&conn).unwrap();
        assert_eq!(counts.floors, 0);
        assert_eq!(counts.classes, 0);
        assert_eq!(counts.schedules, 0);
        // Teachers and subjects survive a floor delete.
        assert_eq!(counts.teachers, 1);
        assert_eq!(counts.subjects, 1);
    }

    #[test]
    fn verification_queries() {
        let conn = test_conn();
        let (class, _, _) = seed_schedule(&conn);
        let (t, _) = get_or_create_teacher(&conn, "Ms. Sara").unwrap();
        let (s, _) = get_or_create_subject(&conn, "Science").unwrap();
        insert_schedule(&conn, class, t, s, 0, "09:05", "09:40").unwrap();

        let summaries = floor_summaries(&conn).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].number, 2);
        assert_eq!(summaries[0].classes, vec![("5A".to_string(), 2)]);

        let usage = teacher_usage(&conn).unwrap();
        assert!(usage.contains(&("Mr. Ali".to_string(), 1)));

        let dist = day_distribution(&conn).unwrap();
        assert_eq!(dist[0], 2);
        assert_eq!(dist[1], 0);

        let sessions = class_day_sessions(&conn).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].start_times, vec!["08:30", "09:05"]);
    }

    #[test]
    fn attendance_roundtrip_and_lateness() {
        let conn = test_conn();
        seed_schedule(&conn);
        let sched = schedule_ref(&conn, 1).unwrap().unwrap();

        let late = record_attendance(&conn, &sched, "2025-09-29", "Present", None, "").unwrap();
        assert_eq!(late, None);

        // Re-marking the same (schedule, date) replaces, not duplicates.
        let late = record_attendance(
            &conn,
            &sched,
            "2025-09-29",
            "Late",
            parse_hhmm("08:42"),
            "traffic",
        )
        .unwrap();
        assert_eq!(late, Some(12));

        let summary = daily_attendance_summary(&conn, "2025-09-29").unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.late, 1);
        assert_eq!(summary.present, 0);
        assert_eq!(summary.total_minutes_late, 12);
    }

    #[test]
    fn early_arrival_is_not_negative_lateness() {
        let conn = test_conn();
        seed_schedule(&conn);
        let sched = schedule_ref(&conn, 1).unwrap().unwrap();
        let late =
            record_attendance(&conn, &sched, "2025-09-29", "Late", parse_hhmm("08:15"), "").unwrap();
        assert_eq!(late, Some(0));
    }
}
