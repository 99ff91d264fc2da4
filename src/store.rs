use crate::calc::finance_due;
use crate::db;
use crate::model::{
    extract_rows, AttendanceRecord, Course, CourseRef, Finance, Grade, Person, Role,
};
use crate::roster::{normalize_roster_ids, resolve_course, StudentLookup};
use crate::status::normalize_status_str;
use anyhow::anyhow;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

// Stay under SQLite's historical host-parameter limit.
const MAX_IN_PARAMS: usize = 900;

/// Repository over the workspace database. Every read the engine consumes and
/// every user-initiated write goes through here.
pub struct Store {
    conn: Connection,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub people: usize,
    pub courses: usize,
    pub attendance: usize,
    pub grades: usize,
    pub finances: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub code: String,
    pub name: String,
    pub teacher_id: Option<String>,
    pub teacher_name: Option<String>,
    pub credits: f64,
    pub schedule: Option<String>,
    pub roster: serde_json::Value,
}

const PERSON_COLUMNS: &str =
    "id, role, name, email, phone, grade_level, gpa, attendance_percent, parent_id";
const COURSE_COLUMNS: &str =
    "id, code, name, teacher_id, teacher_name, credits, schedule, student_ids";
const ATTENDANCE_COLUMNS: &str = "id, student_id, course_id, course_name, lesson_id, date, status";
const GRADE_COLUMNS: &str =
    "id, student_id, course_id, course_name, assessment_type, score, max_score, date";
const FINANCE_COLUMNS: &str = "id, student_id, total_fee, scholarship, paid, due, semester";

fn person_from_row(r: &Row<'_>) -> rusqlite::Result<Person> {
    let role: String = r.get(1)?;
    Ok(Person {
        id: r.get(0)?,
        role: Role::parse(&role).unwrap_or(Role::Student),
        name: r.get(2)?,
        email: r.get(3)?,
        phone: r.get(4)?,
        grade_level: r.get(5)?,
        gpa: r.get(6)?,
        attendance_percent: r.get(7)?,
        parent_id: r.get(8)?,
    })
}

fn course_from_row(r: &Row<'_>) -> rusqlite::Result<Course> {
    let raw_roster: Option<String> = r.get(7)?;
    Ok(Course {
        id: r.get(0)?,
        code: r.get(1)?,
        name: r.get(2)?,
        teacher_id: r.get(3)?,
        teacher_name: r.get(4)?,
        credits: r.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        schedule: r.get(6)?,
        roster: raw_roster
            .map(|s| normalize_roster_ids(&serde_json::Value::String(s)))
            .unwrap_or_default(),
    })
}

fn attendance_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let raw_status: String = r.get(6)?;
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        course_id: r.get(2)?,
        course_name: r.get(3)?,
        lesson_id: r.get(4)?,
        date: r.get(5)?,
        status: normalize_status_str(&raw_status),
        raw_status,
    })
}

fn grade_from_row(r: &Row<'_>) -> rusqlite::Result<Grade> {
    Ok(Grade {
        id: r.get(0)?,
        student_id: r.get(1)?,
        course_id: r.get(2)?,
        course_name: r.get(3)?,
        assessment_type: r.get(4)?,
        score: r.get(5)?,
        max_score: r.get(6)?,
        date: r.get(7)?,
    })
}

fn finance_from_row(r: &Row<'_>) -> rusqlite::Result<Finance> {
    let total_fee: f64 = r.get::<_, Option<f64>>(2)?.unwrap_or(0.0);
    let scholarship: f64 = r.get::<_, Option<f64>>(3)?.unwrap_or(0.0);
    let paid: f64 = r.get::<_, Option<f64>>(4)?.unwrap_or(0.0);
    Ok(Finance {
        id: r.get(0)?,
        student_id: r.get(1)?,
        total_fee,
        scholarship,
        paid,
        // Stored value is informational only; the clamped formula wins.
        due: finance_due(total_fee, scholarship, paid),
        semester: r.get(6)?,
    })
}

fn roster_text(roster: &serde_json::Value) -> Option<String> {
    match roster {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ")
}

impl Store {
    pub fn open(workspace: &Path) -> anyhow::Result<Store> {
        Ok(Store {
            conn: db::open_db(workspace)?,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn query_rows<T>(
        &self,
        sql: &str,
        values: Vec<Value>,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> anyhow::Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), map)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_people(&self, role: Option<Role>) -> anyhow::Result<Vec<Person>> {
        match role {
            Some(role) => self.query_rows(
                &format!(
                    "SELECT {} FROM people WHERE role = ? ORDER BY name, id",
                    PERSON_COLUMNS
                ),
                vec![Value::Text(role.as_str().to_string())],
                person_from_row,
            ),
            None => self.query_rows(
                &format!("SELECT {} FROM people ORDER BY name, id", PERSON_COLUMNS),
                Vec::new(),
                person_from_row,
            ),
        }
    }

    pub fn get_person(&self, id: &str) -> anyhow::Result<Option<Person>> {
        let sql = format!("SELECT {} FROM people WHERE id = ?", PERSON_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [id], person_from_row)
            .optional()?)
    }

    pub fn insert_person(&self, p: &Person) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO people(id, role, name, email, phone, grade_level, gpa, attendance_percent, parent_id)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &p.id,
                p.role.as_str(),
                &p.name,
                &p.email,
                &p.phone,
                &p.grade_level,
                p.gpa,
                p.attendance_percent,
                &p.parent_id,
            ),
        )?;
        Ok(())
    }

    /// One `IN (...)` query per chunk of ids; only student rows are returned.
    pub fn fetch_students_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<Person>> {
        let mut out = Vec::new();
        for chunk in ids.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "SELECT {} FROM people WHERE role = 'student' AND id IN ({})",
                PERSON_COLUMNS,
                placeholders(chunk.len())
            );
            let values: Vec<Value> = chunk.iter().map(|id| Value::Text(id.clone())).collect();
            out.extend(self.query_rows(&sql, values, person_from_row)?);
        }
        Ok(out)
    }

    pub fn list_courses(&self, teacher_id: Option<&str>) -> anyhow::Result<Vec<Course>> {
        match teacher_id {
            Some(t) => self.query_rows(
                &format!(
                    "SELECT {} FROM courses WHERE teacher_id = ? ORDER BY code, id",
                    COURSE_COLUMNS
                ),
                vec![Value::Text(t.to_string())],
                course_from_row,
            ),
            None => self.query_rows(
                &format!("SELECT {} FROM courses ORDER BY code, id", COURSE_COLUMNS),
                Vec::new(),
                course_from_row,
            ),
        }
    }

    pub fn get_course(&self, id: &str) -> anyhow::Result<Option<Course>> {
        let sql = format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [id], course_from_row)
            .optional()?)
    }

    pub fn insert_course(&self, id: &str, c: &NewCourse) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO courses(id, code, name, teacher_id, teacher_name, credits, schedule, student_ids)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                id,
                &c.code,
                &c.name,
                &c.teacher_id,
                &c.teacher_name,
                c.credits,
                &c.schedule,
                roster_text(&c.roster),
            ),
        )?;
        Ok(())
    }

    pub fn list_attendance(&self, student_id: Option<&str>) -> anyhow::Result<Vec<AttendanceRecord>> {
        match student_id {
            Some(s) => self.query_rows(
                &format!(
                    "SELECT {} FROM attendance WHERE student_id = ? ORDER BY date, id",
                    ATTENDANCE_COLUMNS
                ),
                vec![Value::Text(s.to_string())],
                attendance_from_row,
            ),
            None => self.query_rows(
                &format!("SELECT {} FROM attendance ORDER BY date, id", ATTENDANCE_COLUMNS),
                Vec::new(),
                attendance_from_row,
            ),
        }
    }

    /// Rows that resolve to one of `courses`. Resolution runs against every
    /// stored course: a known `course_id` wins, and the name is only consulted
    /// when the id is missing or matches no stored course.
    pub fn list_attendance_for_courses(&self, courses: &[Course]) -> anyhow::Result<Vec<AttendanceRecord>> {
        self.list_linked("attendance", ATTENDANCE_COLUMNS, courses, attendance_from_row)
    }

    pub fn list_grades_for_courses(&self, courses: &[Course]) -> anyhow::Result<Vec<Grade>> {
        self.list_linked("grades", GRADE_COLUMNS, courses, grade_from_row)
    }

    fn list_linked<T>(
        &self,
        table: &str,
        columns: &str,
        courses: &[Course],
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> anyhow::Result<Vec<T>>
    where
        for<'r> CourseRef<'r>: From<&'r T>,
    {
        if courses.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Value> = courses.iter().map(|c| Value::Text(c.id.clone())).collect();
        let names: Vec<Value> = courses
            .iter()
            .filter(|c| !c.name.trim().is_empty())
            .map(|c| Value::Text(c.name.trim().to_string()))
            .collect();
        let name_clause = if names.is_empty() {
            String::new()
        } else {
            format!(" OR TRIM(course_name) IN ({})", placeholders(names.len()))
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE course_id IN ({}){} ORDER BY date, id",
            columns,
            table,
            placeholders(ids.len()),
            name_clause
        );
        let mut values = ids;
        values.extend(names);
        let candidates = self.query_rows(&sql, values, map)?;

        // The SQL match is a superset; a row whose id names another course, or
        // whose name is shared with an earlier course, is dropped here.
        let all = self.list_courses(None)?;
        let selected: HashSet<&str> = courses.iter().map(|c| c.id.as_str()).collect();
        Ok(candidates
            .into_iter()
            .filter(|row| {
                resolve_course(&all, &CourseRef::from(row))
                    .map(|c| selected.contains(c.id.as_str()))
                    .unwrap_or(false)
            })
            .collect())
    }

    pub fn insert_attendance(&self, r: &AttendanceRecord) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO attendance(id, student_id, course_id, course_name, lesson_id, date, status)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &r.id,
                &r.student_id,
                &r.course_id,
                &r.course_name,
                &r.lesson_id,
                &r.date,
                &r.raw_status,
            ),
        )?;
        Ok(())
    }

    pub fn list_grades(&self, student_id: Option<&str>) -> anyhow::Result<Vec<Grade>> {
        match student_id {
            Some(s) => self.query_rows(
                &format!(
                    "SELECT {} FROM grades WHERE student_id = ? ORDER BY date, id",
                    GRADE_COLUMNS
                ),
                vec![Value::Text(s.to_string())],
                grade_from_row,
            ),
            None => self.query_rows(
                &format!("SELECT {} FROM grades ORDER BY date, id", GRADE_COLUMNS),
                Vec::new(),
                grade_from_row,
            ),
        }
    }

    pub fn insert_grade(&self, g: &Grade) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO grades(id, student_id, course_id, course_name, assessment_type, score, max_score, date)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &g.id,
                &g.student_id,
                &g.course_id,
                &g.course_name,
                &g.assessment_type,
                g.score,
                g.max_score,
                &g.date,
            ),
        )?;
        Ok(())
    }

    pub fn list_finances(&self, student_id: Option<&str>) -> anyhow::Result<Vec<Finance>> {
        match student_id {
            Some(s) => self.query_rows(
                &format!(
                    "SELECT {} FROM finances WHERE student_id = ? ORDER BY semester, id",
                    FINANCE_COLUMNS
                ),
                vec![Value::Text(s.to_string())],
                finance_from_row,
            ),
            None => self.query_rows(
                &format!("SELECT {} FROM finances ORDER BY semester, id", FINANCE_COLUMNS),
                Vec::new(),
                finance_from_row,
            ),
        }
    }

    pub fn get_finance(&self, id: &str) -> anyhow::Result<Option<Finance>> {
        let sql = format!("SELECT {} FROM finances WHERE id = ?", FINANCE_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [id], finance_from_row)
            .optional()?)
    }

    /// Writes the row with `due` recomputed from the other amounts.
    pub fn upsert_finance(&self, f: &Finance) -> anyhow::Result<Finance> {
        let due = finance_due(f.total_fee, f.scholarship, f.paid);
        let updated_at = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO finances(id, student_id, total_fee, scholarship, paid, due, semester, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               student_id = excluded.student_id,
               total_fee = excluded.total_fee,
               scholarship = excluded.scholarship,
               paid = excluded.paid,
               due = excluded.due,
               semester = excluded.semester,
               updated_at = excluded.updated_at",
            (
                &f.id,
                &f.student_id,
                f.total_fee,
                f.scholarship,
                f.paid,
                due,
                &f.semester,
                updated_at,
            ),
        )?;
        Ok(Finance { due, ..f.clone() })
    }

    pub fn record_payment(&self, finance_id: &str, amount: f64) -> anyhow::Result<Finance> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(anyhow!("payment amount must be positive"));
        }
        let Some(current) = self.get_finance(finance_id)? else {
            return Err(anyhow!("finance record not found: {}", finance_id));
        };
        let next = Finance {
            paid: current.paid + amount,
            ..current
        };
        tracing::info!(finance_id, amount, "recording payment");
        self.upsert_finance(&next)
    }

    /// Load a fetched snapshot. Each entity list may be a bare array or wrapped
    /// in an object; rows without the required ids are skipped and counted.
    pub fn import_snapshot(&self, snapshot: &serde_json::Value) -> anyhow::Result<ImportSummary> {
        let tx = self.conn.unchecked_transaction()?;
        let mut summary = ImportSummary::default();

        for key in ["people", "students", "teachers", "parents", "admins"] {
            let default_role = match key {
                "students" => Some(Role::Student),
                "teachers" => Some(Role::Teacher),
                "parents" => Some(Role::Parent),
                "admins" => Some(Role::Admin),
                _ => None,
            };
            let Some(v) = snapshot.get(key) else {
                continue;
            };
            for row in extract_rows(v, key) {
                match Person::from_value(&row) {
                    Some(mut p) => {
                        if row.get("role").is_none() {
                            if let Some(r) = default_role {
                                p.role = r;
                            }
                        }
                        self.insert_person(&p)?;
                        summary.people += 1;
                    }
                    None => summary.skipped += 1,
                }
            }
        }

        if let Some(v) = snapshot.get("courses") {
            for row in extract_rows(v, "courses") {
                match Course::from_value(&row) {
                    Some(c) => {
                        let raw = ["studentIds", "student_ids", "roster", "students"]
                            .iter()
                            .find_map(|k| row.get(*k))
                            .cloned()
                            .unwrap_or(serde_json::Value::Null);
                        self.insert_course(
                            &c.id,
                            &NewCourse {
                                code: c.code,
                                name: c.name,
                                teacher_id: c.teacher_id,
                                teacher_name: c.teacher_name,
                                credits: c.credits,
                                schedule: c.schedule,
                                roster: raw,
                            },
                        )?;
                        summary.courses += 1;
                    }
                    None => summary.skipped += 1,
                }
            }
        }

        if let Some(v) = snapshot.get("attendance") {
            for row in extract_rows(v, "attendance") {
                match AttendanceRecord::from_value(&row) {
                    Some(r) => {
                        self.insert_attendance(&r)?;
                        summary.attendance += 1;
                    }
                    None => summary.skipped += 1,
                }
            }
        }

        if let Some(v) = snapshot.get("grades") {
            for row in extract_rows(v, "grades") {
                match Grade::from_value(&row) {
                    Some(g) => {
                        self.insert_grade(&g)?;
                        summary.grades += 1;
                    }
                    None => summary.skipped += 1,
                }
            }
        }

        for key in ["finances", "finance"] {
            let Some(v) = snapshot.get(key) else {
                continue;
            };
            for row in extract_rows(v, key) {
                match Finance::from_value(&row) {
                    Some(f) => {
                        self.upsert_finance(&f)?;
                        summary.finances += 1;
                    }
                    None => summary.skipped += 1,
                }
            }
        }

        tx.commit()?;
        tracing::info!(
            people = summary.people,
            courses = summary.courses,
            attendance = summary.attendance,
            grades = summary.grades,
            finances = summary.finances,
            skipped = summary.skipped,
            "snapshot imported"
        );
        Ok(summary)
    }
}

impl StudentLookup for Store {
    fn fetch_students_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<Person>> {
        Store::fetch_students_by_ids(self, ids)
    }
}
