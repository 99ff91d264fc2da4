use crate::roster::normalize_roster_ids;
use crate::status::{normalize_status, AttendanceStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const UNKNOWN_STUDENT: &str = "Unknown Student";
pub const UNNAMED_COURSE: &str = "Unnamed Course";
pub const UNASSIGNED: &str = "Unassigned";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Parent,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Parent => "parent",
            Role::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "parent" => Some(Role::Parent),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// A portal user. Student-only fields stay `None` for the other roles.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub phone: Option<String>,
    pub grade_level: Option<String>,
    pub gpa: Option<f64>,
    pub attendance_percent: Option<f64>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub code: String,
    pub name: String,
    pub teacher_id: Option<String>,
    pub teacher_name: Option<String>,
    pub credits: f64,
    pub schedule: Option<String>,
    pub roster: Vec<String>,
}

impl Course {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            UNNAMED_COURSE
        } else {
            &self.name
        }
    }

    pub fn teacher_label(&self) -> &str {
        match self.teacher_name.as_deref() {
            Some(n) if !n.trim().is_empty() => n,
            _ => UNASSIGNED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub course_id: Option<String>,
    pub course_name: Option<String>,
    pub lesson_id: Option<String>,
    pub date: String,
    pub status: Option<AttendanceStatus>,
    pub raw_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: String,
    pub student_id: String,
    pub course_id: Option<String>,
    pub course_name: Option<String>,
    pub assessment_type: String,
    pub score: f64,
    pub max_score: f64,
    pub date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finance {
    pub id: String,
    pub student_id: String,
    pub total_fee: f64,
    pub scholarship: f64,
    pub paid: f64,
    pub due: f64,
    pub semester: Option<String>,
}

/// Course reference carried by a dependent row (attendance or grade).
#[derive(Debug, Clone, Copy)]
pub struct CourseRef<'a> {
    pub student_id: &'a str,
    pub course_id: Option<&'a str>,
    pub course_name: Option<&'a str>,
}

impl<'a> From<&'a AttendanceRecord> for CourseRef<'a> {
    fn from(r: &'a AttendanceRecord) -> Self {
        CourseRef {
            student_id: &r.student_id,
            course_id: r.course_id.as_deref(),
            course_name: r.course_name.as_deref(),
        }
    }
}

impl<'a> From<&'a Grade> for CourseRef<'a> {
    fn from(g: &'a Grade) -> Self {
        CourseRef {
            student_id: &g.student_id,
            course_id: g.course_id.as_deref(),
            course_name: g.course_name.as_deref(),
        }
    }
}

/// Single boundary for list-shaped payloads: a bare array, or an object that
/// holds the array under `field` (or the generic `data` / `rows` keys).
pub fn extract_rows(value: &Value, field: &str) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(obj) => [field, "data", "rows"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(|v| v.as_array()))
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Attendance is per calendar day; timestamps are cut down to their date part.
/// Text that is not a recognizable date is kept as written.
pub fn calendar_day(raw: &str) -> String {
    let t = raw.trim();
    if let Ok(d) = chrono::NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return d.format("%Y-%m-%d").to_string();
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(t) {
        return dt.date_naive().format("%Y-%m-%d").to_string();
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        return dt.date().format("%Y-%m-%d").to_string();
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S%.f") {
        return dt.date().format("%Y-%m-%d").to_string();
    }
    t.to_string()
}

fn field<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| v.get(*k))
        .filter(|v| !v.is_null())
}

pub(crate) fn text_field(v: &Value, keys: &[&str]) -> Option<String> {
    let raw = field(v, keys)?;
    let s = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => crate::status::number_text(n),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Missing or non-numeric amounts read as `None`; callers decide whether that means zero.
pub(crate) fn number_field(v: &Value, keys: &[&str]) -> Option<f64> {
    match field(v, keys)? {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

impl Person {
    pub fn from_value(v: &Value) -> Option<Person> {
        let id = text_field(v, &["id"])?;
        let role = text_field(v, &["role"])
            .and_then(|r| Role::parse(&r))
            .unwrap_or(Role::Student);
        Some(Person {
            id,
            name: text_field(v, &["name", "fullName", "full_name"]).unwrap_or_default(),
            email: text_field(v, &["email"]).unwrap_or_default(),
            role,
            phone: text_field(v, &["phone"]),
            grade_level: text_field(v, &["gradeLevel", "grade_level", "grade"]),
            gpa: number_field(v, &["gpa"]),
            attendance_percent: number_field(
                v,
                &["attendancePercent", "attendance_percent", "attendance"],
            ),
            parent_id: text_field(v, &["parentId", "parent_id"]),
        })
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            UNKNOWN_STUDENT
        } else {
            &self.name
        }
    }
}

impl Course {
    pub fn from_value(v: &Value) -> Option<Course> {
        let id = text_field(v, &["id"])?;
        let roster = field(v, &["studentIds", "student_ids", "roster", "students"])
            .map(normalize_roster_ids)
            .unwrap_or_default();
        Some(Course {
            id,
            code: text_field(v, &["code"]).unwrap_or_default(),
            name: text_field(v, &["name"]).unwrap_or_default(),
            teacher_id: text_field(v, &["teacherId", "teacher_id"]),
            teacher_name: text_field(v, &["teacherName", "teacher_name"]),
            credits: number_field(v, &["credits"]).unwrap_or(0.0),
            schedule: text_field(v, &["schedule"]),
            roster,
        })
    }
}

impl AttendanceRecord {
    pub fn from_value(v: &Value) -> Option<AttendanceRecord> {
        let id = text_field(v, &["id"])?;
        let student_id = text_field(v, &["studentId", "student_id"])?;
        let raw = field(v, &["status"]).cloned().unwrap_or(Value::Null);
        Some(AttendanceRecord {
            id,
            student_id,
            course_id: text_field(v, &["courseId", "course_id"]),
            course_name: text_field(v, &["courseName", "course_name", "course"]),
            lesson_id: text_field(v, &["lessonId", "lesson_id"]),
            date: text_field(v, &["date"])
                .map(|d| calendar_day(&d))
                .unwrap_or_default(),
            status: normalize_status(&raw),
            // Stored text must re-normalize to the same status on read.
            raw_status: match &raw {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                Value::Number(n) => crate::status::number_text(n),
                other => other.to_string(),
            },
        })
    }
}

impl Grade {
    pub fn from_value(v: &Value) -> Option<Grade> {
        let id = text_field(v, &["id"])?;
        let student_id = text_field(v, &["studentId", "student_id"])?;
        Some(Grade {
            id,
            student_id,
            course_id: text_field(v, &["courseId", "course_id"]),
            course_name: text_field(v, &["courseName", "course_name", "course"]),
            assessment_type: text_field(v, &["assessmentType", "assessment_type", "type"])
                .unwrap_or_default(),
            score: number_field(v, &["score"]).unwrap_or(0.0),
            max_score: number_field(v, &["maxScore", "max_score"]).unwrap_or(0.0),
            date: text_field(v, &["date"]),
        })
    }
}

impl Finance {
    pub fn from_value(v: &Value) -> Option<Finance> {
        let id = text_field(v, &["id"])?;
        let student_id = text_field(v, &["studentId", "student_id"])?;
        let total_fee = number_field(v, &["totalFee", "total_fee"]).unwrap_or(0.0);
        let scholarship = number_field(v, &["scholarship"]).unwrap_or(0.0);
        let paid = number_field(v, &["paid", "amountPaid", "amount_paid"]).unwrap_or(0.0);
        Some(Finance {
            id,
            student_id,
            total_fee,
            scholarship,
            paid,
            due: crate::calc::finance_due(total_fee, scholarship, paid),
            semester: text_field(v, &["semester"]),
        })
    }
}
