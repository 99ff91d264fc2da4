use crate::calc::{self, AttendanceStats, CumulativeRow, LetterBand};
use crate::model::{AttendanceRecord, Course, Person};
use crate::roster::CourseRoster;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

pub const GENERAL_DEPARTMENT: &str = "GEN";

/// `"CS101"` -> `"CS"`. Case-insensitive; codes shorter than two characters
/// use what they have.
pub fn department_key(code: &str) -> String {
    let t = code.trim();
    if t.is_empty() {
        return GENERAL_DEPARTMENT.to_string();
    }
    t.chars().take(2).collect::<String>().to_uppercase()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentSummary {
    pub department: String,
    pub course_count: usize,
    pub student_count: usize,
    pub teacher_count: usize,
    pub average_gpa: f64,
    pub attendance: AttendanceStats,
    pub average_attendance_rate: i64,
}

/// Bucket courses by department and summarise each bucket. `rosters` are the
/// reconciled per-course rosters; courses without one contribute their declared ids.
pub fn department_summaries(
    courses: &[Course],
    rosters: &[CourseRoster],
    students: &[Person],
    attendance: &[AttendanceRecord],
) -> Vec<DepartmentSummary> {
    let roster_by_course: HashMap<&str, &CourseRoster> =
        rosters.iter().map(|r| (r.course_id.as_str(), r)).collect();
    let gpa_by_student: HashMap<&str, f64> = students
        .iter()
        .filter_map(|s| s.gpa.filter(|g| g.is_finite()).map(|g| (s.id.as_str(), g)))
        .collect();

    let mut buckets: BTreeMap<String, Vec<&Course>> = BTreeMap::new();
    for c in courses {
        buckets.entry(department_key(&c.code)).or_default().push(c);
    }

    buckets
        .into_iter()
        .map(|(department, bucket)| {
            let mut student_ids: Vec<&str> = Vec::new();
            let mut seen: HashSet<&str> = HashSet::new();
            let mut teachers: HashSet<&str> = HashSet::new();
            let mut names: HashSet<&str> = HashSet::new();

            for c in &bucket {
                let ids: Vec<&str> = match roster_by_course.get(c.id.as_str()) {
                    Some(r) => r.student_ids.iter().map(String::as_str).collect(),
                    None => c.roster.iter().map(String::as_str).collect(),
                };
                for id in ids {
                    if seen.insert(id) {
                        student_ids.push(id);
                    }
                }
                if let Some(t) = c.teacher_id.as_deref().filter(|t| !t.trim().is_empty()) {
                    teachers.insert(t);
                }
                let name = c.name.trim();
                if !name.is_empty() {
                    names.insert(name);
                }
            }

            let gpas: Vec<f64> = student_ids
                .iter()
                .filter_map(|id| gpa_by_student.get(id).copied())
                .collect();
            let average_gpa = calc::safe_ratio(gpas.iter().sum::<f64>(), gpas.len() as f64);

            let attendance_stats = calc::compute_stats(attendance.iter().filter(|r| {
                r.course_name
                    .as_deref()
                    .map(|n| names.contains(n.trim()))
                    .unwrap_or(false)
            }));

            DepartmentSummary {
                department,
                course_count: bucket.len(),
                student_count: student_ids.len(),
                teacher_count: teachers.len(),
                average_gpa,
                average_attendance_rate: attendance_stats.rate,
                attendance: attendance_stats,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDistribution {
    pub row_count: usize,
    pub average_percent: i64,
    pub average_letter: LetterBand,
    pub bands: BTreeMap<LetterBand, usize>,
}

pub fn grade_distribution(rows: &[CumulativeRow]) -> GradeDistribution {
    let mut bands: BTreeMap<LetterBand, usize> =
        LetterBand::ALL.iter().map(|b| (*b, 0)).collect();
    for r in rows {
        *bands.entry(r.letter).or_insert(0) += 1;
    }
    let sum: f64 = rows.iter().map(|r| r.cumulative_percent as f64).sum();
    let avg = calc::safe_ratio(sum, rows.len() as f64);
    GradeDistribution {
        row_count: rows.len(),
        average_percent: calc::round_half_up(avg),
        average_letter: calc::letter_band(avg),
        bands,
    }
}
