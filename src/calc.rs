use crate::model::{AttendanceRecord, Finance, Grade, UNNAMED_COURSE};
use crate::status::AttendanceStatus;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Round half up to an integer, the same rule the dashboards display with.
pub fn round_half_up(x: f64) -> i64 {
    if !x.is_finite() {
        return 0;
    }
    (x + 0.5).floor() as i64
}

/// `0/0` (and anything over a non-positive denominator) is zero.
pub fn safe_ratio(num: f64, denom: f64) -> f64 {
    if denom > 0.0 && num.is_finite() {
        num / denom
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceStats {
    pub total: usize,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub rate: i64,
}

pub fn compute_stats<'a, I>(records: I) -> AttendanceStats
where
    I: IntoIterator<Item = &'a AttendanceRecord>,
{
    stats_from_statuses(records.into_iter().map(|r| r.status))
}

/// Unknown statuses (`None`) are skipped entirely; they are neither counted
/// in `total` nor treated as absences.
pub fn stats_from_statuses<I>(statuses: I) -> AttendanceStats
where
    I: IntoIterator<Item = Option<AttendanceStatus>>,
{
    let mut out = AttendanceStats::default();
    let mut credit = 0.0;
    for s in statuses.into_iter().flatten() {
        out.total += 1;
        credit += s.credit();
        match s {
            AttendanceStatus::Present => out.present += 1,
            AttendanceStatus::Late => out.late += 1,
            AttendanceStatus::Absent => out.absent += 1,
        }
    }
    out.rate = round_half_up(safe_ratio(credit, out.total as f64) * 100.0);
    out
}

fn course_key(r: &AttendanceRecord) -> String {
    match r.course_name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => UNNAMED_COURSE.to_string(),
    }
}

pub fn group_by_course_name(records: &[AttendanceRecord]) -> BTreeMap<String, Vec<&AttendanceRecord>> {
    let mut out: BTreeMap<String, Vec<&AttendanceRecord>> = BTreeMap::new();
    for r in records {
        out.entry(course_key(r)).or_default().push(r);
    }
    out
}

pub fn group_by_student(records: &[AttendanceRecord]) -> BTreeMap<String, Vec<&AttendanceRecord>> {
    let mut out: BTreeMap<String, Vec<&AttendanceRecord>> = BTreeMap::new();
    for r in records {
        out.entry(r.student_id.clone()).or_default().push(r);
    }
    out
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAttendance {
    pub course_name: String,
    pub stats: AttendanceStats,
}

pub fn stats_by_course(records: &[AttendanceRecord]) -> Vec<CourseAttendance> {
    group_by_course_name(records)
        .into_iter()
        .map(|(course_name, rows)| CourseAttendance {
            course_name,
            stats: compute_stats(rows),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LetterBand {
    A,
    B,
    C,
    D,
    F,
}

impl LetterBand {
    pub const ALL: [LetterBand; 5] = [
        LetterBand::A,
        LetterBand::B,
        LetterBand::C,
        LetterBand::D,
        LetterBand::F,
    ];
}

/// Lower bound of each band is inclusive.
pub fn letter_band(percent: f64) -> LetterBand {
    if percent >= 90.0 {
        LetterBand::A
    } else if percent >= 80.0 {
        LetterBand::B
    } else if percent >= 70.0 {
        LetterBand::C
    } else if percent >= 60.0 {
        LetterBand::D
    } else {
        LetterBand::F
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeRow {
    pub student_id: String,
    pub course_id: Option<String>,
    pub course_name: Option<String>,
    pub earned: f64,
    pub possible: f64,
    pub assessment_count: usize,
    pub cumulative_percent: i64,
    pub letter: LetterBand,
}

/// Sum-of-points per (student, course): `round(Σscore / Σmax * 100)`.
/// Rows come out in the order each pair is first seen.
pub fn cumulative_by_student_course(grades: &[Grade]) -> Vec<CumulativeRow> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut rows: Vec<CumulativeRow> = Vec::new();

    for g in grades {
        // Grades without a course id still group by their course label.
        let course_key = g
            .course_id
            .clone()
            .or_else(|| g.course_name.clone())
            .unwrap_or_default();
        let key = (g.student_id.clone(), course_key);
        let i = *index.entry(key).or_insert_with(|| {
            rows.push(CumulativeRow {
                student_id: g.student_id.clone(),
                course_id: g.course_id.clone(),
                course_name: g.course_name.clone(),
                earned: 0.0,
                possible: 0.0,
                assessment_count: 0,
                cumulative_percent: 0,
                letter: LetterBand::F,
            });
            rows.len() - 1
        });
        let row = &mut rows[i];
        if g.score.is_finite() {
            row.earned += g.score;
        }
        if g.max_score.is_finite() {
            row.possible += g.max_score;
        }
        row.assessment_count += 1;
        if row.course_name.is_none() {
            row.course_name = g.course_name.clone();
        }
    }

    for row in &mut rows {
        let pct = safe_ratio(row.earned, row.possible) * 100.0;
        row.cumulative_percent = round_half_up(pct);
        // Band follows the displayed percent: 89.5 shows as 90 and grades A.
        row.letter = letter_band(row.cumulative_percent as f64);
    }
    rows
}

pub fn grade_percent(g: &Grade) -> f64 {
    safe_ratio(g.score, g.max_score) * 100.0
}

/// Mean of per-assessment percentages. Not the same number as the
/// cumulative percent: 10/10 and 40/100 average to 70 here, 45 there.
pub fn average_of_percentages(grades: &[Grade]) -> f64 {
    if grades.is_empty() {
        return 0.0;
    }
    let sum: f64 = grades.iter().map(grade_percent).sum();
    sum / grades.len() as f64
}

pub fn finance_due(total_fee: f64, scholarship: f64, paid: f64) -> f64 {
    let due = total_fee - scholarship - paid;
    if due.is_finite() && due > 0.0 {
        due
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinanceSummary {
    pub record_count: usize,
    pub total_fee: f64,
    pub scholarship: f64,
    pub paid: f64,
    pub due: f64,
    pub outstanding_count: usize,
}

pub fn finance_summary(records: &[Finance]) -> FinanceSummary {
    let mut out = FinanceSummary::default();
    for f in records {
        let due = finance_due(f.total_fee, f.scholarship, f.paid);
        out.record_count += 1;
        out.total_fee += f.total_fee;
        out.scholarship += f.scholarship;
        out.paid += f.paid;
        out.due += due;
        if due > 0.0 {
            out.outstanding_count += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(status: Option<AttendanceStatus>, course: Option<&str>) -> AttendanceRecord {
        AttendanceRecord {
            id: "r".to_string(),
            student_id: "s1".to_string(),
            course_id: None,
            course_name: course.map(str::to_string),
            lesson_id: None,
            date: "2024-09-03".to_string(),
            status,
            raw_status: String::new(),
        }
    }

    fn grade(student: &str, course: &str, score: f64, max: f64) -> Grade {
        Grade {
            id: format!("{student}-{course}-{score}"),
            student_id: student.to_string(),
            course_id: Some(course.to_string()),
            course_name: None,
            assessment_type: "test".to_string(),
            score,
            max_score: max,
            date: None,
        }
    }

    use AttendanceStatus::{Absent, Late, Present};

    #[test]
    fn empty_stats_are_all_zero() {
        let empty: Vec<AttendanceRecord> = Vec::new();
        assert_eq!(compute_stats(&empty), AttendanceStats::default());
        let unknown = vec![rec(None, None), rec(None, None)];
        assert_eq!(compute_stats(&unknown), AttendanceStats::default());
    }

    #[test]
    fn late_counts_three_quarters() {
        let rs = vec![
            rec(Some(Present), None),
            rec(Some(Present), None),
            rec(Some(Late), None),
            rec(Some(Absent), None),
        ];
        let s = compute_stats(&rs);
        assert_eq!(
            s,
            AttendanceStats {
                total: 4,
                present: 2,
                late: 1,
                absent: 1,
                rate: 69
            }
        );
    }

    #[test]
    fn unknown_statuses_do_not_count_as_absent() {
        let rs = vec![rec(Some(Present), None), rec(None, None)];
        let s = compute_stats(&rs);
        assert_eq!(s.total, 1);
        assert_eq!(s.absent, 0);
        assert_eq!(s.rate, 100);
    }

    #[test]
    fn stats_ignore_record_order() {
        let mut rs = vec![
            rec(Some(Late), None),
            rec(Some(Absent), None),
            rec(Some(Present), None),
            rec(Some(Late), None),
        ];
        let a = compute_stats(&rs);
        rs.reverse();
        assert_eq!(a, compute_stats(&rs));
        // (1 + 0.75*2) / 4 = 62.5 -> 63
        assert_eq!(a.rate, 63);
    }

    #[test]
    fn grouping_by_course_is_a_partition() {
        let rs = vec![
            rec(Some(Present), Some("Biology")),
            rec(Some(Absent), Some("Algebra")),
            rec(Some(Late), Some("Biology")),
            rec(Some(Present), None),
        ];
        let groups = group_by_course_name(&rs);
        let keys: Vec<&str> = groups.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Algebra", "Biology", UNNAMED_COURSE]);
        assert_eq!(groups.values().map(Vec::len).sum::<usize>(), rs.len());

        let per_course = stats_by_course(&rs);
        let bio = per_course
            .iter()
            .find(|c| c.course_name == "Biology")
            .expect("biology");
        assert_eq!(bio.stats.rate, 88);
    }

    #[test]
    fn cumulative_is_sum_of_points_not_average() {
        let gs = vec![grade("s1", "C1", 10.0, 10.0), grade("s1", "C1", 40.0, 100.0)];
        let rows = cumulative_by_student_course(&gs);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cumulative_percent, 45);
        assert_eq!(rows[0].letter, LetterBand::F);
        assert_eq!(round_half_up(average_of_percentages(&gs)), 70);
    }

    #[test]
    fn cumulative_groups_by_student_and_course_in_first_seen_order() {
        let gs = vec![
            grade("s2", "C1", 9.0, 10.0),
            grade("s1", "C1", 8.0, 10.0),
            grade("s2", "C2", 0.0, 0.0),
            grade("s2", "C1", 10.0, 10.0),
        ];
        let rows = cumulative_by_student_course(&gs);
        let keys: Vec<(&str, Option<&str>)> = rows
            .iter()
            .map(|r| (r.student_id.as_str(), r.course_id.as_deref()))
            .collect();
        assert_eq!(keys, vec![("s2", Some("C1")), ("s1", Some("C1")), ("s2", Some("C2"))]);
        assert_eq!(rows[0].cumulative_percent, 95);
        assert_eq!(rows[0].assessment_count, 2);
        assert_eq!(rows[2].cumulative_percent, 0);
    }

    #[test]
    fn cumulative_letter_uses_rounded_percent() {
        let rows = cumulative_by_student_course(&[grade("s1", "C1", 179.0, 200.0)]);
        assert_eq!(rows[0].cumulative_percent, 90);
        assert_eq!(rows[0].letter, LetterBand::A);

        let rows = cumulative_by_student_course(&[grade("s1", "C1", 178.8, 200.0)]);
        assert_eq!(rows[0].cumulative_percent, 89);
        assert_eq!(rows[0].letter, LetterBand::B);
    }

    #[test]
    fn zero_max_score_contributes_zero_percent() {
        let gs = vec![grade("s1", "C1", 5.0, 0.0), grade("s1", "C1", 10.0, 10.0)];
        assert_eq!(average_of_percentages(&gs), 50.0);
        assert_eq!(average_of_percentages(&[]), 0.0);
    }

    #[test]
    fn letter_bands_are_lower_bound_inclusive() {
        assert_eq!(letter_band(90.0), LetterBand::A);
        assert_eq!(letter_band(89.9), LetterBand::B);
        assert_eq!(letter_band(80.0), LetterBand::B);
        assert_eq!(letter_band(70.0), LetterBand::C);
        assert_eq!(letter_band(60.0), LetterBand::D);
        assert_eq!(letter_band(59.9), LetterBand::F);
        assert_eq!(letter_band(100.0), LetterBand::A);
    }

    #[test]
    fn round_half_up_matches_dashboard_rounding() {
        assert_eq!(round_half_up(68.75), 69);
        assert_eq!(round_half_up(62.5), 63);
        assert_eq!(round_half_up(45.45), 45);
        assert_eq!(round_half_up(f64::NAN), 0);
    }

    #[test]
    fn due_is_clamped_at_zero() {
        assert_eq!(finance_due(1000.0, 200.0, 900.0), 0.0);
        assert_eq!(finance_due(1000.0, 0.0, 250.0), 750.0);
        assert_eq!(finance_due(0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn finance_summary_recomputes_due() {
        let rows = vec![
            Finance {
                id: "f1".to_string(),
                student_id: "s1".to_string(),
                total_fee: 1000.0,
                scholarship: 200.0,
                paid: 300.0,
                due: 12345.0,
                semester: None,
            },
            Finance {
                id: "f2".to_string(),
                student_id: "s2".to_string(),
                total_fee: 500.0,
                scholarship: 0.0,
                paid: 600.0,
                due: -100.0,
                semester: None,
            },
        ];
        let s = finance_summary(&rows);
        assert_eq!(s.record_count, 2);
        assert_eq!(s.due, 500.0);
        assert_eq!(s.outstanding_count, 1);
        assert_eq!(s.paid, 900.0);
    }
}
