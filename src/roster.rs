use crate::model::{Course, CourseRef, Person};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Parse a course's enrolled-student field. The field has been stored as a JSON
/// array, as a string of JSON, and as a loose comma list; all of them land here.
/// Order is kept and duplicates are left for reconciliation to drop.
pub fn normalize_roster_ids(input: &Value) -> Vec<String> {
    match input {
        Value::Array(items) => ids_from_array(items),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => ids_from_array(&items),
            _ => ids_from_delimited(s),
        },
        _ => Vec::new(),
    }
}

fn ids_from_array(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(crate::status::number_text(n)),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn ids_from_delimited(s: &str) -> Vec<String> {
    s.split(',')
        .map(|piece| {
            piece
                .chars()
                .filter(|c| !matches!(c, '[' | ']' | '{' | '}' | '"'))
                .collect::<String>()
                .trim()
                .to_string()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Batched profile resolution. Reconciliation calls this at most once per run.
pub trait StudentLookup {
    fn fetch_students_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<Person>>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRoster {
    pub course_id: String,
    pub course_name: String,
    pub student_ids: Vec<String>,
    pub students: Vec<Person>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub rosters: Vec<CourseRoster>,
    pub my_students: Vec<Person>,
    pub unresolved_ids: Vec<String>,
}

impl Reconciliation {
    pub fn roster(&self, course_id: &str) -> Option<&CourseRoster> {
        self.rosters.iter().find(|r| r.course_id == course_id)
    }
}

/// Resolve which known course a dependent row points at: id first, then name.
pub fn resolve_course<'a>(courses: &'a [Course], r: &CourseRef<'_>) -> Option<&'a Course> {
    if let Some(cid) = r.course_id {
        if let Some(c) = courses.iter().find(|c| c.id == cid) {
            return Some(c);
        }
    }
    let name = r.course_name.map(str::trim).filter(|n| !n.is_empty())?;
    courses.iter().find(|c| c.name.trim() == name)
}

/// Per-course id lists: declared roster first, then ids seen in dependent rows.
pub fn effective_roster_ids(courses: &[Course], dependents: &[CourseRef<'_>]) -> Vec<Vec<String>> {
    let mut sets: Vec<(Vec<String>, HashSet<String>)> = courses
        .iter()
        .map(|c| {
            let mut order = Vec::new();
            let mut seen = HashSet::new();
            for id in &c.roster {
                if seen.insert(id.clone()) {
                    order.push(id.clone());
                }
            }
            (order, seen)
        })
        .collect();

    let index: HashMap<&str, usize> = courses
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    for dep in dependents {
        let sid = dep.student_id.trim();
        if sid.is_empty() {
            continue;
        }
        let Some(course) = resolve_course(courses, dep) else {
            continue;
        };
        let Some(&i) = index.get(course.id.as_str()) else {
            continue;
        };
        let (order, seen) = &mut sets[i];
        if seen.insert(sid.to_string()) {
            order.push(sid.to_string());
        }
    }

    sets.into_iter().map(|(order, _)| order).collect()
}

pub fn reconcile_rosters(
    courses: &[Course],
    dependents: &[CourseRef<'_>],
    known_students: &[Person],
    lookup: &dyn StudentLookup,
) -> anyhow::Result<Reconciliation> {
    let per_course = effective_roster_ids(courses, dependents);

    let mut union: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for ids in &per_course {
        for id in ids {
            if seen.insert(id.as_str()) {
                union.push(id.clone());
            }
        }
    }

    let mut profiles: HashMap<String, Person> = known_students
        .iter()
        .map(|p| (p.id.clone(), p.clone()))
        .collect();

    let missing: Vec<String> = union
        .iter()
        .filter(|id| !profiles.contains_key(id.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        tracing::debug!(count = missing.len(), "resolving roster profiles");
        for p in lookup.fetch_students_by_ids(&missing)? {
            profiles.entry(p.id.clone()).or_insert(p);
        }
    }

    let unresolved_ids: Vec<String> = union
        .iter()
        .filter(|id| !profiles.contains_key(id.as_str()))
        .cloned()
        .collect();
    if !unresolved_ids.is_empty() {
        tracing::warn!(
            count = unresolved_ids.len(),
            "dropping stale roster references"
        );
    }

    let mut rosters = Vec::with_capacity(courses.len());
    let mut my_students: Vec<Person> = Vec::new();
    let mut emitted: HashSet<String> = HashSet::new();
    for (course, ids) in courses.iter().zip(per_course) {
        let students: Vec<Person> = ids
            .iter()
            .filter_map(|id| profiles.get(id).cloned())
            .collect();
        for s in &students {
            if emitted.insert(s.id.clone()) {
                my_students.push(s.clone());
            }
        }
        rosters.push(CourseRoster {
            course_id: course.id.clone(),
            course_name: course.display_name().to_string(),
            student_ids: students.iter().map(|s| s.id.clone()).collect(),
            students,
        });
    }

    Ok(Reconciliation {
        rosters,
        my_students,
        unresolved_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttendanceRecord, Grade, Role};
    use serde_json::json;
    use std::cell::RefCell;

    fn student(id: &str) -> Person {
        Person {
            id: id.to_string(),
            name: format!("Student {id}"),
            email: format!("{id}@school.test"),
            role: Role::Student,
            phone: None,
            grade_level: None,
            gpa: None,
            attendance_percent: None,
            parent_id: None,
        }
    }

    fn course(id: &str, name: &str, roster: &[&str]) -> Course {
        Course {
            id: id.to_string(),
            code: String::new(),
            name: name.to_string(),
            teacher_id: None,
            teacher_name: None,
            credits: 3.0,
            schedule: None,
            roster: roster.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn attendance(student_id: &str, course_id: Option<&str>, course_name: Option<&str>) -> AttendanceRecord {
        AttendanceRecord {
            id: format!("att-{student_id}"),
            student_id: student_id.to_string(),
            course_id: course_id.map(str::to_string),
            course_name: course_name.map(str::to_string),
            lesson_id: None,
            date: "2024-09-03".to_string(),
            status: None,
            raw_status: String::new(),
        }
    }

    struct Directory {
        students: Vec<Person>,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl Directory {
        fn new(ids: &[&str]) -> Self {
            Directory {
                students: ids.iter().map(|id| student(id)).collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl StudentLookup for Directory {
        fn fetch_students_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<Person>> {
            self.calls.borrow_mut().push(ids.to_vec());
            Ok(self
                .students
                .iter()
                .filter(|s| ids.contains(&s.id))
                .cloned()
                .collect())
        }
    }

    #[test]
    fn normalize_accepts_json_string_csv_and_arrays() {
        assert_eq!(normalize_roster_ids(&json!("[\"a\",\"b\",\"c\"]")), vec!["a", "b", "c"]);
        assert_eq!(normalize_roster_ids(&json!("a,b,c")), vec!["a", "b", "c"]);
        assert_eq!(normalize_roster_ids(&json!([" a ", 7, "", "a"])), vec!["a", "7", "a"]);
        assert_eq!(normalize_roster_ids(&json!("{s1, \"s2\"}")), vec!["s1", "s2"]);
        assert!(normalize_roster_ids(&Value::Null).is_empty());
        assert!(normalize_roster_ids(&json!({ "ids": ["a"] })).is_empty());
        assert!(normalize_roster_ids(&json!(42)).is_empty());
    }

    #[test]
    fn normalize_falls_back_after_json_failure() {
        assert_eq!(
            normalize_roster_ids(&json!("[\"a\", \"b\"]extra")),
            vec!["a", "bextra"]
        );
        // Valid JSON that is not an array also takes the delimiter path.
        assert_eq!(normalize_roster_ids(&json!("\"x\"")), vec!["x"]);
        assert!(normalize_roster_ids(&json!("")).is_empty());
        assert!(normalize_roster_ids(&json!(" , ,[]")).is_empty());
    }

    #[test]
    fn declared_ids_come_first_then_observed() {
        let courses = vec![course("C1", "Algebra", &["s1"])];
        let att = vec![attendance("s2", Some("C1"), None), attendance("s1", Some("C1"), None)];
        let refs: Vec<CourseRef<'_>> = att.iter().map(CourseRef::from).collect();
        let dir = Directory::new(&["s1", "s2"]);

        let rec = reconcile_rosters(&courses, &refs, &[], &dir).expect("reconcile");
        assert_eq!(rec.roster("C1").expect("C1").student_ids, vec!["s1", "s2"]);
    }

    #[test]
    fn name_match_is_used_when_course_id_is_absent_or_unknown() {
        let courses = vec![course("C1", "Algebra", &[]), course("C2", "Biology", &[])];
        let att = vec![
            attendance("s1", None, Some("Biology")),
            attendance("s2", Some("GONE"), Some("Algebra")),
            attendance("s3", Some("GONE"), Some("Chemistry")),
        ];
        let refs: Vec<CourseRef<'_>> = att.iter().map(CourseRef::from).collect();
        let dir = Directory::new(&["s1", "s2", "s3"]);

        let rec = reconcile_rosters(&courses, &refs, &[], &dir).expect("reconcile");
        assert_eq!(rec.roster("C1").expect("C1").student_ids, vec!["s2"]);
        assert_eq!(rec.roster("C2").expect("C2").student_ids, vec!["s1"]);
        assert!(rec.my_students.iter().all(|s| s.id != "s3"));
    }

    #[test]
    fn missing_profiles_are_fetched_in_one_batch() {
        let courses = vec![course("C1", "Algebra", &["s1", "s2"]), course("C2", "Biology", &["s3"])];
        let grades = vec![Grade {
            id: "g1".to_string(),
            student_id: "s4".to_string(),
            course_id: Some("C2".to_string()),
            course_name: None,
            assessment_type: "quiz".to_string(),
            score: 5.0,
            max_score: 10.0,
            date: None,
        }];
        let refs: Vec<CourseRef<'_>> = grades.iter().map(CourseRef::from).collect();
        let known = vec![student("s1")];
        let dir = Directory::new(&["s2", "s3", "s4"]);

        let rec = reconcile_rosters(&courses, &refs, &known, &dir).expect("reconcile");
        let calls = dir.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["s2", "s3", "s4"]);
        assert_eq!(rec.my_students.len(), 4);
    }

    #[test]
    fn no_lookup_when_every_profile_is_known() {
        let courses = vec![course("C1", "Algebra", &["s1"])];
        let dir = Directory::new(&[]);
        let rec = reconcile_rosters(&courses, &[], &[student("s1")], &dir).expect("reconcile");
        assert!(dir.calls.borrow().is_empty());
        assert_eq!(rec.my_students.len(), 1);
    }

    #[test]
    fn stale_ids_are_dropped_and_reported() {
        let courses = vec![course("C1", "Algebra", &["s1", "ghost"]), course("C2", "Empty", &[])];
        let dir = Directory::new(&["s1"]);
        let rec = reconcile_rosters(&courses, &[], &[], &dir).expect("reconcile");
        assert_eq!(rec.roster("C1").expect("C1").student_ids, vec!["s1"]);
        assert!(rec.roster("C2").expect("C2").students.is_empty());
        assert_eq!(rec.unresolved_ids, vec!["ghost"]);
    }

    #[test]
    fn my_students_is_deduplicated_across_courses() {
        let courses = vec![course("C1", "Algebra", &["s1", "s2"]), course("C2", "Biology", &["s2", "s1", "s2"])];
        let dir = Directory::new(&["s1", "s2"]);
        let rec = reconcile_rosters(&courses, &[], &[], &dir).expect("reconcile");
        let ids: Vec<&str> = rec.my_students.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(rec.roster("C2").expect("C2").student_ids, vec!["s2", "s1"]);
    }
}
