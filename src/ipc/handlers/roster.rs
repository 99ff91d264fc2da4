use crate::ipc::helpers::{db_err, optional_str, required_str, respond, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{Course, CourseRef};
use crate::roster::{normalize_roster_ids, reconcile_rosters, Reconciliation};
use crate::store::Store;
use serde_json::json;

fn selected_courses(store: &Store, req: &Request, teacher_id: Option<&str>) -> Result<Vec<Course>, HandlerErr> {
    let courses = store
        .list_courses(teacher_id)
        .map_err(db_err("db_query_failed"))?;
    let Some(ids) = req.params.get("courseIds") else {
        return Ok(courses);
    };
    let Some(ids) = ids.as_array() else {
        return Err(HandlerErr::bad_params("courseIds must be an array"));
    };
    let wanted: Vec<&str> = ids.iter().filter_map(|v| v.as_str()).collect();
    Ok(courses
        .into_iter()
        .filter(|c| wanted.contains(&c.id.as_str()))
        .collect())
}

/// Reconcile the chosen courses against every attendance and grade row that
/// points at them. Profiles come from one batched store lookup.
pub(crate) fn reconcile_for(store: &Store, courses: &[Course]) -> Result<Reconciliation, HandlerErr> {
    let attendance = store
        .list_attendance_for_courses(courses)
        .map_err(db_err("db_query_failed"))?;
    let grades = store
        .list_grades_for_courses(courses)
        .map_err(db_err("db_query_failed"))?;
    let dependents: Vec<CourseRef<'_>> = attendance
        .iter()
        .map(CourseRef::from)
        .chain(grades.iter().map(CourseRef::from))
        .collect();
    reconcile_rosters(courses, &dependents, &[], store).map_err(db_err("db_query_failed"))
}

fn roster_reconcile(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Ok(store) = store(state) else {
        return Ok(json!({ "rosters": [], "myStudents": [], "unresolvedIds": [] }));
    };
    let teacher_id = optional_str(req, "teacherId");
    let courses = selected_courses(store, req, teacher_id.as_deref())?;
    let rec = reconcile_for(store, &courses)?;
    if let Some(course_id) = optional_str(req, "courseId") {
        let Some(roster) = rec.roster(&course_id) else {
            return Err(HandlerErr::new("not_found", "course not found"));
        };
        return Ok(json!({ "roster": roster, "unresolvedIds": &rec.unresolved_ids }));
    }
    Ok(json!(rec))
}

fn roster_my_students(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = required_str(req, "teacherId")?;
    let Ok(store) = store(state) else {
        return Ok(json!({ "students": [] }));
    };
    let courses = store
        .list_courses(Some(&teacher_id))
        .map_err(db_err("db_query_failed"))?;
    let rec = reconcile_for(store, &courses)?;
    Ok(json!({ "students": rec.my_students }))
}

fn roster_normalize(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let raw = req.params.get("value").cloned().unwrap_or(serde_json::Value::Null);
    Ok(json!({ "studentIds": normalize_roster_ids(&raw) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "roster.normalize" => Some(respond(req, roster_normalize(req))),
        "roster.reconcile" => Some(respond(req, roster_reconcile(state, req))),
        "roster.myStudents" => Some(respond(req, roster_my_students(state, req))),
        _ => None,
    }
}
