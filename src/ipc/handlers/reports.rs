use crate::calc;
use crate::ipc::handlers::roster::reconcile_for;
use crate::ipc::helpers::{db_err, optional_str, respond, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{Course, Role};
use crate::reports::{department_key, department_summaries, grade_distribution};
use serde_json::json;
use std::collections::BTreeMap;

fn reports_departments(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Ok(store) = store(state) else {
        return Ok(json!({ "departments": [] }));
    };
    let courses = store
        .list_courses(None)
        .map_err(db_err("db_query_failed"))?;
    let rec = reconcile_for(store, &courses)?;
    let students = store
        .list_people(Some(Role::Student))
        .map_err(db_err("db_query_failed"))?;
    let attendance = store
        .list_attendance(None)
        .map_err(db_err("db_query_failed"))?;
    let mut out = department_summaries(&courses, &rec.rosters, &students, &attendance);
    if let Some(dept) = optional_str(req, "department") {
        let key = department_key(&dept);
        out.retain(|d| d.department == key);
    }
    Ok(json!({ "departments": out }))
}

fn find_course<'a>(courses: &'a [Course], course_id: Option<&str>, course_name: Option<&str>) -> Option<&'a Course> {
    course_id
        .and_then(|id| courses.iter().find(|c| c.id == id))
        .or_else(|| {
            let name = course_name?.trim();
            courses.iter().find(|c| c.name.trim() == name)
        })
}

fn reports_grade_distribution(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Ok(store) = store(state) else {
        return Ok(json!({ "overall": grade_distribution(&[]), "departments": [] }));
    };
    let courses = store
        .list_courses(None)
        .map_err(db_err("db_query_failed"))?;
    let grades = store
        .list_grades(None)
        .map_err(db_err("db_query_failed"))?;
    let rows = calc::cumulative_by_student_course(&grades);

    let mut by_department: BTreeMap<String, Vec<calc::CumulativeRow>> = BTreeMap::new();
    for row in &rows {
        // Rows whose course is unknown still count overall, just not per department.
        if let Some(c) = find_course(&courses, row.course_id.as_deref(), row.course_name.as_deref()) {
            by_department
                .entry(department_key(&c.code))
                .or_default()
                .push(row.clone());
        }
    }
    let wanted = optional_str(req, "department").map(|d| department_key(&d));
    let departments: Vec<serde_json::Value> = by_department
        .iter()
        .filter(|(k, _)| wanted.as_ref().map(|w| w == *k).unwrap_or(true))
        .map(|(k, v)| json!({ "department": k, "distribution": grade_distribution(v) }))
        .collect();

    Ok(json!({
        "overall": grade_distribution(&rows),
        "departments": departments,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.departments" => Some(respond(req, reports_departments(state, req))),
        "reports.gradeDistribution" => Some(respond(req, reports_grade_distribution(state, req))),
        _ => None,
    }
}
