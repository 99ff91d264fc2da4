use crate::calc;
use crate::ipc::helpers::{db_err, optional_str, required_str, respond, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{extract_rows, AttendanceRecord, UNKNOWN_STUDENT, UNNAMED_COURSE};
use crate::status::normalize_status;
use crate::store::Store;
use chrono::NaiveDate;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Records for a stats request: inline `records` win, otherwise the store is
/// read with the optional `studentId` / `courseId` filters.
fn load_records(state: &AppState, req: &Request) -> Result<Vec<AttendanceRecord>, HandlerErr> {
    if let Some(raw) = req.params.get("records") {
        return Ok(extract_rows(raw, "records")
            .iter()
            .filter_map(AttendanceRecord::from_value)
            .collect());
    }
    let Ok(store) = store(state) else {
        return Ok(Vec::new());
    };
    let student_id = optional_str(req, "studentId");
    match optional_str(req, "courseId") {
        Some(course_id) => {
            let Some(course) = store
                .get_course(&course_id)
                .map_err(db_err("db_query_failed"))?
            else {
                return Err(HandlerErr::new("not_found", "course not found"));
            };
            let rows = store
                .list_attendance_for_courses(std::slice::from_ref(&course))
                .map_err(db_err("db_query_failed"))?;
            Ok(rows
                .into_iter()
                .filter(|r| student_id.as_deref().map(|s| r.student_id == s).unwrap_or(true))
                .collect())
        }
        None => store
            .list_attendance(student_id.as_deref())
            .map_err(db_err("db_query_failed")),
    }
}

fn attendance_stats(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let records = load_records(state, req)?;
    Ok(json!({ "stats": calc::compute_stats(&records) }))
}

fn attendance_by_course(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let records = load_records(state, req)?;
    Ok(json!({
        "overall": calc::compute_stats(&records),
        "courses": calc::stats_by_course(&records),
    }))
}

fn attendance_by_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let records = load_records(state, req)?;
    let names = match store(state) {
        Ok(s) => student_names(s)?,
        Err(_) => HashMap::new(),
    };
    let rows: Vec<serde_json::Value> = calc::group_by_student(&records)
        .into_iter()
        .map(|(student_id, rows)| {
            json!({
                "studentName": names.get(&student_id).map(String::as_str).unwrap_or(UNKNOWN_STUDENT),
                "studentId": student_id,
                "stats": calc::compute_stats(rows),
            })
        })
        .collect();
    Ok(json!({ "students": rows }))
}

fn student_names(store: &Store) -> Result<HashMap<String, String>, HandlerErr> {
    Ok(store
        .list_people(None)
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .map(|p| (p.id.clone(), p.display_name().to_string()))
        .collect())
}

fn attendance_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Ok(store) = store(state) else {
        return Ok(json!({ "records": [] }));
    };
    let records = load_records(state, req)?;
    let names = student_names(store)?;
    let course_names: HashMap<String, String> = store
        .list_courses(None)
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .map(|c| (c.id.clone(), c.display_name().to_string()))
        .collect();

    let rows: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            let course_label = r
                .course_name
                .clone()
                .or_else(|| r.course_id.as_ref().and_then(|id| course_names.get(id).cloned()))
                .unwrap_or_else(|| UNNAMED_COURSE.to_string());
            json!({
                "id": r.id,
                "studentId": r.student_id,
                "studentName": names.get(&r.student_id).map(String::as_str).unwrap_or(UNKNOWN_STUDENT),
                "courseId": r.course_id,
                "courseName": course_label,
                "lessonId": r.lesson_id,
                "date": r.date,
                "status": r.status,
                "rawStatus": r.raw_status,
            })
        })
        .collect();
    Ok(json!({ "records": rows }))
}

fn attendance_mark(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = store(state)?;
    let student_id = required_str(req, "studentId")?;
    let raw_status = req
        .params
        .get("status")
        .ok_or_else(|| HandlerErr::bad_params("missing status"))?;
    let Some(status) = normalize_status(raw_status) else {
        return Err(HandlerErr::bad_params(format!(
            "unrecognized attendance status: {}",
            raw_status
        )));
    };
    let date = match optional_str(req, "date") {
        Some(d) => NaiveDate::parse_from_str(&d, "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))?,
        None => chrono::Local::now().date_naive(),
    };

    let course_id = optional_str(req, "courseId");
    let mut course_name = optional_str(req, "courseName");
    if let Some(cid) = course_id.as_deref() {
        if course_name.is_none() {
            course_name = store
                .get_course(cid)
                .map_err(db_err("db_query_failed"))?
                .map(|c| c.name);
        }
    }

    let record = AttendanceRecord {
        id: Uuid::new_v4().to_string(),
        student_id,
        course_id,
        course_name,
        lesson_id: optional_str(req, "lessonId"),
        date: date.format("%Y-%m-%d").to_string(),
        status: Some(status),
        raw_status: status.as_str().to_string(),
    };
    store
        .insert_attendance(&record)
        .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "record": record }))
}

fn status_normalize(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let raw = req.params.get("value").cloned().unwrap_or(serde_json::Value::Null);
    Ok(json!({ "status": normalize_status(&raw) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(respond(req, attendance_mark(state, req))),
        "attendance.list" => Some(respond(req, attendance_list(state, req))),
        "attendance.stats" => Some(respond(req, attendance_stats(state, req))),
        "attendance.byCourse" => Some(respond(req, attendance_by_course(state, req))),
        "attendance.byStudent" => Some(respond(req, attendance_by_student(state, req))),
        "status.normalize" => Some(respond(req, status_normalize(req))),
        _ => None,
    }
}
