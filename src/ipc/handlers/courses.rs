use crate::ipc::helpers::{db_err, optional_f64, optional_str, required_str, respond, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::NewCourse;
use crate::model::Course;
use serde_json::json;
use uuid::Uuid;

fn course_json(c: &Course) -> serde_json::Value {
    json!({
        "id": c.id,
        "code": c.code,
        "name": c.display_name(),
        "teacherId": c.teacher_id,
        "teacherName": c.teacher_label(),
        "credits": c.credits,
        "schedule": c.schedule,
        "studentIds": c.roster,
    })
}

fn courses_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Ok(store) = store(state) else {
        return Ok(json!({ "courses": [] }));
    };
    let teacher_id = optional_str(req, "teacherId");
    let courses = store
        .list_courses(teacher_id.as_deref())
        .map_err(db_err("db_query_failed"))?;
    let rows: Vec<serde_json::Value> = courses.iter().map(course_json).collect();
    Ok(json!({ "courses": rows }))
}

fn courses_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = store(state)?;
    let code = required_str(req, "code")?;
    let name = required_str(req, "name")?;
    let credits = optional_f64(req, "credits")?.unwrap_or(0.0);
    if credits < 0.0 {
        return Err(HandlerErr::bad_params("credits must not be negative"));
    }
    let roster = req
        .params
        .get("studentIds")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    let id = optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let new_course = NewCourse {
        code,
        name,
        teacher_id: optional_str(req, "teacherId"),
        teacher_name: optional_str(req, "teacherName"),
        credits,
        schedule: optional_str(req, "schedule"),
        roster,
    };
    store
        .insert_course(&id, &new_course)
        .map_err(db_err("db_insert_failed"))?;
    let course = store
        .get_course(&id)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::new("not_found", "course not found after insert"))?;
    Ok(json!({ "course": course_json(&course) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(respond(req, courses_list(state, req))),
        "courses.create" => Some(respond(req, courses_create(state, req))),
        _ => None,
    }
}
