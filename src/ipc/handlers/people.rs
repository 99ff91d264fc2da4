use crate::ipc::helpers::{db_err, optional_f64, optional_str, required_str, respond, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{Person, Role};
use serde_json::json;
use uuid::Uuid;

fn parse_role(raw: Option<String>) -> Result<Option<Role>, HandlerErr> {
    match raw {
        None => Ok(None),
        Some(r) => Role::parse(&r)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params("role must be student, teacher, parent or admin")),
    }
}

fn people_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let role = parse_role(optional_str(req, "role"))?;
    // Reads fall back to an empty list until a workspace is chosen.
    let Ok(store) = store(state) else {
        return Ok(json!({ "people": [] }));
    };
    let people = store.list_people(role).map_err(db_err("db_query_failed"))?;
    Ok(json!({ "people": people }))
}

fn people_get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = store(state)?;
    let id = required_str(req, "id")?;
    match store.get_person(&id).map_err(db_err("db_query_failed"))? {
        Some(p) => Ok(json!({ "person": p })),
        None => Err(HandlerErr::new("not_found", "person not found")),
    }
}

fn people_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = store(state)?;
    let name = required_str(req, "name")?;
    let role = parse_role(optional_str(req, "role"))?.unwrap_or(Role::Student);
    let gpa = optional_f64(req, "gpa")?;
    if let Some(g) = gpa {
        if !(0.0..=4.0).contains(&g) {
            return Err(HandlerErr::bad_params("gpa must be between 0.0 and 4.0"));
        }
    }
    let person = Person {
        id: optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string()),
        name,
        email: optional_str(req, "email").unwrap_or_default(),
        role,
        phone: optional_str(req, "phone"),
        grade_level: optional_str(req, "gradeLevel"),
        gpa,
        attendance_percent: optional_f64(req, "attendancePercent")?,
        parent_id: optional_str(req, "parentId"),
    };
    store
        .insert_person(&person)
        .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "person": person }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "people.list" => Some(respond(req, people_list(state, req))),
        "people.get" => Some(respond(req, people_get(state, req))),
        "people.create" => Some(respond(req, people_create(state, req))),
        _ => None,
    }
}
