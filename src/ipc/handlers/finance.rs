use crate::calc;
use crate::ipc::helpers::{db_err, optional_f64, optional_str, required_f64, required_str, respond, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{Finance, UNKNOWN_STUDENT};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn non_negative(req: &Request, key: &str) -> Result<Option<f64>, HandlerErr> {
    match optional_f64(req, key)? {
        Some(v) if v < 0.0 => Err(HandlerErr::bad_params(format!("{} must not be negative", key))),
        other => Ok(other),
    }
}

fn finance_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = store(state)?;
    let existing = match optional_str(req, "id") {
        Some(id) => store.get_finance(&id).map_err(db_err("db_query_failed"))?,
        None => None,
    };
    let student_id = match (&existing, optional_str(req, "studentId")) {
        (_, Some(s)) => s,
        (Some(f), None) => f.student_id.clone(),
        (None, None) => return Err(HandlerErr::bad_params("missing studentId")),
    };
    let base = existing.unwrap_or(Finance {
        id: optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string()),
        student_id: student_id.clone(),
        total_fee: 0.0,
        scholarship: 0.0,
        paid: 0.0,
        due: 0.0,
        semester: None,
    });
    let next = Finance {
        student_id,
        total_fee: non_negative(req, "totalFee")?.unwrap_or(base.total_fee),
        scholarship: non_negative(req, "scholarship")?.unwrap_or(base.scholarship),
        paid: non_negative(req, "paid")?.unwrap_or(base.paid),
        semester: optional_str(req, "semester").or(base.semester.clone()),
        ..base
    };
    let saved = store
        .upsert_finance(&next)
        .map_err(db_err("db_update_failed"))?;
    Ok(json!({ "finance": saved }))
}

fn finance_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Ok(store) = store(state) else {
        return Ok(json!({ "finances": [] }));
    };
    let student_id = optional_str(req, "studentId");
    let records = store
        .list_finances(student_id.as_deref())
        .map_err(db_err("db_query_failed"))?;
    let names: HashMap<String, String> = store
        .list_people(None)
        .map_err(db_err("db_query_failed"))?
        .into_iter()
        .map(|p| (p.id.clone(), p.display_name().to_string()))
        .collect();
    let rows: Vec<serde_json::Value> = records
        .iter()
        .map(|f| {
            json!({
                "id": f.id,
                "studentId": f.student_id,
                "studentName": names.get(&f.student_id).map(String::as_str).unwrap_or(UNKNOWN_STUDENT),
                "totalFee": f.total_fee,
                "scholarship": f.scholarship,
                "paid": f.paid,
                "due": f.due,
                "semester": f.semester,
            })
        })
        .collect();
    Ok(json!({ "finances": rows }))
}

fn finance_record_payment(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = store(state)?;
    let finance_id = required_str(req, "financeId")?;
    let amount = required_f64(req, "amount")?;
    if amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be greater than zero"));
    }
    if store
        .get_finance(&finance_id)
        .map_err(db_err("db_query_failed"))?
        .is_none()
    {
        return Err(HandlerErr::new("not_found", "finance record not found"));
    }
    let saved = store
        .record_payment(&finance_id, amount)
        .map_err(db_err("db_update_failed"))?;
    Ok(json!({ "finance": saved }))
}

fn finance_summary(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Ok(store) = store(state) else {
        return Ok(json!({ "summary": calc::finance_summary(&[]) }));
    };
    let student_id = optional_str(req, "studentId");
    let records = store
        .list_finances(student_id.as_deref())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "summary": calc::finance_summary(&records) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "finance.upsert" => Some(respond(req, finance_upsert(state, req))),
        "finance.list" => Some(respond(req, finance_list(state, req))),
        "finance.recordPayment" => Some(respond(req, finance_record_payment(state, req))),
        "finance.summary" => Some(respond(req, finance_summary(state, req))),
        _ => None,
    }
}
