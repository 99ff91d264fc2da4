use crate::calc;
use crate::ipc::helpers::{db_err, optional_str, required_f64, required_str, respond, store, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{extract_rows, Grade, UNKNOWN_STUDENT, UNNAMED_COURSE};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn load_grades(state: &AppState, req: &Request) -> Result<Vec<Grade>, HandlerErr> {
    if let Some(raw) = req.params.get("grades") {
        return Ok(extract_rows(raw, "grades")
            .iter()
            .filter_map(Grade::from_value)
            .collect());
    }
    let Ok(store) = store(state) else {
        return Ok(Vec::new());
    };
    let student_id = optional_str(req, "studentId");
    let grades = match optional_str(req, "courseId") {
        Some(course_id) => {
            let Some(course) = store
                .get_course(&course_id)
                .map_err(db_err("db_query_failed"))?
            else {
                return Err(HandlerErr::new("not_found", "course not found"));
            };
            store
                .list_grades_for_courses(std::slice::from_ref(&course))
                .map_err(db_err("db_query_failed"))?
                .into_iter()
                .filter(|g| student_id.as_deref().map(|s| g.student_id == s).unwrap_or(true))
                .collect()
        }
        None => store
            .list_grades(student_id.as_deref())
            .map_err(db_err("db_query_failed"))?,
    };
    Ok(grades)
}

fn grades_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let grades = load_grades(state, req)?;
    let (names, course_names): (HashMap<String, String>, HashMap<String, String>) = match store(state) {
        Ok(s) => (
            s.list_people(None)
                .map_err(db_err("db_query_failed"))?
                .into_iter()
                .map(|p| (p.id.clone(), p.display_name().to_string()))
                .collect(),
            s.list_courses(None)
                .map_err(db_err("db_query_failed"))?
                .into_iter()
                .map(|c| (c.id.clone(), c.display_name().to_string()))
                .collect(),
        ),
        Err(_) => (HashMap::new(), HashMap::new()),
    };
    let rows: Vec<serde_json::Value> = grades
        .iter()
        .map(|g| {
            let pct = calc::grade_percent(g);
            let course_label = g
                .course_name
                .clone()
                .or_else(|| g.course_id.as_ref().and_then(|id| course_names.get(id).cloned()))
                .unwrap_or_else(|| UNNAMED_COURSE.to_string());
            json!({
                "id": g.id,
                "studentId": g.student_id,
                "studentName": names.get(&g.student_id).map(String::as_str).unwrap_or(UNKNOWN_STUDENT),
                "courseId": g.course_id,
                "courseName": course_label,
                "assessmentType": g.assessment_type,
                "score": g.score,
                "maxScore": g.max_score,
                "date": g.date,
                "percent": calc::round_half_up(pct),
                "letter": calc::letter_band(pct),
            })
        })
        .collect();
    Ok(json!({ "grades": rows }))
}

fn grades_cumulative(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let grades = load_grades(state, req)?;
    Ok(json!({ "rows": calc::cumulative_by_student_course(&grades) }))
}

fn grades_student_average(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    if req.params.get("grades").is_none() {
        required_str(req, "studentId")?;
    }
    let grades = load_grades(state, req)?;
    let avg = calc::average_of_percentages(&grades);
    Ok(json!({
        "gradeCount": grades.len(),
        "averagePercent": calc::round_half_up(avg),
        "letter": calc::letter_band(avg),
    }))
}

fn grades_letter(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let pct = required_f64(req, "percent")?;
    Ok(json!({ "letter": calc::letter_band(pct) }))
}

fn grades_record(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let store = store(state)?;
    let student_id = required_str(req, "studentId")?;
    let score = required_f64(req, "score")?;
    let max_score = required_f64(req, "maxScore")?;
    if max_score <= 0.0 {
        return Err(HandlerErr::bad_params("maxScore must be greater than zero"));
    }
    if score < 0.0 {
        return Err(HandlerErr::bad_params("score must not be negative"));
    }
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
    if course_id.is_none() && course_name.is_none() {
        return Err(HandlerErr::bad_params("missing courseId or courseName"));
    }
    let date = match optional_str(req, "date") {
        Some(d) => chrono::NaiveDate::parse_from_str(&d, "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))?,
        None => chrono::Local::now().date_naive(),
    };
    let grade = Grade {
        id: Uuid::new_v4().to_string(),
        student_id,
        course_id,
        course_name,
        assessment_type: optional_str(req, "assessmentType").unwrap_or_else(|| "assessment".to_string()),
        score,
        max_score,
        date: Some(date.format("%Y-%m-%d").to_string()),
    };
    store.insert_grade(&grade).map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "grade": grade }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.record" => Some(respond(req, grades_record(state, req))),
        "grades.list" => Some(respond(req, grades_list(state, req))),
        "grades.cumulative" => Some(respond(req, grades_cumulative(state, req))),
        "grades.studentAverage" => Some(respond(req, grades_student_average(state, req))),
        "grades.letter" => Some(respond(req, grades_letter(req))),
        _ => None,
    }
}
