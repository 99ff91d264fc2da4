use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn fixture_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(rel)
}

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .env_remove("CAMPUSD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn seeded_sidecar(prefix: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "seed",
        "snapshot.import",
        json!({ "path": fixture_path("fixtures/seed/school.json").to_string_lossy() }),
    );
    assert_eq!(imported["imported"]["people"].as_u64(), Some(9));
    (child, stdin, reader)
}

#[test]
fn cumulative_uses_points_while_student_average_uses_percentages() {
    let (_child, mut stdin, mut reader) = seeded_sidecar("campusd-grades-cumulative");

    let cumulative = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.cumulative",
        json!({ "studentId": "s1" }),
    );
    let rows = cumulative["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["courseId"].as_str(), Some("c1"));
    assert_eq!(rows[0]["earned"].as_f64(), Some(50.0));
    assert_eq!(rows[0]["possible"].as_f64(), Some(110.0));
    assert_eq!(rows[0]["assessmentCount"].as_u64(), Some(2));
    assert_eq!(rows[0]["cumulativePercent"].as_i64(), Some(45));
    assert_eq!(rows[0]["letter"].as_str(), Some("F"));

    let average = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.studentAverage",
        json!({ "studentId": "s1" }),
    );
    assert_eq!(average["gradeCount"].as_u64(), Some(2));
    assert_eq!(average["averagePercent"].as_i64(), Some(70));
    assert_eq!(average["letter"].as_str(), Some("C"));

    let missing = request(&mut stdin, &mut reader, "3", "grades.studentAverage", json!({}));
    assert_eq!(error_code(&missing), Some("bad_params"));
}

#[test]
fn cumulative_rows_follow_first_seen_order() {
    let (_child, mut stdin, mut reader) = seeded_sidecar("campusd-grades-order");
    let out = request_ok(&mut stdin, &mut reader, "1", "grades.cumulative", json!({}));
    let rows = out["rows"].as_array().expect("rows");
    let keys: Vec<(&str, i64)> = rows
        .iter()
        .map(|r| {
            (
                r["studentId"].as_str().unwrap_or(""),
                r["cumulativePercent"].as_i64().unwrap_or(-1),
            )
        })
        .collect();
    assert_eq!(
        keys,
        vec![("s1", 45), ("s2", 85), ("s3", 90), ("s5", 70), ("s2", 60)]
    );
    // The name-only grade keeps its label and has no course id.
    assert!(rows[4]["courseId"].is_null());
    assert_eq!(rows[4]["courseName"].as_str(), Some("Calculus I"));
}

#[test]
fn course_filter_includes_rows_linked_by_name() {
    let (_child, mut stdin, mut reader) = seeded_sidecar("campusd-grades-course");

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.cumulative",
        json!({ "courseId": "c3" }),
    );
    assert_eq!(out["rows"].as_array().map(Vec::len), Some(1));
    assert_eq!(out["rows"][0]["studentId"].as_str(), Some("s2"));
    assert_eq!(out["rows"][0]["cumulativePercent"].as_i64(), Some(60));

    let recorded = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.record",
        json!({
            "studentId": "s1",
            "courseId": "c3",
            "assessmentType": "quiz",
            "score": 45,
            "maxScore": 50,
            "date": "2024-09-30"
        }),
    );
    assert_eq!(recorded["grade"]["courseName"].as_str(), Some("Calculus I"));

    let s1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.cumulative",
        json!({ "courseId": "c3", "studentId": "s1" }),
    );
    assert_eq!(s1["rows"][0]["cumulativePercent"].as_i64(), Some(90));
    assert_eq!(s1["rows"][0]["letter"].as_str(), Some("A"));
}

#[test]
fn record_rejects_invalid_scores_and_missing_course() {
    let (_child, mut stdin, mut reader) = seeded_sidecar("campusd-grades-record");
    let cases = [
        json!({ "studentId": "s1", "courseId": "c1", "score": 5, "maxScore": 0 }),
        json!({ "studentId": "s1", "courseId": "c1", "score": -1, "maxScore": 10 }),
        json!({ "studentId": "s1", "score": 5, "maxScore": 10 }),
        json!({ "studentId": "s1", "courseId": "c1", "score": 5, "maxScore": 10, "date": "Sept 3" }),
        json!({ "courseId": "c1", "score": 5, "maxScore": 10 }),
    ];
    for (i, params) in cases.into_iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("{}", i), "grades.record", params);
        assert_eq!(error_code(&resp), Some("bad_params"), "case {}", i);
    }

    let out = request_ok(
        &mut stdin,
        &mut reader,
        "after",
        "grades.list",
        json!({ "studentId": "s1" }),
    );
    assert_eq!(out["grades"].as_array().map(Vec::len), Some(2));
}

#[test]
fn grade_listing_fills_placeholders() {
    let (_child, mut stdin, mut reader) = seeded_sidecar("campusd-grades-list");
    let out = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.list",
        json!({ "grades": { "data": [
            { "id": "x1", "studentId": "zz", "score": 17, "maxScore": 20 },
            { "id": "x2", "studentId": "s3", "courseId": "c2", "score": 3, "maxScore": 0 }
        ]}}),
    );
    let rows = out["grades"].as_array().expect("grades");
    assert_eq!(rows[0]["studentName"].as_str(), Some("Unknown Student"));
    assert_eq!(rows[0]["courseName"].as_str(), Some("Unnamed Course"));
    assert_eq!(rows[0]["percent"].as_i64(), Some(85));
    assert_eq!(rows[0]["letter"].as_str(), Some("B"));

    assert_eq!(rows[1]["studentName"].as_str(), Some("Grace Hopper"));
    assert_eq!(rows[1]["courseName"].as_str(), Some("Data Structures"));
    assert_eq!(rows[1]["percent"].as_i64(), Some(0));
    assert_eq!(rows[1]["letter"].as_str(), Some("F"));
}
