use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    /// Credit towards the weighted attendance rate.
    pub fn credit(self) -> f64 {
        match self {
            AttendanceStatus::Present => 1.0,
            AttendanceStatus::Late => 0.75,
            AttendanceStatus::Absent => 0.0,
        }
    }
}

pub fn normalize_status_str(raw: &str) -> Option<AttendanceStatus> {
    let key = raw.trim().to_ascii_lowercase();
    match key.as_str() {
        "present" | "attended" | "on-time" | "ontime" | "p" | "1" | "true" => {
            Some(AttendanceStatus::Present)
        }
        "late" | "tardy" | "l" => Some(AttendanceStatus::Late),
        "absent" | "missed" | "excused" | "a" | "0" | "false" => Some(AttendanceStatus::Absent),
        _ => None,
    }
}

/// Accepts strings, booleans and numbers as they arrive from the store or the UI.
/// Anything unrecognized is `None` and must be treated as unknown, not absent.
pub fn normalize_status(raw: &serde_json::Value) -> Option<AttendanceStatus> {
    match raw {
        serde_json::Value::String(s) => normalize_status_str(s),
        serde_json::Value::Bool(b) => normalize_status_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => normalize_status_str(&number_text(n)),
        _ => None,
    }
}

// Integral floats print without a fraction so `1.0` reads as "1".
pub(crate) fn number_text(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}
