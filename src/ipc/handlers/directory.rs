use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn db(e: impl ToString) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn id_or_new(params: &serde_json::Value, key: &str) -> String {
    get_optional_str(params, key).unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn terms_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = id_or_new(params, "termId");
    let name = get_required_str(params, "name")?;
    let academic_year = get_required_str(params, "academicYear")?;
    let start_date = get_optional_str(params, "startDate");
    let end_date = get_optional_str(params, "endDate");

    conn.execute(
        "INSERT OR REPLACE INTO terms(id, name, academic_year, start_date, end_date)
         VALUES (?, ?, ?, ?, ?)",
        (&term_id, &name, &academic_year, &start_date, &end_date),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "termId": term_id }))
}

fn students_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = id_or_new(params, "studentId");
    let full_name = get_required_str(params, "fullName")?;
    let grade = get_required_str(params, "grade")?;
    let section = get_required_str(params, "section")?;
    let admission_number = get_optional_str(params, "admissionNumber");
    let active = params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    conn.execute(
        "INSERT OR REPLACE INTO students(id, full_name, grade, section, admission_number, active)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &full_name,
            &grade,
            &section,
            &admission_number,
            active as i64,
        ),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "studentId": student_id }))
}

fn staff_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let staff_id = id_or_new(params, "staffId");
    let full_name = get_required_str(params, "fullName")?;
    let role = get_required_str(params, "role")?;
    // "grade-section" key used by class-teacher approver resolution.
    let class_teacher_of = get_optional_str(params, "classTeacherOf");

    conn.execute(
        "INSERT OR REPLACE INTO staff(id, full_name, role, class_teacher_of)
         VALUES (?, ?, ?, ?)",
        (&staff_id, &full_name, &role, &class_teacher_of),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "staffId": staff_id }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "terms.upsert" => terms_upsert(conn, &req.params),
        "students.upsert" => students_upsert(conn, &req.params),
        "staff.upsert" => staff_upsert(conn, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "terms.upsert" | "students.upsert" | "staff.upsert" => Some(dispatch(state, req)),
        _ => None,
    }
}
