use crate::grading::{self, EvaluatorRole, GradeBand};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
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

    fn not_found(what: &str) -> Self {
        HandlerErr {
            code: "not_found",
            message: format!("{} not found", what),
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

fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db)
}

/// Validated intake. Errors reject the submission outright; the row is only
/// ever persisted with status `submitted`, which is what aggregation reads.
fn submit(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let parameter_id = get_required_str(params, "parameterId")?;
    let evaluator_id = get_required_str(params, "evaluatorId")?;
    let term_id = get_required_str(params, "termId")?;
    let role_str = get_required_str(params, "evaluatorRole")?;
    let Some(role) = EvaluatorRole::parse(&role_str) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "unknown evaluator role".to_string(),
            details: Some(json!({ "role": role_str })),
        });
    };
    let score = params
        .get("score")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing score".to_string(),
            details: None,
        })?;
    let confidence = params
        .get("confidenceLevel")
        .and_then(|v| v.as_f64())
        .unwrap_or(1.0);
    let remark = params
        .get("qualitativeRemark")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let evidence = params
        .get("evidenceNotes")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let evaluation_date = params
        .get("evaluationDate")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    if !row_exists(conn, "students", &student_id)? {
        return Err(HandlerErr::not_found("student"));
    }
    if !row_exists(conn, "hpc_parameters", &parameter_id)? {
        return Err(HandlerErr::not_found("parameter"));
    }
    if !row_exists(conn, "terms", &term_id)? {
        return Err(HandlerErr::not_found("term"));
    }

    let outcome = grading::validate_evaluation(score, confidence, &remark);
    if !outcome.valid {
        return Err(HandlerErr {
            code: "validation_failed",
            message: "evaluation failed validation".to_string(),
            details: Some(json!({ "errors": outcome.errors })),
        });
    }

    let evaluation_id = Uuid::new_v4().to_string();
    let band = GradeBand::from_score(score);
    let grade = band.letter();
    conn.execute(
        "INSERT INTO hpc_evaluations(
            id, student_id, parameter_id, evaluator_id, evaluator_role, term_id,
            score, grade, qualitative_remark, evidence_notes, confidence_level,
            evaluation_date, status)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'submitted')",
        (
            &evaluation_id,
            &student_id,
            &parameter_id,
            &evaluator_id,
            role.as_str(),
            &term_id,
            score,
            grade,
            &remark,
            &evidence,
            confidence,
            &evaluation_date,
        ),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({
        "evaluationId": evaluation_id,
        "grade": grade,
        "level": band.level(),
        "warnings": outcome.warnings,
    }))
}

fn list_by_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let term_id = params
        .get("termId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut sql = String::from(
        "SELECT e.id, e.parameter_id, p.name, e.evaluator_role, e.score, e.grade,
                e.qualitative_remark, e.evidence_notes, e.confidence_level,
                e.evaluation_date, e.status, e.term_id
         FROM hpc_evaluations e
         JOIN hpc_parameters p ON p.id = e.parameter_id
         WHERE e.student_id = ?",
    );
    if term_id.is_some() {
        sql.push_str(" AND e.term_id = ?");
    }
    sql.push_str(" ORDER BY e.evaluation_date DESC");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "parameterId": r.get::<_, String>(1)?,
            "parameterName": r.get::<_, String>(2)?,
            "evaluatorRole": r.get::<_, String>(3)?,
            "score": r.get::<_, f64>(4)?,
            "grade": r.get::<_, String>(5)?,
            "qualitativeRemark": r.get::<_, Option<String>>(6)?,
            "evidenceNotes": r.get::<_, Option<String>>(7)?,
            "confidenceLevel": r.get::<_, f64>(8)?,
            "evaluationDate": r.get::<_, String>(9)?,
            "status": r.get::<_, String>(10)?,
            "termId": r.get::<_, String>(11)?,
        }))
    };
    let rows = if let Some(tid) = term_id.as_ref() {
        stmt.query_map((&student_id, tid), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([&student_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    }
    .map_err(HandlerErr::db)?;

    Ok(json!({ "evaluations": rows }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "evaluations.submit" => submit(conn, &req.params),
        "evaluations.listByStudent" => list_by_student(conn, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluations.submit" | "evaluations.listByStudent" => Some(dispatch(state, req)),
        _ => None,
    }
}
