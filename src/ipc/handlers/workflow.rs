use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const CLASS_TEACHER_DUE_DAYS: i64 = 3;
const PRINCIPAL_DUE_DAYS: i64 = 7;

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

/// Class-teacher resolution for a "grade-section" key, falling back to any
/// teacher when no explicit mapping exists. The fallback is deliberate and
/// surfaced to the caller; only an empty directory is an error.
fn resolve_class_teacher(
    conn: &Connection,
    grade: &str,
    section: &str,
) -> Result<(String, bool), HandlerErr> {
    let class_key = format!("{}-{}", grade, section);
    let mapped: Option<String> = conn
        .query_row(
            "SELECT id FROM staff WHERE role = 'teacher' AND class_teacher_of = ?
             ORDER BY id LIMIT 1",
            [&class_key],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if let Some(id) = mapped {
        return Ok((id, false));
    }

    let any_teacher: Option<String> = conn
        .query_row(
            "SELECT id FROM staff WHERE role = 'teacher' ORDER BY id LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    match any_teacher {
        Some(id) => Ok((id, true)),
        None => Err(HandlerErr {
            code: "no_approver",
            message: "no teacher available for workflow step 1".to_string(),
            details: None,
        }),
    }
}

fn resolve_principal(conn: &Connection) -> Result<String, HandlerErr> {
    let admin: Option<String> = conn
        .query_row(
            "SELECT id FROM staff WHERE role = 'admin' ORDER BY id LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    admin.ok_or_else(|| HandlerErr {
        code: "no_approver",
        message: "no admin available for workflow step 2".to_string(),
        details: None,
    })
}

/// Starts the sign-off sequence on a draft report. Earlier steps for the
/// report (from a rejected run) are superseded, never revived.
fn initiate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let report_id = get_required_str(params, "reportId")?;

    let report: Option<(String, String)> = conn
        .query_row(
            "SELECT student_id, status FROM hpc_reports WHERE id = ?",
            [&report_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((student_id, status)) = report else {
        return Err(HandlerErr::not_found("report"));
    };
    if status != "draft" {
        return Err(HandlerErr {
            code: "bad_state",
            message: format!("workflow requires a draft report, found {}", status),
            details: None,
        });
    }

    let (grade, section): (String, String) = conn
        .query_row(
            "SELECT grade, section FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::not_found("student"))?;

    let (teacher_id, teacher_fallback) = resolve_class_teacher(conn, &grade, &section)?;
    let principal_id = resolve_principal(conn)?;
    if teacher_fallback {
        eprintln!(
            "hpcd: no class teacher mapped for {}-{}, assigning any teacher for report {}",
            grade, section, report_id
        );
    }

    let superseded = conn
        .execute(
            "UPDATE hpc_approval_steps SET superseded = 1 WHERE report_id = ? AND superseded = 0",
            [&report_id],
        )
        .map_err(HandlerErr::db)?;

    let now = Utc::now();
    let assigned_at = now.to_rfc3339();
    let steps = [
        (
            1_i64,
            "class_teacher",
            teacher_id.as_str(),
            (now + Duration::days(CLASS_TEACHER_DUE_DAYS)).to_rfc3339(),
            "pending",
            Some(assigned_at.as_str()),
        ),
        (
            2_i64,
            "principal",
            principal_id.as_str(),
            (now + Duration::days(PRINCIPAL_DUE_DAYS)).to_rfc3339(),
            "waiting",
            None,
        ),
    ];

    let mut step_rows = Vec::with_capacity(steps.len());
    for (step_number, approver_role, approver_id, due_date, status, assigned) in steps {
        let step_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO hpc_approval_steps(
                id, report_id, step_number, approver_role, approver_id,
                due_date, status, assigned_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &step_id,
                &report_id,
                step_number,
                approver_role,
                approver_id,
                &due_date,
                status,
                assigned,
            ),
        )
        .map_err(HandlerErr::db)?;
        step_rows.push(json!({
            "stepId": step_id,
            "stepNumber": step_number,
            "approverRole": approver_role,
            "approverId": approver_id,
            "dueDate": due_date,
            "status": status,
        }));
    }

    conn.execute(
        "UPDATE hpc_reports SET status = 'under_review' WHERE id = ?",
        [&report_id],
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({
        "reportId": report_id,
        "steps": step_rows,
        "supersededSteps": superseded,
        "fallbacks": { "classTeacher": teacher_fallback },
    }))
}

/// Resolves one pending step. The status update is conditional on the step
/// still being pending, which serializes duplicate or racing submissions:
/// the loser sees zero affected rows and gets a clean conflict.
fn process(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let step_id = get_required_str(params, "stepId")?;
    let approver_id = get_required_str(params, "approverId")?;
    let decision = get_required_str(params, "decision")?;
    if !["approved", "rejected", "needs_revision"].contains(&decision.as_str()) {
        return Err(HandlerErr {
            code: "bad_params",
            message: "decision must be approved, rejected, or needs_revision".to_string(),
            details: None,
        });
    }
    let comments = params
        .get("comments")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let step: Option<(String, i64)> = conn
        .query_row(
            "SELECT report_id, step_number FROM hpc_approval_steps
             WHERE id = ? AND superseded = 0",
            [&step_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((report_id, step_number)) = step else {
        return Err(HandlerErr::not_found("workflow step"));
    };

    let now = Utc::now().to_rfc3339();
    let approved_at = (decision == "approved").then(|| now.clone());
    let changed = conn
        .execute(
            "UPDATE hpc_approval_steps
             SET status = ?, approved_at = ?, comments = ?
             WHERE id = ? AND status = 'pending' AND superseded = 0",
            (&decision, &approved_at, &comments, &step_id),
        )
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr {
            code: "step_not_pending",
            message: "step is not pending; it was already resolved or has not been activated"
                .to_string(),
            details: Some(json!({ "stepId": step_id })),
        });
    }

    if decision == "approved" {
        let remaining: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM hpc_approval_steps
                 WHERE report_id = ? AND superseded = 0 AND status != 'approved'",
                [&report_id],
                |r| r.get(0),
            )
            .map_err(HandlerErr::db)?;

        if remaining == 0 {
            let published = publish_report(conn, &report_id, &approver_id)?;
            return Ok(json!({
                "reportId": report_id,
                "decision": decision,
                "workflowComplete": true,
                "published": published,
            }));
        }

        let promoted = conn
            .execute(
                "UPDATE hpc_approval_steps
                 SET status = 'pending', assigned_at = ?
                 WHERE report_id = ? AND step_number = ? AND status = 'waiting' AND superseded = 0",
                (&now, &report_id, step_number + 1),
            )
            .map_err(HandlerErr::db)?;
        return Ok(json!({
            "reportId": report_id,
            "decision": decision,
            "workflowComplete": false,
            "published": false,
            "nextStepNumber": if promoted > 0 { Some(step_number + 1) } else { None },
        }));
    }

    // Rejection and revision requests send the report back to draft. The
    // remaining steps stay as they are until the next explicit initiate.
    conn.execute(
        "UPDATE hpc_reports SET status = 'draft' WHERE id = ?",
        [&report_id],
    )
    .map_err(HandlerErr::db)?;
    Ok(json!({
        "reportId": report_id,
        "decision": decision,
        "reportStatus": "draft",
    }))
}

/// Idempotent publication: the conditional update makes a repeat call a
/// no-op, so analytics are generated exactly once per published report.
/// Analytics and the notification outbox are best-effort; their failures are
/// logged and never unwind the publication.
pub(super) fn publish_report(
    conn: &Connection,
    report_id: &str,
    published_by: &str,
) -> Result<bool, HandlerErr> {
    let now = Utc::now().to_rfc3339();
    let changed = conn
        .execute(
            "UPDATE hpc_reports
             SET status = 'published', published_at = ?, approved_at = ?, approved_by = ?
             WHERE id = ? AND status != 'published'",
            (&now, &now, published_by, report_id),
        )
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Ok(false);
    }

    if let Err(e) = super::analytics::generate_for_report(conn, report_id) {
        eprintln!(
            "hpcd: analytics generation failed for report {}: {:?}",
            report_id, e
        );
    }
    if let Err(e) = queue_notifications(conn, report_id, &now) {
        eprintln!(
            "hpcd: notification queueing failed for report {}: {:?}",
            report_id, e
        );
    }
    Ok(true)
}

/// Outbox rows for the student and the live approvers. Delivery is someone
/// else's job.
fn queue_notifications(conn: &Connection, report_id: &str, now: &str) -> anyhow::Result<usize> {
    let student_id: String = conn.query_row(
        "SELECT student_id FROM hpc_reports WHERE id = ?",
        [report_id],
        |r| r.get(0),
    )?;

    let mut recipients = vec![student_id];
    let mut stmt = conn.prepare(
        "SELECT DISTINCT approver_id FROM hpc_approval_steps
         WHERE report_id = ? AND superseded = 0",
    )?;
    let approvers = stmt
        .query_map([report_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for a in approvers {
        if !recipients.contains(&a) {
            recipients.push(a);
        }
    }

    for recipient in &recipients {
        conn.execute(
            "INSERT INTO hpc_notifications(id, report_id, recipient_id, kind, created_at)
             VALUES (?, ?, ?, 'report_published', ?)",
            (Uuid::new_v4().to_string(), report_id, recipient, now),
        )?;
    }
    Ok(recipients.len())
}

fn list_steps(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let report_id = get_required_str(params, "reportId")?;
    let include_superseded = params
        .get("includeSuperseded")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let sql = if include_superseded {
        "SELECT id, step_number, approver_role, approver_id, due_date, status,
                assigned_at, approved_at, comments, superseded
         FROM hpc_approval_steps WHERE report_id = ?
         ORDER BY superseded, step_number"
    } else {
        "SELECT id, step_number, approver_role, approver_id, due_date, status,
                assigned_at, approved_at, comments, superseded
         FROM hpc_approval_steps WHERE report_id = ? AND superseded = 0
         ORDER BY step_number"
    };
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::db)?;
    let steps = stmt
        .query_map([&report_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "stepNumber": r.get::<_, i64>(1)?,
                "approverRole": r.get::<_, String>(2)?,
                "approverId": r.get::<_, String>(3)?,
                "dueDate": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
                "assignedAt": r.get::<_, Option<String>>(6)?,
                "approvedAt": r.get::<_, Option<String>>(7)?,
                "comments": r.get::<_, Option<String>>(8)?,
                "superseded": r.get::<_, i64>(9)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "steps": steps }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "workflow.initiate" => initiate(conn, &req.params),
        "workflow.process" => process(conn, &req.params),
        "workflow.listSteps" => list_steps(conn, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "workflow.initiate" | "workflow.process" | "workflow.listSteps" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}
