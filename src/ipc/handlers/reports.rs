use crate::aggregate::{self, EvaluationInput, RoleWeight};
use crate::export;
use crate::grading::{EvaluatorRole, GradeBand};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::{json, Map};
use std::collections::HashMap;
use std::path::PathBuf;
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

struct StudentRow {
    full_name: String,
    grade: String,
    section: String,
    admission_number: Option<String>,
}

struct TermRow {
    name: String,
    academic_year: String,
}

struct ParameterRow {
    id: String,
    name: String,
    category: String,
    weightage: f64,
}

fn load_student(conn: &Connection, student_id: &str) -> Result<StudentRow, HandlerErr> {
    conn.query_row(
        "SELECT full_name, grade, section, admission_number FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentRow {
                full_name: r.get(0)?,
                grade: r.get(1)?,
                section: r.get(2)?,
                admission_number: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::not_found("student"))
}

fn load_term(conn: &Connection, term_id: &str) -> Result<TermRow, HandlerErr> {
    conn.query_row(
        "SELECT name, academic_year FROM terms WHERE id = ?",
        [term_id],
        |r| {
            Ok(TermRow {
                name: r.get(0)?,
                academic_year: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::not_found("term"))
}

/// Submitted evaluations for the student/term with evaluator display names
/// resolved against the staff directory, then the student roster (self and
/// peer evaluators), falling back to the raw id.
fn load_submitted_evaluations(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<Vec<EvaluationInput>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT e.parameter_id,
                    COALESCE(st.full_name, sp.full_name, e.evaluator_id),
                    e.evaluator_role, e.score, COALESCE(e.qualitative_remark, ''),
                    e.evidence_notes, e.confidence_level, e.evaluation_date
             FROM hpc_evaluations e
             LEFT JOIN staff st ON st.id = e.evaluator_id
             LEFT JOIN students sp ON sp.id = e.evaluator_id
             WHERE e.student_id = ? AND e.term_id = ? AND e.status = 'submitted'
             ORDER BY e.evaluation_date",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((student_id, term_id), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, f64>(6)?,
                r.get::<_, String>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut out = Vec::with_capacity(rows.len());
    for (parameter_id, evaluator_name, role_str, score, remark, evidence, confidence, date) in rows
    {
        // Intake rejects unknown roles, so this only skips pre-enum rows.
        let Some(role) = EvaluatorRole::parse(&role_str) else {
            continue;
        };
        out.push(EvaluationInput {
            parameter_id,
            evaluator_name,
            role,
            score,
            remark,
            evidence,
            confidence,
            date,
        });
    }
    Ok(out)
}

/// Active parameters whose grade-applicability set contains the grade.
fn load_applicable_parameters(
    conn: &Connection,
    grade: &str,
) -> Result<Vec<ParameterRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, category, weightage, grade_applicability
             FROM hpc_parameters
             WHERE active = 1
             ORDER BY category, weightage DESC",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                ParameterRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    category: r.get(2)?,
                    weightage: r.get(3)?,
                },
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut out = Vec::new();
    for (row, applicability) in rows {
        let grades: Vec<String> = serde_json::from_str(&applicability).unwrap_or_default();
        if grades.iter().any(|g| g == grade) {
            out.push(row);
        }
    }
    Ok(out)
}

fn in_placeholders(count: usize) -> String {
    std::iter::repeat("?")
        .take(count)
        .collect::<Vec<_>>()
        .join(",")
}

/// Active rubric descriptors keyed by (parameter id, grade letter).
fn load_rubrics(
    conn: &Connection,
    parameter_ids: &[String],
) -> Result<HashMap<(String, String), serde_json::Value>, HandlerErr> {
    if parameter_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT parameter_id, level, descriptor, detailed_description, examples
         FROM hpc_rubrics
         WHERE active = 1 AND parameter_id IN ({})",
        in_placeholders(parameter_ids.len())
    );
    let bind: Vec<Value> = parameter_ids
        .iter()
        .map(|id| Value::Text(id.clone()))
        .collect();
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut out = HashMap::new();
    for (parameter_id, level, descriptor, detailed, examples) in rows {
        let examples: Vec<String> = serde_json::from_str(&examples).unwrap_or_default();
        out.insert(
            (parameter_id, level.clone()),
            json!({
                "level": level,
                "descriptor": descriptor,
                "detailed_description": detailed,
                "examples": examples,
            }),
        );
    }
    Ok(out)
}

fn load_role_weights(
    conn: &Connection,
    parameter_ids: &[String],
) -> Result<HashMap<String, Vec<RoleWeight>>, HandlerErr> {
    if parameter_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT parameter_id, evaluator_role, weightage
         FROM hpc_parameter_assignments
         WHERE parameter_id IN ({})",
        in_placeholders(parameter_ids.len())
    );
    let bind: Vec<Value> = parameter_ids
        .iter()
        .map(|id| Value::Text(id.clone()))
        .collect();
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut out: HashMap<String, Vec<RoleWeight>> = HashMap::new();
    for (parameter_id, role_str, weightage) in rows {
        let Some(role) = EvaluatorRole::parse(&role_str) else {
            continue;
        };
        out.entry(parameter_id)
            .or_default()
            .push(RoleWeight { role, weightage });
    }
    Ok(out)
}

fn load_achievements(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT title, category, date_achieved, points_awarded
             FROM hpc_achievements WHERE student_id = ?
             ORDER BY date_achieved",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([student_id], |r| {
        Ok(json!({
            "title": r.get::<_, String>(0)?,
            "category": r.get::<_, Option<String>>(1)?,
            "date": r.get::<_, Option<String>>(2)?,
            "points": r.get::<_, Option<f64>>(3)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

struct ReflectionRow {
    reflection_type: Option<String>,
    content: Option<String>,
    goals: Vec<String>,
}

fn load_reflections(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<Vec<ReflectionRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT reflection_type, content, goals
             FROM hpc_reflections WHERE student_id = ? AND term_id = ?",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((student_id, term_id), |r| {
            Ok((
                r.get::<_, Option<String>>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(rows
        .into_iter()
        .map(|(reflection_type, content, goals)| ReflectionRow {
            reflection_type,
            content,
            goals: serde_json::from_str(&goals).unwrap_or_default(),
        })
        .collect())
}

/// Per-role remark digests grouped the way the printed card presents them.
fn stakeholder_summary(
    parameter_results: &[(String, Vec<aggregate::RoleBreakdown>)],
) -> serde_json::Value {
    let buckets: [(EvaluatorRole, &str); 4] = [
        (EvaluatorRole::Teacher, "teacher_feedback"),
        (EvaluatorRole::Parent, "parent_feedback"),
        (EvaluatorRole::Peer, "peer_feedback"),
        (EvaluatorRole::SelfAssessment, "self_reflections"),
    ];
    let mut summary = Map::new();
    for (role, key) in buckets {
        let mut entries = Vec::new();
        for (parameter_name, breakdown) in parameter_results {
            if let Some(rb) = breakdown.iter().find(|b| b.role == role.as_str()) {
                entries.push(json!({
                    "parameter": parameter_name,
                    "grade": rb.grade,
                    "remarks": rb.evaluations.iter().map(|e| e.remark.clone()).collect::<Vec<_>>(),
                }));
            }
        }
        summary.insert(key.to_string(), json!(entries));
    }
    serde_json::Value::Object(summary)
}

/// Compile a draft report for a student/term. Every read must succeed before
/// anything is aggregated or persisted; a failed read aborts the compile.
fn compile(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let term_id = get_required_str(params, "termId")?;
    let compiled_by = get_required_str(params, "compiledBy")?;

    let student = load_student(conn, &student_id)?;
    let term = load_term(conn, &term_id)?;

    // Supersede-with-history versioning; a live review must finish first.
    let latest: Option<(i64, String)> = conn
        .query_row(
            "SELECT version, status FROM hpc_reports
             WHERE student_id = ? AND term_id = ?
             ORDER BY version DESC LIMIT 1",
            (&student_id, &term_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if let Some((_, status)) = latest.as_ref() {
        if status == "under_review" {
            return Err(HandlerErr {
                code: "report_in_review",
                message: "latest report version is under review; resolve the workflow first"
                    .to_string(),
                details: None,
            });
        }
    }
    let version = latest.map(|(v, _)| v + 1).unwrap_or(1);

    let evaluations = load_submitted_evaluations(conn, &student_id, &term_id)?;
    let parameters = load_applicable_parameters(conn, &student.grade)?;
    let parameter_ids: Vec<String> = parameters.iter().map(|p| p.id.clone()).collect();
    let rubrics = load_rubrics(conn, &parameter_ids)?;
    let role_weights = load_role_weights(conn, &parameter_ids)?;
    let achievements = load_achievements(conn, &student_id)?;
    let reflections = load_reflections(conn, &student_id, &term_id)?;

    let mut evals_by_parameter: HashMap<&str, Vec<EvaluationInput>> = HashMap::new();
    for e in &evaluations {
        evals_by_parameter
            .entry(e.parameter_id.as_str())
            .or_default()
            .push(e.clone());
    }

    let mut parameter_breakdown = Map::new();
    let mut scored: Vec<(String, f64)> = Vec::new();
    let mut weighted_entries: Vec<(f64, f64)> = Vec::new();
    let mut breakdowns: Vec<(String, Vec<aggregate::RoleBreakdown>)> = Vec::new();

    for p in &parameters {
        let Some(param_evals) = evals_by_parameter.get(p.id.as_str()) else {
            // No submitted evaluations: the parameter is excluded, not scored 0.
            continue;
        };
        let weights = role_weights.get(&p.id).cloned().unwrap_or_default();
        let agg = aggregate::aggregate_parameter(param_evals, &weights);
        let rubric_level = rubrics
            .get(&(p.id.clone(), agg.band.letter().to_string()))
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let mut stakeholder_feedback = Map::new();
        for rb in &agg.breakdown {
            stakeholder_feedback.insert(
                rb.role.to_string(),
                serde_json::to_value(rb).map_err(HandlerErr::db)?,
            );
        }

        parameter_breakdown.insert(
            p.id.clone(),
            json!({
                "parameter_name": p.name,
                "category": p.category,
                "weightage": p.weightage,
                "score": agg.score,
                "grade": agg.band.letter(),
                "stakeholder_feedback": stakeholder_feedback,
                "evidence": agg.evidence,
                "rubric_level": rubric_level,
            }),
        );
        scored.push((p.name.clone(), agg.score));
        weighted_entries.push((agg.score, p.weightage));
        breakdowns.push((p.name.clone(), agg.breakdown));
    }

    let overall = aggregate::overall_score(&weighted_entries);
    let overall_band = GradeBand::from_score(overall);
    let strengths = aggregate::strengths(&scored);
    let growth_areas = aggregate::growth_areas(&scored);
    let recommendations = aggregate::recommendations(&strengths, &growth_areas);
    let reflection_goals: Vec<String> = reflections
        .iter()
        .flat_map(|r| r.goals.iter().cloned())
        .collect();
    let next_steps = aggregate::next_steps(&reflection_goals, &growth_areas);
    let quality = aggregate::quality_indicators(&evaluations, parameters.len(), scored.len());
    let compiled_at = Utc::now().to_rfc3339();

    let summary = json!({
        "student_info": {
            "name": student.full_name,
            "grade": student.grade,
            "section": student.section,
            "admission_number": student.admission_number,
            "academic_year": term.academic_year,
        },
        "evaluation_summary": {
            "overall_score": overall,
            "overall_grade": overall_band.letter(),
            "total_parameters_evaluated": scored.len(),
            "evaluation_period": term.name,
        },
        "parameter_breakdown": parameter_breakdown,
        "stakeholder_summary": stakeholder_summary(&breakdowns),
        "achievements": achievements,
        "student_reflections": reflections.iter().map(|r| json!({
            "type": r.reflection_type,
            "content": r.content,
            "goals": r.goals,
        })).collect::<Vec<_>>(),
        "strengths_identified": strengths,
        "growth_areas": growth_areas,
        "recommendations": recommendations,
        "next_steps": next_steps,
        "compiled_metadata": {
            "compilation_date": compiled_at,
            "compiled_by": compiled_by,
            "data_sources": aggregate::data_sources(&evaluations),
            "quality_indicators": quality,
        },
    });

    let report_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO hpc_reports(
            id, student_id, term_id, overall_score, overall_grade, summary_json,
            status, compiled_at, compiled_by, version)
         VALUES (?, ?, ?, ?, ?, ?, 'draft', ?, ?, ?)",
        (
            &report_id,
            &student_id,
            &term_id,
            overall,
            overall_band.letter(),
            serde_json::to_string(&summary).map_err(HandlerErr::db)?,
            &compiled_at,
            &compiled_by,
            version,
        ),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({
        "reportId": report_id,
        "version": version,
        "overallScore": overall,
        "overallGrade": overall_band.letter(),
        "strengths": strengths,
        "growthAreas": growth_areas,
        "parametersEvaluated": scored.len(),
    }))
}

fn report_row_json(conn: &Connection, report_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, student_id, term_id, overall_score, overall_grade, summary_json,
                    status, compiled_at, compiled_by, approved_at, approved_by,
                    published_at, version
             FROM hpc_reports WHERE id = ?",
            [report_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "studentId": r.get::<_, String>(1)?,
                    "termId": r.get::<_, String>(2)?,
                    "overallScore": r.get::<_, f64>(3)?,
                    "overallGrade": r.get::<_, String>(4)?,
                    "summary": serde_json::from_str::<serde_json::Value>(&r.get::<_, String>(5)?)
                        .unwrap_or(serde_json::Value::Null),
                    "status": r.get::<_, String>(6)?,
                    "compiledAt": r.get::<_, String>(7)?,
                    "compiledBy": r.get::<_, String>(8)?,
                    "approvedAt": r.get::<_, Option<String>>(9)?,
                    "approvedBy": r.get::<_, Option<String>>(10)?,
                    "publishedAt": r.get::<_, Option<String>>(11)?,
                    "version": r.get::<_, i64>(12)?,
                }))
            },
        )
        .optional()
        .map_err(HandlerErr::db)?;
    row.ok_or_else(|| HandlerErr::not_found("report"))
}

fn get_report(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let report_id = get_required_str(params, "reportId")?;
    let mut report = report_row_json(conn, &report_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, step_number, approver_role, approver_id, due_date, status,
                    assigned_at, approved_at, comments
             FROM hpc_approval_steps
             WHERE report_id = ? AND superseded = 0
             ORDER BY step_number",
        )
        .map_err(HandlerErr::db)?;
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
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    report["workflow"] = json!(steps);
    Ok(report)
}

fn list_by_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.term_id, t.name, r.overall_score, r.overall_grade,
                    r.status, r.compiled_at, r.version
             FROM hpc_reports r
             JOIN terms t ON t.id = r.term_id
             WHERE r.student_id = ?
             ORDER BY r.compiled_at DESC",
        )
        .map_err(HandlerErr::db)?;
    let reports = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "termId": r.get::<_, String>(1)?,
                "termName": r.get::<_, String>(2)?,
                "overallScore": r.get::<_, f64>(3)?,
                "overallGrade": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
                "compiledAt": r.get::<_, String>(6)?,
                "version": r.get::<_, i64>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "reports": reports }))
}

/// Bundle export. Read-only over the report; an export failure leaves report
/// and workflow state untouched.
fn export_report(
    conn: &Connection,
    workspace: &std::path::Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let report_id = get_required_str(params, "reportId")?;
    let language = params
        .get("language")
        .and_then(|v| v.as_str())
        .unwrap_or("english")
        .to_string();
    if language != "english" && language != "hindi" {
        return Err(HandlerErr {
            code: "bad_params",
            message: "language must be english or hindi".to_string(),
            details: None,
        });
    }

    let report = report_row_json(conn, &report_id)?;
    let student_id = report["studentId"].as_str().unwrap_or_default().to_string();
    let term_id = report["termId"].as_str().unwrap_or_default().to_string();
    let student = load_student(conn, &student_id)?;
    let term = load_term(conn, &term_id)?;

    let admission = student
        .admission_number
        .clone()
        .unwrap_or_else(|| student_id.clone());
    let filename = export::bundle_filename(&admission, &term.name, &language);
    let out_path = match params.get("outPath").and_then(|v| v.as_str()) {
        Some(p) => PathBuf::from(p),
        None => workspace.join("exports").join(&filename),
    };

    let summary =
        export::export_report_bundle(&out_path, &report, &language).map_err(|e| HandlerErr {
            code: "export_failed",
            message: format!("{e:?}"),
            details: None,
        })?;

    Ok(json!({
        "bundlePath": out_path.to_string_lossy(),
        "filename": filename,
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "documentSha256": summary.checksum,
    }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "reports.compile" => compile(conn, &req.params),
        "reports.get" => get_report(conn, &req.params),
        "reports.listByStudent" => list_by_student(conn, &req.params),
        "reports.export" => {
            let Some(workspace) = state.workspace.as_deref() else {
                return err(&req.id, "no_workspace", "select a workspace first", None);
            };
            export_report(conn, workspace, &req.params)
        }
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.compile" | "reports.get" | "reports.listByStudent" | "reports.export" => {
            Some(dispatch(state, req))
        }
        _ => None,
    }
}
