use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::trend;
use anyhow::{anyhow, Context};
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

/// Overall scores of peers with a report in the same term, each counted at
/// their latest version so superseded drafts never skew a percentile.
fn peer_scores(
    conn: &Connection,
    term_id: &str,
    student_id: &str,
    grade: Option<&str>,
    section: Option<&str>,
) -> anyhow::Result<Vec<f64>> {
    let mut stmt = conn.prepare(
        "SELECT r.overall_score
         FROM hpc_reports r
         JOIN students s ON s.id = r.student_id
         WHERE r.term_id = ?1 AND r.student_id != ?2
           AND (?3 IS NULL OR s.grade = ?3)
           AND (?4 IS NULL OR s.section = ?4)
           AND r.version = (SELECT MAX(v.version) FROM hpc_reports v
                            WHERE v.student_id = r.student_id AND v.term_id = r.term_id)",
    )?;
    let scores = stmt
        .query_map((term_id, student_id, grade, section), |r| {
            r.get::<_, f64>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(scores)
}

/// Report scores ordered by compile time, latest version per term, the
/// current report included as the last point.
fn history_scores(conn: &Connection, student_id: &str) -> anyhow::Result<Vec<f64>> {
    let mut stmt = conn.prepare(
        "SELECT r.overall_score
         FROM hpc_reports r
         WHERE r.student_id = ?
           AND r.version = (SELECT MAX(v.version) FROM hpc_reports v
                            WHERE v.student_id = r.student_id AND v.term_id = r.term_id)
         ORDER BY r.compiled_at",
    )?;
    let scores = stmt
        .query_map([student_id], |r| r.get::<_, f64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(scores)
}

fn json_string_array(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Percentiles, growth trajectory, and summary extracts for a published
/// report. One row per report; regeneration replaces the previous row.
pub(super) fn generate_for_report(conn: &Connection, report_id: &str) -> anyhow::Result<()> {
    let report: Option<(String, String, f64, String)> = conn
        .query_row(
            "SELECT student_id, term_id, overall_score, summary_json
             FROM hpc_reports WHERE id = ?",
            [report_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .context("failed to load report for analytics")?;
    let Some((student_id, term_id, overall_score, summary_json)) = report else {
        return Err(anyhow!("report not found: {}", report_id));
    };

    let (grade, section): (String, String) = conn
        .query_row(
            "SELECT grade, section FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .context("failed to load student for analytics")?;

    let class_pool = peer_scores(conn, &term_id, &student_id, Some(&grade), Some(&section))?;
    let grade_pool = peer_scores(conn, &term_id, &student_id, Some(&grade), None)?;
    let school_pool = peer_scores(conn, &term_id, &student_id, None, None)?;

    let history = history_scores(conn, &student_id)?;
    let trajectory = trend::growth_trajectory(&history);

    let summary: serde_json::Value = serde_json::from_str(&summary_json).unwrap_or_default();
    let strengths = json_string_array(&summary, "strengths_identified");
    let improvement_areas = json_string_array(&summary, "growth_areas");

    conn.execute(
        "INSERT OR REPLACE INTO hpc_analytics(
            id, student_id, term_id, report_id,
            class_percentile, grade_percentile, school_percentile,
            growth_trend, predicted_next_score, confidence_lower, confidence_upper,
            strengths, improvement_areas, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &term_id,
            report_id,
            trend::percentile_rank(overall_score, &class_pool),
            trend::percentile_rank(overall_score, &grade_pool),
            trend::percentile_rank(overall_score, &school_pool),
            trajectory.trend.as_str(),
            trajectory.predicted,
            trajectory.confidence_lower,
            trajectory.confidence_upper,
            serde_json::to_string(&strengths)?,
            serde_json::to_string(&improvement_areas)?,
            Utc::now().to_rfc3339(),
        ),
    )
    .context("failed to persist analytics record")?;
    Ok(())
}

fn student_analytics(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let term_id = params
        .get("termId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut sql = String::from(
        "SELECT id, term_id, report_id, class_percentile, grade_percentile,
                school_percentile, growth_trend, predicted_next_score,
                confidence_lower, confidence_upper, strengths, improvement_areas,
                created_at
         FROM hpc_analytics WHERE student_id = ?",
    );
    if term_id.is_some() {
        sql.push_str(" AND term_id = ?");
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        let strengths: String = r.get(10)?;
        let improvement: String = r.get(11)?;
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "termId": r.get::<_, String>(1)?,
            "reportId": r.get::<_, String>(2)?,
            "classPercentile": r.get::<_, i64>(3)?,
            "gradePercentile": r.get::<_, i64>(4)?,
            "schoolPercentile": r.get::<_, i64>(5)?,
            "growthTrend": r.get::<_, String>(6)?,
            "predictedNextScore": r.get::<_, f64>(7)?,
            "confidenceInterval": {
                "lower": r.get::<_, f64>(8)?,
                "upper": r.get::<_, f64>(9)?,
            },
            "strengths": serde_json::from_str::<Vec<String>>(&strengths).unwrap_or_default(),
            "improvementAreas": serde_json::from_str::<Vec<String>>(&improvement).unwrap_or_default(),
            "createdAt": r.get::<_, String>(12)?,
        }))
    };
    let records = if let Some(tid) = term_id.as_ref() {
        stmt.query_map((&student_id, tid), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([&student_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    }
    .map_err(HandlerErr::db)?;

    Ok(json!({ "analytics": records }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "analytics.student" => student_analytics(conn, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.student" => Some(dispatch(state, req)),
        _ => None,
    }
}
