use crate::grading::EvaluatorRole;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const CATEGORIES: [&str; 4] = ["scholastic", "co_scholastic", "life_skills", "discipline"];
const FREQUENCIES: [&str; 3] = ["continuous", "periodic", "annual"];
const GRADE_LEVELS: [&str; 5] = ["A+", "A", "B", "C", "D"];
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
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
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn get_string_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(raw) = params.get(key) else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let Some(arr) = raw.as_array() else {
        return Err(HandlerErr::bad_params(format!(
            "{} must be an array of strings",
            key
        )));
    };
    arr.iter()
        .map(|v| {
            v.as_str().map(|s| s.to_string()).ok_or_else(|| {
                HandlerErr::bad_params(format!("{} must contain only strings", key))
            })
        })
        .collect()
}

fn parameter_exists(conn: &Connection, parameter_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM hpc_parameters WHERE id = ?",
        [parameter_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db)
}

fn parameters_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let parameter_id =
        get_optional_str(params, "parameterId").unwrap_or_else(|| Uuid::new_v4().to_string());
    let name = get_required_str(params, "name")?;
    let category = get_required_str(params, "category")?;
    if !CATEGORIES.contains(&category.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "category must be one of: {}",
            CATEGORIES.join(", ")
        )));
    }
    let weightage = params
        .get("weightage")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params("missing weightage"))?;
    if weightage <= 0.0 {
        return Err(HandlerErr::bad_params("weightage must be positive"));
    }
    let frequency = get_optional_str(params, "evaluationFrequency")
        .unwrap_or_else(|| "periodic".to_string());
    if !FREQUENCIES.contains(&frequency.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "evaluationFrequency must be one of: {}",
            FREQUENCIES.join(", ")
        )));
    }
    let grades = get_string_array(params, "gradeApplicability")?;
    let sub_category = get_optional_str(params, "subCategory");
    let description = get_optional_str(params, "description");
    let active = params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    conn.execute(
        "INSERT OR REPLACE INTO hpc_parameters(
            id, name, category, sub_category, weightage, description,
            grade_applicability, evaluation_frequency, active)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &parameter_id,
            &name,
            &category,
            &sub_category,
            weightage,
            &description,
            serde_json::to_string(&grades).map_err(HandlerErr::db)?,
            &frequency,
            active as i64,
        ),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "parameterId": parameter_id }))
}

fn rubrics_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let rubric_id =
        get_optional_str(params, "rubricId").unwrap_or_else(|| Uuid::new_v4().to_string());
    let parameter_id = get_required_str(params, "parameterId")?;
    if !parameter_exists(conn, &parameter_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "parameter not found".to_string(),
            details: None,
        });
    }
    let level = get_required_str(params, "level")?;
    if !GRADE_LEVELS.contains(&level.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "level must be one of: {}",
            GRADE_LEVELS.join(", ")
        )));
    }
    let descriptor = get_required_str(params, "descriptor")?;
    let detailed = get_optional_str(params, "detailedDescription");
    let examples = get_string_array(params, "examples")?;
    let indicators = get_string_array(params, "indicators")?;
    let version = params.get("version").and_then(|v| v.as_i64()).unwrap_or(1);
    let active = params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    conn.execute(
        "INSERT OR REPLACE INTO hpc_rubrics(
            id, parameter_id, level, descriptor, detailed_description,
            examples, indicators, version, active)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &rubric_id,
            &parameter_id,
            &level,
            &descriptor,
            &detailed,
            serde_json::to_string(&examples).map_err(HandlerErr::db)?,
            serde_json::to_string(&indicators).map_err(HandlerErr::db)?,
            version,
            active as i64,
        ),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "rubricId": rubric_id }))
}

/// Replaces the full role-weight set for one parameter. The weights must
/// cover known roles only and sum to 1; a partial set would silently shrink
/// every aggregate for the parameter, so it is rejected here instead.
fn assign_weights(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let parameter_id = get_required_str(params, "parameterId")?;
    if !parameter_exists(conn, &parameter_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "parameter not found".to_string(),
            details: None,
        });
    }

    let Some(raw) = params.get("weights").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing weights"));
    };
    if raw.is_empty() {
        return Err(HandlerErr::bad_params("weights must not be empty"));
    }

    let mut parsed: Vec<(EvaluatorRole, f64, bool)> = Vec::with_capacity(raw.len());
    let mut sum = 0.0_f64;
    for entry in raw {
        let role_str = entry
            .get("role")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("weights entries need a role"))?;
        let Some(role) = EvaluatorRole::parse(role_str) else {
            let known: Vec<&str> = crate::grading::ALL_ROLES.iter().map(|r| r.as_str()).collect();
            return Err(HandlerErr {
                code: "bad_params",
                message: "unknown evaluator role".to_string(),
                details: Some(json!({ "role": role_str, "knownRoles": known })),
            });
        };
        if parsed.iter().any(|(r, _, _)| *r == role) {
            return Err(HandlerErr::bad_params(format!(
                "duplicate role in weights: {}",
                role.as_str()
            )));
        }
        let weightage = entry
            .get("weightage")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| HandlerErr::bad_params("weights entries need a weightage"))?;
        if weightage <= 0.0 {
            return Err(HandlerErr::bad_params("weightage must be positive"));
        }
        let required = entry
            .get("required")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        sum += weightage;
        parsed.push((role, weightage, required));
    }

    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(HandlerErr {
            code: "bad_weightage",
            message: "role weights for a parameter must sum to 1".to_string(),
            details: Some(json!({ "sum": sum })),
        });
    }

    conn.execute(
        "DELETE FROM hpc_parameter_assignments WHERE parameter_id = ?",
        [&parameter_id],
    )
    .map_err(HandlerErr::db)?;
    for (role, weightage, required) in &parsed {
        conn.execute(
            "INSERT INTO hpc_parameter_assignments(id, parameter_id, evaluator_role, weightage, required)
             VALUES (?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &parameter_id,
                role.as_str(),
                weightage,
                *required as i64,
            ),
        )
        .map_err(HandlerErr::db)?;
    }

    Ok(json!({ "parameterId": parameter_id, "assignedRoles": parsed.len() }))
}

fn achievements_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let achievement_id =
        get_optional_str(params, "achievementId").unwrap_or_else(|| Uuid::new_v4().to_string());
    let student_id = get_required_str(params, "studentId")?;
    let title = get_required_str(params, "title")?;
    let category = get_optional_str(params, "category");
    let date_achieved = get_optional_str(params, "dateAchieved");
    let points = params.get("pointsAwarded").and_then(|v| v.as_f64());

    conn.execute(
        "INSERT OR REPLACE INTO hpc_achievements(id, student_id, title, category, date_achieved, points_awarded)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            &achievement_id,
            &student_id,
            &title,
            &category,
            &date_achieved,
            points,
        ),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "achievementId": achievement_id }))
}

fn reflections_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let reflection_id =
        get_optional_str(params, "reflectionId").unwrap_or_else(|| Uuid::new_v4().to_string());
    let student_id = get_required_str(params, "studentId")?;
    let term_id = get_required_str(params, "termId")?;
    let reflection_type = get_optional_str(params, "reflectionType");
    let content = get_optional_str(params, "content");
    let goals = get_string_array(params, "goals")?;

    conn.execute(
        "INSERT OR REPLACE INTO hpc_reflections(id, student_id, term_id, reflection_type, content, goals)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            &reflection_id,
            &student_id,
            &term_id,
            &reflection_type,
            &content,
            serde_json::to_string(&goals).map_err(HandlerErr::db)?,
        ),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "reflectionId": reflection_id }))
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = match req.method.as_str() {
        "parameters.upsert" => parameters_upsert(conn, &req.params),
        "rubrics.upsert" => rubrics_upsert(conn, &req.params),
        "parameters.assignWeights" => assign_weights(conn, &req.params),
        "achievements.add" => achievements_add(conn, &req.params),
        "reflections.add" => reflections_add(conn, &req.params),
        _ => unreachable!("routed method"),
    };
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "parameters.upsert"
        | "rubrics.upsert"
        | "parameters.assignWeights"
        | "achievements.add"
        | "reflections.add" => Some(dispatch(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::GradeBand;

    #[test]
    fn grade_levels_match_band_letters() {
        for level in GRADE_LEVELS {
            let in_band = [
                GradeBand::APlus,
                GradeBand::A,
                GradeBand::B,
                GradeBand::C,
                GradeBand::D,
            ]
            .iter()
            .any(|b| b.letter() == level);
            assert!(in_band, "level {} has no band", level);
        }
    }
}
