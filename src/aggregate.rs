use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

use crate::grading::{EvaluatorRole, GradeBand};

/// One submitted evaluation as the aggregator sees it. The pipeline never
/// writes evaluations; rows are read-only inputs.
#[derive(Debug, Clone)]
pub struct EvaluationInput {
    pub parameter_id: String,
    pub evaluator_name: String,
    pub role: EvaluatorRole,
    pub score: f64,
    pub remark: String,
    pub evidence: Option<String>,
    pub confidence: f64,
    pub date: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RoleWeight {
    pub role: EvaluatorRole,
    pub weightage: f64,
}

// Serialized into the report's summary document, which keeps the snake_case
// key convention of the stored summary JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct EvaluatorEntry {
    pub evaluator_name: String,
    pub score: f64,
    pub remark: String,
    pub confidence: f64,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RoleBreakdown {
    pub role: &'static str,
    pub score: f64,
    pub grade: &'static str,
    pub evaluations: Vec<EvaluatorEntry>,
}

#[derive(Debug, Clone)]
pub struct ParameterAggregate {
    pub score: f64,
    pub band: GradeBand,
    pub breakdown: Vec<RoleBreakdown>,
    pub evidence: Vec<String>,
}

/// Cross-role weighted aggregation for one (student, parameter, term).
///
/// Evaluations are grouped by role and same-role scores averaged; each role
/// holding both an assignment weight and at least one evaluation contributes
/// roleAverage x weight. Roles evaluating without an assignment are dropped.
pub fn aggregate_parameter(
    evaluations: &[EvaluationInput],
    weights: &[RoleWeight],
) -> ParameterAggregate {
    let mut by_role: HashMap<EvaluatorRole, Vec<&EvaluationInput>> = HashMap::new();
    for e in evaluations {
        by_role.entry(e.role).or_default().push(e);
    }

    let mut weighted_sum = 0.0_f64;
    let mut total_weight = 0.0_f64;
    let mut breakdown: Vec<RoleBreakdown> = Vec::new();
    let mut evidence: Vec<String> = Vec::new();

    for w in weights {
        let Some(role_evals) = by_role.get(&w.role) else {
            continue;
        };
        if role_evals.is_empty() {
            continue;
        }

        let role_average =
            role_evals.iter().map(|e| e.score).sum::<f64>() / role_evals.len() as f64;
        weighted_sum += role_average * w.weightage;
        total_weight += w.weightage;

        breakdown.push(RoleBreakdown {
            role: w.role.as_str(),
            score: role_average,
            grade: GradeBand::from_score(role_average).letter(),
            evaluations: role_evals
                .iter()
                .map(|e| EvaluatorEntry {
                    evaluator_name: e.evaluator_name.clone(),
                    score: e.score,
                    remark: e.remark.clone(),
                    confidence: e.confidence,
                    date: e.date.clone(),
                })
                .collect(),
        });

        for e in role_evals {
            if let Some(notes) = e.evidence.as_deref() {
                if !notes.is_empty() {
                    evidence.push(format!("{}: {}", w.role.as_str(), notes));
                }
            }
        }
    }

    let score = if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        0.0
    };

    ParameterAggregate {
        score,
        band: GradeBand::from_score(score),
        breakdown,
        evidence,
    }
}

/// Cross-parameter weighted average over included parameters only.
pub fn overall_score(entries: &[(f64, f64)]) -> f64 {
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for (score, weightage) in entries {
        sum += score * weightage;
        denom += weightage;
    }
    if denom > 0.0 {
        sum / denom
    } else {
        0.0
    }
}

pub const STRENGTH_MIN_SCORE: f64 = 4.0;
pub const GROWTH_MAX_SCORE: f64 = 3.0;

pub fn strengths(scored_parameters: &[(String, f64)]) -> Vec<String> {
    scored_parameters
        .iter()
        .filter(|(_, s)| *s >= STRENGTH_MIN_SCORE)
        .map(|(name, _)| name.clone())
        .collect()
}

pub fn growth_areas(scored_parameters: &[(String, f64)]) -> Vec<String> {
    scored_parameters
        .iter()
        .filter(|(_, s)| *s < GROWTH_MAX_SCORE)
        .map(|(name, _)| name.clone())
        .collect()
}

const STRENGTH_RECOMMENDATIONS: [(&str, &str); 3] = [
    (
        "Mathematics",
        "Consider advanced mathematics programs or competitions",
    ),
    (
        "Creativity & Innovation",
        "Explore art exhibitions or creative writing opportunities",
    ),
    (
        "Physical Fitness & Health",
        "Consider sports leadership roles or fitness mentoring",
    ),
];

const GROWTH_RECOMMENDATIONS: [(&str, &str); 2] = [
    (
        "Teamwork & Collaboration",
        "Participate in more group projects and collaborative activities",
    ),
    (
        "Empathy & Compassion",
        "Engage in community service or peer support programs",
    ),
];

const GROWTH_NEXT_STEPS: [(&str, &str); 3] = [
    ("Mathematics", "Schedule additional math practice sessions"),
    (
        "Physical Fitness & Health",
        "Develop a personalized fitness plan",
    ),
    (
        "Teamwork & Collaboration",
        "Join collaborative extracurricular activities",
    ),
];

/// Fixed lookup keyed on parameter-name presence in strengths/growth areas.
pub fn recommendations(strengths: &[String], growth_areas: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for (name, text) in STRENGTH_RECOMMENDATIONS {
        if strengths.iter().any(|s| s == name) {
            out.push(text.to_string());
        }
    }
    for (name, text) in GROWTH_RECOMMENDATIONS {
        if growth_areas.iter().any(|g| g == name) {
            out.push(text.to_string());
        }
    }
    out
}

/// Goals recorded in the student's term reflections, followed by canned
/// growth-area suggestions, de-duplicated preserving first-seen order.
pub fn next_steps(reflection_goals: &[String], growth_areas: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |s: String| {
        if !out.contains(&s) {
            out.push(s);
        }
    };
    for goal in reflection_goals {
        push(goal.clone());
    }
    for (name, text) in GROWTH_NEXT_STEPS {
        if growth_areas.iter().any(|g| g == name) {
            push(text.to_string());
        }
    }
    out
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct QualityIndicators {
    pub average_confidence: f64,
    pub completeness_percentage: f64,
    pub multi_stakeholder_coverage: f64,
    pub evidence_richness: f64,
}

const CORE_ROLES: [EvaluatorRole; 3] = [
    EvaluatorRole::Teacher,
    EvaluatorRole::Parent,
    EvaluatorRole::SelfAssessment,
];

pub fn quality_indicators(
    evaluations: &[EvaluationInput],
    applicable_parameters: usize,
    evaluated_parameters: usize,
) -> QualityIndicators {
    let average_confidence = if evaluations.is_empty() {
        0.0
    } else {
        evaluations.iter().map(|e| e.confidence).sum::<f64>() / evaluations.len() as f64
    };

    let completeness = if applicable_parameters > 0 {
        evaluated_parameters as f64 / applicable_parameters as f64
    } else {
        0.0
    };

    let covered = CORE_ROLES
        .iter()
        .filter(|role| evaluations.iter().any(|e| e.role == **role))
        .count();
    let coverage = covered as f64 / CORE_ROLES.len() as f64;

    let with_evidence = evaluations
        .iter()
        .filter(|e| e.evidence.as_deref().map(|n| !n.is_empty()).unwrap_or(false))
        .count();
    let richness = if evaluations.is_empty() {
        0.0
    } else {
        with_evidence as f64 / evaluations.len() as f64
    };

    QualityIndicators {
        average_confidence,
        completeness_percentage: completeness * 100.0,
        multi_stakeholder_coverage: coverage * 100.0,
        evidence_richness: richness * 100.0,
    }
}

/// Evaluation counts by role plus the submission-date window.
pub fn data_sources(evaluations: &[EvaluationInput]) -> serde_json::Value {
    let mut by_role: HashMap<&'static str, i64> = HashMap::new();
    for e in evaluations {
        *by_role.entry(e.role.as_str()).or_insert(0) += 1;
    }
    let start = evaluations.iter().map(|e| e.date.as_str()).min();
    let end = evaluations.iter().map(|e| e.date.as_str()).max();
    json!({
        "total_evaluations": evaluations.len(),
        "by_role": by_role,
        "evaluation_period": { "start": start, "end": end },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(role: EvaluatorRole, score: f64) -> EvaluationInput {
        EvaluationInput {
            parameter_id: "p1".to_string(),
            evaluator_name: "Someone".to_string(),
            role,
            score,
            remark: "a considered remark".to_string(),
            evidence: None,
            confidence: 0.8,
            date: "2025-11-01T00:00:00Z".to_string(),
        }
    }

    fn weight(role: EvaluatorRole, weightage: f64) -> RoleWeight {
        RoleWeight { role, weightage }
    }

    #[test]
    fn three_role_weighted_example() {
        // teacher 4 (.5) + parent 3 (.3) + self 5 (.2) = 3.9, grade A
        let evals = vec![
            eval(EvaluatorRole::Teacher, 4.0),
            eval(EvaluatorRole::Parent, 3.0),
            eval(EvaluatorRole::SelfAssessment, 5.0),
        ];
        let weights = vec![
            weight(EvaluatorRole::Teacher, 0.5),
            weight(EvaluatorRole::Parent, 0.3),
            weight(EvaluatorRole::SelfAssessment, 0.2),
        ];
        let agg = aggregate_parameter(&evals, &weights);
        assert!((agg.score - 3.9).abs() < 1e-9);
        assert_eq!(agg.band.letter(), "A");
        assert_eq!(agg.breakdown.len(), 3);
    }

    #[test]
    fn same_role_scores_are_averaged_not_weighted_further() {
        let evals = vec![
            eval(EvaluatorRole::Teacher, 2.0),
            eval(EvaluatorRole::Teacher, 4.0),
        ];
        let weights = vec![weight(EvaluatorRole::Teacher, 1.0)];
        let agg = aggregate_parameter(&evals, &weights);
        assert!((agg.score - 3.0).abs() < 1e-9);
        assert_eq!(agg.breakdown[0].evaluations.len(), 2);
    }

    #[test]
    fn role_without_assignment_is_dropped() {
        let evals = vec![
            eval(EvaluatorRole::Teacher, 4.0),
            eval(EvaluatorRole::Peer, 1.0),
        ];
        let weights = vec![weight(EvaluatorRole::Teacher, 0.5)];
        let agg = aggregate_parameter(&evals, &weights);
        // Peer has no weight row, so the aggregate is the teacher average alone.
        assert!((agg.score - 4.0).abs() < 1e-9);
        assert_eq!(agg.breakdown.len(), 1);
    }

    #[test]
    fn no_contributing_role_scores_zero() {
        let evals = vec![eval(EvaluatorRole::Peer, 5.0)];
        let weights = vec![weight(EvaluatorRole::Teacher, 1.0)];
        let agg = aggregate_parameter(&evals, &weights);
        assert_eq!(agg.score, 0.0);
        assert_eq!(agg.band.letter(), "D");
        assert!(agg.breakdown.is_empty());
    }

    #[test]
    fn evidence_is_prefixed_by_role() {
        let mut e = eval(EvaluatorRole::Teacher, 4.0);
        e.evidence = Some("project notebook".to_string());
        let agg = aggregate_parameter(&[e], &[weight(EvaluatorRole::Teacher, 1.0)]);
        assert_eq!(agg.evidence, vec!["teacher: project notebook".to_string()]);
    }

    #[test]
    fn overall_is_weighted_by_parameter_weightage() {
        // scores 4.0 (weightage 2) and 2.0 (weightage 1) -> 10/3
        let overall = overall_score(&[(4.0, 2.0), (2.0, 1.0)]);
        assert!((overall - 10.0 / 3.0).abs() < 1e-9);
        assert_eq!(GradeBand::from_score(overall).letter(), "A");
    }

    #[test]
    fn overall_with_no_entries_is_zero() {
        assert_eq!(overall_score(&[]), 0.0);
    }

    #[test]
    fn strength_and_growth_thresholds() {
        let scored = vec![
            ("Mathematics".to_string(), 4.0),
            ("Teamwork & Collaboration".to_string(), 2.9),
            ("Communication".to_string(), 3.5),
        ];
        assert_eq!(strengths(&scored), vec!["Mathematics".to_string()]);
        assert_eq!(
            growth_areas(&scored),
            vec!["Teamwork & Collaboration".to_string()]
        );
    }

    #[test]
    fn recommendations_follow_the_lookup() {
        let recs = recommendations(
            &["Mathematics".to_string()],
            &["Teamwork & Collaboration".to_string()],
        );
        assert_eq!(recs.len(), 2);
        assert!(recs[0].contains("advanced mathematics"));
        assert!(recs[1].contains("group projects"));
    }

    #[test]
    fn next_steps_union_goals_and_canned_deduped() {
        let goals = vec![
            "Join collaborative extracurricular activities".to_string(),
            "Read one book a month".to_string(),
        ];
        let growth = vec!["Teamwork & Collaboration".to_string()];
        let steps = next_steps(&goals, &growth);
        // The canned teamwork step duplicates the first goal and is dropped.
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0], "Join collaborative extracurricular activities");
        assert_eq!(steps[1], "Read one book a month");
    }

    #[test]
    fn quality_indicator_fractions() {
        let mut evals = vec![
            eval(EvaluatorRole::Teacher, 4.0),
            eval(EvaluatorRole::Parent, 3.0),
        ];
        evals[0].evidence = Some("worksheet".to_string());
        evals[0].confidence = 0.9;
        evals[1].confidence = 0.7;
        let q = quality_indicators(&evals, 4, 2);
        assert!((q.average_confidence - 0.8).abs() < 1e-9);
        assert!((q.completeness_percentage - 50.0).abs() < 1e-9);
        // teacher + parent out of {teacher, parent, self}
        assert!((q.multi_stakeholder_coverage - 200.0 / 3.0).abs() < 1e-9);
        assert!((q.evidence_richness - 50.0).abs() < 1e-9);
    }
}
