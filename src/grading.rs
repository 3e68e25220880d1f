use serde::Serialize;

/// Five-band grading scale used across the HPC pipeline.
/// Band edges are inclusive lower bounds on the 1-5 score scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeBand {
    APlus,
    A,
    B,
    C,
    D,
}

impl GradeBand {
    pub fn from_score(score: f64) -> GradeBand {
        if score >= 4.5 {
            GradeBand::APlus
        } else if score >= 3.5 {
            GradeBand::A
        } else if score >= 2.5 {
            GradeBand::B
        } else if score >= 1.5 {
            GradeBand::C
        } else {
            GradeBand::D
        }
    }

    pub fn letter(self) -> &'static str {
        match self {
            GradeBand::APlus => "A+",
            GradeBand::A => "A",
            GradeBand::B => "B",
            GradeBand::C => "C",
            GradeBand::D => "D",
        }
    }

    pub fn level(self) -> &'static str {
        match self {
            GradeBand::APlus => "outstanding",
            GradeBand::A => "excellent",
            GradeBand::B => "good",
            GradeBand::C => "satisfactory",
            GradeBand::D => "needs_improvement",
        }
    }
}

/// Stakeholder perspective behind an evaluation. Closed set; unknown role
/// strings are rejected at the intake boundary rather than carried along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluatorRole {
    Teacher,
    Parent,
    Peer,
    SelfAssessment,
    Counselor,
    Coach,
}

pub const ALL_ROLES: [EvaluatorRole; 6] = [
    EvaluatorRole::Teacher,
    EvaluatorRole::Parent,
    EvaluatorRole::Peer,
    EvaluatorRole::SelfAssessment,
    EvaluatorRole::Counselor,
    EvaluatorRole::Coach,
];

impl EvaluatorRole {
    pub fn parse(s: &str) -> Option<EvaluatorRole> {
        match s {
            "teacher" => Some(EvaluatorRole::Teacher),
            "parent" => Some(EvaluatorRole::Parent),
            "peer" => Some(EvaluatorRole::Peer),
            "self" => Some(EvaluatorRole::SelfAssessment),
            "counselor" => Some(EvaluatorRole::Counselor),
            "coach" => Some(EvaluatorRole::Coach),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EvaluatorRole::Teacher => "teacher",
            EvaluatorRole::Parent => "parent",
            EvaluatorRole::Peer => "peer",
            EvaluatorRole::SelfAssessment => "self",
            EvaluatorRole::Counselor => "counselor",
            EvaluatorRole::Coach => "coach",
        }
    }
}

pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 5.0;
const LOW_CONFIDENCE: f64 = 0.5;
const MIN_REMARK_CHARS: usize = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Submission-time check for a single evaluation. Errors block persistence;
/// warnings are surfaced to the caller and the row is accepted.
pub fn validate_evaluation(score: f64, confidence: f64, remark: &str) -> ValidationOutcome {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        errors.push("Score must be between 1 and 5".to_string());
    }

    if confidence < LOW_CONFIDENCE {
        warnings.push("Low confidence level - consider additional evidence".to_string());
    }

    if remark.trim().chars().count() < MIN_REMARK_CHARS {
        warnings.push("Qualitative remark should be more detailed".to_string());
    }

    ValidationOutcome {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries_take_the_higher_band() {
        assert_eq!(GradeBand::from_score(4.5).letter(), "A+");
        assert_eq!(GradeBand::from_score(3.5).letter(), "A");
        assert_eq!(GradeBand::from_score(2.5).letter(), "B");
        assert_eq!(GradeBand::from_score(1.5).letter(), "C");
        assert_eq!(GradeBand::from_score(1.49).letter(), "D");
    }

    #[test]
    fn bands_are_monotonic_in_score() {
        let order = |s: f64| match GradeBand::from_score(s) {
            GradeBand::D => 0,
            GradeBand::C => 1,
            GradeBand::B => 2,
            GradeBand::A => 3,
            GradeBand::APlus => 4,
        };
        let mut prev = order(0.0);
        let mut s = 0.0;
        while s <= 5.0 {
            let cur = order(s);
            assert!(cur >= prev, "band dropped at score {}", s);
            prev = cur;
            s += 0.05;
        }
    }

    #[test]
    fn levels_match_letters() {
        assert_eq!(GradeBand::from_score(4.9).level(), "outstanding");
        assert_eq!(GradeBand::from_score(3.9).level(), "excellent");
        assert_eq!(GradeBand::from_score(1.0).level(), "needs_improvement");
    }

    #[test]
    fn out_of_range_score_is_an_error() {
        for bad in [0.0, 0.99, 5.01, -1.0, 6.0] {
            let outcome = validate_evaluation(bad, 0.9, "a detailed remark here");
            assert!(!outcome.valid);
            assert_eq!(outcome.errors.len(), 1);
        }
        let ok = validate_evaluation(1.0, 0.9, "a detailed remark here");
        assert!(ok.valid);
        let ok = validate_evaluation(5.0, 0.9, "a detailed remark here");
        assert!(ok.valid);
    }

    #[test]
    fn low_confidence_and_thin_remark_warn_but_pass() {
        let outcome = validate_evaluation(3.0, 0.4, "short");
        assert!(outcome.valid);
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn role_strings_round_trip_and_unknowns_rejected() {
        for role in ALL_ROLES {
            assert_eq!(EvaluatorRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(EvaluatorRole::parse("principal"), None);
        assert_eq!(EvaluatorRole::parse("Teacher"), None);
    }
}
