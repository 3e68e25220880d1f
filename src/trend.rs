use crate::grading::{MAX_SCORE, MIN_SCORE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthTrend {
    Improving,
    Declining,
    Stable,
}

impl GrowthTrend {
    pub fn as_str(self) -> &'static str {
        match self {
            GrowthTrend::Improving => "improving",
            GrowthTrend::Declining => "declining",
            GrowthTrend::Stable => "stable",
        }
    }
}

/// Percentile of `score` within a peer pool (self already excluded):
/// round(100 * |peers strictly below| / |pool|). Empty pool defaults to 50.
pub fn percentile_rank(score: f64, peers: &[f64]) -> i64 {
    if peers.is_empty() {
        return 50;
    }
    let below = peers.iter().filter(|p| **p < score).count();
    (100.0 * below as f64 / peers.len() as f64).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trajectory {
    pub trend: GrowthTrend,
    pub predicted: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
}

const DEAD_ZONE: f64 = 0.1;
const SINGLE_POINT_INTERVAL: f64 = 0.2;
const PREDICTION_INTERVAL: f64 = 0.3;

fn clamp_score(v: f64) -> f64 {
    v.clamp(MIN_SCORE, MAX_SCORE)
}

/// Trend and next-score projection from the student's report scores ordered
/// by compile time, the current report's score last.
pub fn growth_trajectory(history: &[f64]) -> Trajectory {
    let Some(&current) = history.last() else {
        return Trajectory {
            trend: GrowthTrend::Stable,
            predicted: 0.0,
            confidence_lower: -SINGLE_POINT_INTERVAL,
            confidence_upper: SINGLE_POINT_INTERVAL,
        };
    };

    if history.len() < 2 {
        return Trajectory {
            trend: GrowthTrend::Stable,
            predicted: current,
            confidence_lower: current - SINGLE_POINT_INTERVAL,
            confidence_upper: current + SINGLE_POINT_INTERVAL,
        };
    }

    let prior = history[history.len() - 2];
    let trend = if current > prior + DEAD_ZONE {
        GrowthTrend::Improving
    } else if current < prior - DEAD_ZONE {
        GrowthTrend::Declining
    } else {
        GrowthTrend::Stable
    };

    let average_change = (current - history[0]) / (history.len() - 1) as f64;
    let predicted = clamp_score(current + average_change);

    Trajectory {
        trend,
        predicted,
        confidence_lower: clamp_score(predicted - PREDICTION_INTERVAL),
        confidence_upper: clamp_score(predicted + PREDICTION_INTERVAL),
    }
}
