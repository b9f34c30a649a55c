//! How well posted content lands: a per-post sentiment score built from
//! votes and discussion, and a coarse level per personality.

use std::fmt;

/// A post scoring at least this counts as successful.
pub const SUCCESS_THRESHOLD: f64 = 0.6;

/// Comment count treated as full engagement.
const ENGAGED_COMMENTS: f64 = 20.0;
/// Score treated as a full-strength signal.
const STRONG_SCORE: f64 = 100.0;

/// Weighted blend in `0.0..=1.0`: half upvote ratio, 30% discussion, 20% score.
/// Negative scores count as zero.
pub fn sentiment_score(upvote_ratio: f64, num_comments: u64, score: i64) -> f64 {
    let comments = (num_comments as f64 / ENGAGED_COMMENTS).min(1.0);
    let score = (score.max(0) as f64 / STRONG_SCORE).min(1.0);
    let blended = 0.5 * upvote_ratio.clamp(0.0, 1.0) + 0.3 * comments + 0.2 * score;
    (blended * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PerformanceLevel {
    Underperforming,
    NeedsImprovement,
    PerformingWell,
    HighPerforming,
    Exceptional,
}

impl PerformanceLevel {
    /// Level for the share of posts that reached [`SUCCESS_THRESHOLD`].
    pub fn from_success_rate(rate: f64) -> Self {
        match rate {
            r if r >= 0.8 => PerformanceLevel::Exceptional,
            r if r >= 0.6 => PerformanceLevel::HighPerforming,
            r if r >= 0.4 => PerformanceLevel::PerformingWell,
            r if r >= 0.2 => PerformanceLevel::NeedsImprovement,
            _ => PerformanceLevel::Underperforming,
        }
    }
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PerformanceLevel::Underperforming => "underperforming",
            PerformanceLevel::NeedsImprovement => "needs improvement",
            PerformanceLevel::PerformingWell => "performing well",
            PerformanceLevel::HighPerforming => "high performing",
            PerformanceLevel::Exceptional => "exceptional",
        })
    }
}
