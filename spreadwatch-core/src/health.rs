//! Health report types
//!
//! The scoring itself lives next to the cache it inspects; this module only
//! defines what a report looks like so that any consumer can render it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Score at or above which the cache is considered healthy.
pub const HEALTHY_SCORE: u32 = 80;
/// Score at or above which the cache is degraded but serviceable.
pub const WARNING_SCORE: u32 = 60;

/// Overall health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything within thresholds, or only minor deviations
    Healthy,
    /// Degraded; worth investigating
    Warning,
    /// Operators should act
    Critical,
}

impl HealthStatus {
    /// Classify a 0-100 score.
    pub fn from_score(score: u32) -> Self {
        if score >= HEALTHY_SCORE {
            Self::Healthy
        } else if score >= WARNING_SCORE {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

/// Scored diagnosis of the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// 0-100, higher is better
    pub score: u32,
    /// One entry per crossed threshold
    pub issues: Vec<String>,
    /// Paired with `issues`
    pub recommendations: Vec<String>,
    /// Inputs the score was computed from
    pub details: HashMap<String, serde_json::Value>,
}

impl HealthReport {
    /// A report with a perfect score and nothing to say.
    pub fn perfect() -> Self {
        Self {
            status: HealthStatus::Healthy,
            score: 100,
            issues: Vec::new(),
            recommendations: Vec::new(),
            details: HashMap::new(),
        }
    }

    /// Subtract a penalty and record why.
    pub fn penalize(
        &mut self,
        penalty: u32,
        issue: impl Into<String>,
        recommendation: impl Into<String>,
    ) {
        self.score = self.score.saturating_sub(penalty);
        self.status = HealthStatus::from_score(self.score);
        self.issues.push(issue.into());
        self.recommendations.push(recommendation.into());
    }

    /// Add a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}
