//! Weighted ensemble over the detector bank
//!
//! The weight table and thresholds held here are the only place the fraud
//! decision is made; callers read `is_fraud` and `risk_level` off the result.

use crate::config::{DetectorWeights, RiskThresholds, WEIGHT_SUM_TOLERANCE};
use crate::detectors::{BankOutcome, DetectorKind};
use crate::features::FeatureVector;
use crate::network_analysis::StructuralFindings;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const NORMAL_REASON: &str = "Transaction appears normal";
pub const MULTIPLE_PATTERNS_REASON: &str = "Multiple suspicious patterns detected";

/// Risk tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final analysis of one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskResult {
    pub is_fraud: bool,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
    pub per_detector_scores: BTreeMap<DetectorKind, f64>,
    pub confidence: f64,
    /// Regularity of the user's prior hours and amounts, 0.0..=1.0
    pub pattern_stability: f64,
    pub structural_findings: Vec<String>,
    /// Detector faults absorbed while scoring
    pub diagnostics: Vec<String>,
    pub features: FeatureVector,
}

impl RiskResult {
    /// Reasons joined for display
    pub fn reason(&self) -> String {
        self.reasons.join("; ")
    }

    pub fn requires_review(&self) -> bool {
        self.risk_level >= RiskLevel::Medium
    }

    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// Export as JSON
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Fixed-weight linear combination of detector scores
#[derive(Debug, Clone)]
pub struct Ensemble {
    weights: DetectorWeights,
    thresholds: RiskThresholds,
    reason_order: Vec<DetectorKind>,
}

impl Ensemble {
    pub fn new(weights: DetectorWeights, thresholds: RiskThresholds) -> Result<Self> {
        let sum = weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::Configuration(format!(
                "Detector weights must sum to 1.0, got {}",
                sum
            )));
        }
        Ok(Self {
            reason_order: weights.ranked(),
            weights,
            thresholds,
        })
    }

    pub fn weights(&self) -> &DetectorWeights {
        &self.weights
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// `score > fraud threshold`; a score equal to the threshold is not fraud
    pub fn is_fraud(&self, score: f64) -> bool {
        score > self.thresholds.fraud
    }

    pub fn classify(&self, score: f64) -> RiskLevel {
        if score > self.thresholds.critical {
            RiskLevel::Critical
        } else if self.is_fraud(score) {
            RiskLevel::High
        } else if score > self.thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Weighted sum clamped to `[0, 1]`; missing detectors count as 0
    pub fn weighted_score(&self, scores: &BTreeMap<DetectorKind, f64>) -> f64 {
        DetectorKind::ALL
            .iter()
            .map(|kind| self.weights.get(*kind) * scores.get(kind).copied().unwrap_or(0.0))
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }

    /// Combine the bank outcome into the final result
    pub fn combine(
        &self,
        outcome: BankOutcome,
        features: FeatureVector,
        structure: StructuralFindings,
    ) -> RiskResult {
        let per_detector_scores = outcome.scores();
        let risk_score = self.weighted_score(&per_detector_scores);
        let risk_level = self.classify(risk_score);

        let mut reasons: Vec<String> = Vec::new();
        for kind in &self.reason_order {
            if let Some(assessment) = outcome.assessments.get(kind) {
                for reason in &assessment.reasons {
                    if !reasons.contains(reason) {
                        reasons.push(reason.clone());
                    }
                }
            }
        }
        if risk_level == RiskLevel::Critical {
            reasons.push(MULTIPLE_PATTERNS_REASON.to_string());
        }
        if reasons.is_empty() {
            reasons.push(NORMAL_REASON.to_string());
        }

        RiskResult {
            is_fraud: self.is_fraud(risk_score),
            risk_score,
            risk_level,
            reasons,
            per_detector_scores,
            confidence: confidence(&features),
            pattern_stability: features.pattern_stability,
            structural_findings: structure.findings,
            diagnostics: outcome.faults.iter().map(|f| f.to_string()).collect(),
            features,
        }
    }
}

impl Default for Ensemble {
    fn default() -> Self {
        Self {
            weights: DetectorWeights::default(),
            thresholds: RiskThresholds::default(),
            reason_order: DetectorWeights::default().ranked(),
        }
    }
}

/// How much history backs the decision, 0.7..=0.95
fn confidence(features: &FeatureVector) -> f64 {
    let mut confidence: f64 = 0.7;
    if features.recent_frequency_count > 0 {
        confidence += 0.1;
    }
    if features.amount_ratio_to_recent_avg > 2.0 {
        confidence += 0.1;
    }
    if features.recent_frequency_count > 3 {
        confidence += 0.1;
    }
    confidence.min(0.95)
}
