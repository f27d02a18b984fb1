//! Independent risk detectors
//!
//! Each detector is an additive rule stack over a [`FeatureVector`], clamped to
//! 1.0. The score is a monotone risk indicator, not a probability. Detectors
//! hold no mutable state, so the bank can be shared across threads.

use crate::config::{BusinessHours, EngineConfig};
use crate::features::FeatureVector;
use crate::network_analysis::StructuralFindings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// Detector identity, in declaration order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Statistical,
    Behavioral,
    Network,
    Temporal,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 4] = [
        DetectorKind::Statistical,
        DetectorKind::Behavioral,
        DetectorKind::Network,
        DetectorKind::Temporal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DetectorKind::Statistical => "statistical",
            DetectorKind::Behavioral => "behavioral",
            DetectorKind::Network => "network",
            DetectorKind::Temporal => "temporal",
        }
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A detector that could not produce a score
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[error("{detector} detector failed: {message}")]
pub struct DetectorFault {
    pub detector: DetectorKind,
    pub message: String,
}

/// One fired rule
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub contribution: f64,
    /// Explanation surfaced in the result, if this rule is worth reporting
    pub reason: Option<&'static str>,
}

impl Signal {
    fn silent(contribution: f64) -> Self {
        Self {
            contribution,
            reason: None,
        }
    }

    fn reported(contribution: f64, reason: &'static str) -> Self {
        Self {
            contribution,
            reason: Some(reason),
        }
    }
}

/// Score and explanations from one detector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub score: f64,
    pub reasons: Vec<String>,
}

impl Assessment {
    fn from_signals(signals: &[Signal]) -> Self {
        let total: f64 = signals.iter().map(|s| s.contribution).sum();
        Self {
            score: total.min(1.0),
            reasons: signals
                .iter()
                .filter_map(|s| s.reason.map(str::to_string))
                .collect(),
        }
    }
}

/// Contract shared by every detector, including any trained model substituted later
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    /// Score in `[0, 1]` plus the reasons worth reporting
    fn evaluate(
        &self,
        features: &FeatureVector,
        structure: &StructuralFindings,
    ) -> Result<Assessment, DetectorFault>;
}

/// Threshold rules over amount, time, frequency and velocity
#[derive(Debug, Clone, Default)]
pub struct StatisticalDetector;

impl StatisticalDetector {
    pub fn signals(&self, features: &FeatureVector) -> Vec<Signal> {
        let mut signals = Vec::new();

        if features.amount > 10_000.0 {
            signals.push(Signal::reported(0.3, "Unusually large transaction amount"));
        } else if features.amount > 5_000.0 {
            signals.push(Signal::silent(0.2));
        }

        if features.is_night {
            signals.push(Signal::reported(0.2, "Transaction at unusual time"));
        }
        if features.is_weekend {
            signals.push(Signal::silent(0.1));
        }

        if features.recent_frequency_count > 5 {
            signals.push(Signal::reported(0.3, "High transaction frequency"));
        } else if features.recent_frequency_count > 2 {
            signals.push(Signal::silent(0.1));
        }

        if features.time_since_last_seconds < 60.0 {
            signals.push(Signal::reported(0.4, "Rapid succession of transactions"));
        } else if features.time_since_last_seconds < 300.0 {
            signals.push(Signal::silent(0.2));
        }

        if features.amount_ratio_to_recent_avg > 5.0 {
            signals.push(Signal::reported(
                0.3,
                "Amount significantly higher than average",
            ));
        } else if features.amount_ratio_to_recent_avg > 2.0 {
            signals.push(Signal::silent(0.1));
        }

        signals
    }

    pub fn score(&self, features: &FeatureVector) -> f64 {
        Assessment::from_signals(&self.signals(features)).score
    }
}

impl Detector for StatisticalDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Statistical
    }

    fn evaluate(
        &self,
        features: &FeatureVector,
        _structure: &StructuralFindings,
    ) -> Result<Assessment, DetectorFault> {
        Ok(Assessment::from_signals(&self.signals(features)))
    }
}

/// Deviation from the user's normal hours, amounts and pace
#[derive(Debug, Clone)]
pub struct BehavioralDetector {
    business_hours: BusinessHours,
}

impl BehavioralDetector {
    pub fn new(business_hours: BusinessHours) -> Self {
        Self { business_hours }
    }

    pub fn signals(&self, features: &FeatureVector) -> Vec<Signal> {
        let mut signals = Vec::new();

        if !self.business_hours.contains(features.hour_of_day) {
            signals.push(Signal::silent(0.2));
        }
        if features.amount_ratio_to_recent_avg > 3.0 {
            signals.push(Signal::silent(0.3));
        }
        if features.recent_frequency_count > 3 {
            signals.push(Signal::silent(0.2));
        }
        if features.hour_pattern_anomaly {
            signals.push(Signal::reported(0.1, "Unusual transaction time pattern"));
        }
        if features.amount_pattern_anomaly {
            signals.push(Signal::reported(0.1, "Unusual transaction amount pattern"));
        }

        signals
    }

    pub fn score(&self, features: &FeatureVector) -> f64 {
        Assessment::from_signals(&self.signals(features)).score
    }
}

impl Default for BehavioralDetector {
    fn default() -> Self {
        Self::new(BusinessHours::default())
    }
}

impl Detector for BehavioralDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Behavioral
    }

    fn evaluate(
        &self,
        features: &FeatureVector,
        _structure: &StructuralFindings,
    ) -> Result<Assessment, DetectorFault> {
        Ok(Assessment::from_signals(&self.signals(features)))
    }
}

/// Scores the graph analyzer's structural findings
#[derive(Debug, Clone, Default)]
pub struct NetworkDetector;

impl NetworkDetector {
    pub fn score(&self, structure: &StructuralFindings) -> f64 {
        structure.structural_score.clamp(0.0, 1.0)
    }
}

impl Detector for NetworkDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Network
    }

    fn evaluate(
        &self,
        _features: &FeatureVector,
        structure: &StructuralFindings,
    ) -> Result<Assessment, DetectorFault> {
        Ok(Assessment {
            score: self.score(structure),
            reasons: structure.findings.clone(),
        })
    }
}

/// Night, weekend and early-morning timing
#[derive(Debug, Clone, Default)]
pub struct TemporalDetector;

impl TemporalDetector {
    /// Hours 00..=05
    const EARLY_MORNING_END: u32 = 6;

    pub fn signals(&self, features: &FeatureVector) -> Vec<Signal> {
        let mut signals = Vec::new();

        if features.is_night {
            signals.push(Signal::silent(0.3));
        }
        if features.is_weekend {
            signals.push(Signal::silent(0.1));
        }
        if features.hour_of_day < Self::EARLY_MORNING_END {
            signals.push(Signal::reported(0.2, "Very early morning transaction"));
        }

        signals
    }

    pub fn score(&self, features: &FeatureVector) -> f64 {
        Assessment::from_signals(&self.signals(features)).score
    }
}

impl Detector for TemporalDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Temporal
    }

    fn evaluate(
        &self,
        features: &FeatureVector,
        _structure: &StructuralFindings,
    ) -> Result<Assessment, DetectorFault> {
        Ok(Assessment::from_signals(&self.signals(features)))
    }
}

/// Scores and faults from one pass over the bank
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BankOutcome {
    pub assessments: BTreeMap<DetectorKind, Assessment>,
    pub faults: Vec<DetectorFault>,
}

impl BankOutcome {
    /// Score per detector; faulted detectors report 0.0
    pub fn scores(&self) -> BTreeMap<DetectorKind, f64> {
        DetectorKind::ALL
            .iter()
            .map(|kind| (*kind, self.assessments.get(kind).map_or(0.0, |a| a.score)))
            .collect()
    }
}

/// The four detectors run side by side over the same features
pub struct DetectorBank {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorBank {
    pub fn new(business_hours: BusinessHours) -> Self {
        Self {
            detectors: vec![
                Box::new(StatisticalDetector),
                Box::new(BehavioralDetector::new(business_hours)),
                Box::new(NetworkDetector),
                Box::new(TemporalDetector),
            ],
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.business_hours)
    }

    /// Swap in a detector, replacing the one of the same kind
    pub fn replace(&mut self, detector: Box<dyn Detector>) {
        let kind = detector.kind();
        match self.detectors.iter_mut().find(|d| d.kind() == kind) {
            Some(slot) => *slot = detector,
            None => self.detectors.push(detector),
        }
    }

    /// Evaluate every detector. A detector that errors, panics or returns a
    /// non-finite score is recorded as a fault and contributes nothing.
    pub fn run(&self, features: &FeatureVector, structure: &StructuralFindings) -> BankOutcome {
        let mut outcome = BankOutcome::default();

        for detector in &self.detectors {
            let kind = detector.kind();
            let evaluation = AssertUnwindSafe(|| detector.evaluate(features, structure));
            let result = panic::catch_unwind(evaluation).unwrap_or_else(|payload| {
                Err(DetectorFault {
                    detector: kind,
                    message: panic_message(payload.as_ref()),
                })
            });

            match result {
                Ok(assessment) if assessment.score.is_finite() => {
                    let score = assessment.score.clamp(0.0, 1.0);
                    outcome.assessments.insert(kind, Assessment { score, ..assessment });
                }
                Ok(assessment) => outcome.faults.push(DetectorFault {
                    detector: kind,
                    message: format!("non-finite score {}", assessment.score),
                }),
                Err(fault) => outcome.faults.push(fault),
            }
        }

        outcome
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl Default for DetectorBank {
    fn default() -> Self {
        Self::new(BusinessHours::default())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
