//! Engine configuration
//!
//! Every constant the scoring path relies on lives here so deployments can
//! override it from a JSON file. A configuration is validated once, when the
//! engine is built; nothing is re-checked per transaction.

use crate::detectors::DetectorKind;
use crate::{EngineError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tolerance used when checking that detector weights sum to 1.0
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Longest accepted rolling frequency window (366 days)
pub const MAX_FREQUENCY_WINDOW_SECS: i64 = 366 * 24 * 3600;

/// Ensemble weight per detector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorWeights {
    pub statistical: f64,
    pub behavioral: f64,
    pub network: f64,
    pub temporal: f64,
}

impl Default for DetectorWeights {
    fn default() -> Self {
        Self {
            statistical: 0.30,
            behavioral: 0.25,
            network: 0.25,
            temporal: 0.20,
        }
    }
}

impl DetectorWeights {
    /// Weight assigned to a detector
    pub fn get(&self, kind: DetectorKind) -> f64 {
        match kind {
            DetectorKind::Statistical => self.statistical,
            DetectorKind::Behavioral => self.behavioral,
            DetectorKind::Network => self.network,
            DetectorKind::Temporal => self.temporal,
        }
    }

    pub fn sum(&self) -> f64 {
        DetectorKind::ALL.iter().map(|kind| self.get(*kind)).sum()
    }

    /// Detectors in descending weight order; ties keep declaration order.
    pub fn ranked(&self) -> Vec<DetectorKind> {
        let mut kinds = DetectorKind::ALL.to_vec();
        kinds.sort_by(|a, b| {
            self.get(*b)
                .partial_cmp(&self.get(*a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        kinds
    }
}

/// Night window: `hour > after_hour || hour < before_hour`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NightBand {
    pub after_hour: u32,
    pub before_hour: u32,
}

impl Default for NightBand {
    fn default() -> Self {
        Self {
            after_hour: 22,
            before_hour: 6,
        }
    }
}

impl NightBand {
    pub fn contains(&self, hour: u32) -> bool {
        hour > self.after_hour || hour < self.before_hour
    }
}

/// Normal activity window: `start_hour <= hour < end_hour`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BusinessHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 18,
        }
    }
}

impl BusinessHours {
    pub fn contains(&self, hour: u32) -> bool {
        (self.start_hour..self.end_hour).contains(&hour)
    }
}

/// Score cut-offs for risk tiers. All comparisons are strict (`score > cut-off`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskThresholds {
    /// Scores above this are fraud and at least `high`
    pub fraud: f64,
    pub critical: f64,
    pub medium: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            fraud: 0.6,
            critical: 0.8,
            medium: 0.4,
        }
    }
}

/// Scoring engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Entries kept per behavioral profile
    pub profile_capacity: usize,
    /// Edges kept per user transaction graph
    pub graph_edge_window: usize,
    /// Timestamps kept in the cross-user activity ring
    pub global_window_capacity: usize,
    /// Gap reported for a user's first transaction (seconds)
    pub first_transaction_gap_secs: f64,
    /// Rolling window for frequency counts (seconds)
    pub frequency_window_secs: i64,
    /// Offset applied to UTC timestamps before deriving hour and weekday
    pub utc_offset_minutes: i32,
    pub night_band: NightBand,
    pub business_hours: BusinessHours,
    pub weights: DetectorWeights,
    pub thresholds: RiskThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile_capacity: 50,
            graph_edge_window: 50,
            global_window_capacity: 1000,
            first_transaction_gap_secs: 86_400.0,
            frequency_window_secs: 3600,
            utc_offset_minutes: 0,
            night_band: NightBand::default(),
            business_hours: BusinessHours::default(),
            weights: DetectorWeights::default(),
            thresholds: RiskThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a JSON configuration file.
    ///
    /// Fields missing from the file keep their default values.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: EngineConfig = serde_json::from_str(&raw).map_err(|e| {
            EngineError::Configuration(format!("Malformed {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the scoring path assumes
    pub fn validate(&self) -> Result<()> {
        if self.profile_capacity == 0 {
            return Err(EngineError::Configuration(
                "profile_capacity must be positive".to_string(),
            ));
        }
        if self.graph_edge_window == 0 {
            return Err(EngineError::Configuration(
                "graph_edge_window must be positive".to_string(),
            ));
        }
        if self.global_window_capacity == 0 {
            return Err(EngineError::Configuration(
                "global_window_capacity must be positive".to_string(),
            ));
        }
        if self.frequency_window_secs <= 0 {
            return Err(EngineError::Configuration(
                "frequency_window_secs must be positive".to_string(),
            ));
        }
        if self.frequency_window_secs > MAX_FREQUENCY_WINDOW_SECS {
            return Err(EngineError::Configuration(format!(
                "frequency_window_secs must not exceed {}, got {}",
                MAX_FREQUENCY_WINDOW_SECS, self.frequency_window_secs
            )));
        }
        if !self.first_transaction_gap_secs.is_finite() || self.first_transaction_gap_secs < 0.0 {
            return Err(EngineError::Configuration(format!(
                "first_transaction_gap_secs must be a non-negative number, got {}",
                self.first_transaction_gap_secs
            )));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(EngineError::Configuration(format!(
                "utc_offset_minutes {} is outside one day",
                self.utc_offset_minutes
            )));
        }

        let bands = [
            ("night_band.after_hour", self.night_band.after_hour),
            ("night_band.before_hour", self.night_band.before_hour),
            ("business_hours.start_hour", self.business_hours.start_hour),
            ("business_hours.end_hour", self.business_hours.end_hour),
        ];
        for (name, hour) in bands {
            if hour > 24 {
                return Err(EngineError::Configuration(format!(
                    "{} must be within 0..=24, got {}",
                    name, hour
                )));
            }
        }
        if self.business_hours.start_hour >= self.business_hours.end_hour {
            return Err(EngineError::Configuration(
                "business_hours.start_hour must precede end_hour".to_string(),
            ));
        }

        for kind in DetectorKind::ALL {
            let weight = self.weights.get(kind);
            if !weight.is_finite() || weight < 0.0 {
                return Err(EngineError::Configuration(format!(
                    "Weight for {} must be a non-negative number, got {}",
                    kind, weight
                )));
            }
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::Configuration(format!(
                "Detector weights must sum to 1.0, got {}",
                sum
            )));
        }

        let t = &self.thresholds;
        for (name, value) in [("fraud", t.fraud), ("critical", t.critical), ("medium", t.medium)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Configuration(format!(
                    "Threshold {} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if !(t.medium < t.fraud && t.fraud < t.critical) {
            return Err(EngineError::Configuration(format!(
                "Thresholds must satisfy medium < fraud < critical, got {} / {} / {}",
                t.medium, t.fraud, t.critical
            )));
        }

        Ok(())
    }

    /// Rolling frequency window as a `Duration`
    pub fn frequency_window(&self) -> Result<Duration> {
        Duration::try_seconds(self.frequency_window_secs).ok_or_else(|| {
            EngineError::Configuration(format!(
                "frequency_window_secs {} is out of range",
                self.frequency_window_secs
            ))
        })
    }

    /// Export the effective configuration as JSON
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
