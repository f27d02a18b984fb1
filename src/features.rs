//! Feature extraction for the detector bank
//!
//! Turns a transaction plus the prior state of its user's profile into a fixed
//! feature vector. Extraction is a pure function of its inputs: the reference
//! time is the transaction's own timestamp, never the wall clock.

use crate::config::{EngineConfig, NightBand};
use crate::profile::{ProfileView, NEUTRAL_STABILITY};
use crate::Transaction;
use chrono::{Datelike, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

/// Amounts averaged for the ratio feature
pub const RATIO_LOOKBACK: usize = 10;

/// Prior entries needed before deviation checks apply
pub const MIN_HISTORY_FOR_DEVIATION: usize = 5;

/// Deviation (in sample standard deviations) that counts as unusual
pub const DEVIATION_SIGMAS: f64 = 2.0;

/// Features consumed by every detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub amount: f64,
    /// `ln(amount + 1)`
    pub amount_log: f64,
    /// 0..=23, local time
    pub hour_of_day: u32,
    /// 0..=6, Monday = 0
    pub day_of_week: u32,
    pub is_weekend: bool,
    pub is_night: bool,
    pub time_since_last_seconds: f64,
    pub amount_ratio_to_recent_avg: f64,
    /// The user's prior transactions inside the frequency window
    pub recent_frequency_count: usize,
    /// Every user's prior transactions inside the frequency window
    pub global_recent_count: usize,
    /// Hour far outside the user's usual hours
    pub hour_pattern_anomaly: bool,
    /// Amount far outside the user's usual amounts
    pub amount_pattern_anomaly: bool,
    /// How regular the user's hours and amounts are, 0.0..=1.0
    pub pattern_stability: f64,
}

impl Default for FeatureVector {
    /// A daytime weekday transaction with no history signal
    fn default() -> Self {
        Self {
            amount: 0.0,
            amount_log: 0.0,
            hour_of_day: 12,
            day_of_week: 0,
            is_weekend: false,
            is_night: false,
            time_since_last_seconds: 86_400.0,
            amount_ratio_to_recent_avg: 1.0,
            recent_frequency_count: 0,
            global_recent_count: 0,
            hour_pattern_anomaly: false,
            amount_pattern_anomaly: false,
            pattern_stability: NEUTRAL_STABILITY,
        }
    }
}

/// Feature extractor
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    night_band: NightBand,
    first_transaction_gap_secs: f64,
    offset: FixedOffset,
}

impl FeatureExtractor {
    pub fn new(
        night_band: NightBand,
        first_transaction_gap_secs: f64,
        offset: FixedOffset,
    ) -> Self {
        Self {
            night_band,
            first_transaction_gap_secs,
            offset,
        }
    }

    pub fn from_config(config: &EngineConfig, offset: FixedOffset) -> Self {
        Self::new(config.night_band, config.first_transaction_gap_secs, offset)
    }

    /// Extract features for `transaction` given the user's prior profile
    pub fn extract(
        &self,
        transaction: &Transaction,
        profile: &ProfileView,
        global_recent_count: usize,
    ) -> FeatureVector {
        let local = transaction.timestamp.with_timezone(&self.offset);
        let hour_of_day = local.hour();
        let day_of_week = local.weekday().num_days_from_monday();
        let amount = transaction.amount;

        let time_since_last_seconds = match profile.last_timestamp {
            Some(last) => {
                let gap = transaction.timestamp.signed_duration_since(last);
                (gap.num_milliseconds() as f64 / 1000.0).max(0.0)
            }
            None => self.first_transaction_gap_secs,
        };

        FeatureVector {
            amount,
            amount_log: (amount + 1.0).ln(),
            hour_of_day,
            day_of_week,
            is_weekend: day_of_week >= 5,
            is_night: self.night_band.contains(hour_of_day),
            time_since_last_seconds,
            amount_ratio_to_recent_avg: amount_ratio(amount, &profile.amounts),
            recent_frequency_count: profile.recent_count,
            global_recent_count,
            hour_pattern_anomaly: is_outlier(
                hour_of_day as f64,
                &profile.hours.iter().map(|h| *h as f64).collect::<Vec<_>>(),
            ),
            amount_pattern_anomaly: is_outlier(amount, &profile.amounts),
            pattern_stability: profile.pattern_stability,
        }
    }
}

/// `amount / mean(last <= 10 amounts)`, or 1.0 without a usable average
fn amount_ratio(amount: f64, history: &[f64]) -> f64 {
    let start = history.len().saturating_sub(RATIO_LOOKBACK);
    let recent = &history[start..];
    if recent.is_empty() {
        return 1.0;
    }
    let avg = recent.iter().sum::<f64>() / recent.len() as f64;
    if avg > 0.0 {
        amount / avg
    } else {
        1.0
    }
}

fn is_outlier(value: f64, history: &[f64]) -> bool {
    if history.len() < MIN_HISTORY_FOR_DEVIATION {
        return false;
    }
    let n = history.len() as f64;
    let mean = history.iter().sum::<f64>() / n;
    let variance = history.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (value - mean).abs() > DEVIATION_SIGMAS * variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TransactionStatus, TransactionType};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(
            NightBand::default(),
            86_400.0,
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    fn create_test_transaction(amount: f64, timestamp: DateTime<Utc>) -> Transaction {
        Transaction {
            transaction_id: "TXN-001".to_string(),
            user_id: "USER-001".to_string(),
            amount,
            transaction_type: TransactionType::Payment,
            recipient: None,
            timestamp,
            status: TransactionStatus::Pending,
        }
    }

    #[test]
    fn test_first_transaction_defaults() {
        // Monday midday
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 12, 30, 0).unwrap();
        let tx = create_test_transaction(100.0, ts);
        let features = extractor().extract(&tx, &ProfileView::default(), 0);

        assert_eq!(features.amount_ratio_to_recent_avg, 1.0);
        assert_eq!(features.time_since_last_seconds, 86_400.0);
        assert_eq!(features.hour_of_day, 12);
        assert_eq!(features.day_of_week, 0);
        assert!(!features.is_weekend);
        assert!(!features.is_night);
        assert_eq!(features.recent_frequency_count, 0);
        assert!((features.amount_log - 101.0_f64.ln()).abs() < 1e-12);
        assert_eq!(features.pattern_stability, NEUTRAL_STABILITY);
    }

    #[test]
    fn test_weekend_and_night() {
        // Saturday 23:15
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 23, 15, 0).unwrap();
        let tx = create_test_transaction(10.0, ts);
        let features = extractor().extract(&tx, &ProfileView::default(), 0);

        assert_eq!(features.day_of_week, 5);
        assert!(features.is_weekend);
        assert!(features.is_night);
    }

    #[test]
    fn test_ratio_uses_last_ten_amounts() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let mut amounts = vec![10_000.0; 5];
        amounts.extend(vec![100.0; 10]);
        let profile = ProfileView {
            hours: vec![12; amounts.len()],
            amounts,
            last_timestamp: Some(ts - Duration::seconds(90)),
            recent_count: 3,
            pattern_stability: 0.8,
        };

        let features = extractor().extract(&create_test_transaction(500.0, ts), &profile, 7);
        assert!((features.amount_ratio_to_recent_avg - 5.0).abs() < 1e-12);
        assert_eq!(features.time_since_last_seconds, 90.0);
        assert_eq!(features.recent_frequency_count, 3);
        assert_eq!(features.global_recent_count, 7);
        assert_eq!(features.pattern_stability, 0.8);
    }

    #[test]
    fn test_zero_average_ratio() {
        assert_eq!(amount_ratio(50.0, &[0.0, 0.0]), 1.0);
    }

    #[test]
    fn test_out_of_order_gap_clamps() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let profile = ProfileView {
            amounts: vec![10.0],
            hours: vec![12],
            last_timestamp: Some(ts + Duration::seconds(30)),
            recent_count: 1,
            ..Default::default()
        };
        let features = extractor().extract(&create_test_transaction(10.0, ts), &profile, 0);
        assert_eq!(features.time_since_last_seconds, 0.0);
    }

    #[test]
    fn test_pattern_anomalies() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 3, 0, 0).unwrap();
        let profile = ProfileView {
            amounts: vec![100.0, 110.0, 90.0, 105.0, 95.0],
            hours: vec![12, 13, 12, 14, 13],
            last_timestamp: Some(ts - Duration::hours(20)),
            recent_count: 0,
            ..Default::default()
        };

        let features = extractor().extract(&create_test_transaction(5_000.0, ts), &profile, 0);
        assert!(features.amount_pattern_anomaly);
        assert!(features.hour_pattern_anomaly);

        let usual = Utc.with_ymd_and_hms(2024, 3, 4, 13, 0, 0).unwrap();
        let features = extractor().extract(&create_test_transaction(100.0, usual), &profile, 0);
        assert!(!features.amount_pattern_anomaly);
        assert!(!features.hour_pattern_anomaly);
    }

    #[test]
    fn test_short_history_has_no_anomalies() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 3, 0, 0).unwrap();
        let profile = ProfileView {
            amounts: vec![100.0; 4],
            hours: vec![12; 4],
            last_timestamp: Some(ts - Duration::hours(20)),
            recent_count: 0,
            ..Default::default()
        };
        let features = extractor().extract(&create_test_transaction(9_000.0, ts), &profile, 0);
        assert!(!features.amount_pattern_anomaly);
        assert!(!features.hour_pattern_anomaly);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let profile = ProfileView {
            amounts: vec![50.0, 75.0],
            hours: vec![9, 10],
            last_timestamp: Some(ts - Duration::minutes(4)),
            recent_count: 2,
            ..Default::default()
        };
        let tx = create_test_transaction(250.0, ts);
        let first = extractor().extract(&tx, &profile, 3);
        assert_eq!(first, extractor().extract(&tx, &profile, 3));
    }
}
