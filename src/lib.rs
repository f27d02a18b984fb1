//! # Transaction Risk Engine
//!
//! Real-time, in-memory risk scoring for financial transactions.
//!
//! ## Features
//!
//! - **Behavioral Profiles**: Bounded per-user transaction windows
//! - **Ensemble Scoring**: Statistical, behavioral, network and temporal detectors
//!   combined with a fixed weight table
//! - **Network Analysis**: Per-user counterparty graphs with structural anomaly checks
//! - **Fault Isolation**: A failing detector degrades sensitivity instead of
//!   failing the transaction
//! - **Alerting**: Alerts raised into an injectable store whenever a transaction
//!   scores as fraud
//!
//! Scoring is deterministic: identical transactions against identical profile
//! state always produce identical results.

pub mod alerts;
pub mod config;
pub mod detectors;
pub mod ensemble;
pub mod features;
pub mod insights;
pub mod ledger;
pub mod network_analysis;
pub mod profile;

pub use alerts::{Alert, AlertSink, AlertStatus, AlertStore, InMemoryAlertStore};
pub use config::{BusinessHours, DetectorWeights, EngineConfig, NightBand, RiskThresholds};
pub use detectors::{Detector, DetectorBank, DetectorFault, DetectorKind};
pub use ensemble::{Ensemble, RiskLevel, RiskResult};
pub use features::{FeatureExtractor, FeatureVector};
pub use insights::UserInsights;
pub use ledger::{InMemoryLedger, ScoredTransaction, TransactionLedger};
pub use network_analysis::{GraphAnalyzer, GraphStats, StructuralFindings, SuspiciousPattern};
pub use profile::{BehavioralProfile, GlobalActivity, ProfileStore, ProfileView};

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Engine errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EngineError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Transaction type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Transfer,
    Payment,
    Withdrawal,
    Deposit,
    Investment,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Transfer => write!(f, "transfer"),
            TransactionType::Payment => write!(f, "payment"),
            TransactionType::Withdrawal => write!(f, "withdrawal"),
            TransactionType::Deposit => write!(f, "deposit"),
            TransactionType::Investment => write!(f, "investment"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Cleared,
    Flagged,
}

/// Transaction structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub transaction_id: String,
    pub user_id: String,
    pub amount: f64,
    pub transaction_type: TransactionType,
    /// Counterparty, when the transaction moves money to someone
    pub recipient: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
}

impl Transaction {
    /// New pending transaction stamped with the current time
    pub fn new(user_id: &str, amount: f64, transaction_type: TransactionType) -> Self {
        Self {
            transaction_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            amount,
            transaction_type,
            recipient: None,
            timestamp: Utc::now(),
            status: TransactionStatus::Pending,
        }
    }

    pub fn with_recipient(mut self, recipient: &str) -> Self {
        self.recipient = Some(recipient.to_string());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Reject input the engine must never score
    pub fn validate(&self) -> Result<()> {
        if self.transaction_id.trim().is_empty() {
            return Err(EngineError::InvalidTransaction(
                "transaction_id must not be empty".to_string(),
            ));
        }
        if self.user_id.trim().is_empty() {
            return Err(EngineError::InvalidTransaction(
                "user_id must not be empty".to_string(),
            ));
        }
        if !self.amount.is_finite() {
            return Err(EngineError::InvalidTransaction(format!(
                "Amount must be a finite number, got {}",
                self.amount
            )));
        }
        if self.amount < 0.0 {
            return Err(EngineError::InvalidTransaction(format!(
                "Amount must not be negative, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

/// Outcome of scoring one transaction
#[derive(Debug, Clone, Serialize)]
pub struct TransactionAnalysis {
    pub transaction_id: String,
    pub result: RiskResult,
    pub alert: Option<Alert>,
}

/// Ensemble fraud scoring engine
///
/// All methods take `&self`; share the engine across worker threads with an
/// `Arc`. Transactions for different users never wait on each other, while a
/// user's transactions are applied one at a time in arrival order.
pub struct FraudEngine {
    config: EngineConfig,
    profiles: ProfileStore,
    graphs: GraphAnalyzer,
    activity: GlobalActivity,
    frequency_window: Duration,
    extractor: FeatureExtractor,
    detectors: DetectorBank,
    ensemble: Ensemble,
    alerts: AlertSink,
    ledger: Arc<dyn TransactionLedger>,
}

impl FraudEngine {
    /// Create an engine with in-memory ledger and alert store
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_stores(
            config,
            Arc::new(InMemoryLedger::new()),
            Arc::new(InMemoryAlertStore::new()),
        )
    }

    /// Create an engine writing to the given ledger and alert store
    pub fn with_stores(
        config: EngineConfig,
        ledger: Arc<dyn TransactionLedger>,
        alert_store: Arc<dyn AlertStore>,
    ) -> Result<Self> {
        config.validate()?;

        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            EngineError::Configuration(format!(
                "Invalid utc_offset_minutes {}",
                config.utc_offset_minutes
            ))
        })?;
        let frequency_window = config.frequency_window()?;
        let ensemble = Ensemble::new(config.weights, config.thresholds)?;

        info!(
            statistical = config.weights.statistical,
            behavioral = config.weights.behavioral,
            network = config.weights.network,
            temporal = config.weights.temporal,
            fraud_threshold = config.thresholds.fraud,
            profile_capacity = config.profile_capacity,
            "Fraud engine initialized"
        );

        Ok(Self {
            profiles: ProfileStore::new(config.profile_capacity, frequency_window, offset),
            graphs: GraphAnalyzer::new(config.graph_edge_window),
            activity: GlobalActivity::new(config.global_window_capacity),
            frequency_window,
            extractor: FeatureExtractor::from_config(&config, offset),
            detectors: DetectorBank::from_config(&config),
            ensemble,
            alerts: AlertSink::new(alert_store),
            ledger,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Substitute a detector, e.g. a trained model honoring the same contract
    pub fn replace_detector(&mut self, detector: Box<dyn Detector>) {
        info!(detector = %detector.kind(), "Detector replaced");
        self.detectors.replace(detector);
    }

    /// Score a transaction, updating profile and graph state
    pub fn score_transaction(&self, transaction: &Transaction) -> Result<RiskResult> {
        self.analyze(transaction).map(|analysis| analysis.result)
    }

    /// Score a transaction and report any alert it raised
    pub fn analyze(&self, transaction: &Transaction) -> Result<TransactionAnalysis> {
        transaction.validate()?;

        let now = transaction.timestamp;
        let global_recent_count = self.activity.record(now, self.frequency_window);

        let (features, structure) = self.profiles.update(&transaction.user_id, |profile| {
            let view = self.profiles.view(profile, now);
            let structure = self.graphs.observe(&transaction.user_id, transaction);
            let features = self.extractor.extract(transaction, &view, global_recent_count);
            profile.push(transaction.into());
            (features, structure)
        });

        let outcome = self.detectors.run(&features, &structure);
        for fault in &outcome.faults {
            warn!(
                transaction_id = %transaction.transaction_id,
                detector = %fault.detector,
                "Detector fault absorbed: {}",
                fault.message
            );
        }

        let result = self.ensemble.combine(outcome, features, structure);
        debug!(
            transaction_id = %transaction.transaction_id,
            user_id = %transaction.user_id,
            risk_score = result.risk_score,
            risk_level = %result.risk_level,
            "Transaction scored"
        );

        self.ledger.append(ScoredTransaction {
            transaction: Arc::new(transaction.clone()),
            result: result.clone(),
        });

        let alert = self.alerts.maybe_alert(transaction, &result);
        if let Some(ref alert) = alert {
            warn!(
                alert_id = %alert.id,
                transaction_id = %transaction.transaction_id,
                user_id = %transaction.user_id,
                risk_level = %alert.risk_level,
                "Fraud alert raised: {}",
                result.reason()
            );
        }

        Ok(TransactionAnalysis {
            transaction_id: transaction.transaction_id.clone(),
            result,
            alert,
        })
    }

    /// Score multiple transactions in order
    pub fn score_batch(&self, transactions: &[Transaction]) -> Vec<Result<RiskResult>> {
        transactions
            .iter()
            .map(|tx| self.score_transaction(tx))
            .collect()
    }

    /// Most recent alerts, oldest first
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts.list_recent(limit)
    }

    /// Most recent transactions, oldest first
    pub fn recent_transactions(&self, limit: usize) -> Vec<Transaction> {
        self.ledger
            .recent(limit)
            .into_iter()
            .map(|entry| entry.transaction.as_ref().clone())
            .collect()
    }

    /// Most recent transactions with their analyses
    pub fn recent_scored(&self, limit: usize) -> Vec<ScoredTransaction> {
        self.ledger.recent(limit)
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.count()
    }

    pub fn transaction_count(&self) -> usize {
        self.ledger.len()
    }

    /// Read-only view of a user's profile as of `at`
    pub fn profile_snapshot(&self, user_id: &str, at: DateTime<Utc>) -> ProfileView {
        self.profiles.snapshot(user_id, at)
    }

    pub fn graph_stats(&self, user_id: &str) -> Option<GraphStats> {
        self.graphs.stats(user_id)
    }

    /// Activity and alert figures for `user_id` over the retained ledger
    pub fn user_insights(&self, user_id: &str) -> UserInsights {
        UserInsights::collect(user_id, self.ledger.as_ref(), self.alerts.store())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create_valid_transaction() -> Transaction {
        Transaction {
            transaction_id: "TXN-001".to_string(),
            user_id: "USER-001".to_string(),
            amount: 100.0,
            transaction_type: TransactionType::Transfer,
            recipient: Some("ACCT-6789".to_string()),
            // Monday midday
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap(),
            status: TransactionStatus::Pending,
        }
    }

    #[test]
    fn test_valid_transaction() {
        assert!(create_valid_transaction().validate().is_ok());
    }

    #[test]
    fn test_zero_amount_is_valid() {
        let mut transaction = create_valid_transaction();
        transaction.amount = 0.0;
        assert!(transaction.validate().is_ok());
    }

    #[test]
    fn test_invalid_amount() {
        let engine = FraudEngine::new(EngineConfig::default()).unwrap();
        let mut transaction = create_valid_transaction();
        transaction.amount = -100.0;

        let err = engine.score_transaction(&transaction).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransaction(_)));
        assert_eq!(engine.transaction_count(), 0);

        transaction.amount = f64::NAN;
        assert!(transaction.validate().is_err());
    }

    #[test]
    fn test_empty_user_rejected() {
        let engine = FraudEngine::new(EngineConfig::default()).unwrap();
        let mut transaction = create_valid_transaction();
        transaction.user_id = "  ".to_string();

        assert!(engine.score_transaction(&transaction).is_err());
        let view = engine.profile_snapshot("  ", transaction.timestamp);
        assert!(view.is_empty());
    }

    #[test]
    fn test_bad_config_fails_fast() {
        let config = EngineConfig {
            weights: DetectorWeights {
                network: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            FraudEngine::new(config),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_score_updates_state() {
        let engine = FraudEngine::new(EngineConfig::default()).unwrap();
        let transaction = create_valid_transaction();

        let analysis = engine.analyze(&transaction).unwrap();
        assert_eq!(analysis.transaction_id, "TXN-001");
        assert!(analysis.alert.is_none());

        let view = engine.profile_snapshot("USER-001", transaction.timestamp);
        assert_eq!(view.amounts, vec![100.0]);
        assert_eq!(engine.graph_stats("USER-001").unwrap().edge_count, 1);
        assert_eq!(engine.recent_transactions(5), vec![transaction]);
        assert_eq!(engine.recent_scored(5)[0].result, analysis.result);
    }

    #[test]
    fn test_batch_scoring() {
        let engine = FraudEngine::new(EngineConfig::default()).unwrap();
        let transactions = vec![
            create_valid_transaction(),
            {
                let mut tx = create_valid_transaction();
                tx.transaction_id = "TXN-002".to_string();
                tx.timestamp = tx.timestamp + Duration::hours(1);
                tx
            },
            {
                let mut tx = create_valid_transaction();
                tx.transaction_id = "TXN-003".to_string();
                tx.amount = -100.0;
                tx
            },
        ];

        let results = engine.score_batch(&transactions);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].is_err());
        assert_eq!(engine.transaction_count(), 2);
    }

    #[test]
    fn test_time_since_last_uses_prior_transaction() {
        let engine = FraudEngine::new(EngineConfig::default()).unwrap();
        let first = create_valid_transaction();
        let mut second = create_valid_transaction();
        second.transaction_id = "TXN-002".to_string();
        second.timestamp = first.timestamp + Duration::seconds(45);

        let first_result = engine.score_transaction(&first).unwrap();
        let second_result = engine.score_transaction(&second).unwrap();

        assert_eq!(first_result.features.time_since_last_seconds, 86_400.0);
        assert_eq!(second_result.features.time_since_last_seconds, 45.0);
        assert_eq!(second_result.features.recent_frequency_count, 1);
        assert_eq!(second_result.features.global_recent_count, 1);
        assert!(second_result
            .reasons
            .contains(&"Rapid succession of transactions".to_string()));
    }

    #[test]
    fn test_utc_offset_shifts_hour() {
        let config = EngineConfig {
            utc_offset_minutes: -5 * 60,
            ..Default::default()
        };
        let engine = FraudEngine::new(config).unwrap();
        // 03:00 UTC is 22:00 the previous day at UTC-5
        let mut transaction = create_valid_transaction();
        transaction.timestamp = Utc.with_ymd_and_hms(2024, 3, 5, 3, 0, 0).unwrap();

        let result = engine.score_transaction(&transaction).unwrap();
        assert_eq!(result.features.hour_of_day, 22);
        assert_eq!(result.features.day_of_week, 0);
        assert!(!result.features.is_night);
    }

    #[test]
    fn test_builder_helpers() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let transaction = Transaction::new("USER-9", 42.0, TransactionType::Payment)
            .with_recipient("SHOP-1")
            .at(ts);

        assert_eq!(transaction.recipient.as_deref(), Some("SHOP-1"));
        assert_eq!(transaction.timestamp, ts);
        assert_eq!(transaction.status, TransactionStatus::Pending);
        assert!(transaction.validate().is_ok());
    }

    #[test]
    fn test_json_export() {
        let engine = FraudEngine::new(EngineConfig::default()).unwrap();
        let result = engine.score_transaction(&create_valid_transaction()).unwrap();

        let json = result.to_json().unwrap();
        assert!(json.contains("per_detector_scores"));
        assert!(json.contains("Transaction appears normal"));
    }

    #[test]
    fn test_earliest_timestamp_scores() {
        let engine = FraudEngine::new(EngineConfig::default()).unwrap();
        let mut transaction = create_valid_transaction();
        transaction.timestamp = DateTime::<Utc>::MIN_UTC;

        let first = engine.score_transaction(&transaction).unwrap();
        let second = engine.score_transaction(&transaction).unwrap();
        assert!(first.risk_score.is_finite());
        assert_eq!(second.features.recent_frequency_count, 1);
    }

    #[test]
    fn test_user_insights() {
        let engine = FraudEngine::new(EngineConfig::default()).unwrap();
        let first = create_valid_transaction();
        let mut second = create_valid_transaction();
        second.transaction_id = "TXN-002".to_string();
        second.amount = 300.0;
        second.timestamp = first.timestamp + Duration::hours(2);
        let mut other = create_valid_transaction();
        other.user_id = "USER-002".to_string();
        engine.score_batch(&[first, second, other]);

        let insights = engine.user_insights("USER-001");
        assert_eq!(insights.transaction_count, 2);
        assert_eq!(insights.average_amount, 200.0);
        assert_eq!(insights.total_transactions, 3);
        assert_eq!(insights.total_active_alerts, engine.alert_count());
        assert_eq!(engine.user_insights("USER-404").transaction_count, 0);
    }
}
