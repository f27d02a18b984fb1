//! Aggregate statistics over the ledger and alert store
//!
//! Figures cover whatever the injected stores currently retain.

use crate::alerts::AlertStore;
use crate::ledger::TransactionLedger;
use serde::{Deserialize, Serialize};

/// Per-user activity alongside engine-wide alert figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInsights {
    pub user_id: String,
    /// The user's retained transactions
    pub transaction_count: usize,
    /// Mean amount of the user's transactions, 0.0 without any
    pub average_amount: f64,
    /// Active alerts raised for this user
    pub user_active_alerts: usize,
    pub total_transactions: usize,
    /// Active alerts across every user
    pub total_active_alerts: usize,
    /// `total_active_alerts / max(1, total_transactions)`
    pub fraud_rate: f64,
}

impl UserInsights {
    /// Walk both stores once and aggregate for `user_id`
    pub fn collect(user_id: &str, ledger: &dyn TransactionLedger, alerts: &dyn AlertStore) -> Self {
        let mut transaction_count = 0usize;
        let mut total_transactions = 0usize;
        let mut amount_sum = 0.0;
        ledger.for_each(&mut |entry| {
            total_transactions += 1;
            if entry.transaction.user_id == user_id {
                transaction_count += 1;
                amount_sum += entry.transaction.amount;
            }
        });

        let mut user_active_alerts = 0usize;
        let mut total_active_alerts = 0usize;
        alerts.for_each(&mut |alert| {
            if alert.is_active() {
                total_active_alerts += 1;
                if alert.user_id == user_id {
                    user_active_alerts += 1;
                }
            }
        });

        let average_amount = if transaction_count > 0 {
            amount_sum / transaction_count as f64
        } else {
            0.0
        };

        Self {
            user_id: user_id.to_string(),
            transaction_count,
            average_amount,
            user_active_alerts,
            total_transactions,
            total_active_alerts,
            fraud_rate: total_active_alerts as f64 / total_transactions.max(1) as f64,
        }
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Alert, AlertStatus, InMemoryAlertStore};
    use crate::detectors::BankOutcome;
    use crate::ensemble::Ensemble;
    use crate::features::FeatureVector;
    use crate::ledger::{InMemoryLedger, ScoredTransaction};
    use crate::network_analysis::StructuralFindings;
    use crate::{Transaction, TransactionType};
    use std::sync::Arc;

    fn scored(user_id: &str, amount: f64) -> ScoredTransaction {
        ScoredTransaction {
            transaction: Arc::new(Transaction::new(user_id, amount, TransactionType::Payment)),
            result: Ensemble::default().combine(
                BankOutcome::default(),
                FeatureVector::default(),
                StructuralFindings::default(),
            ),
        }
    }

    #[test]
    fn test_empty_stores() {
        let ledger = InMemoryLedger::new();
        let alerts = InMemoryAlertStore::new();
        let insights = UserInsights::collect("USER-001", &ledger, &alerts);

        assert_eq!(insights.transaction_count, 0);
        assert_eq!(insights.average_amount, 0.0);
        assert_eq!(insights.fraud_rate, 0.0);
    }

    #[test]
    fn test_user_and_global_figures() {
        let ledger = InMemoryLedger::new();
        let alerts = InMemoryAlertStore::new();
        for amount in [100.0, 300.0] {
            ledger.append(scored("USER-001", amount));
        }
        for _ in 0..2 {
            ledger.append(scored("USER-002", 50.0));
        }

        let flagged = scored("USER-002", 50.0);
        alerts.append(Alert::new(&flagged.transaction, &flagged.result));
        let mut resolved = Alert::new(&flagged.transaction, &flagged.result);
        resolved.status = AlertStatus::Resolved;
        alerts.append(resolved);

        let insights = UserInsights::collect("USER-001", &ledger, &alerts);
        assert_eq!(insights.transaction_count, 2);
        assert_eq!(insights.average_amount, 200.0);
        assert_eq!(insights.user_active_alerts, 0);
        assert_eq!(insights.total_transactions, 4);
        assert_eq!(insights.total_active_alerts, 1);
        assert_eq!(insights.fraud_rate, 0.25);

        let other = UserInsights::collect("USER-002", &ledger, &alerts);
        assert_eq!(other.user_active_alerts, 1);
        assert!(other.to_json().unwrap().contains("\"fraud_rate\": 0.25"));
    }
}
