//! Fraud alerts
//!
//! Alerts are appended to an injected [`AlertStore`]; the engine never keeps a
//! process-wide list of its own.

use crate::ensemble::{RiskLevel, RiskResult};
use crate::Transaction;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Resolved,
}

/// Alert raised for a transaction scored as fraud
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub transaction_id: String,
    pub user_id: String,
    pub reasons: Vec<String>,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub created_at: DateTime<Utc>,
    pub status: AlertStatus,
}

impl Alert {
    pub fn new(transaction: &Transaction, result: &RiskResult) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            transaction_id: transaction.transaction_id.clone(),
            user_id: transaction.user_id.clone(),
            reasons: result.reasons.clone(),
            risk_level: result.risk_level,
            risk_score: result.risk_score,
            created_at: Utc::now(),
            status: AlertStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// Append-only alert storage
pub trait AlertStore: Send + Sync {
    fn append(&self, alert: Alert);

    /// Last `limit` alerts, oldest first
    fn recent(&self, limit: usize) -> Vec<Alert>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every retained alert, oldest first
    fn for_each(&self, f: &mut dyn FnMut(&Alert)) {
        for alert in self.recent(self.len()) {
            f(&alert);
        }
    }
}

/// Alert store kept in process memory
///
/// Unbounded unless built with [`InMemoryAlertStore::with_capacity`].
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<VecDeque<Alert>>,
    capacity: Option<usize>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` alerts, dropping the oldest first
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            alerts: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: Some(capacity),
        }
    }
}

impl AlertStore for InMemoryAlertStore {
    fn append(&self, alert: Alert) {
        let mut alerts = self.alerts.write();
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                return;
            }
            while alerts.len() >= capacity {
                alerts.pop_front();
            }
        }
        alerts.push_back(alert);
    }

    fn recent(&self, limit: usize) -> Vec<Alert> {
        let alerts = self.alerts.read();
        let start = alerts.len().saturating_sub(limit);
        alerts.range(start..).cloned().collect()
    }

    fn len(&self) -> usize {
        self.alerts.read().len()
    }

    fn for_each(&self, f: &mut dyn FnMut(&Alert)) {
        for alert in self.alerts.read().iter() {
            f(alert);
        }
    }
}

/// Raises alerts for fraudulent results
#[derive(Clone)]
pub struct AlertSink {
    store: Arc<dyn AlertStore>,
}

impl AlertSink {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }

    /// Store and return an alert iff `result.is_fraud`
    pub fn maybe_alert(&self, transaction: &Transaction, result: &RiskResult) -> Option<Alert> {
        if !result.is_fraud {
            return None;
        }
        let alert = Alert::new(transaction, result);
        self.store.append(alert.clone());
        Some(alert)
    }

    pub fn list_recent(&self, limit: usize) -> Vec<Alert> {
        self.store.recent(limit)
    }

    pub fn count(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &dyn AlertStore {
        self.store.as_ref()
    }
}

impl Default for AlertSink {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryAlertStore::new()))
    }
}
