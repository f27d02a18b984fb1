//! Transaction network analysis
//!
//! Keeps a small per-user graph of counterparties and flags structural
//! anomalies in the most recent transfers: repeated recipients, uniform
//! amounts and clockwork timing.

use crate::Transaction;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

const RECIPIENT_WINDOW: usize = 5;
const MIN_RECIPIENT_DIVERSITY: f64 = 0.6;
const AMOUNT_WINDOW: usize = 10;
const MIN_EDGES_FOR_UNIFORMITY: usize = 5;
/// Coefficient of variation below which amounts count as uniform
const UNIFORMITY_RATIO: f64 = 0.1;
const TIMING_WINDOW: usize = 10;
const MIN_EDGES_FOR_TIMING: usize = 3;
const TIMING_BUCKET_SECS: f64 = 10.0;

/// Structural anomaly types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SuspiciousPattern {
    /// Money repeatedly sent to the same few counterparties
    RepeatedRecipient,
    /// Amounts with almost no variation
    UniformAmounts,
    /// Transfers spaced at near-identical intervals
    RegularTiming,
}

impl SuspiciousPattern {
    pub fn description(&self) -> &'static str {
        match self {
            SuspiciousPattern::RepeatedRecipient => "Circular/repeated-recipient pattern detected",
            SuspiciousPattern::UniformAmounts => "Suspiciously uniform amounts",
            SuspiciousPattern::RegularTiming => "Suspiciously regular timing",
        }
    }
}

impl std::fmt::Display for SuspiciousPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Transfer from a user to a counterparty
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

/// Result of observing one transaction
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructuralFindings {
    pub patterns: Vec<SuspiciousPattern>,
    pub findings: Vec<String>,
    /// 0.0 with no findings, 0.5 with one, 0.8 with two or more
    pub structural_score: f64,
}

impl StructuralFindings {
    pub fn from_patterns(patterns: Vec<SuspiciousPattern>) -> Self {
        let structural_score = match patterns.len() {
            0 => 0.0,
            1 => 0.5,
            _ => 0.8,
        };
        Self {
            findings: patterns
                .iter()
                .map(|p| p.description().to_string())
                .collect(),
            patterns,
            structural_score,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn contains(&self, pattern: SuspiciousPattern) -> bool {
        self.patterns.contains(&pattern)
    }
}

/// One user's counterparty graph
#[derive(Debug, Clone)]
pub struct TransactionGraph {
    owner: String,
    nodes: BTreeSet<String>,
    edges: VecDeque<GraphEdge>,
    edge_window: usize,
}

impl TransactionGraph {
    pub fn new(owner: &str, edge_window: usize) -> Self {
        Self {
            owner: owner.to_string(),
            nodes: BTreeSet::new(),
            edges: VecDeque::with_capacity(edge_window),
            edge_window,
        }
    }

    /// Add a transfer, dropping the oldest edge past the window
    pub fn add_transfer(&mut self, to: &str, amount: f64, timestamp: DateTime<Utc>) {
        self.nodes.insert(to.to_string());
        if self.edges.len() >= self.edge_window {
            self.edges.pop_front();
        }
        self.edges.push_back(GraphEdge {
            from: self.owner.clone(),
            to: to.to_string(),
            amount,
            timestamp,
        });
    }

    fn recent_edges(&self, n: usize) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().skip(self.edges.len().saturating_sub(n))
    }

    /// Few distinct recipients across the last five transfers
    pub fn detect_repeated_recipients(&self) -> bool {
        if self.edges.len() < RECIPIENT_WINDOW {
            return false;
        }
        let recipients: Vec<&str> = self
            .recent_edges(RECIPIENT_WINDOW)
            .map(|e| e.to.as_str())
            .collect();
        let distinct: HashSet<&str> = recipients.iter().copied().collect();
        (distinct.len() as f64 / recipients.len() as f64) < MIN_RECIPIENT_DIVERSITY
    }

    /// Standard deviation of the last ten amounts under 10% of their mean
    pub fn detect_uniform_amounts(&self) -> bool {
        if self.edges.len() < MIN_EDGES_FOR_UNIFORMITY {
            return false;
        }
        let amounts: Vec<f64> = self
            .recent_edges(AMOUNT_WINDOW)
            .map(|e| e.amount)
            .collect();
        let n = amounts.len() as f64;
        let mean = amounts.iter().sum::<f64>() / n;
        if mean <= 0.0 {
            return false;
        }
        let std_dev = (amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n).sqrt();
        std_dev < UNIFORMITY_RATIO * mean
    }

    /// Intervals collapse into fewer than half as many 10-second buckets
    pub fn detect_regular_timing(&self) -> bool {
        if self.edges.len() < MIN_EDGES_FOR_TIMING {
            return false;
        }
        let timestamps: Vec<DateTime<Utc>> = self
            .recent_edges(TIMING_WINDOW)
            .map(|e| e.timestamp)
            .collect();
        let intervals: Vec<f64> = timestamps
            .windows(2)
            .map(|w| w[1].signed_duration_since(w[0]).num_milliseconds() as f64 / 1000.0)
            .collect();
        let buckets: HashSet<i64> = intervals
            .iter()
            .map(|secs| (secs / TIMING_BUCKET_SECS).round() as i64)
            .collect();
        buckets.len() * 2 < intervals.len()
    }

    /// Run every structural check over the current edges
    pub fn analyze(&self) -> StructuralFindings {
        let mut patterns = Vec::new();
        if self.detect_repeated_recipients() {
            patterns.push(SuspiciousPattern::RepeatedRecipient);
        }
        if self.detect_uniform_amounts() {
            patterns.push(SuspiciousPattern::UniformAmounts);
        }
        if self.detect_regular_timing() {
            patterns.push(SuspiciousPattern::RegularTiming);
        }
        StructuralFindings::from_patterns(patterns)
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            owner: self.owner.clone(),
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            total_amount: self.edges.iter().map(|e| e.amount).sum(),
        }
    }

    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter()
    }

    pub fn contains_node(&self, counterparty: &str) -> bool {
        self.nodes.contains(counterparty)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphStats {
    pub owner: String,
    pub node_count: usize,
    pub edge_count: usize,
    /// Sum over the retained edges only
    pub total_amount: f64,
}

/// Keyed per-user graphs
pub struct GraphAnalyzer {
    graphs: DashMap<String, Arc<Mutex<TransactionGraph>>>,
    edge_window: usize,
}

impl GraphAnalyzer {
    pub fn new(edge_window: usize) -> Self {
        Self {
            graphs: DashMap::new(),
            edge_window,
        }
    }

    fn slot(&self, user_id: &str) -> Arc<Mutex<TransactionGraph>> {
        if let Some(slot) = self.graphs.get(user_id) {
            return Arc::clone(slot.value());
        }
        let slot = self
            .graphs
            .entry(user_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TransactionGraph::new(user_id, self.edge_window)))
            });
        Arc::clone(slot.value())
    }

    /// Record the transaction's transfer and analyze the user's graph.
    ///
    /// Transactions without a recipient leave the graph untouched.
    pub fn observe(&self, user_id: &str, transaction: &Transaction) -> StructuralFindings {
        let recipient = match transaction.recipient.as_deref() {
            Some(r) if !r.is_empty() => r,
            _ => return StructuralFindings::default(),
        };
        let slot = self.slot(user_id);
        let mut graph = slot.lock();
        graph.add_transfer(recipient, transaction.amount, transaction.timestamp);
        graph.analyze()
    }

    pub fn stats(&self, user_id: &str) -> Option<GraphStats> {
        let slot = Arc::clone(self.graphs.get(user_id)?.value());
        let stats = slot.lock().stats();
        Some(stats)
    }

    pub fn user_count(&self) -> usize {
        self.graphs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TransactionStatus, TransactionType};
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    fn create_test_transaction(
        recipient: &str,
        amount: f64,
        timestamp: DateTime<Utc>,
    ) -> Transaction {
        Transaction {
            transaction_id: format!("TXN-{}-{}", recipient, timestamp.timestamp()),
            user_id: "USER-001".to_string(),
            amount,
            transaction_type: TransactionType::Transfer,
            recipient: Some(recipient.to_string()),
            timestamp,
            status: TransactionStatus::Pending,
        }
    }

    #[test]
    fn test_add_transfer() {
        let mut graph = TransactionGraph::new("A", 50);
        graph.add_transfer("B", 1000.0, base_time());
        graph.add_transfer("C", 2000.0, base_time());
        graph.add_transfer("B", 500.0, base_time());

        let stats = graph.stats();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edge_count, 3);
        assert_eq!(stats.total_amount, 3500.0);
        assert!(graph.edges().all(|e| graph.contains_node(&e.to)));
    }

    #[test]
    fn test_edge_window_bound() {
        let mut graph = TransactionGraph::new("A", 5);
        for i in 0..8 {
            graph.add_transfer(&format!("R{}", i), 10.0, base_time() + Duration::seconds(i));
        }
        assert_eq!(graph.stats().edge_count, 5);
        assert_eq!(graph.stats().node_count, 8);
        assert_eq!(graph.edges().next().unwrap().to, "R3");
    }

    #[test]
    fn test_repeated_recipient_detection() {
        let mut graph = TransactionGraph::new("A", 50);
        let amounts = [120.0, 900.0, 40.0, 3000.0, 75.0];
        let gaps = [0, 45, 400, 1300, 3000];
        for (i, (amount, gap)) in amounts.iter().zip(gaps).enumerate() {
            let to = if i % 2 == 0 { "MULE" } else { "OTHER" };
            graph.add_transfer(to, *amount, base_time() + Duration::seconds(gap));
        }

        let findings = graph.analyze();
        assert!(findings.contains(SuspiciousPattern::RepeatedRecipient));
        assert!(!findings.contains(SuspiciousPattern::UniformAmounts));
        assert_eq!(findings.structural_score, 0.5);
    }

    #[test]
    fn test_repeated_recipient_needs_five_edges() {
        let mut graph = TransactionGraph::new("A", 50);
        for gap in [0, 100, 700, 2000] {
            let at = base_time() + Duration::seconds(gap);
            graph.add_transfer("MULE", 10.0 + gap as f64, at);
        }
        assert!(!graph.detect_repeated_recipients());
    }

    #[test]
    fn test_uniform_amounts_detection() {
        let mut graph = TransactionGraph::new("A", 50);
        let gaps = [0, 37, 400, 1250, 3100, 7000];
        for (i, gap) in gaps.iter().enumerate() {
            let at = base_time() + Duration::seconds(*gap);
            graph.add_transfer(&format!("R{}", i), 1000.0 + i as f64, at);
        }

        let findings = graph.analyze();
        assert_eq!(findings.patterns, vec![SuspiciousPattern::UniformAmounts]);
        assert_eq!(
            findings.findings,
            vec!["Suspiciously uniform amounts".to_string()]
        );
    }

    #[test]
    fn test_regular_timing_detection() {
        let mut graph = TransactionGraph::new("A", 50);
        let amounts = [10.0, 500.0, 2500.0, 80.0];
        for (i, amount) in amounts.iter().enumerate() {
            let at = base_time() + Duration::seconds(120 * i as i64);
            graph.add_transfer(&format!("R{}", i), *amount, at);
        }
        assert!(graph.detect_regular_timing());

        let mut irregular = TransactionGraph::new("B", 50);
        for (i, gap) in [0, 30, 400, 2000].iter().enumerate() {
            let at = base_time() + Duration::seconds(*gap);
            irregular.add_transfer(&format!("R{}", i), 10.0, at);
        }
        assert!(!irregular.detect_regular_timing());
    }

    #[test]
    fn test_multiple_findings_score() {
        let mut graph = TransactionGraph::new("A", 50);
        for i in 0..5 {
            graph.add_transfer("SAME", 250.0, base_time() + Duration::seconds(60 * i));
        }

        let findings = graph.analyze();
        assert_eq!(findings.patterns.len(), 3);
        assert_eq!(findings.structural_score, 0.8);
    }

    #[test]
    fn test_analyzer_ignores_missing_recipient() {
        let analyzer = GraphAnalyzer::new(50);
        let mut tx = create_test_transaction("B", 100.0, base_time());
        tx.recipient = None;

        let findings = analyzer.observe("USER-001", &tx);
        assert!(findings.is_empty());
        assert_eq!(findings.structural_score, 0.0);
        assert!(analyzer.stats("USER-001").is_none());
    }

    #[test]
    fn test_analyzer_keeps_users_separate() {
        let analyzer = GraphAnalyzer::new(50);
        for i in 0..5 {
            let at = base_time() + Duration::seconds(60 * i);
            let tx = create_test_transaction("SAME", 250.0, at);
            analyzer.observe("USER-001", &tx);
        }
        let other = create_test_transaction("SAME", 250.0, base_time());
        let findings = analyzer.observe("USER-002", &other);

        assert!(findings.is_empty());
        assert_eq!(analyzer.stats("USER-001").unwrap().edge_count, 5);
        assert_eq!(analyzer.stats("USER-002").unwrap().edge_count, 1);
        assert_eq!(analyzer.user_count(), 2);
    }
}
