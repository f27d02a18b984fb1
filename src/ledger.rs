//! Transaction ledger collaborator
//!
//! The engine appends every scored transaction together with its result; the
//! ledger itself belongs to the host application and is injected.

use crate::ensemble::RiskResult;
use crate::Transaction;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// A transaction and the analysis attached to it
#[derive(Debug, Clone, Serialize)]
pub struct ScoredTransaction {
    pub transaction: Arc<Transaction>,
    pub result: RiskResult,
}

/// Append-only transaction storage
pub trait TransactionLedger: Send + Sync {
    fn append(&self, entry: ScoredTransaction);

    /// Last `limit` entries, oldest first
    fn recent(&self, limit: usize) -> Vec<ScoredTransaction>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every retained entry, oldest first
    fn for_each(&self, f: &mut dyn FnMut(&ScoredTransaction)) {
        for entry in self.recent(self.len()) {
            f(&entry);
        }
    }
}

/// Ledger kept in process memory
///
/// Unbounded unless built with [`InMemoryLedger::with_capacity`]; hosts that
/// need durable or pruned history should inject their own ledger.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: RwLock<VecDeque<ScoredTransaction>>,
    capacity: Option<usize>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` entries, dropping the oldest first
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: Some(capacity),
        }
    }
}

impl TransactionLedger for InMemoryLedger {
    fn append(&self, entry: ScoredTransaction) {
        let mut entries = self.entries.write();
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                return;
            }
            while entries.len() >= capacity {
                entries.pop_front();
            }
        }
        entries.push_back(entry);
    }

    fn recent(&self, limit: usize) -> Vec<ScoredTransaction> {
        let entries = self.entries.read();
        let start = entries.len().saturating_sub(limit);
        entries.range(start..).cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn for_each(&self, f: &mut dyn FnMut(&ScoredTransaction)) {
        for entry in self.entries.read().iter() {
            f(entry);
        }
    }
}
