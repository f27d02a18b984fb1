//! Per-user behavioral profiles
//!
//! Each user owns a fixed-capacity window of recent transactions. Profiles are
//! sharded in a `DashMap`; the map only hands out the per-user slot, and the
//! slot's mutex serializes every read-modify-write for that user.

use crate::{Transaction, TransactionType};
use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Stability reported while a window is too short to measure
pub const NEUTRAL_STABILITY: f64 = 0.5;

/// Entries a window needs beyond this count before stability is measured
const MIN_ENTRIES_FOR_STABILITY: usize = 3;

/// One recorded transaction in a profile window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProfileEntry {
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    pub transaction_type: TransactionType,
}

impl From<&Transaction> for ProfileEntry {
    fn from(transaction: &Transaction) -> Self {
        Self {
            timestamp: transaction.timestamp,
            amount: transaction.amount,
            transaction_type: transaction.transaction_type,
        }
    }
}

/// Bounded, chronologically ordered history of one user's transactions
#[derive(Debug, Clone)]
pub struct BehavioralProfile {
    capacity: usize,
    entries: VecDeque<ProfileEntry>,
    total_recorded: u64,
}

impl BehavioralProfile {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            total_recorded: 0,
        }
    }

    /// Append an entry, returning the evicted oldest entry once full
    pub fn push(&mut self, entry: ProfileEntry) -> Option<ProfileEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        self.total_recorded += 1;
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Transactions ever recorded, including evicted ones
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    /// Entries oldest first
    pub fn entries(&self) -> impl Iterator<Item = &ProfileEntry> {
        self.entries.iter()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.back().map(|e| e.timestamp)
    }

    /// Regularity of the window's hours and amounts, in `[0, 1]`.
    ///
    /// Each series scores `1 - min(cv, 1)` where `cv` is its coefficient of
    /// variation (sample stdev over mean, 0 when the mean is not positive).
    /// Windows with three or fewer entries score [`NEUTRAL_STABILITY`].
    pub fn pattern_stability(&self, offset: FixedOffset) -> f64 {
        if self.entries.len() <= MIN_ENTRIES_FOR_STABILITY {
            return NEUTRAL_STABILITY;
        }
        let hours: Vec<f64> = self
            .entries
            .iter()
            .map(|e| e.timestamp.with_timezone(&offset).hour() as f64)
            .collect();
        let amounts: Vec<f64> = self.entries.iter().map(|e| e.amount).collect();
        (series_stability(&hours) + series_stability(&amounts)) / 2.0
    }

    /// Read-only summary relative to `now`
    pub fn view(&self, now: DateTime<Utc>, window: Duration, offset: FixedOffset) -> ProfileView {
        let window_start = now.checked_sub_signed(window);
        ProfileView {
            amounts: self.entries.iter().map(|e| e.amount).collect(),
            hours: self
                .entries
                .iter()
                .map(|e| e.timestamp.with_timezone(&offset).hour())
                .collect(),
            last_timestamp: self.last_timestamp(),
            recent_count: self
                .entries
                .iter()
                .filter(|e| in_window(e.timestamp, window_start))
                .count(),
            pattern_stability: self.pattern_stability(offset),
        }
    }
}

/// Snapshot of a profile handed to feature extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileView {
    /// Amounts oldest first
    pub amounts: Vec<f64>,
    /// Local hours of day, oldest first
    pub hours: Vec<u32>,
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Entries inside the rolling frequency window
    pub recent_count: usize,
    /// See [`BehavioralProfile::pattern_stability`]
    pub pattern_stability: f64,
}

impl Default for ProfileView {
    fn default() -> Self {
        Self {
            amounts: Vec::new(),
            hours: Vec::new(),
            last_timestamp: None,
            recent_count: 0,
            pattern_stability: NEUTRAL_STABILITY,
        }
    }
}

impl ProfileView {
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }
}

/// `timestamp > start`; an unrepresentable start admits everything
fn in_window(timestamp: DateTime<Utc>, start: Option<DateTime<Utc>>) -> bool {
    start.map_or(true, |start| timestamp > start)
}

fn series_stability(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let cv = if mean > 0.0 {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt() / mean
    } else {
        0.0
    };
    1.0 - cv.min(1.0)
}

type ProfileSlot = Arc<Mutex<BehavioralProfile>>;

/// Keyed store of behavioral profiles
pub struct ProfileStore {
    profiles: DashMap<String, ProfileSlot>,
    capacity: usize,
    frequency_window: Duration,
    offset: FixedOffset,
}

impl ProfileStore {
    pub fn new(capacity: usize, frequency_window: Duration, offset: FixedOffset) -> Self {
        Self {
            profiles: DashMap::new(),
            capacity,
            frequency_window,
            offset,
        }
    }

    fn slot(&self, user_id: &str) -> ProfileSlot {
        if let Some(slot) = self.profiles.get(user_id) {
            return Arc::clone(slot.value());
        }
        // Clone the slot out so the shard lock is released before the user lock is taken.
        let slot = self
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BehavioralProfile::new(self.capacity))));
        Arc::clone(slot.value())
    }

    /// Run `f` with exclusive access to the user's profile, creating it if needed.
    ///
    /// Calls for the same user are serialized; different users never contend.
    pub fn update<R>(&self, user_id: &str, f: impl FnOnce(&mut BehavioralProfile) -> R) -> R {
        let slot = self.slot(user_id);
        let mut profile = slot.lock();
        f(&mut *profile)
    }

    /// Append a transaction to the user's window
    pub fn record(&self, user_id: &str, transaction: &Transaction) -> Option<ProfileEntry> {
        self.update(user_id, |profile| {
            profile.push(ProfileEntry::from(transaction))
        })
    }

    /// View of `profile` using this store's window and offset
    pub fn view(&self, profile: &BehavioralProfile, now: DateTime<Utc>) -> ProfileView {
        profile.view(now, self.frequency_window, self.offset)
    }

    /// Current view of a user's profile; unknown users get an empty view
    pub fn snapshot(&self, user_id: &str, now: DateTime<Utc>) -> ProfileView {
        let slot = match self.profiles.get(user_id) {
            Some(slot) => Arc::clone(slot.value()),
            None => return ProfileView::default(),
        };
        let profile = slot.lock();
        self.view(&profile, now)
    }

    pub fn user_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.profiles.contains_key(user_id)
    }
}

/// Cross-user ring of recent transaction timestamps
pub struct GlobalActivity {
    timestamps: Mutex<VecDeque<DateTime<Utc>>>,
    capacity: usize,
}

impl GlobalActivity {
    pub fn new(capacity: usize) -> Self {
        Self {
            timestamps: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Count entries inside `window` before `now`, then record `now`.
    pub fn record(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let mut timestamps = self.timestamps.lock();
        let window_start = now.checked_sub_signed(window);
        let recent = timestamps
            .iter()
            .filter(|t| in_window(**t, window_start))
            .count();
        if timestamps.len() >= self.capacity {
            timestamps.pop_front();
        }
        timestamps.push_back(now);
        recent
    }

    pub fn count_since(&self, since: DateTime<Utc>) -> usize {
        self.timestamps
            .lock()
            .iter()
            .filter(|t| **t > since)
            .count()
    }

    pub fn len(&self) -> usize {
        self.timestamps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.lock().is_empty()
    }
}
