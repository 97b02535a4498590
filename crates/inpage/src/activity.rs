//! Bounded, newest-first list of recently intercepted transactions.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::classifier::TransactionDescriptor;
use crate::verification::{RiskLevel, VerificationRecord};

pub const RECENT_ACTIVITY_LIMIT: usize = 10;

/// Width of the time bucket used for de-duplication.
pub const ACTIVITY_BUCKET: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActivityKey {
    pub from: Option<String>,
    pub to: Option<String>,
    pub data_prefix: Option<String>,
    pub bucket: u64,
}

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub key: ActivityKey,
    pub descriptor: TransactionDescriptor,
    pub verification: Option<VerificationRecord>,
    pub risk: Option<RiskLevel>,
}

pub struct RecentActivity {
    limit: usize,
    bucket: Duration,
    epoch: Instant,
    entries: Mutex<VecDeque<ActivityEntry>>,
}

impl Default for RecentActivity {
    fn default() -> Self {
        Self::new(RECENT_ACTIVITY_LIMIT, ACTIVITY_BUCKET)
    }
}

impl RecentActivity {
    pub fn new(limit: usize, bucket: Duration) -> Self {
        Self {
            limit: limit.max(1),
            bucket,
            epoch: Instant::now(),
            entries: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    /// Prepends `descriptor` unless an entry with the same key is present.
    /// Returns the key on insertion.
    pub fn record(&self, descriptor: &TransactionDescriptor) -> Option<ActivityKey> {
        let key = self.key_for(descriptor);
        let mut entries = self.lock();
        if entries.iter().any(|entry| entry.key == key) {
            return None;
        }
        entries.push_front(ActivityEntry {
            key: key.clone(),
            descriptor: descriptor.clone(),
            verification: None,
            risk: None,
        });
        entries.truncate(self.limit);
        Some(key)
    }

    /// Attaches a verification result to an entry that is still listed.
    pub fn attach_verification(&self, key: &ActivityKey, record: &VerificationRecord) -> bool {
        self.update(key, |entry| entry.verification = Some(record.clone()))
    }

    pub fn attach_risk(&self, key: &ActivityKey, level: RiskLevel) -> bool {
        self.update(key, |entry| entry.risk = Some(level))
    }

    pub fn snapshot(&self) -> Vec<ActivityEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn update(&self, key: &ActivityKey, apply: impl FnOnce(&mut ActivityEntry)) -> bool {
        match self.lock().iter_mut().find(|entry| &entry.key == key) {
            Some(entry) => {
                apply(entry);
                true
            }
            None => false,
        }
    }

    fn key_for(&self, descriptor: &TransactionDescriptor) -> ActivityKey {
        let bucket_ms = self.bucket.as_millis().max(1);
        ActivityKey {
            from: descriptor.from.clone(),
            to: descriptor.to.clone(),
            data_prefix: descriptor.data_prefix.clone(),
            bucket: (self.epoch.elapsed().as_millis() / bucket_ms) as u64,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ActivityEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
