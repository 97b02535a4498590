//! Verification cache with in-flight de-duplication.
//!
//! Per address the cache is either unrequested, pending (one lookup in
//! flight), or holds a record stamped with its fetch time. The first caller
//! for an address becomes the leader and runs the lookup; callers arriving
//! while it is pending subscribe to the leader's result. The pending marker
//! is inserted before the leader's first await and removed when the leader
//! finishes or is dropped, so an abandoned lookup never wedges the address.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use aegis_common::TrackedAddress;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::ContractLookup;
use super::record::{Network, VerificationRecord};

pub const DEFAULT_VERIFICATION_FRESHNESS: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Unrequested,
    Pending,
    Fresh,
    Stale,
}

type PendingResult = watch::Receiver<Option<VerificationRecord>>;

#[derive(Default)]
struct CacheState {
    entries: FxHashMap<TrackedAddress, VerificationRecord>,
    pending: FxHashMap<TrackedAddress, PendingResult>,
}

enum Step {
    Hit(VerificationRecord),
    Follow(PendingResult),
    Lead(watch::Sender<Option<VerificationRecord>>),
}

pub struct VerificationCache {
    lookup: Arc<dyn ContractLookup>,
    freshness: Duration,
    state: Mutex<CacheState>,
    lookups: AtomicU64,
}

impl VerificationCache {
    pub fn new(lookup: Arc<dyn ContractLookup>) -> Self {
        Self::with_freshness(lookup, DEFAULT_VERIFICATION_FRESHNESS)
    }

    pub fn with_freshness(lookup: Arc<dyn ContractLookup>, freshness: Duration) -> Self {
        Self {
            lookup,
            freshness,
            state: Mutex::new(CacheState::default()),
            lookups: AtomicU64::new(0),
        }
    }

    /// Returns the record for `address`, looking it up at most once per
    /// freshness window. Never fails: lookup errors become unverified records.
    pub async fn verify(&self, address: TrackedAddress) -> VerificationRecord {
        loop {
            let step = self.next_step(address);
            match step {
                Step::Hit(record) => return record,
                Step::Follow(mut pending) => {
                    let settled = pending
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|result| result.clone());
                    match settled {
                        Some(record) => return record,
                        // The leader was dropped mid-lookup; try again.
                        None => continue,
                    }
                }
                Step::Lead(result) => return self.lead(address, result).await,
            }
        }
    }

    pub fn status(&self, address: TrackedAddress) -> CacheStatus {
        let state = self.lock();
        if state.pending.contains_key(&address) {
            return CacheStatus::Pending;
        }
        match state.entries.get(&address) {
            Some(record) if self.is_fresh(record) => CacheStatus::Fresh,
            Some(_) => CacheStatus::Stale,
            None => CacheStatus::Unrequested,
        }
    }

    /// Fresh cached record, without triggering a lookup.
    pub fn peek(&self, address: TrackedAddress) -> Option<VerificationRecord> {
        self.lock()
            .entries
            .get(&address)
            .filter(|record| self.is_fresh(record))
            .cloned()
    }

    /// Number of outbound lookups started so far.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn next_step(&self, address: TrackedAddress) -> Step {
        let mut state = self.lock();
        if let Some(record) = state.entries.get(&address) {
            if self.is_fresh(record) {
                return Step::Hit(record.clone());
            }
            state.entries.remove(&address);
        }
        if let Some(pending) = state.pending.get(&address) {
            return Step::Follow(pending.clone());
        }
        let (sender, receiver) = watch::channel(None);
        state.pending.insert(address, receiver);
        Step::Lead(sender)
    }

    async fn lead(
        &self,
        address: TrackedAddress,
        result: watch::Sender<Option<VerificationRecord>>,
    ) -> VerificationRecord {
        let mut guard = PendingGuard {
            state: &self.state,
            address,
            armed: true,
        };
        self.lookups.fetch_add(1, Ordering::Relaxed);
        debug!(%address, "starting contract verification lookup");

        let mut record = match self.lookup.lookup(address).await {
            Ok(record) => record,
            Err(err) => {
                warn!(%address, %err, "contract verification lookup failed");
                VerificationRecord::unverified(address, Network::Unknown)
            }
        };
        record.fetched_at = Instant::now();

        {
            let mut state = self.lock();
            state.entries.insert(address, record.clone());
            state.pending.remove(&address);
            guard.armed = false;
        }
        let _ = result.send(Some(record.clone()));
        debug!(%address, verified = record.is_verified, network = %record.network, "contract verification cached");
        record
    }

    fn is_fresh(&self, record: &VerificationRecord) -> bool {
        record.fetched_at.elapsed() < self.freshness
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        lock_state(&self.state)
    }
}

struct PendingGuard<'a> {
    state: &'a Mutex<CacheState>,
    address: TrackedAddress,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock_state(self.state).pending.remove(&self.address);
            debug!(address = %self.address, "verification lookup abandoned");
        }
    }
}

fn lock_state(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
