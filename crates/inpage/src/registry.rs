//! Provider hook registry.
//!
//! Entries are keyed by object identity and hold a weak reference, so a page
//! object that is dropped never pins its slot: a replacement installed later
//! is wrapped afresh. A live entry is re-wrapped whenever the dispatch
//! signature on the object no longer matches the one recorded at wrap time.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::window::{ProviderObject, RequestDispatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The candidate has no dispatch capability.
    Skipped,
    /// Already wrapped with the current signature; nothing changed.
    AlreadyHooked,
    /// Wrapped for the first time.
    Hooked,
    /// The page replaced a wrapped dispatch; wrapped again.
    Rehooked,
}

impl HookOutcome {
    pub fn installed_wrapper(self) -> bool {
        matches!(self, Self::Hooked | Self::Rehooked)
    }
}

struct HookEntry {
    object: Weak<ProviderObject>,
    signature: String,
    label: String,
}

#[derive(Default)]
pub struct HookRegistry {
    entries: Mutex<FxHashMap<usize, HookEntry>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps `candidate` with `wrap` unless it is already wrapped with an
    /// identical signature.
    ///
    /// The check and the replacement of the dispatch happen under one lock,
    /// so concurrent sweeps never double-wrap the same object.
    pub fn try_hook<F>(&self, candidate: &Arc<ProviderObject>, label: &str, wrap: F) -> HookOutcome
    where
        F: FnOnce(Arc<dyn RequestDispatch>) -> Arc<dyn RequestDispatch>,
    {
        let Some(current) = candidate.dispatch() else {
            debug!(label, "candidate has no dispatch capability, skipping");
            return HookOutcome::Skipped;
        };
        let signature = current.signature();
        let key = identity(candidate);

        let mut entries = self.lock();
        let previous = entries.get(&key).and_then(|entry| {
            entry
                .object
                .upgrade()
                .filter(|live| Arc::ptr_eq(live, candidate))
                .map(|_| entry.signature.as_str())
        });
        let outcome = match previous {
            Some(recorded) if recorded == signature => return HookOutcome::AlreadyHooked,
            Some(_) => HookOutcome::Rehooked,
            None => HookOutcome::Hooked,
        };

        let wrapped = wrap(current);
        let wrapped_signature = wrapped.signature();
        candidate.set_dispatch(wrapped);
        entries.insert(
            key,
            HookEntry {
                object: Arc::downgrade(candidate),
                signature: wrapped_signature,
                label: label.to_string(),
            },
        );
        drop(entries);

        info!(label, ?outcome, "provider dispatch wrapped");
        outcome
    }

    pub fn is_hooked(&self, candidate: &Arc<ProviderObject>) -> bool {
        let Some(current) = candidate.dispatch() else {
            return false;
        };
        self.lock().get(&identity(candidate)).is_some_and(|entry| {
            entry.object.upgrade().is_some() && entry.signature == current.signature()
        })
    }

    /// Drops entries whose page object is gone. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| {
            let alive = entry.object.strong_count() > 0;
            if !alive {
                debug!(label = %entry.label, "pruning dead provider entry");
            }
            alive
        });
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<usize, HookEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn identity(object: &Arc<ProviderObject>) -> usize {
    Arc::as_ptr(object) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use aegis_common::RequestArguments;
    use serde_json::Value;

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl RequestDispatch for Named {
        async fn request(&self, _args: RequestArguments) -> Result<Value, ProviderError> {
            Ok(Value::Null)
        }

        fn signature(&self) -> String {
            self.0.to_string()
        }
    }

    struct Wrapped(Arc<dyn RequestDispatch>);

    #[async_trait::async_trait]
    impl RequestDispatch for Wrapped {
        async fn request(&self, args: RequestArguments) -> Result<Value, ProviderError> {
            self.0.request(args).await
        }

        fn signature(&self) -> String {
            format!("wrapped({})", self.0.signature())
        }
    }

    fn wrap(inner: Arc<dyn RequestDispatch>) -> Arc<dyn RequestDispatch> {
        Arc::new(Wrapped(inner))
    }

    #[test]
    fn second_hook_is_a_no_op() {
        let registry = HookRegistry::new();
        let provider = ProviderObject::new(Arc::new(Named("metamask")));
        assert_eq!(registry.try_hook(&provider, "ethereum", wrap), HookOutcome::Hooked);
        assert_eq!(
            registry.try_hook(&provider, "ethereum", wrap),
            HookOutcome::AlreadyHooked
        );
        assert_eq!(
            provider.dispatch().unwrap().signature(),
            "wrapped(metamask)"
        );
        assert!(registry.is_hooked(&provider));
    }

    #[test]
    fn replaced_dispatch_is_rewrapped() {
        let registry = HookRegistry::new();
        let provider = ProviderObject::new(Arc::new(Named("v1")));
        registry.try_hook(&provider, "ethereum", wrap);

        provider.set_dispatch(Arc::new(Named("v2")));
        assert!(!registry.is_hooked(&provider));
        assert_eq!(
            registry.try_hook(&provider, "ethereum", wrap),
            HookOutcome::Rehooked
        );
        assert_eq!(provider.dispatch().unwrap().signature(), "wrapped(v2)");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn object_without_dispatch_is_skipped() {
        let registry = HookRegistry::new();
        let inert = ProviderObject::inert();
        assert_eq!(registry.try_hook(&inert, "web3", wrap), HookOutcome::Skipped);
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_objects_are_pruned() {
        let registry = HookRegistry::new();
        let first = ProviderObject::new(Arc::new(Named("a")));
        registry.try_hook(&first, "ethereum", wrap);
        drop(first);
        assert_eq!(registry.prune(), 1);

        let replacement = ProviderObject::new(Arc::new(Named("a")));
        assert_eq!(
            registry.try_hook(&replacement, "ethereum", wrap),
            HookOutcome::Hooked
        );
    }

    #[test]
    fn clear_forgets_everything() {
        let registry = HookRegistry::new();
        let provider = ProviderObject::new(Arc::new(Named("a")));
        registry.try_hook(&provider, "ethereum", wrap);
        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.is_hooked(&provider));
    }
}
