//! Discovery sweep over the page's well-known provider slots.

use std::sync::Arc;

use tracing::debug;

use crate::interceptor::{InterceptedDispatch, RequestObserver};
use crate::registry::{HookOutcome, HookRegistry};
use crate::window::{ProviderObject, Window};

/// Global slots where dapps and wallets commonly leave a provider.
pub const WELL_KNOWN_SLOTS: &[&str] = &[
    "ethereum",
    "web3.currentProvider",
    "remix.ethereum",
    "remix.provider",
    "remix.web3.currentProvider",
    "provider",
    "wallet",
    "metamask",
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Wrapped for the first time or re-wrapped after replacement.
    pub hooked: Vec<String>,
    pub unchanged: usize,
    /// Present but without a dispatch capability.
    pub skipped: Vec<String>,
    pub pruned: usize,
}

impl SweepReport {
    fn record(&mut self, label: String, outcome: HookOutcome) {
        match outcome {
            HookOutcome::Hooked | HookOutcome::Rehooked => self.hooked.push(label),
            HookOutcome::AlreadyHooked => self.unchanged += 1,
            HookOutcome::Skipped => self.skipped.push(label),
        }
    }
}

/// Hooks one candidate and, recursively, its multi-wallet provider list.
pub fn hook_candidate(
    registry: &HookRegistry,
    observer: &Arc<dyn RequestObserver>,
    candidate: &Arc<ProviderObject>,
    label: &str,
    report: &mut SweepReport,
) {
    let outcome = registry.try_hook(
        candidate,
        label,
        InterceptedDispatch::wrapper(observer.clone(), label),
    );
    report.record(label.to_string(), outcome);

    for (index, nested) in candidate.providers().iter().enumerate() {
        // Aggregators occasionally list themselves.
        if Arc::ptr_eq(nested, candidate) {
            continue;
        }
        let nested_label = format!("{label}.providers[{index}]");
        let outcome = registry.try_hook(
            nested,
            &nested_label,
            InterceptedDispatch::wrapper(observer.clone(), &nested_label),
        );
        report.record(nested_label, outcome);
    }
}

/// Runs one discovery pass over every well-known slot.
pub fn sweep(window: &Window, registry: &HookRegistry, observer: &Arc<dyn RequestObserver>) -> SweepReport {
    let mut report = SweepReport {
        pruned: registry.prune(),
        ..SweepReport::default()
    };
    for slot in WELL_KNOWN_SLOTS {
        if let Some(candidate) = window.global(slot) {
            hook_candidate(registry, observer, &candidate, slot, &mut report);
        }
    }
    if !report.hooked.is_empty() || !report.skipped.is_empty() {
        debug!(
            hooked = ?report.hooked,
            skipped = ?report.skipped,
            unchanged = report.unchanged,
            pruned = report.pruned,
            "discovery sweep finished"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ObservationError, ProviderError};
    use crate::window::RequestDispatch;
    use aegis_common::RequestArguments;
    use serde_json::Value;

    struct Wallet(&'static str);

    #[async_trait::async_trait]
    impl RequestDispatch for Wallet {
        async fn request(&self, _: RequestArguments) -> Result<Value, ProviderError> {
            Ok(Value::Null)
        }

        fn signature(&self) -> String {
            self.0.to_string()
        }
    }

    struct Silent;

    impl RequestObserver for Silent {
        fn before_dispatch(&self, _: &str, _: &RequestArguments) -> Result<(), ObservationError> {
            Ok(())
        }

        fn after_dispatch(
            &self,
            _: &str,
            _: &RequestArguments,
            _: &Result<Value, ProviderError>,
        ) -> Result<(), ObservationError> {
            Ok(())
        }
    }

    fn observer() -> Arc<dyn RequestObserver> {
        Arc::new(Silent)
    }

    #[test]
    fn sweep_hooks_slots_and_nested_providers() {
        let window = Window::new("https://dapp.example");
        let aggregate = ProviderObject::new(Arc::new(Wallet("aggregate")));
        aggregate.add_provider(ProviderObject::new(Arc::new(Wallet("metamask"))));
        aggregate.add_provider(ProviderObject::new(Arc::new(Wallet("coinbase"))));
        window.set_global("ethereum", aggregate.clone());
        window.set_global("web3.currentProvider", ProviderObject::inert());

        let registry = HookRegistry::new();
        let report = sweep(&window, &registry, &observer());
        assert_eq!(
            report.hooked,
            ["ethereum", "ethereum.providers[0]", "ethereum.providers[1]"]
        );
        assert_eq!(report.skipped, ["web3.currentProvider"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn repeated_sweeps_do_not_rewrap() {
        let window = Window::new("https://dapp.example");
        let wallet = ProviderObject::new(Arc::new(Wallet("metamask")));
        window.set_global("ethereum", wallet.clone());
        window.set_global("metamask", wallet.clone());

        let registry = HookRegistry::new();
        let first = sweep(&window, &registry, &observer());
        assert_eq!(first.hooked, ["ethereum"]);
        assert_eq!(first.unchanged, 1);

        for _ in 0..5 {
            let again = sweep(&window, &registry, &observer());
            assert!(again.hooked.is_empty());
        }
        assert_eq!(
            wallet.dispatch().unwrap().signature(),
            "aegis::intercept(metamask)"
        );
    }

    #[test]
    fn replacement_at_same_slot_is_hooked() {
        let window = Window::new("https://dapp.example");
        let registry = HookRegistry::new();
        window.set_global("ethereum", ProviderObject::new(Arc::new(Wallet("old"))));
        sweep(&window, &registry, &observer());

        window.set_global("ethereum", ProviderObject::new(Arc::new(Wallet("new"))));
        let report = sweep(&window, &registry, &observer());
        assert_eq!(report.pruned, 1);
        assert_eq!(report.hooked, ["ethereum"]);

        let report = sweep(&window, &registry, &observer());
        assert_eq!(report.pruned, 0);
        assert!(report.hooked.is_empty());
    }
}
