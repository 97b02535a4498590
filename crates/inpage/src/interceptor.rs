//! Request interceptor.
//!
//! [`InterceptedDispatch`] sits in front of a provider's original dispatch.
//! Every call is shown to a [`RequestObserver`] before and after delegation;
//! the original is always called with the page's arguments and its result is
//! returned untouched. Observer errors and panics stop at this boundary.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use aegis_common::RequestArguments;
use serde_json::Value;
use tracing::warn;

use crate::error::{ObservationError, ProviderError};
use crate::window::RequestDispatch;

/// Observation hooks run around every intercepted call.
///
/// Both hooks run synchronously on the caller's task. Anything slow, such as
/// contract lookups, must be spawned rather than awaited.
pub trait RequestObserver: Send + Sync {
    fn before_dispatch(&self, label: &str, args: &RequestArguments) -> Result<(), ObservationError>;

    fn after_dispatch(
        &self,
        label: &str,
        args: &RequestArguments,
        result: &Result<Value, ProviderError>,
    ) -> Result<(), ObservationError>;
}

pub struct InterceptedDispatch {
    original: Arc<dyn RequestDispatch>,
    observer: Arc<dyn RequestObserver>,
    label: String,
}

impl InterceptedDispatch {
    pub fn new(
        original: Arc<dyn RequestDispatch>,
        observer: Arc<dyn RequestObserver>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            original,
            observer,
            label: label.into(),
        }
    }

    /// Builds the wrapping closure handed to the hook registry.
    pub fn wrapper(
        observer: Arc<dyn RequestObserver>,
        label: &str,
    ) -> impl FnOnce(Arc<dyn RequestDispatch>) -> Arc<dyn RequestDispatch> {
        let label = label.to_string();
        move |original: Arc<dyn RequestDispatch>| -> Arc<dyn RequestDispatch> {
            Arc::new(Self::new(original, observer, label))
        }
    }
}

#[async_trait::async_trait]
impl RequestDispatch for InterceptedDispatch {
    async fn request(&self, args: RequestArguments) -> Result<Value, ProviderError> {
        contain("before", &args.method, || {
            self.observer.before_dispatch(&self.label, &args)
        });

        let result = self.original.request(args.clone()).await;

        contain("after", &args.method, || {
            self.observer.after_dispatch(&self.label, &args, &result)
        });
        result
    }

    fn signature(&self) -> String {
        format!("aegis::intercept({})", self.original.signature())
    }
}

fn contain<F>(stage: &'static str, method: &str, observe: F)
where
    F: FnOnce() -> Result<(), ObservationError>,
{
    match catch_unwind(AssertUnwindSafe(observe)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(stage, method, %err, "request observation failed"),
        Err(payload) => {
            let err = ObservationError::Panicked {
                stage,
                message: panic_message(payload.as_ref()),
            };
            warn!(stage, method, %err, "request observer panicked");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
