//! In-process model of the page a guard is injected into.
//!
//! A [`Window`] owns named global slots holding provider objects, the
//! structured-message channel (`postMessage`), a page-event channel and a
//! [`Document`] with its own custom-event and mutation channels. The relay
//! shares the same `Window` to get DOM access, but never touches the page's
//! guard state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use aegis_common::RequestArguments;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{ChannelError, ProviderError};

const CHANNEL_CAPACITY: usize = 256;

/// Callback installed on the window by the page to flip the dropdown UI.
pub type ToggleFn = Arc<dyn Fn() + Send + Sync>;

/// Callback attached to an element click.
pub type ClickListener = Arc<dyn Fn() + Send + Sync>;

/// The single async dispatch capability of a provider.
#[async_trait::async_trait]
pub trait RequestDispatch: Send + Sync {
    async fn request(&self, args: RequestArguments) -> Result<Value, ProviderError>;

    /// Textual form of the capability. Two dispatches with equal signatures
    /// are treated as the same code.
    fn signature(&self) -> String;
}

/// A page-global object that may or may not be a wallet provider.
pub struct ProviderObject {
    dispatch: RwLock<Option<Arc<dyn RequestDispatch>>>,
    providers: RwLock<Vec<Arc<ProviderObject>>>,
}

impl std::fmt::Debug for ProviderObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderObject")
            .field("signature", &self.dispatch().map(|d| d.signature()))
            .field("providers", &read(&self.providers).len())
            .finish()
    }
}

impl ProviderObject {
    pub fn new(dispatch: Arc<dyn RequestDispatch>) -> Arc<Self> {
        Arc::new(Self {
            dispatch: RwLock::new(Some(dispatch)),
            providers: RwLock::new(Vec::new()),
        })
    }

    /// An object with no dispatch capability, e.g. a `web3` shim whose
    /// `currentProvider` is not set yet.
    pub fn inert() -> Arc<Self> {
        Arc::new(Self {
            dispatch: RwLock::new(None),
            providers: RwLock::new(Vec::new()),
        })
    }

    pub fn dispatch(&self) -> Option<Arc<dyn RequestDispatch>> {
        read(&self.dispatch).clone()
    }

    /// Overwrites the dispatch capability, as page code assigning
    /// `provider.request = ...` would.
    pub fn set_dispatch(&self, dispatch: Arc<dyn RequestDispatch>) {
        *write(&self.dispatch) = Some(dispatch);
    }

    pub fn add_provider(&self, provider: Arc<ProviderObject>) {
        write(&self.providers).push(provider);
    }

    /// The multi-wallet aggregation list (`provider.providers`).
    pub fn providers(&self) -> Vec<Arc<ProviderObject>> {
        read(&self.providers).clone()
    }

    /// Calls the current dispatch capability.
    pub async fn request(&self, args: RequestArguments) -> Result<Value, ProviderError> {
        let dispatch = self.dispatch().ok_or_else(ProviderError::disconnected)?;
        dispatch.request(args).await
    }
}

/// Events observable on the window object itself.
#[derive(Clone)]
pub enum PageEvent {
    /// `eip6963:announceProvider`.
    AnnounceProvider(Arc<ProviderObject>),
    /// Any other named custom event fired on the window.
    Custom { name: String, detail: Value },
    /// An outgoing `fetch` issued by page code.
    Fetch { url: String, body: Option<String> },
    BeforeUnload,
}

/// A same-document custom event.
#[derive(Debug, Clone, PartialEq)]
pub struct DomEvent {
    pub name: String,
    pub detail: Value,
}

/// A batch of elements inserted into the document.
#[derive(Clone)]
pub struct Mutation {
    pub added: Vec<Arc<Element>>,
}

pub struct Element {
    tag: String,
    attributes: RwLock<FxHashMap<String, String>>,
    children: Vec<Arc<Element>>,
    click_listeners: Mutex<Vec<ClickListener>>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: RwLock::new(FxHashMap::default()),
            children: Vec::new(),
            click_listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn with_attribute(self, name: &str, value: &str) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        read(&self.attributes).get(name).cloned()
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        write(&self.attributes).insert(name.to_string(), value.to_string());
    }

    pub fn children(&self) -> &[Arc<Element>] {
        &self.children
    }

    pub fn add_click_listener(&self, listener: ClickListener) {
        lock(&self.click_listeners).push(listener);
    }

    pub fn click_listener_count(&self) -> usize {
        lock(&self.click_listeners).len()
    }

    pub fn click(&self) {
        let listeners = lock(&self.click_listeners).clone();
        for listener in listeners {
            listener();
        }
    }

    /// This element followed by all of its descendants, depth first.
    pub fn subtree(self: &Arc<Self>) -> Vec<Arc<Element>> {
        let mut out = Vec::new();
        let mut stack = vec![Arc::clone(self)];
        while let Some(element) = stack.pop() {
            stack.extend(element.children.iter().rev().cloned());
            out.push(element);
        }
        out
    }
}

pub struct Document {
    events: broadcast::Sender<DomEvent>,
    mutations: broadcast::Sender<Mutation>,
    events_blocked: AtomicBool,
}

impl Document {
    fn new() -> Self {
        Self {
            events: broadcast::channel(CHANNEL_CAPACITY).0,
            mutations: broadcast::channel(CHANNEL_CAPACITY).0,
            events_blocked: AtomicBool::new(false),
        }
    }

    /// `document.dispatchEvent(new CustomEvent(name, { detail }))`.
    pub fn dispatch_event(&self, event: DomEvent) -> Result<(), ChannelError> {
        if self.events_blocked.load(Ordering::Acquire) {
            return Err(ChannelError::CustomEventBlocked);
        }
        // No listener is not a failure.
        let _ = self.events.send(event);
        Ok(())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DomEvent> {
        self.events.subscribe()
    }

    /// Inserts elements into the document, notifying mutation observers.
    pub fn append(&self, elements: Vec<Arc<Element>>) {
        let _ = self.mutations.send(Mutation { added: elements });
    }

    pub fn subscribe_mutations(&self) -> broadcast::Receiver<Mutation> {
        self.mutations.subscribe()
    }

    /// Simulates a frame where custom events cannot be constructed.
    pub fn block_events(&self, blocked: bool) {
        self.events_blocked.store(blocked, Ordering::Release);
    }
}

pub struct Window {
    origin: String,
    globals: RwLock<FxHashMap<String, Arc<ProviderObject>>>,
    messages: broadcast::Sender<Value>,
    events: broadcast::Sender<PageEvent>,
    document: Document,
    post_message_blocked: AtomicBool,
    toggle: RwLock<Option<ToggleFn>>,
    injected: Mutex<FxHashSet<String>>,
}

impl Window {
    pub fn new(origin: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            origin: origin.into(),
            globals: RwLock::new(FxHashMap::default()),
            messages: broadcast::channel(CHANNEL_CAPACITY).0,
            events: broadcast::channel(CHANNEL_CAPACITY).0,
            document: Document::new(),
            post_message_blocked: AtomicBool::new(false),
            toggle: RwLock::new(None),
            injected: Mutex::new(FxHashSet::default()),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Assigns a global slot. Dotted paths such as `remix.ethereum` are
    /// stored flat.
    pub fn set_global(&self, path: &str, object: Arc<ProviderObject>) {
        write(&self.globals).insert(path.to_string(), object);
    }

    pub fn global(&self, path: &str) -> Option<Arc<ProviderObject>> {
        read(&self.globals).get(path).cloned()
    }

    pub fn remove_global(&self, path: &str) -> Option<Arc<ProviderObject>> {
        write(&self.globals).remove(path)
    }

    /// `window.postMessage(value, origin)`.
    pub fn post_message(&self, value: Value) -> Result<(), ChannelError> {
        if self.post_message_blocked.load(Ordering::Acquire) {
            return Err(ChannelError::PostMessageBlocked);
        }
        let _ = self.messages.send(value);
        Ok(())
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<Value> {
        self.messages.subscribe()
    }

    pub fn dispatch_event(&self, event: PageEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn block_post_message(&self, blocked: bool) {
        self.post_message_blocked.store(blocked, Ordering::Release);
    }

    pub fn expose_toggle(&self, toggle: ToggleFn) {
        *write(&self.toggle) = Some(toggle);
    }

    pub fn clear_toggle(&self) {
        *write(&self.toggle) = None;
    }

    pub fn exposed_toggle(&self) -> Option<ToggleFn> {
        read(&self.toggle).clone()
    }

    /// Marks a script as injected. Returns `false` if it already was.
    pub fn mark_injected(&self, key: &str) -> bool {
        lock(&self.injected).insert(key.to_string())
    }

    pub fn unmark_injected(&self, key: &str) {
        lock(&self.injected).remove(key);
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
