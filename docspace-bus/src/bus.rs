//! The event bus: entity-independent publish/subscribe with priorities,
//! one-shot and wildcard subscribers, condition predicates, nested
//! namespaces and a bounded emission history.
//!
//! Dispatch order within one emission is fixed: subscribers sort by
//! descending priority with ties in registration order (durable, then
//! one-shot, then wildcard). A handler returning [`HandlerReply::Halt`]
//! stops the remaining subscribers. Handler failures are logged,
//! re-emitted as `eventbus:error` and isolated from siblings.

use crate::error::{BusError, BusResult};
use chrono::{DateTime, Utc};
use docspace_types::{SharedSink, null_sink};
use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_HISTORY_CAP: usize = 500;
const ERROR_EVENT: &str = "eventbus:error";

/// The envelope a handler receives: event name, payload, and emission
/// metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    pub event: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// What a handler tells the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerReply {
    /// Keep going; nothing to collect.
    Continue,
    /// Keep going and collect this value into the emission results.
    Value(Value),
    /// Stop dispatching to the remaining subscribers.
    Halt,
}

/// Synchronous handler. `Err` is logged, re-emitted as `eventbus:error`
/// and isolated from sibling handlers.
pub type SyncHandler = Rc<dyn Fn(&BusEvent) -> Result<HandlerReply, String>>;

/// Asynchronous handler; awaited by [`EventBus::emit_async`], optionally
/// under a per-call timeout.
pub type AsyncHandler =
    Rc<dyn Fn(BusEvent) -> Pin<Box<dyn Future<Output = Result<HandlerReply, String>>>>>;

/// Predicate deciding whether a subscriber sees an emission.
pub type Condition = Rc<dyn Fn(&BusEvent) -> bool>;

#[derive(Clone)]
enum HandlerFn {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

/// Opaque token identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    priority: i32,
    condition: Option<Condition>,
    handler: HandlerFn,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

/// Options for [`EventBus::on`] and [`EventBus::on_async`].
#[derive(Default, Clone)]
pub struct SubscribeOptions {
    /// Remove the subscriber after its first invocation.
    pub once: bool,
    /// Higher priorities run first; ties keep registration order.
    pub priority: i32,
    /// Register on the named nested bus instead of this one.
    pub namespace: Option<String>,
    /// Skip the handler when the predicate returns false.
    pub condition: Option<Condition>,
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("once", &self.once)
            .field("priority", &self.priority)
            .field("namespace", &self.namespace)
            .field("condition", &self.condition.is_some())
            .finish()
    }
}

/// Options for [`EventBus::emit`] and [`EventBus::emit_async`].
#[derive(Debug, Default, Clone)]
pub struct EmitOptions {
    /// Emit on the named nested bus instead of this one.
    pub namespace: Option<String>,
    /// Turn the first handler failure into a hard error.
    pub stop_on_error: bool,
    /// Recorded in the envelope and the history.
    pub source: Option<String>,
    /// Per-handler timeout for async handlers (async emission only).
    pub timeout: Option<Duration>,
}

/// What one emission did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EmitOutcome {
    /// Values collected from handlers that returned [`HandlerReply::Value`].
    pub results: Vec<Value>,
    /// Number of handlers actually invoked (conditions may skip some).
    pub invoked: usize,
    /// Whether a handler halted the dispatch early.
    pub halted: bool,
}

/// History query filter; predicates compose conjunctively.
#[derive(Debug, Default, Clone)]
pub struct BusHistoryFilter {
    pub event: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` entries.
    pub limit: Option<usize>,
}

/// Per-event listener counts in [`BusStats`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EventListenerCounts {
    pub listeners: usize,
    pub once_listeners: usize,
}

/// Aggregate numbers about a bus.
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub total_events: usize,
    pub total_listeners: usize,
    pub total_once_listeners: usize,
    pub wildcard_listeners: usize,
    pub namespaces: usize,
    pub history_size: usize,
    pub event_distribution: HashMap<String, EventListenerCounts>,
}

/// A generic publish/subscribe bus.
pub struct EventBus {
    listeners: RefCell<HashMap<String, Vec<Subscriber>>>,
    once_listeners: RefCell<HashMap<String, Vec<Subscriber>>>,
    wildcard: RefCell<Vec<Subscriber>>,
    namespaces: RefCell<HashMap<String, Rc<EventBus>>>,
    history: RefCell<VecDeque<BusEvent>>,
    history_cap: usize,
    debug: Cell<bool>,
    sink: RefCell<SharedSink>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAP)
    }

    /// A bus whose emission history holds at most `cap` entries.
    #[must_use]
    pub fn with_history_capacity(cap: usize) -> Self {
        Self {
            listeners: RefCell::new(HashMap::new()),
            once_listeners: RefCell::new(HashMap::new()),
            wildcard: RefCell::new(Vec::new()),
            namespaces: RefCell::new(HashMap::new()),
            history: RefCell::new(VecDeque::new()),
            history_cap: cap,
            debug: Cell::new(false),
            sink: RefCell::new(null_sink()),
        }
    }

    /// Routes a copy of every emission to the external sink.
    pub fn set_sink(&self, sink: SharedSink) {
        *self.sink.borrow_mut() = sink;
    }

    // ── Registration ─────────────────────────────────────────────

    /// Subscribes a synchronous handler.
    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&BusEvent) -> Result<HandlerReply, String> + 'static,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        self.register(event, HandlerFn::Sync(Rc::new(handler)), options)
    }

    /// Subscribes a handler for exactly one emission.
    pub fn once(
        &self,
        event: &str,
        handler: impl Fn(&BusEvent) -> Result<HandlerReply, String> + 'static,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        self.on(
            event,
            handler,
            SubscribeOptions {
                once: true,
                ..options
            },
        )
    }

    /// Subscribes an asynchronous handler; only [`EventBus::emit_async`]
    /// invokes it.
    pub fn on_async(
        &self,
        event: &str,
        handler: impl Fn(BusEvent) -> Pin<Box<dyn Future<Output = Result<HandlerReply, String>>>>
        + 'static,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        self.register(event, HandlerFn::Async(Rc::new(handler)), options)
    }

    fn register(
        &self,
        event: &str,
        handler: HandlerFn,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        if let Some(name) = &options.namespace {
            let target = self.namespace(name);
            return target.register(
                event,
                handler,
                SubscribeOptions {
                    namespace: None,
                    ..options
                },
            );
        }

        let subscriber = Subscriber {
            id: SubscriptionId::new(),
            priority: options.priority,
            condition: options.condition,
            handler,
            created_at: Utc::now(),
        };
        let id = subscriber.id;
        let map = if options.once {
            &self.once_listeners
        } else {
            &self.listeners
        };
        map.borrow_mut()
            .entry(event.to_string())
            .or_default()
            .push(subscriber);

        self.debug_log(event, "subscriber added");
        id
    }

    /// Subscribes to every event, regardless of name.
    pub fn on_any(
        &self,
        handler: impl Fn(&BusEvent) -> Result<HandlerReply, String> + 'static,
    ) -> SubscriptionId {
        let subscriber = Subscriber {
            id: SubscriptionId::new(),
            priority: 0,
            condition: None,
            handler: HandlerFn::Sync(Rc::new(handler)),
            created_at: Utc::now(),
        };
        let id = subscriber.id;
        self.wildcard.borrow_mut().push(subscriber);
        id
    }

    /// Removes a registration. Removing an unknown or already-removed id
    /// is a no-op.
    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        let mut removed = false;
        for map in [&self.listeners, &self.once_listeners] {
            let mut map = map.borrow_mut();
            if let Some(list) = map.get_mut(event) {
                let before = list.len();
                list.retain(|s| s.id != id);
                removed |= list.len() != before;
                if list.is_empty() {
                    map.remove(event);
                }
            }
        }
        if removed {
            self.debug_log(event, "subscriber removed");
        }
        removed
    }

    /// Removes a wildcard registration.
    pub fn off_any(&self, id: SubscriptionId) -> bool {
        let mut wildcard = self.wildcard.borrow_mut();
        let before = wildcard.len();
        wildcard.retain(|s| s.id != id);
        wildcard.len() != before
    }

    /// Drops every listener for `event`, or every listener on the bus
    /// when `event` is `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        match event {
            Some(name) => {
                self.listeners.borrow_mut().remove(name);
                self.once_listeners.borrow_mut().remove(name);
            }
            None => {
                self.listeners.borrow_mut().clear();
                self.once_listeners.borrow_mut().clear();
                self.wildcard.borrow_mut().clear();
            }
        }
    }

    // ── Emission ─────────────────────────────────────────────────

    /// Emits synchronously. Async-registered handlers are skipped (use
    /// [`EventBus::emit_async`] to reach them).
    pub fn emit(&self, event: &str, data: Value, options: &EmitOptions) -> BusResult<EmitOutcome> {
        match &options.namespace {
            Some(name) => {
                let target = self.namespace(name);
                let stripped = EmitOptions {
                    namespace: None,
                    ..options.clone()
                };
                target.emit_sync_core(event, data, &stripped)
            }
            None => self.emit_sync_core(event, data, options),
        }
    }

    fn emit_sync_core(
        &self,
        event: &str,
        data: Value,
        options: &EmitOptions,
    ) -> BusResult<EmitOutcome> {
        let record = self.begin_emission(event, data, options);
        let subscribers = self.gather(event, false);

        let mut outcome = EmitOutcome::default();
        for subscriber in subscribers {
            if let Some(condition) = &subscriber.condition {
                if !condition(&record) {
                    continue;
                }
            }
            let reply = match &subscriber.handler {
                HandlerFn::Sync(f) => f(&record),
                HandlerFn::Async(_) => {
                    tracing::debug!(event, "async handler skipped by sync emit");
                    continue;
                }
            };
            outcome.invoked += 1;
            if self.apply_reply(event, &subscriber, reply, options, &mut outcome)? {
                break;
            }
        }
        Ok(outcome)
    }

    /// Emits asynchronously: sync handlers run inline, async handlers are
    /// awaited, each guarded by `options.timeout` when set.
    pub async fn emit_async(
        &self,
        event: &str,
        data: Value,
        options: &EmitOptions,
    ) -> BusResult<EmitOutcome> {
        match &options.namespace {
            Some(name) => {
                let target = self.namespace(name);
                let stripped = EmitOptions {
                    namespace: None,
                    ..options.clone()
                };
                target.emit_async_core(event, data, &stripped).await
            }
            None => self.emit_async_core(event, data, options).await,
        }
    }

    async fn emit_async_core(
        &self,
        event: &str,
        data: Value,
        options: &EmitOptions,
    ) -> BusResult<EmitOutcome> {
        let record = self.begin_emission(event, data, options);
        let subscribers = self.gather(event, true);

        let mut outcome = EmitOutcome::default();
        for subscriber in subscribers {
            if let Some(condition) = &subscriber.condition {
                if !condition(&record) {
                    continue;
                }
            }
            let reply = match &subscriber.handler {
                HandlerFn::Sync(f) => f(&record),
                HandlerFn::Async(f) => {
                    let future = f(record.clone());
                    match options.timeout {
                        Some(limit) => match tokio::time::timeout(limit, future).await {
                            Ok(reply) => reply,
                            Err(_) => {
                                if options.stop_on_error {
                                    return Err(BusError::Timeout {
                                        event: event.to_string(),
                                        millis: limit.as_millis(),
                                    });
                                }
                                Err(format!(
                                    "handler timed out after {}ms",
                                    limit.as_millis()
                                ))
                            }
                        },
                        None => future.await,
                    }
                }
            };
            outcome.invoked += 1;
            if self.apply_reply(event, &subscriber, reply, options, &mut outcome)? {
                break;
            }
        }
        Ok(outcome)
    }

    /// Records the emission in history, logs it, and forwards it to the
    /// sink before any subscriber runs.
    fn begin_emission(&self, event: &str, data: Value, options: &EmitOptions) -> BusEvent {
        let record = BusEvent {
            event: event.to_string(),
            data,
            timestamp: Utc::now(),
            source: options.source.clone(),
        };
        {
            let mut history = self.history.borrow_mut();
            history.push_back(record.clone());
            while history.len() > self.history_cap {
                history.pop_front();
            }
        }
        self.debug_log(event, "emit");
        let payload = serde_json::to_value(&record).unwrap_or(Value::Null);
        let sink = self.sink.borrow().clone();
        sink.publish(&format!("eventbus:{event}"), &payload);
        record
    }

    /// Applies one handler reply to the outcome. Returns `Ok(true)` when
    /// dispatch should stop.
    fn apply_reply(
        &self,
        event: &str,
        subscriber: &Subscriber,
        reply: Result<HandlerReply, String>,
        options: &EmitOptions,
        outcome: &mut EmitOutcome,
    ) -> BusResult<bool> {
        match reply {
            Ok(HandlerReply::Continue) => Ok(false),
            Ok(HandlerReply::Value(v)) => {
                outcome.results.push(v);
                Ok(false)
            }
            Ok(HandlerReply::Halt) => {
                self.debug_log(event, "propagation halted by handler");
                outcome.halted = true;
                Ok(true)
            }
            Err(message) => {
                self.handle_handler_error(event, subscriber.id, &message);
                if options.stop_on_error {
                    return Err(BusError::Handler {
                        event: event.to_string(),
                        message,
                    });
                }
                Ok(false)
            }
        }
    }

    fn handle_handler_error(&self, event: &str, id: SubscriptionId, message: &str) {
        tracing::error!(event, callback = %id, %message, "event handler failed");
        // A failing error-handler must not recurse.
        if event != ERROR_EVENT {
            let payload = serde_json::json!({
                "event": event,
                "error": message,
                "callbackId": id.to_string(),
                "timestamp": Utc::now(),
            });
            let _ = self.emit_sync_core(ERROR_EVENT, payload, &EmitOptions::default());
        }
    }

    /// Snapshots the subscribers for one emission: durable, then one-shot
    /// (drained), then wildcard — stable-sorted by descending priority so
    /// ties keep that order.
    fn gather(&self, event: &str, async_mode: bool) -> Vec<Subscriber> {
        let mut all: Vec<Subscriber> = Vec::new();
        if let Some(list) = self.listeners.borrow().get(event) {
            all.extend(list.iter().cloned());
        }
        {
            let mut once_map = self.once_listeners.borrow_mut();
            if let Some(list) = once_map.get_mut(event) {
                if async_mode {
                    all.append(list);
                } else {
                    // The sync path cannot run async one-shots; leave them
                    // registered for a later emit_async.
                    let mut kept = Vec::new();
                    for subscriber in list.drain(..) {
                        if matches!(subscriber.handler, HandlerFn::Async(_)) {
                            kept.push(subscriber);
                        } else {
                            all.push(subscriber);
                        }
                    }
                    *list = kept;
                }
                if list.is_empty() {
                    once_map.remove(event);
                }
            }
        }
        all.extend(self.wildcard.borrow().iter().cloned());
        all.sort_by(|a, b| b.priority.cmp(&a.priority));
        all
    }

    // ── Namespaces ───────────────────────────────────────────────

    /// Returns the named nested bus, creating it on first use. The nested
    /// bus mirrors this bus's debug flag at creation.
    pub fn namespace(&self, name: &str) -> Rc<EventBus> {
        self.namespaces
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| {
                let bus = EventBus::new();
                bus.set_debug(self.debug.get());
                Rc::new(bus)
            })
            .clone()
    }

    /// Tears down a namespace, clearing its listeners first.
    pub fn remove_namespace(&self, name: &str) -> bool {
        match self.namespaces.borrow_mut().remove(name) {
            Some(bus) => {
                bus.remove_all_listeners(None);
                true
            }
            None => false,
        }
    }

    // ── Introspection ────────────────────────────────────────────

    /// Number of (durable + one-shot) listeners for an event.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        let durable = self
            .listeners
            .borrow()
            .get(event)
            .map_or(0, Vec::len);
        let once = self
            .once_listeners
            .borrow()
            .get(event)
            .map_or(0, Vec::len);
        durable + once
    }

    /// Every event name with at least one listener.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.borrow().keys().cloned().collect();
        for name in self.once_listeners.borrow().keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// The emission history, filtered. `limit` keeps the most recent
    /// entries.
    #[must_use]
    pub fn history(&self, filter: &BusHistoryFilter) -> Vec<BusEvent> {
        let mut entries: Vec<BusEvent> = self
            .history
            .borrow()
            .iter()
            .filter(|e| filter.event.as_deref().is_none_or(|name| e.event == name))
            .filter(|e| filter.since.is_none_or(|since| e.timestamp >= since))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let start = entries.len().saturating_sub(limit);
            entries.drain(..start);
        }
        entries
    }

    /// Clears history entries from before `before`, or everything.
    pub fn clear_history(&self, before: Option<DateTime<Utc>>) {
        let mut history = self.history.borrow_mut();
        match before {
            Some(cutoff) => history.retain(|e| e.timestamp >= cutoff),
            None => history.clear(),
        }
    }

    /// Aggregate numbers about the bus.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let mut distribution: HashMap<String, EventListenerCounts> = HashMap::new();
        let mut total_listeners = 0;
        let mut total_once = 0;
        for (event, list) in self.listeners.borrow().iter() {
            total_listeners += list.len();
            distribution.entry(event.clone()).or_default().listeners = list.len();
        }
        for (event, list) in self.once_listeners.borrow().iter() {
            total_once += list.len();
            distribution.entry(event.clone()).or_default().once_listeners = list.len();
        }
        BusStats {
            total_events: distribution.len(),
            total_listeners,
            total_once_listeners: total_once,
            wildcard_listeners: self.wildcard.borrow().len(),
            namespaces: self.namespaces.borrow().len(),
            history_size: self.history.borrow().len(),
            event_distribution: distribution,
        }
    }

    /// Enables debug logging, propagating to every namespace.
    pub fn set_debug(&self, enabled: bool) {
        self.debug.set(enabled);
        for bus in self.namespaces.borrow().values() {
            bus.set_debug(enabled);
        }
    }

    /// A view of this bus that prefixes every event name.
    #[must_use]
    pub fn proxy<'a>(&'a self, prefix: &str) -> BusProxy<'a> {
        BusProxy {
            bus: self,
            prefix: prefix.to_string(),
        }
    }

    /// Drops all listeners, history, and namespaces.
    pub fn clear(&self) {
        self.remove_all_listeners(None);
        self.clear_history(None);
        let namespaces: Vec<Rc<EventBus>> =
            self.namespaces.borrow_mut().drain().map(|(_, b)| b).collect();
        for bus in namespaces {
            bus.clear();
        }
    }

    fn debug_log(&self, event: &str, message: &str) {
        if self.debug.get() {
            tracing::debug!(target: "docspace::bus", event, message);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.event_names())
            .field("wildcard", &self.wildcard.borrow().len())
            .field("namespaces", &self.namespaces.borrow().len())
            .field("history", &self.history.borrow().len())
            .finish()
    }
}

/// Prefixing view over a bus: `proxy("grid").emit("resize", …)` emits
/// `grid:resize`.
pub struct BusProxy<'a> {
    bus: &'a EventBus,
    prefix: String,
}

impl BusProxy<'_> {
    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&BusEvent) -> Result<HandlerReply, String> + 'static,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        self.bus.on(&self.scoped(event), handler, options)
    }

    pub fn once(
        &self,
        event: &str,
        handler: impl Fn(&BusEvent) -> Result<HandlerReply, String> + 'static,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        self.bus.once(&self.scoped(event), handler, options)
    }

    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        self.bus.off(&self.scoped(event), id)
    }

    pub fn emit(&self, event: &str, data: Value, options: &EmitOptions) -> BusResult<EmitOutcome> {
        self.bus.emit(&self.scoped(event), data, options)
    }

    fn scoped(&self, event: &str) -> String {
        format!("{}:{}", self.prefix, event)
    }
}
