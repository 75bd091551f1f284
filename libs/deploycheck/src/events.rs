//! Topic-based event delivery between the module runtime and observers.
//!
//! Topics are `/`-separated paths such as `jersey/test/DEPLOYED`. A
//! subscription filter is either an exact topic, a prefix ending in `/*`
//! (`jersey/test/*`), or `*` for everything.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::gate::DeploymentGate;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("invalid topic '{0}'")]
    InvalidTopic(String),
    #[error("a subscription needs at least one topic")]
    NoTopics,
}

/// An event posted by the runtime. Handlers must not rely on any property being present.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    topic: String,
    properties: BTreeMap<String, serde_json::Value>,
}

impl Event {
    pub fn new(topic: impl Into<String>) -> Result<Self, EventError> {
        let topic = topic.into();
        validate_topic(&topic)?;
        Ok(Self {
            topic,
            properties: BTreeMap::new(),
        })
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }
}

fn validate_topic(topic: &str) -> Result<(), EventError> {
    if topic.is_empty() || topic.split('/').any(|seg| seg.is_empty() || seg.contains('*')) {
        return Err(EventError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TopicFilter {
    Exact(String),
    Prefix(String),
    All,
}

impl TopicFilter {
    fn parse(raw: &str) -> Result<Self, EventError> {
        if raw == "*" {
            return Ok(Self::All);
        }
        if let Some(prefix) = raw.strip_suffix("/*") {
            validate_topic(prefix).map_err(|_| EventError::InvalidTopic(raw.to_string()))?;
            return Ok(Self::Prefix(format!("{prefix}/")));
        }
        validate_topic(raw)?;
        Ok(Self::Exact(raw.to_string()))
    }

    fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(t) => t == topic,
            Self::Prefix(p) => topic.starts_with(p.as_str()),
            Self::All => true,
        }
    }
}

/// Receives events for the topics it was subscribed with.
///
/// Called on the delivering thread; implementations should return quickly.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Where handlers get registered. Scenario code only depends on this seam.
pub trait EventSource: Send + Sync {
    fn subscribe(
        &self,
        topics: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, EventError>;

    /// Returns false when the id was unknown (already removed).
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Where modules publish events.
pub trait EventPublisher: Send + Sync {
    /// Deliver asynchronously; returns once the event is queued.
    fn post_event(&self, event: Event);
}

struct Subscription {
    id: SubscriptionId,
    filters: Vec<TopicFilter>,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
struct BusInner {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

/// In-process event bus. Cloning shares the same subscription table.
#[derive(Clone, Default)]
pub struct LocalEventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for LocalEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEventBus")
            .field("subscriptions", &self.inner.subscriptions.read().len())
            .finish()
    }
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver on the calling thread; returns the number of handlers invoked.
    pub fn send_event(&self, event: &Event) -> usize {
        // Snapshot handlers so one may (un)subscribe while being called.
        let targets: Vec<Arc<dyn EventHandler>> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.filters.iter().any(|f| f.matches(event.topic())))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        tracing::debug!(topic = event.topic(), handlers = targets.len(), "delivering event");
        for handler in &targets {
            handler.handle_event(event);
        }
        targets.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }
}

impl EventSource for LocalEventBus {
    fn subscribe(
        &self,
        topics: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, EventError> {
        if topics.is_empty() {
            return Err(EventError::NoTopics);
        }
        let filters = topics
            .iter()
            .map(|t| TopicFilter::parse(t))
            .collect::<Result<Vec<_>, _>>()?;

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscriptions.write().push(Subscription {
            id,
            filters,
            handler,
        });
        tracing::debug!(?id, ?topics, "event handler subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.inner.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }
}

impl EventPublisher for LocalEventBus {
    fn post_event(&self, event: Event) {
        let bus = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    bus.send_event(&event);
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    bus.send_event(&event);
                });
            }
        }
    }
}

/// Opens a [`DeploymentGate`] when an event arrives on one of its topics.
pub struct GateHandler {
    name: String,
    gate: Arc<DeploymentGate>,
}

impl GateHandler {
    pub fn new(name: impl Into<String>, gate: Arc<DeploymentGate>) -> Self {
        Self {
            name: name.into(),
            gate,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl EventHandler for GateHandler {
    fn handle_event(&self, event: &Event) {
        let opened = self.gate.signal();
        tracing::debug!(handler = %self.name, topic = event.topic(), opened, "event received");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &Event) {
            self.0.lock().push(event.topic().to_string());
        }
    }

    #[test]
    fn topic_validation() {
        assert!(Event::new("jersey/test/DEPLOYED").is_ok());
        assert_eq!(
            Event::new("").unwrap_err(),
            EventError::InvalidTopic(String::new())
        );
        assert!(Event::new("a//b").is_err());
        assert!(Event::new("a/b/").is_err());
        assert!(Event::new("a/*").is_err());
    }

    #[test]
    fn filters_match_exact_prefix_and_all() {
        let exact = TopicFilter::parse("jersey/test/DEPLOYED").unwrap();
        let prefix = TopicFilter::parse("jersey/test/*").unwrap();
        let all = TopicFilter::parse("*").unwrap();

        assert!(exact.matches("jersey/test/DEPLOYED"));
        assert!(!exact.matches("jersey/test/DEPLOYED/again"));
        assert!(prefix.matches("jersey/test/DEPLOYED"));
        assert!(!prefix.matches("jersey/testing"));
        assert!(all.matches("anything/at/all"));
        assert!(TopicFilter::parse("/*").is_err());
    }

    #[test]
    fn send_event_reaches_only_matching_handlers() {
        let bus = LocalEventBus::new();
        let deployed = Arc::new(Recorder::default());
        let everything = Arc::new(Recorder::default());

        bus.subscribe(&["jersey/test/DEPLOYED"], deployed.clone())
            .unwrap();
        bus.subscribe(&["*"], everything.clone()).unwrap();

        assert_eq!(bus.send_event(&Event::new("jersey/test/DEPLOYED").unwrap()), 2);
        assert_eq!(bus.send_event(&Event::new("runtime/module/STARTED").unwrap()), 1);

        assert_eq!(deployed.0.lock().as_slice(), ["jersey/test/DEPLOYED"]);
        assert_eq!(everything.0.lock().len(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = LocalEventBus::new();
        let rec = Arc::new(Recorder::default());
        let id = bus.subscribe(&["a/b"], rec.clone()).unwrap();

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.send_event(&Event::new("a/b").unwrap()), 0);
        assert!(rec.0.lock().is_empty());
    }

    #[test]
    fn subscribe_rejects_bad_topics() {
        let bus = LocalEventBus::new();
        let rec = Arc::new(Recorder::default());
        assert_eq!(bus.subscribe(&[], rec.clone()).unwrap_err(), EventError::NoTopics);
        assert!(bus.subscribe(&["ok", "bad//topic"], rec).is_err());
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn posted_event_opens_gate() {
        let bus = LocalEventBus::new();
        let gate = Arc::new(DeploymentGate::new());
        bus.subscribe(
            &["jersey/test/DEPLOYED"],
            Arc::new(GateHandler::new("Deploy Handler", gate.clone())),
        )
        .unwrap();

        bus.post_event(
            Event::new("jersey/test/DEPLOYED")
                .unwrap()
                .with_property("module", serde_json::json!("war-bundle")),
        );

        gate.await_ready(Duration::from_secs(2)).await.unwrap();
    }

    #[test]
    fn post_without_runtime_still_delivers() {
        let bus = LocalEventBus::new();
        let gate = Arc::new(DeploymentGate::new());
        bus.subscribe(&["x/*"], Arc::new(GateHandler::new("h", gate.clone())))
            .unwrap();

        bus.post_event(Event::new("x/y").unwrap());

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !gate.is_ready() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(gate.is_ready());
    }
}
