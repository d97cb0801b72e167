// Message bus seam used by the callout service.
// `BusConnection` is the narrow surface the service needs (subscribe, publish,
// request); `InProcessBus` implements it with tokio channels for embedding and
// tests. Subjects are dot-separated tokens; subscriptions may use `*` for one
// token and a trailing `>` for one or more.
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use slab::Slab;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error("connection closed")]
    Closed,
    #[error("invalid subject: {0:?}")]
    InvalidSubject(String),
    #[error("no responders on {0}")]
    NoResponders(String),
    #[error("request on {0} timed out")]
    Timeout(String),
}

const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 1024;
const INBOX_PREFIX: &str = "_INBOX";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
}

/// Connection to a subject-based message bus.
#[async_trait]
pub trait BusConnection: Send + Sync {
    /// Subscribe to `subject`. Members of the same queue group share the
    /// messages: each one goes to exactly one member.
    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<Subscription>;

    async fn publish(&self, subject: &str, reply: Option<&str>, payload: Bytes) -> Result<()>;

    /// Publish with a private reply subject and wait for the first answer.
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Message>;
}

/// Stream of messages for one subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    receiver: mpsc::Receiver<Message>,
    _guard: Option<SubscriptionGuard>,
}

impl Subscription {
    /// Wrap a receiver fed by some other bus implementation.
    pub fn new(subject: impl Into<String>, receiver: mpsc::Receiver<Message>) -> Self {
        Self {
            subject: subject.into(),
            receiver,
            _guard: None,
        }
    }

    fn with_guard(mut self, guard: SubscriptionGuard) -> Self {
        self._guard = Some(guard);
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once the subscription or bus is closed.
    pub async fn next(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(self) {
        debug!(subject = %self.subject, "unsubscribed");
    }
}

/// RAII handle that unregisters a subscription on drop.
#[derive(Debug)]
struct SubscriptionGuard {
    bus: Weak<BusState>,
    id: usize,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_subscription(self.id);
        }
    }
}

#[derive(Debug)]
struct SubscriptionEntry {
    pattern: String,
    queue_group: Option<String>,
    sender: mpsc::Sender<Message>,
}

#[derive(Debug)]
struct BusState {
    subscriptions: Mutex<Slab<SubscriptionEntry>>,
    // Rotates queue-group delivery across members.
    queue_cursor: AtomicUsize,
    closed: AtomicBool,
    subscription_capacity: usize,
}

impl BusState {
    fn remove_subscription(&self, id: usize) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.contains(id) {
            subscriptions.remove(id);
        }
    }

    fn targets(&self, subject: &str) -> Vec<mpsc::Sender<Message>> {
        let subscriptions = self.subscriptions.lock();
        let mut targets = Vec::new();
        let mut groups: HashMap<&str, Vec<&mpsc::Sender<Message>>> = HashMap::new();
        for (_, entry) in subscriptions.iter() {
            if !subject_matches(&entry.pattern, subject) {
                continue;
            }
            match &entry.queue_group {
                Some(group) => groups.entry(group.as_str()).or_default().push(&entry.sender),
                None => targets.push(entry.sender.clone()),
            }
        }
        for members in groups.into_values() {
            let pick = self.queue_cursor.fetch_add(1, Ordering::Relaxed) % members.len();
            targets.push(members[pick].clone());
        }
        targets
    }

    fn deliver(&self, message: Message) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        validate_subject(&message.subject, false)?;

        let targets = self.targets(&message.subject);
        let mut delivered = 0;
        for sender in targets {
            // A full subscriber queue drops locally instead of stalling publishers.
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::counter!("callout_bus_dropped_total").increment(1);
                    warn!(subject = %message.subject, "subscriber queue full; message dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        Ok(delivered)
    }
}

/// In-process bus backed by bounded tokio channels.
///
/// ```
/// use bytes::Bytes;
/// use callout_bus::{BusConnection, InProcessBus};
///
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let bus = InProcessBus::new();
///     let mut sub = bus.subscribe("greet.*", None).await.expect("subscribe");
///     bus.publish("greet.world", None, Bytes::from_static(b"hello"))
///         .await
///         .expect("publish");
///     let msg = sub.next().await.expect("message");
///     assert_eq!(msg.payload, Bytes::from_static(b"hello"));
/// });
/// ```
#[derive(Debug, Clone)]
pub struct InProcessBus {
    state: Arc<BusState>,
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::with_subscription_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }

    pub fn with_subscription_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(BusState {
                subscriptions: Mutex::new(Slab::new()),
                queue_cursor: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                subscription_capacity: capacity.max(1),
            }),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.state.subscriptions.lock().len()
    }

    /// Close the bus. Every subscription ends and further calls fail.
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
        self.state.subscriptions.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl BusConnection for InProcessBus {
    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<Subscription> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        validate_subject(subject, true)?;

        let (sender, receiver) = mpsc::channel(self.state.subscription_capacity);
        let id = self.state.subscriptions.lock().insert(SubscriptionEntry {
            pattern: subject.to_string(),
            queue_group: queue_group
                .filter(|group| !group.is_empty())
                .map(str::to_string),
            sender,
        });
        debug!(subject, queue_group, "subscribed");
        Ok(Subscription::new(subject, receiver).with_guard(SubscriptionGuard {
            bus: Arc::downgrade(&self.state),
            id,
        }))
    }

    async fn publish(&self, subject: &str, reply: Option<&str>, payload: Bytes) -> Result<()> {
        self.state.deliver(Message {
            subject: subject.to_string(),
            reply: reply.map(str::to_string),
            payload,
        })?;
        Ok(())
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Message> {
        let inbox = format!("{INBOX_PREFIX}.{}", uuid::Uuid::new_v4().simple());
        let mut replies = self.subscribe(&inbox, None).await?;
        let delivered = self.state.deliver(Message {
            subject: subject.to_string(),
            reply: Some(inbox),
            payload,
        })?;
        if delivered == 0 {
            return Err(BusError::NoResponders(subject.to_string()));
        }
        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout(subject.to_string())),
        }
    }
}

fn validate_subject(subject: &str, allow_wildcards: bool) -> Result<()> {
    let invalid = || BusError::InvalidSubject(subject.to_string());
    if subject.is_empty() || subject.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let tokens: Vec<&str> = subject.split('.').collect();
    for (index, token) in tokens.iter().enumerate() {
        match *token {
            "" => return Err(invalid()),
            "*" | ">" if !allow_wildcards => return Err(invalid()),
            ">" if index + 1 != tokens.len() => return Err(invalid()),
            _ => {}
        }
    }
    Ok(())
}

/// Token-wise subject match: `*` matches one token, a trailing `>` matches
/// one or more.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_matching_rules() {
        assert!(subject_matches("a.b.c", "a.b.c"));
        assert!(!subject_matches("a.b.c", "a.b"));
        assert!(subject_matches("a.*.c", "a.x.c"));
        assert!(!subject_matches("a.*", "a.x.c"));
        assert!(subject_matches("a.>", "a.x.c"));
        assert!(!subject_matches("a.>", "a"));
        assert!(subject_matches("$SYS.REQ.USER.AUTH", "$SYS.REQ.USER.AUTH"));
    }

    #[test]
    fn subject_validation() {
        assert!(validate_subject("a.b", false).is_ok());
        assert!(validate_subject("a.*", true).is_ok());
        assert!(validate_subject("a.*", false).is_err());
        assert!(validate_subject("a.>.b", true).is_err());
        assert!(validate_subject("a..b", true).is_err());
        assert!(validate_subject("a b", true).is_err());
        assert!(validate_subject("", true).is_err());
    }

    #[tokio::test]
    async fn publish_delivers_to_matching_subscribers() {
        let bus = InProcessBus::new();
        let mut exact = bus.subscribe("orders.new", None).await.expect("subscribe");
        let mut wildcard = bus.subscribe("orders.>", None).await.expect("subscribe");
        let mut other = bus.subscribe("billing.>", None).await.expect("subscribe");

        bus.publish("orders.new", Some("reply.1"), Bytes::from_static(b"o1"))
            .await
            .expect("publish");

        let msg = exact.next().await.expect("exact");
        assert_eq!(msg.reply.as_deref(), Some("reply.1"));
        assert_eq!(wildcard.next().await.expect("wildcard").payload, "o1");
        assert!(other.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn queue_group_delivers_once_per_message() {
        let bus = InProcessBus::new();
        let mut first = bus.subscribe("work", Some("pool")).await.expect("first");
        let mut second = bus.subscribe("work", Some("pool")).await.expect("second");

        for _ in 0..4 {
            bus.publish("work", None, Bytes::from_static(b"job"))
                .await
                .expect("publish");
        }

        let mut received = 0;
        while first.receiver.try_recv().is_ok() {
            received += 1;
        }
        let first_count = received;
        while second.receiver.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 4);
        assert_eq!(first_count, 2);
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let bus = InProcessBus::new();
        let mut service = bus.subscribe("echo", None).await.expect("subscribe");
        let responder = bus.clone();
        tokio::spawn(async move {
            while let Some(msg) = service.next().await {
                if let Some(reply) = msg.reply {
                    responder
                        .publish(&reply, None, msg.payload)
                        .await
                        .expect("reply");
                }
            }
        });

        let reply = bus
            .request("echo", Bytes::from_static(b"ping"), Duration::from_secs(1))
            .await
            .expect("request");
        assert_eq!(reply.payload, "ping");
        assert!(reply.subject.starts_with("_INBOX."));
    }

    #[tokio::test]
    async fn request_without_responders_fails_fast() {
        let bus = InProcessBus::new();
        let err = bus
            .request("nobody", Bytes::new(), Duration::from_secs(5))
            .await
            .expect_err("no responders");
        assert!(matches!(err, BusError::NoResponders(subject) if subject == "nobody"));
    }

    #[tokio::test]
    async fn request_times_out_without_reply() {
        let bus = InProcessBus::new();
        let _silent = bus.subscribe("silent", None).await.expect("subscribe");
        let err = bus
            .request("silent", Bytes::new(), Duration::from_millis(20))
            .await
            .expect_err("timeout");
        assert!(matches!(err, BusError::Timeout(_)));
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let bus = InProcessBus::new();
        let sub = bus.subscribe("a", None).await.expect("subscribe");
        assert_eq!(bus.subscription_count(), 1);
        sub.unsubscribe();
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_new_messages() {
        let bus = InProcessBus::with_subscription_capacity(1);
        let mut sub = bus.subscribe("a", None).await.expect("subscribe");
        bus.publish("a", None, Bytes::from_static(b"1")).await.expect("first");
        bus.publish("a", None, Bytes::from_static(b"2")).await.expect("second");

        assert_eq!(sub.next().await.expect("first").payload, "1");
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let bus = InProcessBus::new();
        let mut sub = bus.subscribe("a", None).await.expect("subscribe");
        bus.close();

        assert!(sub.next().await.is_none());
        assert!(matches!(
            bus.publish("a", None, Bytes::new()).await,
            Err(BusError::Closed)
        ));
        assert!(matches!(
            bus.subscribe("a", None).await,
            Err(BusError::Closed)
        ));
    }
}
