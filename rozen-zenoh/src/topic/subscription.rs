//! Subscription engine.
//!
//! Two receive modes, selected by durability:
//!
//! - **volatile** — a plain subscriber on the topic key expression;
//! - **transient-local** — a querying subscriber: the same live
//!   subscriber plus, for every transient-local publisher the graph
//!   cache reports, one historical query against that publisher's
//!   cache prefix (consolidation none, replies accepted from any key
//!   expression).
//!
//! Each received sample has its attachment decoded (absent attachments
//! are logged and dropped), feeds per-publisher loss accounting, lands in
//! the bounded queue and wakes the attached wait set.

use crate::attachment::{now_ns, Attachment};
use crate::events::{EventKind, EventsManager};
use crate::liveliness::{Entity, EntityKind, TopicInfo};
use crate::node::Node;
use crate::qos_mapping;
use crate::wait_set::WaitSet;
use parking_lot::Mutex;
use rozen_core::{EndpointSide, Error, Gid, MessageInfo, Profile, Result, TypeSupport};
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;
use zenoh::bytes::ZBytes;
use zenoh::liveliness::LivelinessToken;
use zenoh::query::{ConsolidationMode, QueryTarget, ReplyKeyExpr};
use zenoh::Wait;

/// Effectively unbounded timeout for historical queries; replay of a
/// publisher's cache must survive arbitrarily slow links.
const HISTORY_QUERY_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

struct QueuedSample {
    payload: ZBytes,
    received_timestamp: i64,
    attachment: Attachment,
}

/// The two receive backends, sharing one enqueue and undeclare contract.
enum Receiver {
    Plain(zenoh::pubsub::Subscriber<()>),
    /// Live subscriber whose history arrives through graph-cache driven
    /// queries; the registration is removed on shutdown.
    Querying(zenoh::pubsub::Subscriber<()>),
}

impl Receiver {
    fn undeclare(self) -> zenoh::Result<()> {
        match self {
            Receiver::Plain(subscriber) | Receiver::Querying(subscriber) => {
                subscriber.undeclare().wait()
            }
        }
    }
}

struct SubscriptionState {
    queue: VecDeque<QueuedSample>,
    last_seen: HashMap<Gid, i64>,
    receiver: Option<Receiver>,
    token: Option<LivelinessToken>,
    wait_set: Option<Arc<WaitSet>>,
    data_callback: Option<Box<dyn Fn() + Send + Sync>>,
    is_shutdown: bool,
}

struct SubscriptionInner {
    node: Arc<Node>,
    entity: Entity,
    gid: Gid,
    topic_keyexpr: String,
    events: Arc<EventsManager>,
    state: Mutex<SubscriptionState>,
}

impl SubscriptionInner {
    fn qos(&self) -> &Profile {
        &self.entity.topic.as_ref().expect("endpoint entity").qos
    }

    fn handle_sample(&self, payload: ZBytes, attachment: Option<&ZBytes>) {
        let Some(attachment) = attachment else {
            tracing::warn!("dropping sample without attachment on {}", self.topic_keyexpr);
            return;
        };
        let attachment = match Attachment::decode(attachment) {
            Ok(attachment) => attachment,
            Err(e) => {
                tracing::warn!("dropping sample on {}: {e}", self.topic_keyexpr);
                return;
            }
        };

        let mut state = self.state.lock();
        if state.is_shutdown {
            return;
        }

        if let Some(last) = state.last_seen.get(&attachment.source_gid) {
            let gap = attachment.sequence_number - last;
            if gap > 1 {
                self.events.update(EventKind::MessageLost, (gap - 1) as u64);
            }
        }
        state
            .last_seen
            .insert(attachment.source_gid, attachment.sequence_number);

        let qos = self.qos();
        if qos.is_keep_last() && state.queue.len() >= qos.depth {
            tracing::debug!(
                "queue depth {} reached on {}, discarding oldest sample",
                qos.depth,
                self.topic_keyexpr
            );
            state.queue.pop_front();
        }
        state.queue.push_back(QueuedSample {
            payload,
            received_timestamp: now_ns(),
            attachment,
        });

        if let Some(callback) = &state.data_callback {
            callback();
        }
        if let Some(wait_set) = &state.wait_set {
            wait_set.trigger();
        }
    }

    /// Fetch a newly discovered publisher's cached history.
    fn query_history(self: &Arc<Self>, queryable_prefix: &str) {
        let selector = format!("{queryable_prefix}/{}", self.topic_keyexpr);
        tracing::debug!("querying publication cache over {selector}");
        let weak = Arc::downgrade(self);
        let result = self
            .node
            .context()
            .session()
            .get(&selector)
            .target(QueryTarget::All)
            .consolidation(ConsolidationMode::None)
            .accept_replies(ReplyKeyExpr::Any)
            .timeout(HISTORY_QUERY_TIMEOUT)
            .callback(move |reply| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match reply.result() {
                    Ok(sample) => {
                        inner.handle_sample(sample.payload().clone(), sample.attachment())
                    }
                    Err(e) => tracing::debug!("history reply error: {e:?}"),
                }
            })
            .wait();
        if let Err(e) = result {
            tracing::warn!("historical query over {selector} failed: {e}");
        }
    }

    fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_shutdown {
            return Ok(());
        }
        let graph = self.node.context().graph_cache();
        graph.remove_querying_subscriber(&self.topic_keyexpr, self.gid);
        graph.remove_event_callbacks(self.gid);

        if let Some(token) = state.token.take() {
            token.undeclare().wait().map_err(Error::transport)?;
        }
        if let Some(receiver) = state.receiver.take() {
            receiver.undeclare().map_err(Error::transport)?;
        }
        state.is_shutdown = true;
        Ok(())
    }
}

impl Drop for SubscriptionInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("error shutting down subscription on {}: {e}", self.topic_keyexpr);
        }
    }
}

/// A subscription on one topic.
pub struct Subscription<T: TypeSupport> {
    inner: Arc<SubscriptionInner>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: TypeSupport> Subscription<T> {
    pub(crate) fn new(node: Arc<Node>, fq_topic: &str, requested: Profile) -> Result<Self> {
        let context = node.context().clone();
        let graph = context.graph_cache();

        let peers = graph.peer_profiles(fq_topic, EntityKind::Publisher);
        let qos = qos_mapping::best_available(EndpointSide::Subscription, &requested, &peers);
        qos_mapping::validate(&qos)?;

        let entity = Entity::endpoint(
            context.session_id(),
            node.node_id(),
            context.allocate_entity_id(),
            EntityKind::Subscription,
            node.node_info(),
            TopicInfo {
                name: fq_topic.to_string(),
                type_name: T::type_name().to_string(),
                type_hash: T::type_hash().to_string(),
                qos: qos.clone(),
            },
        );
        let gid = entity.gid();
        let topic_keyexpr = entity.topic_keyexpr().expect("endpoint entity");
        let transient_local = qos_mapping::is_transient_local(&qos);

        let inner = Arc::new(SubscriptionInner {
            node,
            entity,
            gid,
            topic_keyexpr: topic_keyexpr.clone(),
            events: EventsManager::new(),
            state: Mutex::new(SubscriptionState {
                queue: VecDeque::new(),
                last_seen: HashMap::new(),
                receiver: None,
                token: None,
                wait_set: None,
                data_callback: None,
                is_shutdown: false,
            }),
        });

        let weak = Arc::downgrade(&inner);
        let subscriber = context
            .session()
            .declare_subscriber(topic_keyexpr.clone())
            .callback(move |sample| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.handle_sample(sample.payload().clone(), sample.attachment());
            })
            .wait()
            .map_err(Error::transport)?;

        let receiver = if transient_local {
            // The graph cache replays the callback for already-known
            // publishers and fires it again for each new one.
            let weak: Weak<SubscriptionInner> = Arc::downgrade(&inner);
            graph.register_querying_subscriber(
                &topic_keyexpr,
                gid,
                Arc::new(move |queryable_prefix: &str| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    inner.query_history(queryable_prefix);
                }),
            );
            Receiver::Querying(subscriber)
        } else {
            Receiver::Plain(subscriber)
        };

        let token = context
            .session()
            .liveliness()
            .declare_token(&inner.entity.liveliness_keyexpr())
            .wait()
            .map_err(Error::transport)?;

        {
            let mut state = inner.state.lock();
            state.receiver = Some(receiver);
            state.token = Some(token);
        }

        let event_sink = Arc::clone(&inner.events);
        graph.register_event_callback(gid, EventKind::IncompatibleQos, move |count| {
            event_sink.update(EventKind::IncompatibleQos, count);
        });

        Ok(Self {
            inner,
            _phantom: PhantomData,
        })
    }

    /// Take one message and its metadata.
    ///
    /// An empty queue is not an error: `Ok(None)` lets the caller re-arm
    /// its wait set.
    pub fn take(&self) -> Result<Option<(T, MessageInfo)>> {
        let Some((payload, info)) = self.take_queued()? else {
            return Ok(None);
        };
        let message = T::deserialize(&payload.to_bytes())?;
        Ok(Some((message, info)))
    }

    /// Take one message without deserializing it.
    pub fn take_serialized(&self) -> Result<Option<(Vec<u8>, MessageInfo)>> {
        let Some((payload, info)) = self.take_queued()? else {
            return Ok(None);
        };
        Ok(Some((payload.to_bytes().into_owned(), info)))
    }

    fn take_queued(&self) -> Result<Option<(ZBytes, MessageInfo)>> {
        let mut state = self.inner.state.lock();
        if state.is_shutdown {
            return Ok(None);
        }
        let Some(sample) = state.queue.pop_front() else {
            return Ok(None);
        };
        let info = MessageInfo {
            source_timestamp: sample.attachment.source_timestamp,
            received_timestamp: sample.received_timestamp,
            publication_sequence_number: sample.attachment.sequence_number,
            publisher_gid: sample.attachment.source_gid,
            from_intra_process: false,
        };
        Ok(Some((sample.payload, info)))
    }

    /// True when data is queued; otherwise records `wait_set` to be
    /// triggered by the next arrival.
    pub fn has_data_or_attach(&self, wait_set: &Arc<WaitSet>) -> bool {
        let mut state = self.inner.state.lock();
        if !state.queue.is_empty() {
            return true;
        }
        state.wait_set = Some(Arc::clone(wait_set));
        false
    }

    /// Detach any wait set and report whether the queue is empty.
    pub fn detach_and_check_empty(&self) -> bool {
        let mut state = self.inner.state.lock();
        state.wait_set = None;
        state.queue.is_empty()
    }

    /// Register (or clear) a callback fired on each enqueued sample.
    pub fn set_data_callback(&self, callback: Option<Box<dyn Fn() + Send + Sync>>) {
        self.inner.state.lock().data_callback = callback;
    }

    /// Subscription identity.
    pub fn gid(&self) -> Gid {
        self.inner.gid
    }

    /// Topic block with the effective QoS.
    pub fn topic_info(&self) -> TopicInfo {
        self.inner.entity.topic.clone().expect("endpoint entity")
    }

    /// Event counters for this subscription.
    pub fn events(&self) -> Arc<EventsManager> {
        Arc::clone(&self.inner.events)
    }

    /// Whether this subscription has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().is_shutdown
    }

    /// Undeclare the subscriber and liveliness token and deregister from
    /// the graph cache. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown()
    }
}
