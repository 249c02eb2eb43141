//! Service client engine.
//!
//! A request is a query targeted at every complete queryable on the
//! service key expression, carrying the client's GID and next sequence
//! number in its attachment. Replies land on a bounded queue in arrival
//! order; taking one fills the response header from the reply attachment.
//! Dropping the client undeclares its liveliness token and lets any
//! in-flight replies fall on the floor.

use crate::attachment::{now_ns, Attachment};
use crate::buffer_pool::BufferPool;
use crate::events::EventsManager;
use crate::liveliness::{Entity, EntityKind, TopicInfo};
use crate::node::Node;
use crate::qos_mapping;
use crate::wait_set::WaitSet;
use parking_lot::Mutex;
use rozen_core::{Error, Gid, Profile, ResponseHeader, Result, ServiceMsg, TypeSupport};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use zenoh::bytes::ZBytes;
use zenoh::liveliness::LivelinessToken;
use zenoh::query::{ConsolidationMode, QueryTarget, Reply};
use zenoh::Wait;

/// Effectively unbounded query timeout; services may be long-running.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

struct QueuedReply {
    reply: Reply,
    received_timestamp: i64,
}

struct ClientState {
    replies: VecDeque<QueuedReply>,
    sequence_number: i64,
    token: Option<LivelinessToken>,
    wait_set: Option<Arc<WaitSet>>,
    data_callback: Option<Box<dyn Fn() + Send + Sync>>,
    is_shutdown: bool,
}

struct ClientInner {
    node: Arc<Node>,
    entity: Entity,
    gid: Gid,
    service_keyexpr: String,
    events: Arc<EventsManager>,
    state: Mutex<ClientState>,
}

impl ClientInner {
    fn qos(&self) -> &Profile {
        &self.entity.topic.as_ref().expect("endpoint entity").qos
    }

    fn add_reply(&self, reply: Reply) {
        let mut state = self.state.lock();
        if state.is_shutdown {
            return;
        }
        let qos = self.qos();
        if qos.is_keep_last() && state.replies.len() >= qos.depth {
            tracing::debug!("reply queue depth {} reached, discarding oldest", qos.depth);
            state.replies.pop_front();
        }
        state.replies.push_back(QueuedReply {
            reply,
            received_timestamp: now_ns(),
        });
        if let Some(callback) = &state.data_callback {
            callback();
        }
        if let Some(wait_set) = &state.wait_set {
            wait_set.trigger();
        }
    }

    fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_shutdown {
            return Ok(());
        }
        self.node
            .context()
            .graph_cache()
            .remove_event_callbacks(self.gid);
        state.replies.clear();
        if let Some(token) = state.token.take() {
            token.undeclare().wait().map_err(Error::transport)?;
        }
        state.is_shutdown = true;
        Ok(())
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("error shutting down client for {}: {e}", self.service_keyexpr);
        }
    }
}

/// A service client.
pub struct Client<T: ServiceMsg> {
    inner: Arc<ClientInner>,
    _phantom: PhantomData<fn(T)>,
}

impl<T: ServiceMsg> Client<T> {
    pub(crate) fn new(node: Arc<Node>, fq_service: &str, requested: Profile) -> Result<Self> {
        let context = node.context().clone();
        qos_mapping::validate(&requested)?;

        let entity = Entity::endpoint(
            context.session_id(),
            node.node_id(),
            context.allocate_entity_id(),
            EntityKind::Client,
            node.node_info(),
            TopicInfo {
                name: fq_service.to_string(),
                type_name: T::service_type_name().to_string(),
                type_hash: T::service_type_hash().to_string(),
                qos: requested,
            },
        );
        let gid = entity.gid();
        let service_keyexpr = entity.topic_keyexpr().expect("endpoint entity");

        let token = context
            .session()
            .liveliness()
            .declare_token(&entity.liveliness_keyexpr())
            .wait()
            .map_err(Error::transport)?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                node,
                entity,
                gid,
                service_keyexpr,
                events: EventsManager::new(),
                state: Mutex::new(ClientState {
                    replies: VecDeque::new(),
                    sequence_number: 0,
                    token: Some(token),
                    wait_set: None,
                    data_callback: None,
                    is_shutdown: false,
                }),
            }),
            _phantom: PhantomData,
        })
    }

    /// Issue a request, returning its sequence number.
    pub fn send_request(&self, request: &T::Request) -> Result<i64> {
        self.inner.node.context().ensure_running()?;
        let sequence_number = {
            let mut state = self.inner.state.lock();
            if state.is_shutdown {
                return Err(Error::Shutdown);
            }
            state.sequence_number += 1;
            state.sequence_number
        };

        let size = request.serialized_size();
        let mut buffer = BufferPool::global().take(size);
        let written = request.serialize_into(&mut buffer)?;

        let attachment = Attachment::new(sequence_number, self.inner.gid);

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .node
            .context()
            .session()
            .get(&self.inner.service_keyexpr)
            .payload(ZBytes::from(buffer[..written].to_vec()))
            .attachment(attachment.encode())
            .target(QueryTarget::AllComplete)
            .consolidation(ConsolidationMode::None)
            .timeout(REQUEST_TIMEOUT)
            .callback(move |reply| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.add_reply(reply);
            })
            .wait()
            .map_err(Error::transport)?;

        Ok(sequence_number)
    }

    /// Take one response and its metadata.
    ///
    /// `Ok(None)` when no reply is queued.
    pub fn take_response(&self) -> Result<Option<(T::Response, ResponseHeader)>> {
        let queued = {
            let mut state = self.inner.state.lock();
            if state.is_shutdown {
                return Ok(None);
            }
            let Some(queued) = state.replies.pop_front() else {
                return Ok(None);
            };
            queued
        };

        let sample = queued
            .reply
            .result()
            .map_err(|e| Error::Transport(format!("service replied with an error: {e:?}")))?;
        let attachment_bytes = sample.attachment().ok_or_else(|| {
            Error::MalformedAttachment("reply without attachment".to_string())
        })?;
        let attachment = Attachment::decode(attachment_bytes)?;

        let response = T::Response::deserialize(&sample.payload().to_bytes())?;
        let header = ResponseHeader {
            writer_guid: attachment.source_gid,
            sequence_number: attachment.sequence_number,
            source_timestamp: attachment.source_timestamp,
            received_timestamp: queued.received_timestamp,
        };
        Ok(Some((response, header)))
    }

    /// Whether at least one server currently answers this service.
    pub fn service_is_available(&self) -> bool {
        let name = &self.inner.entity.topic.as_ref().expect("endpoint entity").name;
        self.inner
            .node
            .context()
            .graph_cache()
            .service_is_available(name)
    }

    /// True when a reply is queued; otherwise records `wait_set` to be
    /// triggered by the next arrival.
    pub fn has_data_or_attach(&self, wait_set: &Arc<WaitSet>) -> bool {
        let mut state = self.inner.state.lock();
        if !state.replies.is_empty() {
            return true;
        }
        state.wait_set = Some(Arc::clone(wait_set));
        false
    }

    /// Detach any wait set and report whether the queue is empty.
    pub fn detach_and_check_empty(&self) -> bool {
        let mut state = self.inner.state.lock();
        state.wait_set = None;
        state.replies.is_empty()
    }

    /// Register (or clear) a callback fired on each queued reply.
    pub fn set_data_callback(&self, callback: Option<Box<dyn Fn() + Send + Sync>>) {
        self.inner.state.lock().data_callback = callback;
    }

    /// Client identity.
    pub fn gid(&self) -> Gid {
        self.inner.gid
    }

    /// Topic block with the effective QoS.
    pub fn topic_info(&self) -> TopicInfo {
        self.inner.entity.topic.clone().expect("endpoint entity")
    }

    /// Event counters for this client.
    pub fn events(&self) -> Arc<EventsManager> {
        Arc::clone(&self.inner.events)
    }

    /// Whether this client has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().is_shutdown
    }

    /// Undeclare the liveliness token and abandon pending replies.
    /// Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown()
    }
}
