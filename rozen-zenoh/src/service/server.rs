//! Service server engine.
//!
//! A server declares a complete queryable on its service key expression
//! plus a liveliness token. Incoming queries queue under the same
//! keep-last/keep-all policy as subscriptions; taking a request stashes
//! the live query handle under the client's GID and sequence so the
//! reply can be routed back later. Replying to a request whose handle is
//! gone (the client timed out or was dropped) is a silent no-op.

use crate::attachment::{now_ns, Attachment};
use crate::buffer_pool::BufferPool;
use crate::events::EventsManager;
use crate::liveliness::{Entity, EntityKind, TopicInfo};
use crate::node::Node;
use crate::qos_mapping;
use crate::wait_set::WaitSet;
use parking_lot::Mutex;
use rozen_core::{Error, Gid, Profile, RequestHeader, Result, ServiceMsg, TypeSupport};
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;
use zenoh::bytes::ZBytes;
use zenoh::liveliness::LivelinessToken;
use zenoh::query::{Query, Queryable};
use zenoh::Wait;

struct QueuedQuery {
    query: Query,
    received_timestamp: i64,
}

struct ServiceState {
    queue: VecDeque<QueuedQuery>,
    pending: HashMap<Gid, HashMap<i64, Query>>,
    queryable: Option<Queryable<()>>,
    token: Option<LivelinessToken>,
    wait_set: Option<Arc<WaitSet>>,
    data_callback: Option<Box<dyn Fn() + Send + Sync>>,
    is_shutdown: bool,
}

struct ServiceInner {
    node: Arc<Node>,
    entity: Entity,
    gid: Gid,
    events: Arc<EventsManager>,
    state: Mutex<ServiceState>,
}

impl ServiceInner {
    fn qos(&self) -> &Profile {
        &self.entity.topic.as_ref().expect("endpoint entity").qos
    }

    fn add_query(&self, query: Query) {
        let mut state = self.state.lock();
        if state.is_shutdown {
            tracing::debug!("request ignored, service is shut down");
            return;
        }
        let qos = self.qos();
        if qos.is_keep_last() && state.queue.len() >= qos.depth {
            tracing::debug!("query queue depth {} reached, discarding oldest", qos.depth);
            state.queue.pop_front();
        }
        state.queue.push_back(QueuedQuery {
            query,
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
        state.pending.clear();
        state.queue.clear();
        if let Some(token) = state.token.take() {
            token.undeclare().wait().map_err(Error::transport)?;
        }
        if let Some(queryable) = state.queryable.take() {
            queryable.undeclare().wait().map_err(Error::transport)?;
        }
        state.is_shutdown = true;
        Ok(())
    }
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(
                "error shutting down service {}: {e}",
                self.entity.topic.as_ref().map(|t| t.name.as_str()).unwrap_or("?")
            );
        }
    }
}

/// A service server.
pub struct Service<T: ServiceMsg> {
    inner: Arc<ServiceInner>,
    _phantom: PhantomData<fn(T)>,
}

impl<T: ServiceMsg> Service<T> {
    pub(crate) fn new(node: Arc<Node>, fq_service: &str, requested: Profile) -> Result<Self> {
        let context = node.context().clone();
        qos_mapping::validate(&requested)?;

        let entity = Entity::endpoint(
            context.session_id(),
            node.node_id(),
            context.allocate_entity_id(),
            EntityKind::Service,
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

        let inner = Arc::new(ServiceInner {
            node,
            entity,
            gid,
            events: EventsManager::new(),
            state: Mutex::new(ServiceState {
                queue: VecDeque::new(),
                pending: HashMap::new(),
                queryable: None,
                token: None,
                wait_set: None,
                data_callback: None,
                is_shutdown: false,
            }),
        });

        let weak = Arc::downgrade(&inner);
        let queryable = context
            .session()
            .declare_queryable(service_keyexpr)
            .complete(true)
            .callback(move |query| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.add_query(query);
            })
            .wait()
            .map_err(Error::transport)?;

        let token = context
            .session()
            .liveliness()
            .declare_token(&inner.entity.liveliness_keyexpr())
            .wait()
            .map_err(Error::transport)?;

        {
            let mut state = inner.state.lock();
            state.queryable = Some(queryable);
            state.token = Some(token);
        }

        Ok(Self {
            inner,
            _phantom: PhantomData,
        })
    }

    /// Take one request, keeping its reply handle for `send_response`.
    ///
    /// `Ok(None)` when no request is queued.
    pub fn take_request(&self) -> Result<Option<(T::Request, RequestHeader)>> {
        let queued = {
            let mut state = self.inner.state.lock();
            if state.is_shutdown {
                return Ok(None);
            }
            let Some(queued) = state.queue.pop_front() else {
                return Ok(None);
            };
            queued
        };

        let payload = queued
            .query
            .payload()
            .ok_or_else(|| Error::DeserializationFailed("query without payload".to_string()))?
            .to_bytes();
        let request = T::Request::deserialize(&payload)?;

        let attachment_bytes = queued.query.attachment().ok_or_else(|| {
            Error::MalformedAttachment("request query without attachment".to_string())
        })?;
        let attachment = Attachment::decode(attachment_bytes)?;

        let header = RequestHeader {
            writer_guid: attachment.source_gid,
            sequence_number: attachment.sequence_number,
            source_timestamp: attachment.source_timestamp,
            received_timestamp: queued.received_timestamp,
        };

        self.inner
            .state
            .lock()
            .pending
            .entry(attachment.source_gid)
            .or_default()
            .insert(attachment.sequence_number, queued.query);

        Ok(Some((request, header)))
    }

    /// Route a response back to the request identified by `header`.
    ///
    /// A missing reply handle means the client already gave up; the call
    /// succeeds without sending anything.
    pub fn send_response(&self, header: &RequestHeader, response: &T::Response) -> Result<()> {
        let query = {
            let mut state = self.inner.state.lock();
            if state.is_shutdown {
                return Err(Error::Shutdown);
            }
            let Some(by_sequence) = state.pending.get_mut(&header.writer_guid) else {
                tracing::debug!("no pending request for {}, dropping response", header.writer_guid);
                return Ok(());
            };
            let query = by_sequence.remove(&header.sequence_number);
            if by_sequence.is_empty() {
                state.pending.remove(&header.writer_guid);
            }
            match query {
                Some(query) => query,
                None => {
                    tracing::debug!(
                        "no pending sequence {} for {}, dropping response",
                        header.sequence_number,
                        header.writer_guid
                    );
                    return Ok(());
                }
            }
        };

        let size = response.serialized_size();
        let mut buffer = BufferPool::global().take(size);
        let written = response.serialize_into(&mut buffer)?;

        // The reply echoes the request's sequence and client identity with
        // a fresh source timestamp.
        let attachment = Attachment {
            sequence_number: header.sequence_number,
            source_timestamp: now_ns(),
            source_gid: header.writer_guid,
        };

        query
            .reply(query.key_expr().clone(), ZBytes::from(buffer[..written].to_vec()))
            .attachment(attachment.encode())
            .wait()
            .map_err(Error::transport)
    }

    /// True when a request is queued; otherwise records `wait_set` to be
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

    /// Register (or clear) a callback fired on each queued request.
    pub fn set_data_callback(&self, callback: Option<Box<dyn Fn() + Send + Sync>>) {
        self.inner.state.lock().data_callback = callback;
    }

    /// Server identity.
    pub fn gid(&self) -> Gid {
        self.inner.gid
    }

    /// Topic block with the effective QoS.
    pub fn topic_info(&self) -> TopicInfo {
        self.inner.entity.topic.clone().expect("endpoint entity")
    }

    /// Event counters for this server.
    pub fn events(&self) -> Arc<EventsManager> {
        Arc::clone(&self.inner.events)
    }

    /// Whether this server has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().is_shutdown
    }

    /// Undeclare the queryable and liveliness token. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown()
    }
}
