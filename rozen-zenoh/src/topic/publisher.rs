//! Publisher engine.
//!
//! Publishing serializes through the type support into the best available
//! buffer (shared memory above the size threshold, then the process-wide
//! buffer pool, then a fresh allocation), stamps the attachment and hands
//! the payload to the transport with the congestion-control flags mapped
//! from the effective QoS. Transient-local publishers additionally retain
//! their history in a queryable-backed cache for late joiners.

use crate::attachment::Attachment;
use crate::events::{EventKind, EventsManager};
use crate::liveliness::{Entity, EntityKind, TopicInfo};
use crate::node::Node;
use crate::buffer_pool::BufferPool;
use crate::qos_mapping;
use crate::shm::SHM_MESSAGE_SIZE_THRESHOLD;
use crate::topic::cache::PublicationCache;
use parking_lot::Mutex;
use rozen_core::{EndpointSide, Error, Gid, Profile, Result, TypeSupport};
use std::marker::PhantomData;
use std::sync::Arc;
use zenoh::bytes::ZBytes;
use zenoh::liveliness::LivelinessToken;
use zenoh::Wait;

struct PublisherState {
    z_publisher: Option<zenoh::pubsub::Publisher<'static>>,
    cache: Option<PublicationCache>,
    token: Option<LivelinessToken>,
    sequence_number: i64,
    is_shutdown: bool,
}

struct PublisherInner {
    node: Arc<Node>,
    entity: Entity,
    gid: Gid,
    events: Arc<EventsManager>,
    state: Mutex<PublisherState>,
}

impl PublisherInner {
    fn publish_bytes(&self, encode: impl FnOnce() -> Result<ZBytes>) -> Result<()> {
        self.node.context().ensure_running()?;
        let mut state = self.state.lock();
        if state.is_shutdown {
            return Err(Error::Shutdown);
        }
        let payload = encode()?;
        state.sequence_number += 1;
        let sequence_number = state.sequence_number;
        let attachment = Attachment::new(sequence_number, self.gid).encode();

        if let Some(cache) = &state.cache {
            cache.store(payload.clone(), attachment.clone(), sequence_number);
        }

        let z_publisher = state.z_publisher.as_ref().ok_or(Error::Shutdown)?;
        if let Err(e) = z_publisher.put(payload).attachment(attachment).wait() {
            if self.node.context().session().is_closed() {
                tracing::warn!("publish on closed session dropped: {e}");
                return Ok(());
            }
            return Err(Error::transport(e));
        }
        Ok(())
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
        if let Some(token) = state.token.take() {
            token.undeclare().wait().map_err(Error::transport)?;
        }
        if let Some(mut cache) = state.cache.take() {
            cache.undeclare();
        }
        if let Some(z_publisher) = state.z_publisher.take() {
            z_publisher.undeclare().wait().map_err(Error::transport)?;
        }
        state.is_shutdown = true;
        Ok(())
    }
}

impl Drop for PublisherInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(
                "error shutting down publisher on {}: {e}",
                self.entity.topic.as_ref().map(|t| t.name.as_str()).unwrap_or("?")
            );
        }
    }
}

/// A publisher on one topic.
pub struct Publisher<T: TypeSupport> {
    inner: Arc<PublisherInner>,
    _phantom: PhantomData<fn(T)>,
}

impl<T: TypeSupport> Publisher<T> {
    pub(crate) fn new(node: Arc<Node>, fq_topic: &str, requested: Profile) -> Result<Self> {
        let context = node.context().clone();
        let graph = context.graph_cache();

        let peers = graph.peer_profiles(fq_topic, EntityKind::Subscription);
        let qos = qos_mapping::best_available(EndpointSide::Publisher, &requested, &peers);
        qos_mapping::validate(&qos)?;

        let entity = Entity::endpoint(
            context.session_id(),
            node.node_id(),
            context.allocate_entity_id(),
            EntityKind::Publisher,
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

        // Transient-local history is served from a queryable-backed cache
        // keyed under this session's id.
        let cache = if qos_mapping::is_transient_local(&qos) {
            Some(PublicationCache::new(
                context.session(),
                context.session_id(),
                &topic_keyexpr,
                qos.depth,
                qos_mapping::is_reliable(&qos),
            )?)
        } else {
            None
        };

        let z_publisher = context
            .session()
            .declare_publisher(topic_keyexpr)
            .congestion_control(qos_mapping::congestion_control(&qos))
            .reliability(qos_mapping::reliability(&qos))
            .wait()
            .map_err(Error::transport)?;

        let token = context
            .session()
            .liveliness()
            .declare_token(&entity.liveliness_keyexpr())
            .wait()
            .map_err(Error::transport)?;

        let events = EventsManager::new();
        let event_sink = Arc::clone(&events);
        graph.register_event_callback(gid, EventKind::IncompatibleQos, move |count| {
            event_sink.update(EventKind::IncompatibleQos, count);
        });

        Ok(Self {
            inner: Arc::new(PublisherInner {
                node,
                entity,
                gid,
                events,
                state: Mutex::new(PublisherState {
                    z_publisher: Some(z_publisher),
                    cache,
                    token: Some(token),
                    sequence_number: 0,
                    is_shutdown: false,
                }),
            }),
            _phantom: PhantomData,
        })
    }

    /// Serialize and publish one message.
    ///
    /// Fails with `Shutdown` after [`Publisher::shutdown`]; a put racing
    /// the session teardown is demoted to a warning.
    pub fn publish(&self, message: &T) -> Result<()> {
        let context = self.inner.node.context();
        self.inner.publish_bytes(|| {
            let size = message.serialized_size();
            if let Some(provider) = context.shm_provider() {
                if size >= SHM_MESSAGE_SIZE_THRESHOLD {
                    match provider.alloc(size) {
                        Ok(mut buffer) => {
                            message.serialize_into(&mut buffer)?;
                            return Ok(ZBytes::from(buffer));
                        }
                        Err(e) => {
                            tracing::warn!("shm allocation failed, using heap: {e}");
                        }
                    }
                }
            }
            let mut buffer = BufferPool::global().take(size);
            let written = message.serialize_into(&mut buffer)?;
            Ok(ZBytes::from(buffer[..written].to_vec()))
        })
    }

    /// Publish bytes already serialized by the caller.
    pub fn publish_serialized(&self, payload: &[u8]) -> Result<()> {
        self.inner
            .publish_bytes(|| Ok(ZBytes::from(payload.to_vec())))
    }

    /// Publisher identity.
    pub fn gid(&self) -> Gid {
        self.inner.gid
    }

    /// Topic block with the effective QoS.
    pub fn topic_info(&self) -> TopicInfo {
        self.inner.entity.topic.clone().expect("endpoint entity")
    }

    /// Event counters for this publisher.
    pub fn events(&self) -> Arc<EventsManager> {
        Arc::clone(&self.inner.events)
    }

    /// Whether this publisher has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().is_shutdown
    }

    /// Undeclare the publisher, its cache and its liveliness token.
    /// Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown()
    }
}
