//! Context and session lifecycle.
//!
//! A [`Context`] owns the one Zenoh session shared by every entity in the
//! process slice it manages, the shared-memory provider, the graph cache
//! and the graph guard condition. Construction primes the cache from the
//! currently live liveliness tokens and then subscribes for deltas; the
//! subscriber callback holds a weak reference to the context internals so
//! a late callback after teardown is a no-op.
//!
//! Shutdown ordering matters: the shutdown flag flips and the graph
//! subscriber is undeclared under the context mutex, but the session is
//! closed strictly outside it to avoid an AB/BA deadlock with the graph
//! ingestion callback.

use crate::config;
use crate::graph_cache::GraphCache;
use crate::liveliness::subscription_token;
use crate::node::Node;
use crate::shm::SharedMemoryProvider;
use crate::wait_set::GuardCondition;
use parking_lot::Mutex;
use rozen_core::{names, Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use zenoh::sample::SampleKind;
use zenoh::{Session, Wait};

/// Lifecycle of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not yet constructed. Exists only conceptually before `new` returns.
    Uninitialized,
    /// Fully operational.
    Running,
    /// Shutdown has begun; the session is still closing.
    ShuttingDown,
    /// The session is closed.
    Shutdown,
}

struct Lifecycle {
    state: LifecycleState,
    graph_subscriber: Option<zenoh::pubsub::Subscriber<()>>,
    nodes: Vec<Weak<Node>>,
}

pub(crate) struct ContextInner {
    session: Session,
    domain_id: u32,
    session_id: String,
    enclave: String,
    shm: Option<SharedMemoryProvider>,
    graph: Arc<GraphCache>,
    guard: Arc<GuardCondition>,
    next_entity_id: AtomicU32,
    lifecycle: Mutex<Lifecycle>,
}

impl ContextInner {
    fn update_graph(&self, kind: SampleKind, keyexpr: &str) {
        if self.lifecycle.lock().state != LifecycleState::Running {
            return;
        }
        match kind {
            SampleKind::Put => self.graph.parse_put(keyexpr),
            SampleKind::Delete => self.graph.parse_del(keyexpr),
        }
    }

    fn shutdown(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != LifecycleState::Running {
                return Ok(());
            }
            lifecycle.state = LifecycleState::ShuttingDown;
            if let Some(subscriber) = lifecycle.graph_subscriber.take() {
                if let Err(e) = subscriber.undeclare().wait() {
                    tracing::warn!("failed to undeclare graph subscriber: {e}");
                }
            }
            tracing::debug!("releasing {} node registrations", lifecycle.nodes.len());
            lifecycle.nodes.clear();
            // The session is closed outside the lock: the graph callback
            // takes this mutex, and close joins the transport threads.
        }
        if let Err(e) = self.session.close().wait() {
            tracing::warn!("failed to close session: {e}");
        }
        self.lifecycle.lock().state = LifecycleState::Shutdown;
        Ok(())
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("error shutting down context: {e}");
        }
    }
}

/// Handle to the shared session and everything scoped to it.
///
/// Cheap to clone; the underlying state is torn down when the last clone
/// and the last entity drop.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a context for the domain named by `ROS_DOMAIN_ID`.
    pub fn new() -> Result<Self> {
        Self::with_domain_id(config::domain_id_from_env())
    }

    /// Create a context for a specific domain.
    pub fn with_domain_id(domain_id: u32) -> Result<Self> {
        Self::with_config(domain_id, "", config::session_config()?)
    }

    /// Create a context from an explicit configuration.
    ///
    /// This opens the session, optionally waits for a router, builds the
    /// shared-memory provider, primes the graph cache and declares the
    /// graph subscriber.
    pub fn with_config(domain_id: u32, enclave: &str, config: zenoh::Config) -> Result<Self> {
        let use_shm = config::shm_enabled(&config);

        let session = zenoh::open(config).wait().map_err(Error::transport)?;
        let session_id = session.zid().to_string();

        if let Some(attempts) = config::router_check_attempts() {
            wait_for_router(&session, attempts);
        }

        let shm = if use_shm {
            match SharedMemoryProvider::new() {
                Ok(provider) => Some(provider),
                Err(e) => {
                    tracing::warn!("shared memory disabled: {e}");
                    None
                }
            }
        } else {
            None
        };

        let guard = GuardCondition::new();
        let graph = GraphCache::new(Arc::clone(&guard));

        let inner = Arc::new(ContextInner {
            session,
            domain_id,
            session_id,
            enclave: enclave.to_string(),
            shm,
            graph: Arc::clone(&graph),
            guard,
            next_entity_id: AtomicU32::new(0),
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::Running,
                graph_subscriber: None,
                nodes: Vec::new(),
            }),
        });

        let context = Context { inner };
        context.start_graph_discovery()?;
        Ok(context)
    }

    /// Prime the graph cache, then subscribe for deltas.
    fn start_graph_discovery(&self) -> Result<()> {
        let token = subscription_token(self.inner.domain_id);

        // The default reply handler blocks until the sender side closes,
        // which is exactly when the liveliness query completes.
        let replies = self
            .inner
            .session
            .liveliness()
            .get(&token)
            .wait()
            .map_err(Error::transport)?;
        while let Ok(reply) = replies.recv() {
            match reply.result() {
                Ok(sample) => self.inner.graph.parse_put(sample.key_expr().as_str()),
                Err(e) => tracing::debug!("liveliness bootstrap reply error: {e:?}"),
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let subscriber = self
            .inner
            .session
            .liveliness()
            .declare_subscriber(&token)
            .history(true)
            .callback(move |sample| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.update_graph(sample.kind(), sample.key_expr().as_str());
            })
            .wait()
            .map_err(Error::transport)?;

        self.inner.lifecycle.lock().graph_subscriber = Some(subscriber);
        Ok(())
    }

    /// The domain id of this context.
    pub fn domain_id(&self) -> u32 {
        self.inner.domain_id
    }

    /// The session id as a hex string.
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// The enclave associated with this context; empty when unset.
    pub fn enclave(&self) -> &str {
        &self.inner.enclave
    }

    /// The shared Zenoh session.
    pub(crate) fn session(&self) -> &Session {
        &self.inner.session
    }

    /// The shared-memory provider, when enabled.
    pub(crate) fn shm_provider(&self) -> Option<&SharedMemoryProvider> {
        self.inner.shm.as_ref()
    }

    /// The graph cache.
    pub fn graph_cache(&self) -> Arc<GraphCache> {
        Arc::clone(&self.inner.graph)
    }

    /// Guard condition raised on every graph change.
    pub fn graph_guard_condition(&self) -> Arc<GuardCondition> {
        Arc::clone(&self.inner.guard)
    }

    /// Allocate a session-unique entity id.
    pub(crate) fn allocate_entity_id(&self) -> u32 {
        self.inner.next_entity_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Fail with `Shutdown` unless the context is running.
    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.inner.lifecycle.lock().state == LifecycleState::Running {
            Ok(())
        } else {
            Err(Error::Shutdown)
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.lock().state
    }

    /// Whether shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.state() != LifecycleState::Running
    }

    /// Create a node in this context.
    pub fn create_node(&self, name: &str, namespace: Option<&str>) -> Result<Arc<Node>> {
        self.ensure_running()?;
        names::validate_node_name(name)?;
        let namespace = namespace.unwrap_or("");
        names::validate_namespace(namespace)?;

        let node_id = self.allocate_entity_id();
        let node = Node::new(self.clone(), node_id, name, namespace)?;
        self.inner.lifecycle.lock().nodes.push(Arc::downgrade(&node));
        Ok(node)
    }

    /// Shut the context down: stop graph ingestion, close the session and
    /// release every node still registered.
    ///
    /// Idempotent; entity operations fail with `Shutdown` afterwards.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown()
    }
}

/// Poll for a router at 1 Hz up to `attempts` times.
///
/// Exhaustion is demoted to a warning: the session keeps scouting in the
/// background, so the operation proceeds and connects late if a router
/// appears.
fn wait_for_router(session: &Session, attempts: u64) {
    for attempt in 0..attempts {
        let mut routers = session.info().routers_zid().wait();
        if routers.next().is_some() {
            return;
        }
        tracing::warn!(
            "no Zenoh router found (attempt {}/{attempts}); is one running?",
            attempt + 1
        );
        std::thread::sleep(Duration::from_secs(1));
    }
    tracing::warn!("router wait exhausted after {attempts} attempts, continuing without");
}
