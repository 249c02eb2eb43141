//! Nodes: the unit entities own their endpoints through.

use crate::context::Context;
use crate::liveliness::{Entity, NodeInfo};
use crate::service::client::Client;
use crate::service::server::Service;
use crate::topic::publisher::Publisher;
use crate::topic::subscription::Subscription;
use parking_lot::Mutex;
use rozen_core::{names, Error, Gid, Profile, Result, ServiceMsg, TypeSupport};
use std::sync::Arc;
use zenoh::liveliness::LivelinessToken;
use zenoh::Wait;

/// A node: a named participant owning publishers, subscriptions, services
/// and clients. Children hold an `Arc` to their node, so a node outlives
/// its endpoints.
pub struct Node {
    context: Context,
    node_id: u32,
    entity: Entity,
    gid: Gid,
    _token: Mutex<Option<LivelinessToken>>,
}

impl Node {
    pub(crate) fn new(
        context: Context,
        node_id: u32,
        name: &str,
        namespace: &str,
    ) -> Result<Arc<Self>> {
        let entity = Entity::node(
            context.session_id(),
            node_id,
            NodeInfo {
                domain_id: context.domain_id(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                enclave: context.enclave().to_string(),
            },
        );
        let gid = entity.gid();

        let token = context
            .session()
            .liveliness()
            .declare_token(&entity.liveliness_keyexpr())
            .wait()
            .map_err(Error::transport)?;

        Ok(Arc::new(Node {
            context,
            node_id,
            entity,
            gid,
            _token: Mutex::new(Some(token)),
        }))
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.entity.node.name
    }

    /// Node namespace; empty for the root namespace.
    pub fn namespace(&self) -> &str {
        &self.entity.node.namespace
    }

    /// Fully qualified node name.
    pub fn fully_qualified_name(&self) -> String {
        if self.namespace().is_empty() {
            format!("/{}", self.name())
        } else {
            format!("{}/{}", self.namespace(), self.name())
        }
    }

    /// Node identity.
    pub fn gid(&self) -> Gid {
        self.gid
    }

    /// Node id within the context.
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// The owning context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn node_info(&self) -> NodeInfo {
        self.entity.node.clone()
    }

    /// Expand a topic or service name to its fully qualified form.
    ///
    /// Absolute names pass through, `~` expands to the node's private
    /// namespace, relative names are prefixed with the node namespace.
    pub fn resolve_name(&self, name: &str) -> Result<String> {
        names::validate_topic_name(name)?;
        if let Some(rest) = name.strip_prefix('~') {
            let rest = rest.strip_prefix('/').unwrap_or(rest);
            let base = self.fully_qualified_name();
            return Ok(if rest.is_empty() {
                base
            } else {
                format!("{base}/{rest}")
            });
        }
        if name.starts_with('/') {
            return Ok(name.to_string());
        }
        Ok(if self.namespace().is_empty() {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.namespace())
        })
    }

    /// Create a publisher on `topic`.
    pub fn create_publisher<T: TypeSupport>(
        self: &Arc<Self>,
        topic: &str,
        qos: Option<Profile>,
    ) -> Result<Publisher<T>> {
        self.context.ensure_running()?;
        let fq_topic = self.resolve_name(topic)?;
        Publisher::new(Arc::clone(self), &fq_topic, qos.unwrap_or_default())
    }

    /// Create a subscription on `topic`.
    pub fn create_subscription<T: TypeSupport>(
        self: &Arc<Self>,
        topic: &str,
        qos: Option<Profile>,
    ) -> Result<Subscription<T>> {
        self.context.ensure_running()?;
        let fq_topic = self.resolve_name(topic)?;
        Subscription::new(Arc::clone(self), &fq_topic, qos.unwrap_or_default())
    }

    /// Create a service server on `service`.
    pub fn create_service<T: ServiceMsg>(
        self: &Arc<Self>,
        service: &str,
        qos: Option<Profile>,
    ) -> Result<Service<T>> {
        self.context.ensure_running()?;
        let fq_service = self.resolve_name(service)?;
        Service::new(
            Arc::clone(self),
            &fq_service,
            qos.unwrap_or_else(Profile::services_default),
        )
    }

    /// Create a service client on `service`.
    pub fn create_client<T: ServiceMsg>(
        self: &Arc<Self>,
        service: &str,
        qos: Option<Profile>,
    ) -> Result<Client<T>> {
        self.context.ensure_running()?;
        let fq_service = self.resolve_name(service)?;
        Client::new(
            Arc::clone(self),
            &fq_service,
            qos.unwrap_or_else(Profile::services_default),
        )
    }
}
