//! Distributed directory of all graph participants.
//!
//! The cache is rebuilt from liveliness tokens observed on the transport:
//! every put inserts an [`Entity`] into the name indices, every delete
//! removes it from all of them atomically. Ingestion runs inside a
//! transport callback, so it never propagates errors; parse failures are
//! logged and dropped.
//!
//! Beyond the indices the cache coordinates two cross-entity concerns:
//! querying-subscriber callbacks (so transient-local subscriptions can
//! fetch history from publishers discovered later) and per-entity QoS
//! event callbacks (incompatible-peer notification detected at graph
//! level). Every mutation raises the graph guard condition.

use crate::events::EventKind;
use crate::liveliness::{Entity, EntityKind};
use crate::wait_set::GuardCondition;
use parking_lot::Mutex;
use rozen_core::{qos, Gid, Profile};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Identity of a node: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    /// Node namespace; empty for the root namespace.
    pub namespace: String,
    /// Node name.
    pub name: String,
}

/// Per-endpoint discovery record returned to API callers.
#[derive(Debug, Clone)]
pub struct EndpointInfo {
    /// Name of the enclosing node.
    pub node_name: String,
    /// Namespace of the enclosing node.
    pub node_namespace: String,
    /// Endpoint kind.
    pub kind: EntityKind,
    /// Endpoint identity.
    pub gid: Gid,
    /// Fully qualified type name.
    pub type_name: String,
    /// Type hash string.
    pub type_hash: String,
    /// Effective QoS announced by the endpoint.
    pub qos: Profile,
}

/// Callback fired with a publisher's session-id prefix when a
/// transient-local publisher appears on a registered topic.
pub type QueryingSubscriberCallback = Arc<dyn Fn(&str) + Send + Sync>;

type QosEventCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct TopicBucket {
    /// Writers (publishers or service servers), keyed by token.
    writers: HashMap<String, Arc<Entity>>,
    /// Readers (subscriptions or service clients), keyed by token.
    readers: HashMap<String, Arc<Entity>>,
}

impl TopicBucket {
    fn is_empty(&self) -> bool {
        self.writers.is_empty() && self.readers.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    /// Every live token, keyed by its key expression.
    entities: HashMap<String, Arc<Entity>>,
    by_topic: HashMap<String, TopicBucket>,
    by_service: HashMap<String, TopicBucket>,
    by_node: HashMap<NodeKey, HashSet<String>>,
    querying_subs: HashMap<(String, Gid), QueryingSubscriberCallback>,
    event_callbacks: HashMap<(Gid, EventKind), QosEventCallback>,
}

/// The graph cache. One instance per context, shared with the liveliness
/// subscriber callback.
pub struct GraphCache {
    inner: Mutex<Inner>,
    guard: Arc<GuardCondition>,
}

impl GraphCache {
    /// Create an empty cache wired to the graph guard condition.
    pub fn new(guard: Arc<GuardCondition>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            guard,
        })
    }

    /// The guard condition raised on every cache change.
    pub fn guard_condition(&self) -> &Arc<GuardCondition> {
        &self.guard
    }

    /// Ingest a liveliness token appearance.
    pub fn parse_put(&self, keyexpr: &str) {
        let entity = match Entity::parse(keyexpr) {
            Ok(entity) => Arc::new(entity),
            Err(err) => {
                tracing::warn!("ignoring unparsable liveliness token: {err}");
                return;
            }
        };

        // Deferred until the cache lock is released; callbacks may take
        // entity locks, which sit above the cache in the lock order.
        let mut querying_callbacks: Vec<(QueryingSubscriberCallback, String)> = Vec::new();
        let mut event_callbacks: Vec<QosEventCallback> = Vec::new();

        {
            let mut inner = self.inner.lock();
            if inner.entities.contains_key(keyexpr) {
                return;
            }
            inner.entities.insert(keyexpr.to_string(), Arc::clone(&entity));
            inner
                .by_node
                .entry(NodeKey {
                    namespace: entity.node.namespace.clone(),
                    name: entity.node.name.clone(),
                })
                .or_default()
                .insert(keyexpr.to_string());

            if let Some(topic) = &entity.topic {
                let writer = matches!(entity.kind, EntityKind::Publisher | EntityKind::Service);
                let index = match entity.kind {
                    EntityKind::Publisher | EntityKind::Subscription => &mut inner.by_topic,
                    _ => &mut inner.by_service,
                };
                let bucket = index.entry(topic.name.clone()).or_default();
                if writer {
                    bucket.writers.insert(keyexpr.to_string(), Arc::clone(&entity));
                } else {
                    bucket.readers.insert(keyexpr.to_string(), Arc::clone(&entity));
                }

                if entity.kind == EntityKind::Publisher
                    && crate::qos_mapping::is_transient_local(&topic.qos)
                {
                    let topic_keyexpr = entity.topic_keyexpr().unwrap_or_default();
                    for ((registered_keyexpr, _), callback) in &inner.querying_subs {
                        if *registered_keyexpr == topic_keyexpr {
                            querying_callbacks.push((Arc::clone(callback), entity.zid.clone()));
                        }
                    }
                }

                if matches!(entity.kind, EntityKind::Publisher | EntityKind::Subscription) {
                    Self::collect_incompatibilities(&inner, &entity, &mut event_callbacks);
                }
            }
        }

        for (callback, zid) in querying_callbacks {
            callback(&zid);
        }
        for callback in event_callbacks {
            callback(1);
        }
        self.guard.trigger();
    }

    /// Ingest a liveliness token deletion.
    pub fn parse_del(&self, keyexpr: &str) {
        let removed = {
            let mut inner = self.inner.lock();
            let Some(entity) = inner.entities.remove(keyexpr) else {
                return;
            };
            let node_key = NodeKey {
                namespace: entity.node.namespace.clone(),
                name: entity.node.name.clone(),
            };
            if let Some(tokens) = inner.by_node.get_mut(&node_key) {
                tokens.remove(keyexpr);
                if tokens.is_empty() {
                    inner.by_node.remove(&node_key);
                }
            }
            if let Some(topic) = &entity.topic {
                let index = match entity.kind {
                    EntityKind::Publisher | EntityKind::Subscription => &mut inner.by_topic,
                    _ => &mut inner.by_service,
                };
                if let Some(bucket) = index.get_mut(&topic.name) {
                    bucket.writers.remove(keyexpr);
                    bucket.readers.remove(keyexpr);
                    if bucket.is_empty() {
                        index.remove(&topic.name);
                    }
                }
            }
            true
        };
        if removed {
            self.guard.trigger();
        }
    }

    /// Pair the new endpoint against the opposite side of its topic and
    /// collect the incompatible-QoS callbacks to fire.
    fn collect_incompatibilities(
        inner: &Inner,
        entity: &Entity,
        out: &mut Vec<QosEventCallback>,
    ) {
        let topic = entity.topic.as_ref().expect("endpoint entity");
        let Some(bucket) = inner.by_topic.get(&topic.name) else {
            return;
        };
        let peers = if entity.kind == EntityKind::Publisher {
            &bucket.readers
        } else {
            &bucket.writers
        };
        for peer in peers.values() {
            let Some(peer_topic) = &peer.topic else {
                continue;
            };
            let (writer_qos, reader_qos) = if entity.kind == EntityKind::Publisher {
                (&topic.qos, &peer_topic.qos)
            } else {
                (&peer_topic.qos, &topic.qos)
            };
            if qos::compatibility(writer_qos, reader_qos).is_some() {
                for gid in [entity.gid(), peer.gid()] {
                    if let Some(callback) = inner
                        .event_callbacks
                        .get(&(gid, EventKind::IncompatibleQos))
                    {
                        out.push(Arc::clone(callback));
                    }
                }
            }
        }
    }

    /// Manually raise the graph guard condition.
    pub fn trigger_graph_changed(&self) {
        self.guard.trigger();
    }

    /// All topic names with every type observed on them.
    ///
    /// Mixed-type topics list all types; callers treat those as
    /// type-inconsistent.
    pub fn topic_names_and_types(&self) -> BTreeMap<String, BTreeSet<String>> {
        Self::names_and_types(&self.inner.lock().by_topic)
    }

    /// All service names with every type observed on them.
    pub fn service_names_and_types(&self) -> BTreeMap<String, BTreeSet<String>> {
        Self::names_and_types(&self.inner.lock().by_service)
    }

    fn names_and_types(
        index: &HashMap<String, TopicBucket>,
    ) -> BTreeMap<String, BTreeSet<String>> {
        let mut out = BTreeMap::new();
        for (name, bucket) in index {
            let types: &mut BTreeSet<String> = out.entry(name.clone()).or_default();
            for entity in bucket.writers.values().chain(bucket.readers.values()) {
                if let Some(topic) = &entity.topic {
                    types.insert(topic.type_name.clone());
                }
            }
        }
        out
    }

    /// Per-endpoint discovery info for one side of a topic.
    pub fn endpoint_info_for_topic(&self, name: &str, kind: EntityKind) -> Vec<EndpointInfo> {
        let inner = self.inner.lock();
        let index = match kind {
            EntityKind::Publisher | EntityKind::Subscription => &inner.by_topic,
            EntityKind::Service | EntityKind::Client => &inner.by_service,
            EntityKind::Node => return Vec::new(),
        };
        let Some(bucket) = index.get(name) else {
            return Vec::new();
        };
        bucket
            .writers
            .values()
            .chain(bucket.readers.values())
            .filter(|e| e.kind == kind)
            .filter_map(|entity| {
                let topic = entity.topic.as_ref()?;
                Some(EndpointInfo {
                    node_name: entity.node.name.clone(),
                    node_namespace: entity.node.namespace.clone(),
                    kind: entity.kind,
                    gid: entity.gid(),
                    type_name: topic.type_name.clone(),
                    type_hash: topic.type_hash.clone(),
                    qos: topic.qos.clone(),
                })
            })
            .collect()
    }

    /// QoS profiles of one side of a topic, as input to best-available
    /// resolution.
    pub fn peer_profiles(&self, name: &str, kind: EntityKind) -> Vec<Profile> {
        self.endpoint_info_for_topic(name, kind)
            .into_iter()
            .map(|info| info.qos)
            .collect()
    }

    /// Number of publishers on a topic.
    pub fn count_publishers(&self, name: &str) -> usize {
        self.count(name, EntityKind::Publisher)
    }

    /// Number of subscriptions on a topic.
    pub fn count_subscriptions(&self, name: &str) -> usize {
        self.count(name, EntityKind::Subscription)
    }

    /// Number of servers for a service.
    pub fn count_services(&self, name: &str) -> usize {
        self.count(name, EntityKind::Service)
    }

    /// Number of clients for a service.
    pub fn count_clients(&self, name: &str) -> usize {
        self.count(name, EntityKind::Client)
    }

    fn count(&self, name: &str, kind: EntityKind) -> usize {
        let inner = self.inner.lock();
        let index = match kind {
            EntityKind::Publisher | EntityKind::Subscription => &inner.by_topic,
            _ => &inner.by_service,
        };
        index
            .get(name)
            .map(|bucket| {
                bucket
                    .writers
                    .values()
                    .chain(bucket.readers.values())
                    .filter(|e| e.kind == kind)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Whether at least one server answers the service.
    pub fn service_is_available(&self, name: &str) -> bool {
        self.count_services(name) > 0
    }

    /// All node `(namespace, name)` pairs currently alive.
    pub fn node_names(&self) -> Vec<NodeKey> {
        let inner = self.inner.lock();
        let mut out: Vec<NodeKey> = inner
            .entities
            .values()
            .filter(|e| e.kind == EntityKind::Node)
            .map(|e| NodeKey {
                namespace: e.node.namespace.clone(),
                name: e.node.name.clone(),
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// All nodes with their enclaves.
    pub fn node_names_with_enclaves(&self) -> Vec<(NodeKey, String)> {
        let inner = self.inner.lock();
        let mut out: Vec<(NodeKey, String)> = inner
            .entities
            .values()
            .filter(|e| e.kind == EntityKind::Node)
            .map(|e| {
                (
                    NodeKey {
                        namespace: e.node.namespace.clone(),
                        name: e.node.name.clone(),
                    },
                    e.node.enclave.clone(),
                )
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Topic or service names and types owned by one node, filtered by
    /// endpoint kind.
    pub fn names_and_types_by_node(
        &self,
        node: &NodeKey,
        kind: EntityKind,
    ) -> BTreeMap<String, BTreeSet<String>> {
        let inner = self.inner.lock();
        let mut out = BTreeMap::new();
        let Some(tokens) = inner.by_node.get(node) else {
            return out;
        };
        for token in tokens {
            let Some(entity) = inner.entities.get(token) else {
                continue;
            };
            if entity.kind != kind {
                continue;
            }
            if let Some(topic) = &entity.topic {
                out.entry(topic.name.clone())
                    .or_insert_with(BTreeSet::new)
                    .insert(topic.type_name.clone());
            }
        }
        out
    }

    /// Register a querying-subscriber callback for `(topic_keyexpr, gid)`.
    ///
    /// The callback fires once per currently-known transient-local
    /// publisher on the topic, then again whenever a new one appears.
    pub fn register_querying_subscriber(
        &self,
        topic_keyexpr: &str,
        gid: Gid,
        callback: QueryingSubscriberCallback,
    ) {
        let existing: Vec<String> = {
            let mut inner = self.inner.lock();
            inner
                .querying_subs
                .insert((topic_keyexpr.to_string(), gid), Arc::clone(&callback));
            inner
                .entities
                .values()
                .filter(|e| {
                    e.kind == EntityKind::Publisher
                        && e.topic
                            .as_ref()
                            .is_some_and(|t| crate::qos_mapping::is_transient_local(&t.qos))
                        && e.topic_keyexpr().as_deref() == Some(topic_keyexpr)
                })
                .map(|e| e.zid.clone())
                .collect()
        };
        for zid in existing {
            callback(&zid);
        }
    }

    /// Remove a querying-subscriber registration.
    pub fn remove_querying_subscriber(&self, topic_keyexpr: &str, gid: Gid) {
        self.inner
            .lock()
            .querying_subs
            .remove(&(topic_keyexpr.to_string(), gid));
    }

    /// Register a QoS event callback for one entity.
    pub fn register_event_callback(
        &self,
        gid: Gid,
        kind: EventKind,
        callback: impl Fn(u64) + Send + Sync + 'static,
    ) {
        self.inner
            .lock()
            .event_callbacks
            .insert((gid, kind), Arc::new(callback));
    }

    /// Remove every event callback registered for `gid`.
    pub fn remove_event_callbacks(&self, gid: Gid) {
        self.inner
            .lock()
            .event_callbacks
            .retain(|(g, _), _| *g != gid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveliness::{NodeInfo, TopicInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> Arc<GraphCache> {
        GraphCache::new(GuardCondition::new())
    }

    fn node_token(zid: &str, name: &str) -> String {
        Entity::node(
            zid,
            0,
            NodeInfo {
                domain_id: 0,
                namespace: String::new(),
                name: name.to_string(),
                enclave: String::new(),
            },
        )
        .liveliness_keyexpr()
    }

    fn endpoint(zid: &str, eid: u32, kind: EntityKind, topic: &str, qos: Profile) -> Entity {
        Entity::endpoint(
            zid,
            0,
            eid,
            kind,
            NodeInfo {
                domain_id: 0,
                namespace: String::new(),
                name: "tester".to_string(),
                enclave: String::new(),
            },
            TopicInfo {
                name: topic.to_string(),
                type_name: "std_msgs::msg::dds_::String_".to_string(),
                type_hash: "RIHS01_ab".to_string(),
                qos,
            },
        )
    }

    #[test]
    fn put_then_delete_removes_everywhere() {
        let cache = cache();
        let entity = endpoint("sess1", 10, EntityKind::Publisher, "/chatter", Profile::default());
        let token = entity.liveliness_keyexpr();

        cache.parse_put(&token);
        assert_eq!(cache.count_publishers("/chatter"), 1);
        assert_eq!(cache.topic_names_and_types().len(), 1);

        cache.parse_del(&token);
        assert_eq!(cache.count_publishers("/chatter"), 0);
        assert!(cache.topic_names_and_types().is_empty());
        assert!(cache
            .names_and_types_by_node(
                &NodeKey {
                    namespace: String::new(),
                    name: "tester".to_string()
                },
                EntityKind::Publisher
            )
            .is_empty());
    }

    #[test]
    fn unparsable_tokens_are_ignored() {
        let cache = cache();
        cache.parse_put("garbage/with/slashes");
        cache.parse_del("garbage/with/slashes");
        assert!(cache.topic_names_and_types().is_empty());
    }

    #[test]
    fn duplicate_put_is_idempotent() {
        let cache = cache();
        let token = endpoint("s", 10, EntityKind::Publisher, "/t", Profile::default())
            .liveliness_keyexpr();
        cache.parse_put(&token);
        cache.parse_put(&token);
        assert_eq!(cache.count_publishers("/t"), 1);
    }

    #[test]
    fn counts_are_per_kind() {
        let cache = cache();
        for (eid, kind) in [
            (10, EntityKind::Publisher),
            (11, EntityKind::Publisher),
            (12, EntityKind::Subscription),
        ] {
            cache.parse_put(
                &endpoint("s", eid, kind, "/chatter", Profile::default()).liveliness_keyexpr(),
            );
        }
        assert_eq!(cache.count_publishers("/chatter"), 2);
        assert_eq!(cache.count_subscriptions("/chatter"), 1);
        assert_eq!(cache.count_publishers("/other"), 0);
    }

    #[test]
    fn services_indexed_separately() {
        let cache = cache();
        cache.parse_put(
            &endpoint("s", 10, EntityKind::Service, "/add", Profile::services_default())
                .liveliness_keyexpr(),
        );
        cache.parse_put(
            &endpoint("s", 11, EntityKind::Client, "/add", Profile::services_default())
                .liveliness_keyexpr(),
        );
        assert!(cache.service_is_available("/add"));
        assert_eq!(cache.count_services("/add"), 1);
        assert_eq!(cache.count_clients("/add"), 1);
        assert!(cache.topic_names_and_types().is_empty());
        assert_eq!(cache.service_names_and_types().len(), 1);
    }

    #[test]
    fn mixed_types_are_all_listed() {
        let cache = cache();
        let mut a = endpoint("s1", 10, EntityKind::Publisher, "/t", Profile::default());
        cache.parse_put(&a.liveliness_keyexpr());
        a.zid = "s2".to_string();
        if let Some(topic) = &mut a.topic {
            topic.type_name = "other_msgs::msg::dds_::Other_".to_string();
        }
        cache.parse_put(&a.liveliness_keyexpr());

        let types = &cache.topic_names_and_types()["/t"];
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn node_enumeration() {
        let cache = cache();
        cache.parse_put(&node_token("s1", "alpha"));
        cache.parse_put(&node_token("s2", "beta"));
        let names = cache.node_names();
        assert_eq!(names.len(), 2);
        assert!(names.iter().any(|k| k.name == "alpha"));

        cache.parse_del(&node_token("s2", "beta"));
        assert_eq!(cache.node_names().len(), 1);
    }

    #[test]
    fn endpoint_info_carries_qos_and_gid() {
        let cache = cache();
        let entity = endpoint("sess", 10, EntityKind::Publisher, "/t", Profile::transient_local(5));
        cache.parse_put(&entity.liveliness_keyexpr());

        let infos = cache.endpoint_info_for_topic("/t", EntityKind::Publisher);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].gid, entity.gid());
        assert_eq!(infos[0].qos.depth, 5);
        assert!(cache
            .endpoint_info_for_topic("/t", EntityKind::Subscription)
            .is_empty());
    }

    #[test]
    fn querying_subscriber_fires_for_existing_and_new_publishers() {
        let cache = cache();
        let existing = endpoint("zid-a", 10, EntityKind::Publisher, "/tf", Profile::transient_local(5));
        cache.parse_put(&existing.liveliness_keyexpr());

        let topic_keyexpr = existing.topic_keyexpr().unwrap();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired2 = Arc::clone(&fired);
        cache.register_querying_subscriber(
            &topic_keyexpr,
            Gid([1; 16]),
            Arc::new(move |zid: &str| fired2.lock().push(zid.to_string())),
        );
        assert_eq!(*fired.lock(), vec!["zid-a".to_string()]);

        let mut late = existing.clone();
        late.zid = "zid-b".to_string();
        cache.parse_put(&late.liveliness_keyexpr());
        assert_eq!(fired.lock().len(), 2);
        assert_eq!(fired.lock()[1], "zid-b");

        // Volatile publishers never fire the callback.
        let volatile = endpoint("zid-c", 11, EntityKind::Publisher, "/tf", Profile::default());
        cache.parse_put(&volatile.liveliness_keyexpr());
        assert_eq!(fired.lock().len(), 2);

        cache.remove_querying_subscriber(&topic_keyexpr, Gid([1; 16]));
        let mut another = existing.clone();
        another.zid = "zid-d".to_string();
        cache.parse_put(&another.liveliness_keyexpr());
        assert_eq!(fired.lock().len(), 2);
    }

    #[test]
    fn incompatible_qos_fires_event_callbacks() {
        let cache = cache();
        let sub = endpoint("s1", 10, EntityKind::Subscription, "/t", Profile::default());
        cache.parse_put(&sub.liveliness_keyexpr());

        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        cache.register_event_callback(sub.gid(), EventKind::IncompatibleQos, move |n| {
            hits2.fetch_add(n as usize, Ordering::SeqCst);
        });

        // A best-effort writer cannot satisfy the reliable reader.
        let pub_entity = endpoint("s2", 10, EntityKind::Publisher, "/t", Profile::sensor_data());
        cache.parse_put(&pub_entity.liveliness_keyexpr());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        cache.remove_event_callbacks(sub.gid());
        let pub2 = endpoint("s3", 10, EntityKind::Publisher, "/t", Profile::sensor_data());
        cache.parse_put(&pub2.liveliness_keyexpr());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_condition_raised_on_changes() {
        let guard = GuardCondition::new();
        let cache = GraphCache::new(Arc::clone(&guard));
        assert!(!guard.detach_and_take_triggered());

        cache.parse_put(&node_token("s", "n"));
        assert!(guard.detach_and_take_triggered());

        cache.parse_del(&node_token("s", "n"));
        assert!(guard.detach_and_take_triggered());
    }

    #[test]
    fn names_and_types_by_node_filters_kind() {
        let cache = cache();
        cache.parse_put(
            &endpoint("s", 10, EntityKind::Publisher, "/a", Profile::default())
                .liveliness_keyexpr(),
        );
        cache.parse_put(
            &endpoint("s", 11, EntityKind::Subscription, "/b", Profile::default())
                .liveliness_keyexpr(),
        );
        let key = NodeKey {
            namespace: String::new(),
            name: "tester".to_string(),
        };
        let pubs = cache.names_and_types_by_node(&key, EntityKind::Publisher);
        assert!(pubs.contains_key("/a"));
        assert!(!pubs.contains_key("/b"));
    }
}
