//! Entity descriptors and their liveliness key-expression codec.
//!
//! Every participant announces itself by declaring a liveliness token
//! whose key expression losslessly encodes an [`Entity`]:
//!
//! ```text
//! @ros2_lv/<domain>/<zid>/<nid>/<eid>/<kind>/<ns>/<node>/<enclave>[/<topic>/<type>/<hash>/<qos>]
//! ```
//!
//! Slashes inside a segment are mangled to `%` (an empty segment becomes a
//! bare `%`) so the segment count stays fixed. The `@ros2_lv` literal, the
//! domain id position and the kind codes `NN`/`MP`/`MS`/`SS`/`SC` are wire
//! contract and must not change.

use rozen_core::{
    DurabilityPolicy, Error, Gid, HistoryPolicy, LivelinessPolicy, Profile, ReliabilityPolicy,
    Result,
};
use std::time::Duration;

/// Hermetic namespace prefix for adapter liveliness tokens.
pub const LIVELINESS_PREFIX: &str = "@ros2_lv";

/// Kind of graph participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A node.
    Node,
    /// A message publisher.
    Publisher,
    /// A message subscription.
    Subscription,
    /// A service server.
    Service,
    /// A service client.
    Client,
}

impl EntityKind {
    /// Two-character wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Node => "NN",
            Self::Publisher => "MP",
            Self::Subscription => "MS",
            Self::Service => "SS",
            Self::Client => "SC",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "NN" => Some(Self::Node),
            "MP" => Some(Self::Publisher),
            "MS" => Some(Self::Subscription),
            "SS" => Some(Self::Service),
            "SC" => Some(Self::Client),
            _ => None,
        }
    }
}

/// Identity of the node enclosing an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Domain id partitioning the mesh.
    pub domain_id: u32,
    /// Node namespace; empty for the root namespace.
    pub namespace: String,
    /// Node name.
    pub name: String,
    /// Security enclave; empty when unset.
    pub enclave: String,
}

/// Topic/service block carried by non-node entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    /// Fully qualified topic or service name.
    pub name: String,
    /// Fully qualified type name.
    pub type_name: String,
    /// Type hash string.
    pub type_hash: String,
    /// Effective QoS of the endpoint.
    pub qos: Profile,
}

/// Canonical record of one graph participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Session id (hex) of the hosting transport session.
    pub zid: String,
    /// Node-scoped id, unique within the session.
    pub nid: u32,
    /// Entity-scoped id, unique within the session. Equals `nid` for nodes.
    pub eid: u32,
    /// Participant kind.
    pub kind: EntityKind,
    /// Enclosing node.
    pub node: NodeInfo,
    /// Topic block; `None` for nodes.
    pub topic: Option<TopicInfo>,
}

impl Entity {
    /// Build a node entity.
    pub fn node(zid: impl Into<String>, nid: u32, node: NodeInfo) -> Self {
        Self {
            zid: zid.into(),
            nid,
            eid: nid,
            kind: EntityKind::Node,
            node,
            topic: None,
        }
    }

    /// Build an endpoint entity.
    pub fn endpoint(
        zid: impl Into<String>,
        nid: u32,
        eid: u32,
        kind: EntityKind,
        node: NodeInfo,
        topic: TopicInfo,
    ) -> Self {
        Self {
            zid: zid.into(),
            nid,
            eid,
            kind,
            node,
            topic: Some(topic),
        }
    }

    /// Deterministic global identifier of this entity.
    pub fn gid(&self) -> Gid {
        Gid::from_session_entity(&self.zid, self.eid as u64)
    }

    /// The data-plane key expression of this endpoint, or `None` for nodes.
    pub fn topic_keyexpr(&self) -> Option<String> {
        self.topic.as_ref().map(|t| {
            topic_keyexpr(self.node.domain_id, &t.name, &t.type_name, &t.type_hash)
        })
    }

    /// Project this descriptor onto its liveliness key expression.
    pub fn liveliness_keyexpr(&self) -> String {
        let mut key = format!(
            "{}/{}/{}/{}/{}/{}/{}/{}/{}",
            LIVELINESS_PREFIX,
            self.node.domain_id,
            self.zid,
            self.nid,
            self.eid,
            self.kind.code(),
            mangle(&self.node.namespace),
            mangle(&self.node.name),
            mangle(&self.node.enclave),
        );
        if let Some(topic) = &self.topic {
            key.push('/');
            key.push_str(&mangle(&topic.name));
            key.push('/');
            key.push_str(&topic.type_name);
            key.push('/');
            key.push_str(&topic.type_hash);
            key.push('/');
            key.push_str(&qos_to_keyexpr(&topic.qos));
        }
        key
    }

    /// Parse a liveliness key expression back into a descriptor.
    pub fn parse(keyexpr: &str) -> Result<Self> {
        let parts: Vec<&str> = keyexpr.split('/').collect();
        if parts.len() != 9 && parts.len() != 13 {
            return Err(malformed(keyexpr, "unexpected segment count"));
        }
        if parts[0] != LIVELINESS_PREFIX {
            return Err(malformed(keyexpr, "missing @ros2_lv prefix"));
        }
        let domain_id: u32 = parts[1]
            .parse()
            .map_err(|_| malformed(keyexpr, "domain id is not an integer"))?;
        let zid = parts[2].to_string();
        let nid: u32 = parts[3]
            .parse()
            .map_err(|_| malformed(keyexpr, "node id is not an integer"))?;
        let eid: u32 = parts[4]
            .parse()
            .map_err(|_| malformed(keyexpr, "entity id is not an integer"))?;
        let kind = EntityKind::from_code(parts[5])
            .ok_or_else(|| malformed(keyexpr, "unknown entity kind"))?;
        let node = NodeInfo {
            domain_id,
            namespace: unmangle(parts[6]),
            name: unmangle(parts[7]),
            enclave: unmangle(parts[8]),
        };

        if kind == EntityKind::Node {
            if parts.len() != 9 {
                return Err(malformed(keyexpr, "node token with topic segments"));
            }
            return Ok(Self {
                zid,
                nid,
                eid,
                kind,
                node,
                topic: None,
            });
        }
        if parts.len() != 13 {
            return Err(malformed(keyexpr, "endpoint token without topic segments"));
        }
        let topic = TopicInfo {
            name: unmangle(parts[9]),
            type_name: parts[10].to_string(),
            type_hash: parts[11].to_string(),
            qos: keyexpr_to_qos(parts[12])
                .ok_or_else(|| malformed(keyexpr, "unparsable qos segment"))?,
        };
        Ok(Self {
            zid,
            nid,
            eid,
            kind,
            node,
            topic: Some(topic),
        })
    }
}

fn malformed(keyexpr: &str, why: &str) -> Error {
    Error::MalformedToken(format!("{why}: '{keyexpr}'"))
}

/// Key expression every context subscribes to for graph discovery.
pub fn subscription_token(domain_id: u32) -> String {
    format!("{LIVELINESS_PREFIX}/{domain_id}/**")
}

/// Data-plane key expression for a topic or service.
///
/// `<domain>/<name-without-leading-slash>/<type>/<hash>`.
pub fn topic_keyexpr(domain_id: u32, fq_name: &str, type_name: &str, type_hash: &str) -> String {
    let name = fq_name.strip_prefix('/').unwrap_or(fq_name);
    format!("{domain_id}/{name}/{type_name}/{type_hash}")
}

/// Mangle a name for use as one key-expression segment.
pub fn mangle(name: &str) -> String {
    if name.is_empty() {
        "%".to_string()
    } else {
        name.replace('/', "%")
    }
}

/// Inverse of [`mangle`].
pub fn unmangle(segment: &str) -> String {
    if segment == "%" {
        String::new()
    } else {
        segment.replace('%', "/")
    }
}

// Wire defaults for the qos segment. Fields equal to these are encoded
// empty so that common profiles stay short.
const WIRE_DEFAULT_RELIABILITY: u8 = 1; // Reliable
const WIRE_DEFAULT_DURABILITY: u8 = 2; // Volatile
const WIRE_DEFAULT_HISTORY: u8 = 1; // KeepLast
const WIRE_DEFAULT_DEPTH: usize = 42;
const WIRE_DEFAULT_LIVELINESS: u8 = 1; // Automatic

fn reliability_code(p: ReliabilityPolicy) -> u8 {
    match p {
        ReliabilityPolicy::SystemDefault => 0,
        ReliabilityPolicy::Reliable => 1,
        ReliabilityPolicy::BestEffort => 2,
        ReliabilityPolicy::Unknown => 3,
        ReliabilityPolicy::BestAvailable => 4,
    }
}

fn reliability_from_code(code: u8) -> Option<ReliabilityPolicy> {
    Some(match code {
        0 => ReliabilityPolicy::SystemDefault,
        1 => ReliabilityPolicy::Reliable,
        2 => ReliabilityPolicy::BestEffort,
        3 => ReliabilityPolicy::Unknown,
        4 => ReliabilityPolicy::BestAvailable,
        _ => return None,
    })
}

fn durability_code(p: DurabilityPolicy) -> u8 {
    match p {
        DurabilityPolicy::SystemDefault => 0,
        DurabilityPolicy::TransientLocal => 1,
        DurabilityPolicy::Volatile => 2,
        DurabilityPolicy::Unknown => 3,
        DurabilityPolicy::BestAvailable => 4,
    }
}

fn durability_from_code(code: u8) -> Option<DurabilityPolicy> {
    Some(match code {
        0 => DurabilityPolicy::SystemDefault,
        1 => DurabilityPolicy::TransientLocal,
        2 => DurabilityPolicy::Volatile,
        3 => DurabilityPolicy::Unknown,
        4 => DurabilityPolicy::BestAvailable,
        _ => return None,
    })
}

fn history_code(p: HistoryPolicy) -> u8 {
    match p {
        HistoryPolicy::SystemDefault => 0,
        HistoryPolicy::KeepLast => 1,
        HistoryPolicy::KeepAll => 2,
        HistoryPolicy::Unknown => 3,
    }
}

fn history_from_code(code: u8) -> Option<HistoryPolicy> {
    Some(match code {
        0 => HistoryPolicy::SystemDefault,
        1 => HistoryPolicy::KeepLast,
        2 => HistoryPolicy::KeepAll,
        3 => HistoryPolicy::Unknown,
        _ => return None,
    })
}

fn liveliness_code(p: LivelinessPolicy) -> u8 {
    match p {
        LivelinessPolicy::SystemDefault => 0,
        LivelinessPolicy::Automatic => 1,
        LivelinessPolicy::ManualByTopic => 2,
        LivelinessPolicy::Unknown => 3,
        LivelinessPolicy::BestAvailable => 4,
    }
}

fn liveliness_from_code(code: u8) -> Option<LivelinessPolicy> {
    Some(match code {
        0 => LivelinessPolicy::SystemDefault,
        1 => LivelinessPolicy::Automatic,
        2 => LivelinessPolicy::ManualByTopic,
        3 => LivelinessPolicy::Unknown,
        4 => LivelinessPolicy::BestAvailable,
        _ => return None,
    })
}

/// Encode a QoS profile as the token's final segment.
///
/// Format:
/// `<R>:<D>:<H>,<depth>:<Dsec>,<Dns>:<Lsec>,<Lns>:<LK>,<LLsec>,<LLns>`
/// where each value is omitted when equal to the wire default, and
/// `Duration::ZERO` stands for the infinite default on durations.
pub fn qos_to_keyexpr(qos: &Profile) -> String {
    let mut out = String::new();
    let code = reliability_code(qos.reliability);
    if code != WIRE_DEFAULT_RELIABILITY {
        out.push_str(&code.to_string());
    }
    out.push(':');
    let code = durability_code(qos.durability);
    if code != WIRE_DEFAULT_DURABILITY {
        out.push_str(&code.to_string());
    }
    out.push(':');
    let code = history_code(qos.history);
    if code != WIRE_DEFAULT_HISTORY {
        out.push_str(&code.to_string());
    }
    out.push(',');
    if qos.depth != WIRE_DEFAULT_DEPTH {
        out.push_str(&qos.depth.to_string());
    }
    out.push(':');
    push_duration(&mut out, qos.deadline);
    out.push(':');
    push_duration(&mut out, qos.lifespan);
    out.push(':');
    let code = liveliness_code(qos.liveliness);
    if code != WIRE_DEFAULT_LIVELINESS {
        out.push_str(&code.to_string());
    }
    out.push(',');
    if !qos.liveliness_lease_duration.is_zero() {
        out.push_str(&qos.liveliness_lease_duration.as_secs().to_string());
    }
    out.push(',');
    if !qos.liveliness_lease_duration.is_zero() {
        out.push_str(&qos.liveliness_lease_duration.subsec_nanos().to_string());
    }
    out
}

fn push_duration(out: &mut String, d: Duration) {
    if !d.is_zero() {
        out.push_str(&d.as_secs().to_string());
    }
    out.push(',');
    if !d.is_zero() {
        out.push_str(&d.subsec_nanos().to_string());
    }
}

/// Decode the token's QoS segment. Returns `None` on any parse error.
pub fn keyexpr_to_qos(segment: &str) -> Option<Profile> {
    let groups: Vec<&str> = segment.split(':').collect();
    if groups.len() != 6 {
        return None;
    }
    let reliability =
        reliability_from_code(parse_code(groups[0], WIRE_DEFAULT_RELIABILITY)?)?;
    let durability = durability_from_code(parse_code(groups[1], WIRE_DEFAULT_DURABILITY)?)?;

    let history_parts: Vec<&str> = groups[2].split(',').collect();
    if history_parts.len() != 2 {
        return None;
    }
    let history = history_from_code(parse_code(history_parts[0], WIRE_DEFAULT_HISTORY)?)?;
    let depth = if history_parts[1].is_empty() {
        WIRE_DEFAULT_DEPTH
    } else {
        history_parts[1].parse().ok()?
    };

    let deadline = parse_duration(groups[3])?;
    let lifespan = parse_duration(groups[4])?;

    let liveliness_parts: Vec<&str> = groups[5].split(',').collect();
    if liveliness_parts.len() != 3 {
        return None;
    }
    let liveliness =
        liveliness_from_code(parse_code(liveliness_parts[0], WIRE_DEFAULT_LIVELINESS)?)?;
    let liveliness_lease_duration =
        parse_duration(&format!("{},{}", liveliness_parts[1], liveliness_parts[2]))?;

    Some(Profile {
        history,
        depth,
        reliability,
        durability,
        deadline,
        lifespan,
        liveliness,
        liveliness_lease_duration,
    })
}

fn parse_code(field: &str, default: u8) -> Option<u8> {
    if field.is_empty() {
        Some(default)
    } else {
        field.parse().ok()
    }
}

fn parse_duration(field: &str) -> Option<Duration> {
    let (secs, nanos) = field.split_once(',')?;
    match (secs.is_empty(), nanos.is_empty()) {
        (true, true) => Some(Duration::ZERO),
        (false, false) => Some(Duration::new(secs.parse().ok()?, nanos.parse().ok()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_info() -> NodeInfo {
        NodeInfo {
            domain_id: 0,
            namespace: String::new(),
            name: "talker".to_string(),
            enclave: String::new(),
        }
    }

    #[test]
    fn node_token_format() {
        let entity = Entity::node("aac3178e146ba6f1fc6e6a4085e77f21", 0, node_info());
        assert_eq!(
            entity.liveliness_keyexpr(),
            "@ros2_lv/0/aac3178e146ba6f1fc6e6a4085e77f21/0/0/NN/%/talker/%"
        );
    }

    #[test]
    fn node_token_with_namespace_and_enclave() {
        let entity = Entity::node(
            "abcd1234",
            3,
            NodeInfo {
                domain_id: 2,
                namespace: "/robot1/arm".to_string(),
                name: "driver".to_string(),
                enclave: "/secure".to_string(),
            },
        );
        assert_eq!(
            entity.liveliness_keyexpr(),
            "@ros2_lv/2/abcd1234/3/3/NN/%robot1%arm/driver/%secure"
        );
    }

    #[test]
    fn publisher_token_format() {
        let entity = Entity::endpoint(
            "8b20917502ee955ac4476e0266340d5c",
            0,
            10,
            EntityKind::Publisher,
            NodeInfo {
                domain_id: 2,
                namespace: String::new(),
                name: "talker".to_string(),
                enclave: String::new(),
            },
            TopicInfo {
                name: "/chatter".to_string(),
                type_name: "std_msgs::msg::dds_::String_".to_string(),
                type_hash: "RIHS01_df668c".to_string(),
                qos: Profile {
                    depth: 7,
                    ..Default::default()
                },
            },
        );
        assert_eq!(
            entity.liveliness_keyexpr(),
            "@ros2_lv/2/8b20917502ee955ac4476e0266340d5c/0/10/MP/%/talker/%/%chatter/std_msgs::msg::dds_::String_/RIHS01_df668c/::,7:,:,:0,,"
        );
    }

    #[test]
    fn roundtrip_node() {
        let entity = Entity::node("sess", 1, node_info());
        assert_eq!(Entity::parse(&entity.liveliness_keyexpr()).unwrap(), entity);
    }

    #[test]
    fn roundtrip_every_endpoint_kind() {
        for kind in [
            EntityKind::Publisher,
            EntityKind::Subscription,
            EntityKind::Service,
            EntityKind::Client,
        ] {
            let entity = Entity::endpoint(
                "f9980ee0495eaafb3e38f0d19e2eae12",
                0,
                10,
                kind,
                NodeInfo {
                    domain_id: 2,
                    namespace: "/robot1".to_string(),
                    name: "worker".to_string(),
                    enclave: String::new(),
                },
                TopicInfo {
                    name: "/add_two_ints".to_string(),
                    type_name: "example_interfaces::srv::dds_::AddTwoInts_".to_string(),
                    type_hash: "RIHS01_e118de".to_string(),
                    qos: Profile {
                        history: HistoryPolicy::KeepAll,
                        depth: 42,
                        reliability: ReliabilityPolicy::BestEffort,
                        durability: DurabilityPolicy::TransientLocal,
                        deadline: Duration::new(5, 123_456_789),
                        lifespan: Duration::from_secs(9),
                        liveliness: LivelinessPolicy::Automatic,
                        liveliness_lease_duration: Duration::from_millis(1500),
                    },
                },
            );
            let parsed = Entity::parse(&entity.liveliness_keyexpr()).unwrap();
            assert_eq!(parsed, entity, "{kind:?}");
        }
    }

    #[test]
    fn parse_rejects_malformed_tokens() {
        for token in [
            "@wrong/0/sess/0/0/NN/%/n/%",
            "@ros2_lv/0/sess",
            "@ros2_lv/x/sess/0/0/NN/%/n/%",
            "@ros2_lv/0/sess/0/0/XX/%/n/%",
            "@ros2_lv/0/sess/0/0/MP/%/n/%",
            "@ros2_lv/0/sess/0/0/MP/%/n/%/%t/Type/HASH/not-a-qos",
            "@ros2_lv/0/sess/0/0/NN/%/n/%/%t/Type/HASH/::,:,:,:,,",
        ] {
            assert!(
                matches!(Entity::parse(token), Err(Error::MalformedToken(_))),
                "{token}"
            );
        }
    }

    #[test]
    fn qos_wire_defaults_are_all_empty() {
        let qos = Profile {
            depth: 42,
            liveliness: LivelinessPolicy::Automatic,
            ..Default::default()
        };
        assert_eq!(qos_to_keyexpr(&qos), "::,:,:,:,,");
        assert_eq!(keyexpr_to_qos("::,:,:,:,,").unwrap(), qos);
    }

    #[test]
    fn qos_non_defaults_are_written() {
        let qos = Profile {
            reliability: ReliabilityPolicy::BestEffort,
            durability: DurabilityPolicy::TransientLocal,
            history: HistoryPolicy::KeepAll,
            depth: 10,
            ..Default::default()
        };
        let encoded = qos_to_keyexpr(&qos);
        assert_eq!(encoded, "2:1:2,10:,:,:0,,");
        assert_eq!(keyexpr_to_qos(&encoded).unwrap(), qos);
    }

    #[test]
    fn qos_durations_roundtrip() {
        let qos = Profile {
            depth: 42,
            liveliness: LivelinessPolicy::Automatic,
            deadline: Duration::new(5, 123_456_789),
            ..Default::default()
        };
        let encoded = qos_to_keyexpr(&qos);
        assert_eq!(encoded, "::,:5,123456789:,:,,");
        assert_eq!(keyexpr_to_qos(&encoded).unwrap(), qos);
    }

    #[test]
    fn mangle_roundtrip() {
        assert_eq!(mangle("/robot1/cmd_vel"), "%robot1%cmd_vel");
        assert_eq!(mangle(""), "%");
        assert_eq!(unmangle("%robot1%cmd_vel"), "/robot1/cmd_vel");
        assert_eq!(unmangle("%"), "");
    }

    #[test]
    fn topic_keyexpr_strips_leading_slash() {
        assert_eq!(
            topic_keyexpr(0, "/chatter", "std_msgs::msg::dds_::String_", "RIHS01_ab"),
            "0/chatter/std_msgs::msg::dds_::String_/RIHS01_ab"
        );
    }

    #[test]
    fn subscription_token_covers_domain() {
        assert_eq!(subscription_token(7), "@ros2_lv/7/**");
    }

    #[test]
    fn gid_depends_on_session_and_entity() {
        let a = Entity::node("sess-a", 1, node_info());
        let mut b = Entity::node("sess-a", 1, node_info());
        assert_eq!(a.gid(), b.gid());
        b.eid = 2;
        assert_ne!(a.gid(), b.gid());
    }
}
