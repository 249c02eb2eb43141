//! Quality-of-service vocabulary.
//!
//! A [`Profile`] captures the delivery-quality policy an application
//! requests for an endpoint. The adapter resolves any `BestAvailable`
//! fields against discovered peers and maps the effective profile onto
//! transport options; see the adapter crate for the mapping rules.

use std::time::Duration;

/// Reliability policy for publishers and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReliabilityPolicy {
    /// Use the implementation default.
    SystemDefault,
    /// Guaranteed delivery over a reliable channel.
    #[default]
    Reliable,
    /// Samples may be dropped under congestion.
    BestEffort,
    /// Policy could not be determined from a remote endpoint.
    Unknown,
    /// Resolve to the strictest policy compatible with current peers.
    BestAvailable,
}

/// Durability policy for publishers and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityPolicy {
    /// Use the implementation default.
    SystemDefault,
    /// Late joiners receive the retained history.
    TransientLocal,
    /// No history is retained for late joiners.
    #[default]
    Volatile,
    /// Policy could not be determined from a remote endpoint.
    Unknown,
    /// Resolve to the strictest policy compatible with current peers.
    BestAvailable,
}

/// History policy controlling queue bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryPolicy {
    /// Use the implementation default.
    SystemDefault,
    /// Keep at most `depth` samples, dropping the oldest.
    #[default]
    KeepLast,
    /// Keep every sample.
    KeepAll,
    /// Policy could not be determined from a remote endpoint.
    Unknown,
}

/// Liveliness policy. Carried on the wire for discovery but not used for
/// routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivelinessPolicy {
    /// Use the implementation default.
    #[default]
    SystemDefault,
    /// Liveliness asserted by the middleware.
    Automatic,
    /// Liveliness asserted manually per topic.
    ManualByTopic,
    /// Policy could not be determined from a remote endpoint.
    Unknown,
    /// Resolve to the strictest policy compatible with current peers.
    BestAvailable,
}

/// A full QoS profile.
///
/// `deadline`, `lifespan` and the liveliness lease use `Duration::ZERO`
/// as "unset/infinite".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// History policy.
    pub history: HistoryPolicy,
    /// Queue depth under `KeepLast`; must be at least 1.
    pub depth: usize,
    /// Reliability policy.
    pub reliability: ReliabilityPolicy,
    /// Durability policy.
    pub durability: DurabilityPolicy,
    /// Deadline between consecutive samples.
    pub deadline: Duration,
    /// Maximum sample age before expiry.
    pub lifespan: Duration,
    /// Liveliness policy.
    pub liveliness: LivelinessPolicy,
    /// Liveliness lease duration.
    pub liveliness_lease_duration: Duration,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            history: HistoryPolicy::KeepLast,
            depth: 10,
            reliability: ReliabilityPolicy::Reliable,
            durability: DurabilityPolicy::Volatile,
            deadline: Duration::ZERO,
            lifespan: Duration::ZERO,
            liveliness: LivelinessPolicy::SystemDefault,
            liveliness_lease_duration: Duration::ZERO,
        }
    }
}

impl Profile {
    /// Default profile for services and clients.
    pub fn services_default() -> Self {
        Self {
            depth: 10,
            ..Default::default()
        }
    }

    /// Profile suited for high-rate sensor streams.
    pub fn sensor_data() -> Self {
        Self {
            history: HistoryPolicy::KeepLast,
            depth: 5,
            reliability: ReliabilityPolicy::BestEffort,
            durability: DurabilityPolicy::Volatile,
            ..Default::default()
        }
    }

    /// Profile retaining history for late joiners.
    pub fn transient_local(depth: usize) -> Self {
        Self {
            depth,
            durability: DurabilityPolicy::TransientLocal,
            ..Default::default()
        }
    }

    /// Whether the subscription side keeps a bounded queue.
    pub fn is_keep_last(&self) -> bool {
        !matches!(self.history, HistoryPolicy::KeepAll)
    }
}

/// Side of a topic endpoint, used when resolving QoS against peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSide {
    /// A publishing endpoint.
    Publisher,
    /// A subscribing endpoint.
    Subscription,
}

/// The policy field on which two endpoint profiles disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// Reliability mismatch (best-effort writer, reliable reader).
    Reliability,
    /// Durability mismatch (volatile writer, transient-local reader).
    Durability,
}

/// Check request/offer compatibility between a publisher and a
/// subscription profile.
///
/// Returns the first offending policy, or `None` when the pairing is
/// compatible. `BestAvailable`/`SystemDefault`/`Unknown` fields are
/// treated as satisfiable and never flagged.
pub fn compatibility(publisher: &Profile, subscription: &Profile) -> Option<PolicyKind> {
    if publisher.reliability == ReliabilityPolicy::BestEffort
        && subscription.reliability == ReliabilityPolicy::Reliable
    {
        return Some(PolicyKind::Reliability);
    }
    if publisher.durability == DurabilityPolicy::Volatile
        && subscription.durability == DurabilityPolicy::TransientLocal
    {
        return Some(PolicyKind::Durability);
    }
    None
}
