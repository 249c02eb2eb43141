//! Mapping from QoS profiles to transport options.
//!
//! | Policy | Transport effect |
//! |--------|------------------|
//! | reliable + keep-all | congestion control `Block`, reliability `Reliable` |
//! | reliable otherwise | congestion control `Drop`, reliability `Reliable` |
//! | best-effort | congestion control `Drop`, reliability `BestEffort` |
//! | transient-local publisher | queryable-backed cache of capacity `depth` |
//! | transient-local subscription | querying subscriber (historical gets) |
//!
//! `BestAvailable` fields are resolved against the peer endpoints known
//! to the graph cache before any of the above applies.

use rozen_core::{
    DurabilityPolicy, EndpointSide, Error, HistoryPolicy, LivelinessPolicy, Profile,
    ReliabilityPolicy, Result,
};
use zenoh::qos::{CongestionControl, Reliability};

/// Resolve the `BestAvailable` fields of `requested` against the peer
/// endpoints currently known for the topic.
///
/// With no peers the request is returned verbatim. For a subscription the
/// strictest policy every peer publisher can satisfy wins; a publisher
/// offers reliable delivery unconditionally and retains history only when
/// some existing subscription asks for it.
pub fn best_available(side: EndpointSide, requested: &Profile, peers: &[Profile]) -> Profile {
    let mut effective = requested.clone();
    if peers.is_empty() {
        return effective;
    }

    if effective.reliability == ReliabilityPolicy::BestAvailable {
        effective.reliability = match side {
            EndpointSide::Publisher => ReliabilityPolicy::Reliable,
            EndpointSide::Subscription => {
                if peers
                    .iter()
                    .any(|p| p.reliability == ReliabilityPolicy::BestEffort)
                {
                    ReliabilityPolicy::BestEffort
                } else {
                    ReliabilityPolicy::Reliable
                }
            }
        };
    }
    if effective.durability == DurabilityPolicy::BestAvailable {
        effective.durability = match side {
            EndpointSide::Publisher => {
                if peers
                    .iter()
                    .any(|p| p.durability == DurabilityPolicy::TransientLocal)
                {
                    DurabilityPolicy::TransientLocal
                } else {
                    DurabilityPolicy::Volatile
                }
            }
            EndpointSide::Subscription => {
                if peers
                    .iter()
                    .any(|p| p.durability == DurabilityPolicy::Volatile)
                {
                    DurabilityPolicy::Volatile
                } else {
                    DurabilityPolicy::TransientLocal
                }
            }
        };
    }
    if effective.liveliness == LivelinessPolicy::BestAvailable {
        effective.liveliness = LivelinessPolicy::Automatic;
    }
    effective
}

/// Reject profiles the engines cannot honor.
pub fn validate(profile: &Profile) -> Result<()> {
    if profile.is_keep_last() && profile.depth == 0 {
        return Err(Error::invalid_argument(
            "history depth must be at least 1 under keep-last",
        ));
    }
    if profile.liveliness == LivelinessPolicy::ManualByTopic {
        tracing::warn!("liveliness ManualByTopic is not supported, treating as Automatic");
    }
    if !profile.deadline.is_zero() {
        tracing::warn!("deadline is accepted but not enforced");
    }
    if !profile.lifespan.is_zero() {
        tracing::warn!("lifespan is accepted but not enforced");
    }
    Ok(())
}

/// Whether the profile asks for reliable delivery.
///
/// `SystemDefault` and an unresolved `BestAvailable` both map to reliable.
pub fn is_reliable(profile: &Profile) -> bool {
    !matches!(profile.reliability, ReliabilityPolicy::BestEffort)
}

/// Whether the profile retains history for late joiners.
pub fn is_transient_local(profile: &Profile) -> bool {
    matches!(profile.durability, DurabilityPolicy::TransientLocal)
}

/// Congestion-control mode for a publisher with this profile.
pub fn congestion_control(profile: &Profile) -> CongestionControl {
    if matches!(profile.history, HistoryPolicy::KeepAll) && is_reliable(profile) {
        CongestionControl::Block
    } else {
        CongestionControl::Drop
    }
}

/// Transport reliability flag for this profile.
pub fn reliability(profile: &Profile) -> Reliability {
    if is_reliable(profile) {
        Reliability::Reliable
    } else {
        Reliability::BestEffort
    }
}
