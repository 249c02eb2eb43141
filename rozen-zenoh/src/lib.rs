//! A ROS 2-style middleware adapter over Zenoh.
//!
//! The adapter maps nodes, publishers, subscriptions, services and
//! clients onto Zenoh primitives:
//!
//! - each [`Context`] owns one Zenoh session shared by all its entities;
//! - pub/sub flows over Zenoh put/subscribe on typed key expressions;
//! - services ride on queryables, clients on queries;
//! - entity lifetime and discovery ride on liveliness tokens, ingested
//!   into a per-context [`GraphCache`];
//! - transient-local history is served by queryable-backed publication
//!   caches and fetched by querying subscriptions.
//!
//! # Example
//!
//! ```ignore
//! use rozen_zenoh::Context;
//!
//! let context = Context::new()?;
//! let node = context.create_node("talker", None)?;
//! let publisher = node.create_publisher::<MyMessage>("chatter", None)?;
//! publisher.publish(&MyMessage::default())?;
//! ```

#![warn(missing_docs, rust_2018_idioms)]

pub mod attachment;
pub mod buffer_pool;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod events;
pub mod graph_cache;
pub mod isolation;
pub mod liveliness;
pub mod node;
pub mod qos_mapping;
pub mod service;
pub mod shm;
pub mod topic;
pub mod wait_set;

pub use attachment::Attachment;
pub use context::{Context, LifecycleState};
pub use events::{EventKind, EventStatus, EventsManager};
pub use graph_cache::{EndpointInfo, GraphCache, NodeKey};
pub use liveliness::{Entity, EntityKind, NodeInfo, TopicInfo};
pub use node::Node;
pub use service::{Client, Service};
pub use topic::{Publisher, Subscription};
pub use wait_set::{GuardCondition, WaitSet};

// Re-export the shared vocabulary so callers need a single import.
pub use rozen_core::{
    DurabilityPolicy, Error, Gid, HistoryPolicy, LivelinessPolicy, MessageInfo, Profile,
    ReliabilityPolicy, RequestHeader, ResponseHeader, Result, ServiceMsg, TypeSupport,
};
