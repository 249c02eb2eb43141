//! Transport-agnostic vocabulary for the rozen middleware adapter.
//!
//! This crate holds the types shared between the adapter and its callers:
//! the QoS model, the error taxonomy, endpoint identifiers, message and
//! service headers, the type-support codec traits and name validation.
//! The Zenoh adapter itself lives in `rozen-zenoh`.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
pub mod gid;
pub mod message;
pub mod names;
pub mod qos;
pub mod type_support;

pub use error::{Error, Result};
pub use gid::{Gid, GID_SIZE};
pub use message::{MessageInfo, RequestHeader, ResponseHeader};
pub use qos::{
    DurabilityPolicy, EndpointSide, HistoryPolicy, LivelinessPolicy, PolicyKind, Profile,
    ReliabilityPolicy,
};
pub use type_support::{ServiceMsg, TypeSupport};
