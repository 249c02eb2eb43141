//! Codec traits supplied by type-support modules.
//!
//! The adapter never inspects application payloads; it hands serialization
//! to these traits and moves opaque bytes. Implementations are expected to
//! produce a CDR-like encoding, but the adapter only relies on
//! `serialized_size` being the exact encoded length.

use crate::error::Result;

/// Codec for one message type.
pub trait TypeSupport: Send + Sized + 'static {
    /// Fully qualified type name, e.g. `std_msgs::msg::dds_::String_`.
    fn type_name() -> &'static str;

    /// Type hash string, e.g. `RIHS01_<hex>`.
    fn type_hash() -> &'static str;

    /// Exact encoded size of this value in bytes.
    fn serialized_size(&self) -> usize;

    /// Encode into `buf`, returning the number of bytes written.
    ///
    /// `buf` is at least `serialized_size` bytes long.
    fn serialize_into(&self, buf: &mut [u8]) -> Result<usize>;

    /// Decode a value from `bytes`.
    fn deserialize(bytes: &[u8]) -> Result<Self>;
}

/// A service type: a request/response pair sharing one name and hash.
pub trait ServiceMsg: 'static {
    /// Request message type.
    type Request: TypeSupport;
    /// Response message type.
    type Response: TypeSupport;

    /// Fully qualified service type name, without request/response suffix.
    fn service_type_name() -> &'static str;

    /// Type hash string for the service type.
    fn service_type_hash() -> &'static str;
}
