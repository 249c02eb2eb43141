//! Message and service metadata headers.

use crate::gid::Gid;

/// Metadata delivered alongside each taken message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageInfo {
    /// Publisher-side timestamp, nanoseconds since the UNIX epoch.
    pub source_timestamp: i64,
    /// Local receive timestamp, nanoseconds since the UNIX epoch.
    pub received_timestamp: i64,
    /// Publisher-scoped sequence number, starting at 1.
    pub publication_sequence_number: i64,
    /// Identity of the publishing endpoint.
    pub publisher_gid: Gid,
    /// Always false; the adapter has no intra-process shortcut.
    pub from_intra_process: bool,
}

/// Metadata for a taken service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Identity of the requesting client.
    pub writer_guid: Gid,
    /// Client-scoped request sequence number, starting at 1.
    pub sequence_number: i64,
    /// Client-side timestamp, nanoseconds since the UNIX epoch.
    pub source_timestamp: i64,
    /// Local receive timestamp, nanoseconds since the UNIX epoch.
    pub received_timestamp: i64,
}

/// Metadata for a taken service response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Identity echoed from the issuing client.
    pub writer_guid: Gid,
    /// Sequence number of the request this response answers.
    pub sequence_number: i64,
    /// Server-side timestamp, nanoseconds since the UNIX epoch.
    pub source_timestamp: i64,
    /// Local receive timestamp, nanoseconds since the UNIX epoch.
    pub received_timestamp: i64,
}
