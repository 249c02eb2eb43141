//! Per-message attachment codec.
//!
//! Every sample, request and reply carries a sidecar with the sender's
//! sequence number, source timestamp and GID, framed as three labeled
//! fields in fixed order so independent implementations of the adapter
//! can interoperate:
//!
//! | Label                | Value     |
//! |----------------------|-----------|
//! | `"sequence_number"`  | `i64`     |
//! | `"source_timestamp"` | `i64`     |
//! | `"source_gid"`       | `[u8;16]` |

use rozen_core::{Error, Gid, Result, GID_SIZE};
use std::time::{SystemTime, UNIX_EPOCH};
use zenoh::bytes::ZBytes;
use zenoh_ext::{ZDeserializer, ZSerializer};

/// Attachment carried by every published sample and every service
/// request/reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    /// Sender-scoped sequence number, starting at 1.
    pub sequence_number: i64,
    /// Sender-side timestamp, nanoseconds since the UNIX epoch.
    pub source_timestamp: i64,
    /// Identity of the sending endpoint.
    pub source_gid: Gid,
}

impl Attachment {
    /// Build an attachment stamped with the current system time.
    pub fn new(sequence_number: i64, source_gid: Gid) -> Self {
        Self {
            sequence_number,
            source_timestamp: now_ns(),
            source_gid,
        }
    }

    /// Encode to the labeled wire form.
    pub fn encode(&self) -> ZBytes {
        let mut serializer = ZSerializer::new();
        serializer.serialize("sequence_number");
        serializer.serialize(self.sequence_number);
        serializer.serialize("source_timestamp");
        serializer.serialize(self.source_timestamp);
        serializer.serialize("source_gid");
        serializer.serialize(self.source_gid.0);
        serializer.finish()
    }

    /// Decode from the labeled wire form.
    ///
    /// Fails with `MalformedAttachment` when a label is missing or out of
    /// order, or when a value does not match its declared width.
    pub fn decode(bytes: &ZBytes) -> Result<Self> {
        let mut deserializer = ZDeserializer::new(bytes);
        expect_label(&mut deserializer, "sequence_number")?;
        let sequence_number = deserializer
            .deserialize::<i64>()
            .map_err(|e| malformed("sequence_number", e))?;
        expect_label(&mut deserializer, "source_timestamp")?;
        let source_timestamp = deserializer
            .deserialize::<i64>()
            .map_err(|e| malformed("source_timestamp", e))?;
        expect_label(&mut deserializer, "source_gid")?;
        let gid = deserializer
            .deserialize::<[u8; GID_SIZE]>()
            .map_err(|e| malformed("source_gid", e))?;
        Ok(Self {
            sequence_number,
            source_timestamp,
            source_gid: Gid(gid),
        })
    }
}

fn expect_label(deserializer: &mut ZDeserializer<'_>, label: &str) -> Result<()> {
    let found = deserializer
        .deserialize::<String>()
        .map_err(|e| malformed(label, e))?;
    if found != label {
        return Err(Error::MalformedAttachment(format!(
            "expected field '{label}', found '{found}'"
        )));
    }
    Ok(())
}

fn malformed(label: &str, err: impl std::fmt::Display) -> Error {
    Error::MalformedAttachment(format!("field '{label}': {err}"))
}

/// Current system time in nanoseconds since the UNIX epoch.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
