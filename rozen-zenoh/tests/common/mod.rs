#![allow(dead_code)]

use rozen_zenoh::{Context, Error, Result, ServiceMsg, TypeSupport};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static ISOLATION: OnceLock<()> = OnceLock::new();

/// Route every context in this test process through an ad-hoc router.
pub fn init() {
    ISOLATION.get_or_init(|| {
        rozen_zenoh::diagnostics::init();
        rozen_zenoh::isolation::start().expect("failed to start isolation router");
    });
}

pub fn context(domain_id: u32) -> Context {
    init();
    Context::with_domain_id(domain_id).expect("failed to open context")
}

/// Poll `cond` every 50 ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    cond()
}

/// A fixed-width little-endian integer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Int64Msg {
    pub data: i64,
}

impl Int64Msg {
    pub fn new(data: i64) -> Self {
        Self { data }
    }
}

impl TypeSupport for Int64Msg {
    fn type_name() -> &'static str {
        "test_msgs::msg::dds_::Int64_"
    }

    fn type_hash() -> &'static str {
        "RIHS01_3f3a2b9f5f7b4d2c"
    }

    fn serialized_size(&self) -> usize {
        8
    }

    fn serialize_into(&self, buf: &mut [u8]) -> Result<usize> {
        buf[..8].copy_from_slice(&self.data.to_le_bytes());
        Ok(8)
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        let data = bytes
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .map(i64::from_le_bytes)
            .ok_or_else(|| Error::DeserializationFailed("expected 8 bytes".to_string()))?;
        Ok(Self { data })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddTwoIntsRequest {
    pub a: i64,
    pub b: i64,
}

impl TypeSupport for AddTwoIntsRequest {
    fn type_name() -> &'static str {
        "test_msgs::srv::dds_::AddTwoInts_Request_"
    }

    fn type_hash() -> &'static str {
        "RIHS01_9c1d4f2ab0e64488"
    }

    fn serialized_size(&self) -> usize {
        16
    }

    fn serialize_into(&self, buf: &mut [u8]) -> Result<usize> {
        buf[..8].copy_from_slice(&self.a.to_le_bytes());
        buf[8..16].copy_from_slice(&self.b.to_le_bytes());
        Ok(16)
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            return Err(Error::DeserializationFailed("expected 16 bytes".to_string()));
        }
        Ok(Self {
            a: i64::from_le_bytes(bytes[..8].try_into().unwrap()),
            b: i64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddTwoIntsResponse {
    pub sum: i64,
}

impl TypeSupport for AddTwoIntsResponse {
    fn type_name() -> &'static str {
        "test_msgs::srv::dds_::AddTwoInts_Response_"
    }

    fn type_hash() -> &'static str {
        "RIHS01_9c1d4f2ab0e64488"
    }

    fn serialized_size(&self) -> usize {
        8
    }

    fn serialize_into(&self, buf: &mut [u8]) -> Result<usize> {
        buf[..8].copy_from_slice(&self.sum.to_le_bytes());
        Ok(8)
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        let sum = bytes
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .map(i64::from_le_bytes)
            .ok_or_else(|| Error::DeserializationFailed("expected 8 bytes".to_string()))?;
        Ok(Self { sum })
    }
}

/// The classic two-integer addition service.
pub struct AddTwoInts;

impl ServiceMsg for AddTwoInts {
    type Request = AddTwoIntsRequest;
    type Response = AddTwoIntsResponse;

    fn service_type_name() -> &'static str {
        "test_msgs::srv::dds_::AddTwoInts_"
    }

    fn service_type_hash() -> &'static str {
        "RIHS01_9c1d4f2ab0e64488"
    }
}
