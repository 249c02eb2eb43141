//! Queryable-backed publication cache for transient-local publishers.
//!
//! The cache retains the publisher's last `depth` samples and answers
//! historical queries on `<session_id>/<topic_keyexpr>`. Replies carry
//! the original topic key expression, so queriers must accept replies
//! from any key expression. When the publisher is also reliable, a
//! sporadic low-frequency heartbeat announces the newest sequence number
//! on the cache prefix so peers can notice misses and query the cache.

use parking_lot::Mutex;
use rozen_core::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use zenoh::bytes::ZBytes;
use zenoh::qos::CongestionControl;
use zenoh::query::Queryable;
use zenoh::{Session, Wait};

/// Heartbeat period for reliable transient-local publishers.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_millis(500);

struct CachedSample {
    payload: ZBytes,
    attachment: ZBytes,
    sequence: i64,
}

struct Store {
    samples: VecDeque<CachedSample>,
    depth: usize,
}

pub(crate) struct PublicationCache {
    store: Arc<Mutex<Store>>,
    queryable: Option<Queryable<()>>,
    heartbeat: Option<Heartbeat>,
}

impl PublicationCache {
    /// Declare the cache queryable, and the heartbeat when `reliable`.
    pub fn new(
        session: &Session,
        session_id: &str,
        topic_keyexpr: &str,
        depth: usize,
        reliable: bool,
    ) -> Result<Self> {
        let store = Arc::new(Mutex::new(Store {
            samples: VecDeque::new(),
            depth,
        }));
        let cache_keyexpr = format!("{session_id}/{topic_keyexpr}");

        let reply_keyexpr = topic_keyexpr.to_string();
        let reply_store = Arc::clone(&store);
        let queryable = session
            .declare_queryable(cache_keyexpr.clone())
            .complete(true)
            .callback(move |query| {
                // Clone out under the lock; replying blocks on the wire.
                let samples: Vec<(ZBytes, ZBytes)> = reply_store
                    .lock()
                    .samples
                    .iter()
                    .map(|s| (s.payload.clone(), s.attachment.clone()))
                    .collect();
                for (payload, attachment) in samples {
                    if let Err(e) = query
                        .reply(reply_keyexpr.clone(), payload)
                        .attachment(attachment)
                        .wait()
                    {
                        tracing::warn!("publication cache reply failed: {e}");
                    }
                }
            })
            .wait()
            .map_err(Error::transport)?;

        let heartbeat = if reliable {
            Some(Heartbeat::spawn(
                session.clone(),
                cache_keyexpr,
                Arc::clone(&store),
            ))
        } else {
            None
        };

        Ok(Self {
            store,
            queryable: Some(queryable),
            heartbeat,
        })
    }

    /// Retain one published sample, evicting the oldest past `depth`.
    pub fn store(&self, payload: ZBytes, attachment: ZBytes, sequence: i64) {
        let mut store = self.store.lock();
        if store.samples.len() >= store.depth {
            store.samples.pop_front();
        }
        store.samples.push_back(CachedSample {
            payload,
            attachment,
            sequence,
        });
    }

    /// Stop the heartbeat and undeclare the queryable.
    pub fn undeclare(&mut self) {
        self.heartbeat.take();
        if let Some(queryable) = self.queryable.take() {
            if let Err(e) = queryable.undeclare().wait() {
                tracing::warn!("failed to undeclare publication cache: {e}");
            }
        }
    }
}

impl Drop for PublicationCache {
    fn drop(&mut self) {
        self.undeclare();
    }
}

/// Background announcer for the newest cached sequence number.
///
/// Sporadic: a beat is published only when the newest sequence changed
/// since the previous one.
struct Heartbeat {
    stop: flume::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    fn spawn(session: Session, cache_keyexpr: String, store: Arc<Mutex<Store>>) -> Self {
        let (stop, stopped) = flume::bounded::<()>(1);
        let handle = std::thread::spawn(move || {
            let mut announced: Option<i64> = None;
            loop {
                match stopped.recv_timeout(HEARTBEAT_PERIOD) {
                    Err(flume::RecvTimeoutError::Timeout) => {}
                    _ => return,
                }
                let newest = store.lock().samples.back().map(|s| s.sequence);
                let Some(sequence) = newest else {
                    continue;
                };
                if announced == Some(sequence) {
                    continue;
                }
                let beat = store.lock().samples.back().map(|s| s.attachment.clone());
                let Some(attachment) = beat else {
                    continue;
                };
                match session
                    .put(cache_keyexpr.clone(), ZBytes::new())
                    .attachment(attachment)
                    .congestion_control(CongestionControl::Drop)
                    .wait()
                {
                    Ok(()) => announced = Some(sequence),
                    Err(e) => tracing::debug!("heartbeat put failed: {e}"),
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
