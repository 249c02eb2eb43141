//! Test isolation: an ad-hoc router on a random local port.
//!
//! [`start`] boots a router-mode session bound to `tcp/127.0.0.1:0`,
//! reads the actual listen locators back from the router's admin space
//! and publishes them through `ZENOH_CONFIG_OVERRIDE`, so every context
//! created afterwards in this process connects to the ad-hoc router
//! instead of the conventional endpoint. [`stop`] clears the override and
//! closes the router.

use crate::config::{self, ZENOH_CONFIG_OVERRIDE};
use parking_lot::Mutex;
use rozen_core::{Error, Result};
use zenoh::{Session, Wait};

static ROUTER: Mutex<Option<Session>> = Mutex::new(None);

/// Start the ad-hoc router and point `ZENOH_CONFIG_OVERRIDE` at it.
pub fn start() -> Result<()> {
    let mut router = ROUTER.lock();
    if router.is_some() {
        return Ok(());
    }

    let mut router_config = config::router_config()?;
    for (path, value) in [
        ("listen/endpoints", "[\"tcp/127.0.0.1:0\"]"),
        ("connect/endpoints", "[]"),
    ] {
        router_config
            .insert_json5(path, value)
            .map_err(|e| Error::InvalidConfig(format!("failed to set '{path}': {e}")))?;
    }

    let session = zenoh::open(router_config).wait().map_err(Error::transport)?;
    let locators = listen_locators(&session)?;
    std::env::set_var(
        ZENOH_CONFIG_OVERRIDE,
        format!("connect/endpoints={locators}"),
    );

    *router = Some(session);
    Ok(())
}

/// Clear the override and shut the router down.
pub fn stop() -> Result<()> {
    std::env::remove_var(ZENOH_CONFIG_OVERRIDE);
    if let Some(session) = ROUTER.lock().take() {
        session.close().wait().map_err(Error::transport)?;
    }
    Ok(())
}

/// Read the router's listen locators from its admin space as a JSON
/// array literal.
fn listen_locators(session: &Session) -> Result<String> {
    let keyexpr = format!("@/{}/router", session.zid());
    let replies = session
        .get(&keyexpr)
        .wait()
        .map_err(Error::transport)?;
    let reply = replies
        .recv()
        .map_err(|_| Error::Transport("no admin space reply from router".to_string()))?;
    let sample = reply
        .result()
        .map_err(|e| Error::Transport(format!("admin space error reply: {e:?}")))?;

    let parsed: serde_json::Value = serde_json::from_slice(&sample.payload().to_bytes())
        .map_err(|e| Error::Transport(format!("unparsable admin space payload: {e}")))?;
    let locators = parsed
        .get("locators")
        .ok_or_else(|| Error::Transport("admin space payload without locators".to_string()))?;
    serde_json::to_string(locators)
        .map_err(|e| Error::Transport(format!("failed to re-encode locators: {e}")))
}
