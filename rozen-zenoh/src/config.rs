//! Transport configuration.
//!
//! The adapter does not define its own configuration schema. Sessions are
//! configured through a Zenoh config file named by
//! `ZENOH_SESSION_CONFIG_URI`, falling back to a peer-mode default that
//! connects to the conventional local router endpoint. On top of either,
//! `ZENOH_CONFIG_OVERRIDE` applies `;`-separated `path=json5` inserts;
//! the test-isolation helper uses it to redirect sessions at an ad-hoc
//! router.

use rozen_core::{Error, Result};
use std::env;

/// Environment variable naming a Zenoh session config file.
pub const ZENOH_SESSION_CONFIG_URI: &str = "ZENOH_SESSION_CONFIG_URI";

/// Environment variable carrying `;`-separated `path=json5` overrides.
pub const ZENOH_CONFIG_OVERRIDE: &str = "ZENOH_CONFIG_OVERRIDE";

/// Environment variable selecting the domain id.
pub const ROS_DOMAIN_ID: &str = "ROS_DOMAIN_ID";

/// Environment variable bounding the router-bootstrap wait, in attempts
/// at one per second. Unset or non-positive disables the wait.
pub const ZENOH_ROUTER_CHECK_ATTEMPTS: &str = "ZENOH_ROUTER_CHECK_ATTEMPTS";

/// Conventional local router endpoint.
pub const DEFAULT_ROUTER_ENDPOINT: &str = "tcp/localhost:7447";

/// Domain id from the environment; 0 when unset or unparsable.
pub fn domain_id_from_env() -> u32 {
    env::var(ROS_DOMAIN_ID)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Build the session configuration: config file or peer-mode default,
/// then the environment override on top.
pub fn session_config() -> Result<zenoh::Config> {
    let mut config = match env::var(ZENOH_SESSION_CONFIG_URI) {
        Ok(uri) => zenoh::Config::from_file(&uri)
            .map_err(|e| Error::InvalidConfig(format!("failed to load '{uri}': {e}")))?,
        Err(_) => {
            let mut config = zenoh::Config::default();
            insert(
                &mut config,
                "connect/endpoints",
                &format!("[\"{DEFAULT_ROUTER_ENDPOINT}\"]"),
            )?;
            insert(&mut config, "scouting/multicast/enabled", "false")?;
            config
        }
    };
    apply_override(&mut config)?;
    Ok(config)
}

/// Base configuration for an ad-hoc router.
pub fn router_config() -> Result<zenoh::Config> {
    let mut config = zenoh::Config::default();
    insert(&mut config, "mode", "\"router\"")?;
    insert(&mut config, "scouting/multicast/enabled", "false")?;
    Ok(config)
}

/// Apply the `ZENOH_CONFIG_OVERRIDE` entries to `config`.
pub fn apply_override(config: &mut zenoh::Config) -> Result<()> {
    let Ok(overrides) = env::var(ZENOH_CONFIG_OVERRIDE) else {
        return Ok(());
    };
    for entry in overrides.split(';').filter(|e| !e.is_empty()) {
        let Some((path, value)) = entry.split_once('=') else {
            return Err(Error::InvalidConfig(format!(
                "override entry '{entry}' is not of the form path=value"
            )));
        };
        insert(config, path, value)?;
    }
    Ok(())
}

/// Whether the configuration enables shared memory.
pub fn shm_enabled(config: &zenoh::Config) -> bool {
    config
        .get_json("transport/shared_memory/enabled")
        .map(|v| v.trim() == "true")
        .unwrap_or(false)
}

/// Bound on the router-bootstrap wait, if one is configured.
pub fn router_check_attempts() -> Option<u64> {
    let value: i64 = env::var(ZENOH_ROUTER_CHECK_ATTEMPTS).ok()?.parse().ok()?;
    (value > 0).then_some(value as u64)
}

fn insert(config: &mut zenoh::Config, path: &str, value: &str) -> Result<()> {
    config
        .insert_json5(path, value)
        .map_err(|e| Error::InvalidConfig(format!("failed to set '{path}': {e}")))
}
