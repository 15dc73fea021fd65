//! Hook configuration. Every field has a default; hosts deserialize from their own config file.

use serde::Deserialize;

use crate::protocol::{DEFAULT_BRIDGE_METHOD, DEFAULT_BRIDGE_MODULE, DEFAULT_MARKER_NAME};
use crate::wire::DEFAULT_MAX_PAYLOAD_BYTES;

/// Which bridge primitive carries the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// `call` and wait for the acknowledgment.
    #[default]
    Async,
    /// `sync_call`; stalls the caller until the host answers.
    Sync,
    /// `sync_call` only for HTTP requests opened as synchronous.
    MatchRequest,
}

impl std::str::FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "async" => Ok(RelayMode::Async),
            "sync" => Ok(RelayMode::Sync),
            "match_request" => Ok(RelayMode::MatchRequest),
            other => Err(format!("unknown relay mode: {}", other)),
        }
    }
}

/// What to do when a body cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadFailurePolicy {
    /// Drop the request: the original call is never made.
    #[default]
    FailClosed,
    /// Make the original call without hand-off.
    Passthrough,
}

impl std::str::FromStr for ReadFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_closed" => Ok(ReadFailurePolicy::FailClosed),
            "passthrough" => Ok(ReadFailurePolicy::Passthrough),
            other => Err(format!("unknown read failure policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookConfig {
    /// Feature flag consulted by the gate (default true).
    #[serde(default = "default_ajax_hook")]
    pub ajax_hook: bool,
    #[serde(default)]
    pub relay_mode: RelayMode,
    #[serde(default)]
    pub on_read_failure: ReadFailurePolicy,
    /// Query marker name.
    #[serde(default = "default_marker_name")]
    pub marker_name: String,
    #[serde(default = "default_bridge_module")]
    pub bridge_module: String,
    #[serde(default = "default_bridge_method")]
    pub bridge_method: String,
    /// Ceiling on one encoded relay payload (default 64 MiB).
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_ajax_hook() -> bool {
    true
}
fn default_marker_name() -> String {
    DEFAULT_MARKER_NAME.to_string()
}
fn default_bridge_module() -> String {
    DEFAULT_BRIDGE_MODULE.to_string()
}
fn default_bridge_method() -> String {
    DEFAULT_BRIDGE_METHOD.to_string()
}
fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            ajax_hook: default_ajax_hook(),
            relay_mode: RelayMode::default(),
            on_read_failure: ReadFailurePolicy::default(),
            marker_name: default_marker_name(),
            bridge_module: default_bridge_module(),
            bridge_method: default_bridge_method(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}
