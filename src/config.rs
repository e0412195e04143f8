//! Configuration for the bridge and the coalescer.

use crate::types::WireCodec;
use std::time::Duration;
use tracing::warn;

/// Env var overriding [`CoalescerConfig::window`], in milliseconds.
pub const COALESCE_WINDOW_ENV: &str = "CROSSBRIDGE_COALESCE_WINDOW_MS";

/// Env var toggling [`CoalescerConfig::include_translated`].
pub const INCLUDE_TRANSLATED_ENV: &str = "CROSSBRIDGE_INCLUDE_TRANSLATED";

/// Smallest timer granularity used by the coalescer.
pub const MIN_TICK: Duration = Duration::from_millis(1);

/// Bridge configuration, shared by the remote runtime and its clients.
#[derive(Clone, Debug, Default)]
pub struct BridgeConfig {
    /// Encoding for values crossing the boundary.
    pub codec: WireCodec,

    /// Polling bound for discover-and-attach.
    pub attach: AttachPolicy,

    /// Log verbosity.
    pub telemetry: Telemetry,
}

/// Bounded polling schedule used when attaching to objects that may not
/// have been published yet.
#[derive(Clone, Debug)]
pub struct AttachPolicy {
    /// Delay between lookups.
    /// Default: 10ms
    pub poll_interval: Duration,

    /// Total time before giving up with a retrieval timeout.
    /// Default: 1s
    pub timeout: Duration,
}

impl Default for AttachPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(1000),
        }
    }
}

/// What the bridge logs while relaying.
///
/// Verbosity lives here rather than in flags threaded through call sites.
#[derive(Clone, Debug, Default)]
pub struct Telemetry {
    /// Debug-log every relayed payload.
    pub log_payloads: bool,

    /// Info-log every coalesced batch with its compression ratio.
    pub log_batches: bool,
}

impl Telemetry {
    /// Everything on.
    pub fn verbose() -> Self {
        Self {
            log_payloads: true,
            log_batches: true,
        }
    }
}

/// Configuration for position coalescing.
#[derive(Clone, Debug)]
pub struct CoalescerConfig {
    /// Total window length; each of the two stages buffers for half of it.
    /// Default: 250ms
    pub window: Duration,

    /// Merge translate events into the drag stream.
    /// Default: false
    pub include_translated: bool,

    /// Skip a key whose value did not change since it was last emitted.
    /// Default: true
    pub distinct_until_changed: bool,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(250),
            include_translated: false,
            distinct_until_changed: true,
        }
    }
}

impl CoalescerConfig {
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            ..Default::default()
        }
    }

    /// Read the window and translate knobs from the environment.
    ///
    /// Missing variables keep their defaults; malformed ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(COALESCE_WINDOW_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.window = Duration::from_millis(ms),
                Err(e) => warn!(var = COALESCE_WINDOW_ENV, value = %raw, error = %e, "ignoring malformed window"),
            }
        }

        if let Some(raw) = lookup(INCLUDE_TRANSLATED_ENV) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.include_translated = true,
                "0" | "false" | "no" | "off" => config.include_translated = false,
                _ => warn!(var = INCLUDE_TRANSLATED_ENV, value = %raw, "ignoring malformed flag"),
            }
        }

        config
    }

    /// Buffering period of one stage. A zero window degrades to the minimal
    /// tick so that batching still happens.
    pub fn half_window(&self) -> Duration {
        (self.window / 2).max(MIN_TICK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = CoalescerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.window, Duration::from_millis(250));
        assert!(!config.include_translated);
        assert!(config.distinct_until_changed);
    }

    #[test]
    fn test_env_overrides() {
        let config = CoalescerConfig::from_lookup(lookup(&[
            (COALESCE_WINDOW_ENV, "40"),
            (INCLUDE_TRANSLATED_ENV, "TRUE"),
        ]));
        assert_eq!(config.window, Duration::from_millis(40));
        assert!(config.include_translated);
    }

    #[test]
    fn test_malformed_env_keeps_defaults() {
        let config = CoalescerConfig::from_lookup(lookup(&[
            (COALESCE_WINDOW_ENV, "soon"),
            (INCLUDE_TRANSLATED_ENV, "maybe"),
        ]));
        assert_eq!(config.window, Duration::from_millis(250));
        assert!(!config.include_translated);
    }

    #[test]
    fn test_zero_window_uses_min_tick() {
        let config = CoalescerConfig::with_window(Duration::ZERO);
        assert_eq!(config.half_window(), MIN_TICK);
        assert_eq!(
            CoalescerConfig::with_window(Duration::from_millis(250)).half_window(),
            Duration::from_millis(125)
        );
    }
}
