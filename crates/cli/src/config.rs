//! Runtime settings: engine defaults overlaid with `STEPWISE_*` variables.

use std::str::FromStr;

use stepwise_engine::EngineConfig;
use time::Duration;

/// Default rate limit: 60 requests per minute per IP.
pub(crate) const DEFAULT_RATE_LIMIT: u64 = 60;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) engine: EngineConfig,
    pub(crate) rate_limit: u64,
    /// Key required on the owner routes. `None` disables the check.
    pub(crate) api_key: Option<String>,
    /// Trust `X-Forwarded-For` for the client address.
    pub(crate) trust_proxy: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            rate_limit: DEFAULT_RATE_LIMIT,
            api_key: None,
            trust_proxy: false,
        }
    }
}

impl Settings {
    pub(crate) fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Settings::default();
        let engine = &mut settings.engine;

        if let Some(secs) = parsed::<i64>(&lookup, "STEPWISE_GRANT_TTL_SECS") {
            engine.grant_ttl = Duration::seconds(secs);
        }
        if let Some(v) = parsed(&lookup, "STEPWISE_HASH_MEMORY_KIB") {
            engine.hashing.memory_kib = v;
        }
        if let Some(v) = parsed(&lookup, "STEPWISE_HASH_ITERATIONS") {
            engine.hashing.iterations = v;
        }
        if let Some(v) = parsed(&lookup, "STEPWISE_HASH_PARALLELISM") {
            engine.hashing.parallelism = v;
        }
        if let Some(v) = parsed(&lookup, "STEPWISE_REORDER_OFFSET") {
            engine.reorder_offset = v;
        }
        if let Some(v) = parsed(&lookup, "STEPWISE_RATE_LIMIT") {
            settings.rate_limit = v;
        }
        if let Some(v) = parsed(&lookup, "STEPWISE_TRUST_PROXY") {
            settings.trust_proxy = v;
        }
        settings.api_key = lookup("STEPWISE_API_KEY").filter(|k| !k.is_empty());
        settings
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}
