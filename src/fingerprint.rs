//! Connection fingerprints: deterministic cache keys derived from
//! connection-relevant configuration.
//!
//! Identical fingerprints must share an underlying client; differing
//! fingerprints must not. Only non-default values contribute, in a fixed
//! field order, so the same configuration always produces the same key.

use std::fmt;
use std::time::Duration;

use crate::config::{TransportConfig, DEFAULT_CONCURRENT_LIMIT};
use crate::timeouts::Timeouts;

/// Deterministic key for client-cache reuse.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionFingerprint(String);

impl ConnectionFingerprint {
    /// Derive the fingerprint from a resolved configuration.
    pub fn from_config(config: &TransportConfig) -> Self {
        let mut parts: Vec<String> = Vec::new();

        if config.timeouts != Timeouts::ad_hoc() {
            parts.push(format!("timeout={}", encode_timeouts(&config.timeouts)));
        }
        if config.concurrent_limit != DEFAULT_CONCURRENT_LIMIT {
            parts.push(format!("limit={}", config.concurrent_limit));
        }
        if let Some(proxies) = &config.proxies {
            parts.push(format!(
                "proxy={}|{}|{}",
                proxies.http,
                proxies.https,
                proxies.no_proxy.join("+")
            ));
        }
        if !config.ssl_verify {
            parts.push("verify=false".to_string());
        }
        if let Some(path) = &config.ca_bundle_path {
            parts.push(format!("ca={}", path.display()));
        }
        if let Some(path) = &config.client_cert_path {
            parts.push(format!("cert={}", path.display()));
        }
        if let Some(level) = &config.security_level {
            parts.push(format!("seclevel={}", level.raw()));
        }
        if config.force_ipv4 {
            parts.push("ipv4=1".to_string());
        }
        if let Some(strategy) = config.strategy_override {
            parts.push(format!("strategy={:?}", strategy));
        }
        if let Some(alias) = &config.alias {
            parts.push(format!("alias={}", alias));
        }

        if parts.is_empty() {
            Self("default".to_string())
        } else {
            Self(parts.join(";"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn encode_timeouts(timeouts: &Timeouts) -> String {
    fn phase(d: Option<Duration>) -> String {
        match d {
            Some(d) => format!("{}", d.as_secs_f64()),
            None => "-".to_string(),
        }
    }
    format!(
        "{},{},{},{}",
        phase(timeouts.connect),
        phase(timeouts.read_idle),
        phase(timeouts.total),
        phase(timeouts.pool_acquire)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, EnvSnapshot, TransportOverrides};

    fn fingerprint_of(overrides: &TransportOverrides) -> ConnectionFingerprint {
        let cfg = resolve(&EnvSnapshot::empty(), overrides).unwrap();
        ConnectionFingerprint::from_config(&cfg)
    }

    #[test]
    fn test_default_config_is_stable() {
        let a = fingerprint_of(&TransportOverrides::new());
        let b = fingerprint_of(&TransportOverrides::new());
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "default");
    }

    #[test]
    fn test_non_default_values_differ() {
        let base = fingerprint_of(&TransportOverrides::new());
        let limited = fingerprint_of(&TransportOverrides::new().concurrent_limit(1));
        let aliased = fingerprint_of(&TransportOverrides::new().alias("azure"));
        assert_ne!(base, limited);
        assert_ne!(base, aliased);
        assert_ne!(limited, aliased);
    }

    #[test]
    fn test_same_overrides_same_fingerprint() {
        let a = fingerprint_of(
            &TransportOverrides::new()
                .concurrent_limit(4)
                .timeout(std::time::Duration::from_secs(30)),
        );
        let b = fingerprint_of(
            &TransportOverrides::new()
                .concurrent_limit(4)
                .timeout(std::time::Duration::from_secs(30)),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_verify_flag_contributes() {
        let verified = fingerprint_of(&TransportOverrides::new());
        let unverified = fingerprint_of(&TransportOverrides::new().ssl_verify(false));
        assert_ne!(verified, unverified);
        assert!(unverified.as_str().contains("verify=false"));
    }
}
