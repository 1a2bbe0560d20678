//! Transport configuration resolution.
//!
//! Merges environment variables and explicit overrides into an immutable
//! [`TransportConfig`]. Precedence: explicit override > environment variable
//! > library default. Resolution is pure: it operates on a captured
//! [`EnvSnapshot`], so resolving performs no I/O and tests never have to
//! mutate the process environment.

use std::path::PathBuf;

use url::Url;

use crate::error::{Error, Result};
use crate::timeouts::Timeouts;
use crate::transport::Strategy;

/// Default cap on in-flight requests per handle.
pub const DEFAULT_CONCURRENT_LIMIT: usize = 100;

/// One-time capture of the environment variables this layer honors.
#[derive(Clone, Debug, Default)]
pub struct EnvSnapshot {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
    pub ssl_verify: Option<String>,
    pub ssl_certificate: Option<String>,
    pub ssl_security_level: Option<String>,
    pub trust_env: Option<String>,
    pub force_ipv4: Option<String>,
    pub disable_pooled_transport: Option<String>,
}

impl EnvSnapshot {
    /// Read the process environment once. Uppercase names win over lowercase.
    pub fn capture() -> Self {
        fn var(upper: &str, lower: &str) -> Option<String> {
            std::env::var(upper)
                .or_else(|_| std::env::var(lower))
                .ok()
                .filter(|v| !v.trim().is_empty())
        }
        Self {
            http_proxy: var("HTTP_PROXY", "http_proxy"),
            https_proxy: var("HTTPS_PROXY", "https_proxy"),
            no_proxy: var("NO_PROXY", "no_proxy"),
            ssl_verify: var("SSL_VERIFY", "ssl_verify"),
            ssl_certificate: var("SSL_CERTIFICATE", "ssl_certificate"),
            ssl_security_level: var("SSL_SECURITY_LEVEL", "ssl_security_level"),
            trust_env: var("EGRESS_TRUST_ENV", "egress_trust_env"),
            force_ipv4: var("EGRESS_FORCE_IPV4", "egress_force_ipv4"),
            disable_pooled_transport: var(
                "EGRESS_DISABLE_POOLED_TRANSPORT",
                "egress_disable_pooled_transport",
            ),
        }
    }

    /// An empty snapshot, ignoring the real environment. Useful in tests and
    /// for callers that want override-only resolution.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Proxy mounts plus the exclusion list.
///
/// Only ever constructed symmetric: an HTTP proxy without a matching HTTPS
/// proxy (or vice versa) resolves to no proxying at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    pub http: Url,
    pub https: Url,
    /// Comma-separated `NO_PROXY` entries, already split and trimmed.
    pub no_proxy: Vec<String>,
}

impl ProxyConfig {
    /// Whether requests to `host` bypass the proxy per the exclusion list.
    ///
    /// Entries match exact hosts, leading-dot suffixes, and `*`.
    pub fn should_bypass(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.no_proxy.iter().any(|entry| {
            let entry = entry.to_ascii_lowercase();
            if entry == "*" {
                return true;
            }
            // Entries may carry a scheme or port; match on the host part.
            let entry = entry
                .strip_prefix("http://")
                .or_else(|| entry.strip_prefix("https://"))
                .unwrap_or(&entry);
            let entry = entry.split(':').next().unwrap_or(entry);
            if let Some(suffix) = entry.strip_prefix('.') {
                return host == suffix || host.ends_with(&format!(".{}", suffix));
            }
            host == entry || host.ends_with(&format!(".{}", entry))
        })
    }

    /// The `NO_PROXY` entries joined back into comma-separated form.
    pub fn no_proxy_csv(&self) -> Option<String> {
        if self.no_proxy.is_empty() {
            None
        } else {
            Some(self.no_proxy.join(","))
        }
    }
}

/// Explicit proxy override. Asymmetric overrides resolve to no proxying,
/// mirroring the environment rule.
#[derive(Clone, Debug, Default)]
pub struct ProxyOverride {
    pub http: Option<Url>,
    pub https: Option<Url>,
    pub no_proxy: Vec<String>,
}

/// OpenSSL-style cipher floor, e.g. `DEFAULT@SECLEVEL=1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityLevel {
    raw: String,
    seclevel: Option<u8>,
}

impl SecurityLevel {
    pub fn parse(raw: &str) -> Self {
        let seclevel = raw
            .rsplit_once("@SECLEVEL=")
            .and_then(|(_, level)| level.trim().parse().ok());
        Self {
            raw: raw.to_string(),
            seclevel,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Parsed `SECLEVEL=n` component, if present.
    pub fn seclevel(&self) -> Option<u8> {
        self.seclevel
    }

    /// Whether the floor permits legacy protocol versions (SECLEVEL <= 1).
    pub fn allows_legacy(&self) -> bool {
        matches!(self.seclevel, Some(level) if level <= 1)
    }
}

/// Explicit overrides merged over the environment by [`resolve`].
#[derive(Clone, Debug, Default)]
pub struct TransportOverrides {
    pub ssl_verify: Option<bool>,
    pub ca_bundle: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub proxies: Option<ProxyOverride>,
    pub concurrent_limit: Option<usize>,
    pub timeouts: Option<Timeouts>,
    pub trust_env: Option<bool>,
    pub security_level: Option<String>,
    pub force_ipv4: Option<bool>,
    /// Force a specific strategy; unsatisfiable combinations fail at build.
    pub strategy: Option<Strategy>,
    /// Free-form label folded into the fingerprint so callers can partition
    /// otherwise identical configurations.
    pub alias: Option<String>,
}

impl TransportOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides preconfigured for long-running provider calls.
    pub fn provider() -> Self {
        Self {
            timeouts: Some(Timeouts::provider()),
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: impl Into<Timeouts>) -> Self {
        self.timeouts = Some(timeout.into());
        self
    }

    pub fn concurrent_limit(mut self, limit: usize) -> Self {
        self.concurrent_limit = Some(limit);
        self
    }

    pub fn ssl_verify(mut self, verify: bool) -> Self {
        self.ssl_verify = Some(verify);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// Resolved, immutable transport configuration.
///
/// No component outside the factory and cache may mutate one of these after
/// construction; reconfiguration means evicting the cache entry and building
/// a new handle.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub ssl_verify: bool,
    pub ca_bundle_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub proxies: Option<ProxyConfig>,
    pub concurrent_limit: usize,
    pub timeouts: Timeouts,
    pub trust_env: bool,
    pub security_level: Option<SecurityLevel>,
    pub force_ipv4: bool,
    pub pooled_disabled: bool,
    pub strategy_override: Option<Strategy>,
    pub alias: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ssl_verify: true,
            ca_bundle_path: None,
            client_cert_path: None,
            proxies: None,
            concurrent_limit: DEFAULT_CONCURRENT_LIMIT,
            timeouts: Timeouts::ad_hoc(),
            trust_env: true,
            security_level: None,
            force_ipv4: false,
            pooled_disabled: false,
            strategy_override: None,
            alias: None,
        }
    }
}

/// Merge environment and overrides into a [`TransportConfig`].
///
/// Pure function over the snapshot: no I/O, no side effects. Certificate
/// paths are not touched here; they are read lazily when the underlying
/// client is first built.
pub fn resolve(env: &EnvSnapshot, overrides: &TransportOverrides) -> Result<TransportConfig> {
    let trust_env = overrides
        .trust_env
        .or_else(|| env.trust_env.as_deref().and_then(parse_boolish))
        .unwrap_or(true);

    let ssl_verify = overrides
        .ssl_verify
        .or_else(|| env.ssl_verify.as_deref().and_then(parse_boolish))
        .unwrap_or(true);

    let proxies = resolve_proxies(env, overrides, trust_env)?;

    let client_cert_path = overrides
        .client_cert
        .clone()
        .or_else(|| env.ssl_certificate.as_deref().map(PathBuf::from));

    let security_level = overrides
        .security_level
        .as_deref()
        .or(env.ssl_security_level.as_deref())
        .map(SecurityLevel::parse);

    let concurrent_limit = overrides.concurrent_limit.unwrap_or(DEFAULT_CONCURRENT_LIMIT);
    if concurrent_limit == 0 {
        return Err(Error::configuration("concurrent_limit must be at least 1"));
    }

    let timeouts = overrides
        .timeouts
        .clone()
        .map(|t| t.or_defaults(&Timeouts::ad_hoc()))
        .unwrap_or_else(Timeouts::ad_hoc);

    let force_ipv4 = overrides
        .force_ipv4
        .or_else(|| env.force_ipv4.as_deref().and_then(parse_boolish))
        .unwrap_or(false);

    let pooled_disabled = env
        .disable_pooled_transport
        .as_deref()
        .and_then(parse_boolish)
        .unwrap_or(false);

    Ok(TransportConfig {
        ssl_verify,
        ca_bundle_path: overrides.ca_bundle.clone(),
        client_cert_path,
        proxies,
        concurrent_limit,
        timeouts,
        trust_env,
        security_level,
        force_ipv4,
        pooled_disabled,
        strategy_override: overrides.strategy,
        alias: overrides.alias.clone(),
    })
}

fn resolve_proxies(
    env: &EnvSnapshot,
    overrides: &TransportOverrides,
    trust_env: bool,
) -> Result<Option<ProxyConfig>> {
    let (http, https, no_proxy) = if let Some(over) = &overrides.proxies {
        (over.http.clone(), over.https.clone(), over.no_proxy.clone())
    } else if trust_env {
        let parse = |value: &Option<String>, name: &str| -> Result<Option<Url>> {
            value
                .as_deref()
                .map(|raw| {
                    Url::parse(raw).map_err(|e| {
                        Error::configuration(format!("invalid {} URL {:?}: {}", name, raw, e))
                    })
                })
                .transpose()
        };
        let no_proxy = env
            .no_proxy
            .as_deref()
            .map(split_no_proxy)
            .unwrap_or_default();
        (
            parse(&env.http_proxy, "HTTP_PROXY")?,
            parse(&env.https_proxy, "HTTPS_PROXY")?,
            no_proxy,
        )
    } else {
        (None, None, Vec::new())
    };

    // Asymmetric proxy configuration is rejected outright, never partially
    // applied: both schemes or neither.
    match (http, https) {
        (Some(http), Some(https)) => Ok(Some(ProxyConfig {
            http,
            https,
            no_proxy,
        })),
        (Some(_), None) | (None, Some(_)) => {
            tracing::debug!("asymmetric proxy configuration, proxying disabled");
            Ok(None)
        }
        (None, None) => Ok(None),
    }
}

fn split_no_proxy(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Case-insensitive bool-ish parsing. Unrecognized values yield `None` so
/// the library default applies.
pub(crate) fn parse_boolish(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
