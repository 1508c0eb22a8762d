//! Blocking HTTP client for `http:`/`https:` modules and resources.
//!
//! ```text
//! request uri ──► rewrite (longest matching prefix) ──► proxy or direct agent
//!                                                        │
//!                        final uri after redirects ◄─────┘
//! ```
//!
//! Hosts on the no-proxy list bypass the proxy. `*` bypasses it for
//! every host.

use crate::error::{ConfigError, ResolveError};
use std::fmt;
use std::time::Duration;
use ureq::ResponseExt;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP settings accumulated by the evaluator builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpSettings {
    /// Proxy address, e.g. `http://proxy.example:3128`.
    pub proxy: Option<String>,
    pub no_proxy: Vec<String>,
    /// `(from_prefix, to_prefix)` pairs.
    pub rewrites: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

/// A fetched body and the URI it was finally served from.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub uri: Url,
    pub body: Vec<u8>,
}

pub struct HttpClient {
    direct: ureq::Agent,
    proxied: Option<ureq::Agent>,
    no_proxy: Vec<String>,
    rewrites: Vec<(String, String)>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("proxied", &self.proxied.is_some())
            .field("no_proxy", &self.no_proxy)
            .field("rewrites", &self.rewrites)
            .finish()
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self {
            direct: agent(None, DEFAULT_TIMEOUT),
            proxied: None,
            no_proxy: Vec::new(),
            rewrites: Vec::new(),
        }
    }
}

fn agent(proxy: Option<ureq::Proxy>, timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .proxy(proxy)
        .build();
    ureq::Agent::new_with_config(config)
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns [`ConfigError::Http`] if the proxy address is invalid.
    pub fn new(settings: &HttpSettings) -> Result<Self, ConfigError> {
        let timeout = settings.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let proxied = settings
            .proxy
            .as_deref()
            .map(|address| {
                ureq::Proxy::new(address)
                    .map(|p| agent(Some(p), timeout))
                    .map_err(|e| ConfigError::Http(format!("invalid proxy `{address}`: {e}")))
            })
            .transpose()?;
        let mut rewrites = settings.rewrites.clone();
        rewrites.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Ok(Self {
            direct: agent(None, timeout),
            proxied,
            no_proxy: settings.no_proxy.clone(),
            rewrites,
        })
    }

    /// Applies the longest matching rewrite rule.
    #[must_use]
    pub fn rewrite(&self, uri: &Url) -> Url {
        let raw = uri.as_str();
        self.rewrites
            .iter()
            .find_map(|(from, to)| {
                raw.strip_prefix(from.as_str())
                    .and_then(|rest| Url::parse(&format!("{to}{rest}")).ok())
            })
            .unwrap_or_else(|| uri.clone())
    }

    fn agent_for(&self, uri: &Url) -> &ureq::Agent {
        let Some(proxied) = &self.proxied else {
            return &self.direct;
        };
        let host = uri.host_str().unwrap_or_default();
        let bypass = self.no_proxy.iter().any(|pattern| {
            let pattern = pattern.trim_start_matches('.');
            pattern == "*" || host == pattern || host.ends_with(&format!(".{pattern}"))
        });
        if bypass {
            &self.direct
        } else {
            proxied
        }
    }

    /// GETs `uri` following redirects.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::NotFound`] on 404, [`ResolveError::Http`] otherwise.
    pub fn get(&self, uri: &Url) -> Result<HttpResponse, ResolveError> {
        let target = self.rewrite(uri);
        tracing::debug!(uri = %uri, target = %target, "HTTP GET");
        let mut response = self
            .agent_for(&target)
            .get(target.as_str())
            .call()
            .map_err(|e| match e {
                ureq::Error::StatusCode(404) => ResolveError::not_found(uri),
                other => ResolveError::Http {
                    uri: uri.to_string(),
                    reason: other.to_string(),
                },
            })?;
        let final_uri = Url::parse(&response.get_uri().to_string()).unwrap_or(target);
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| ResolveError::Http {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
        Ok(HttpResponse {
            uri: final_uri,
            body,
        })
    }
}
