//! Caddyfile compiler.
//!
//! Turns the dashboard domain and the control plane's route descriptors into
//! the complete reverse-proxy configuration. Output is a pure function of the
//! input set: running routes are emitted in slug order, so two orderings of
//! the same descriptors produce byte-identical text.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validate::validate_slug;

/// Source ranges allowed through a VPN-only route. The last entry is the VPN
/// overlay subnet.
pub const VPN_ALLOWED_RANGES: [&str; 4] = [
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "10.8.0.0/24",
];

/// Default upstream of the dashboard itself.
pub const DEFAULT_DASHBOARD_UPSTREAM: &str = "127.0.0.1:8000";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    #[error("invalid dashboard domain '{0}'")]
    InvalidDomain(String),

    #[error("invalid operator email '{0}'")]
    InvalidEmail(String),

    #[error("invalid dashboard upstream '{0}'")]
    InvalidUpstream(String),

    #[error("invalid app slug {0:?}")]
    InvalidSlug(String),

    #[error("app '{slug}': invalid domain prefix '{prefix}'")]
    InvalidPrefix { slug: String, prefix: String },

    #[error("app '{slug}': invalid upstream port '{port}'")]
    InvalidPort { slug: String, port: String },
}

/// How an application is reachable through the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposurePolicy {
    /// Proxied for everyone.
    Public,
    /// Proxied only for private and VPN source ranges; 403 for the rest.
    VpnOnly,
    /// Never proxied; 403 for every request through the edge.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    Running,
    Stopped,
    Error,
    #[serde(other)]
    Unknown,
}

/// A published port as stored by the control plane: a bare number, or a
/// compose-style mapping such as `"8080:80"` or `"127.0.0.1:8080:80/tcp"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u64),
    Text(String),
}

impl PortSpec {
    /// The host-side port to proxy to.
    ///
    /// For `host_port:container_port` the host port (first component) is
    /// used; `ip:host_port:container_port` and `hostname:port` resolve to
    /// the port component.
    pub fn upstream_port(&self) -> Option<u16> {
        match self {
            Self::Number(n) => u16::try_from(*n).ok().filter(|p| *p != 0),
            Self::Text(text) => {
                let text = text.trim();
                let text = text.split_once('/').map_or(text, |(ports, _proto)| ports);
                let parts: Vec<&str> = text.split(':').collect();
                let candidate = match parts.as_slice() {
                    [port] => *port,
                    [first, second] => {
                        if parse_port(first).is_some() {
                            *first
                        } else {
                            *second
                        }
                    }
                    [_ip, host_port, _container] => *host_port,
                    _ => return None,
                };
                parse_port(candidate)
            }
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(t) => f.write_str(t),
        }
    }
}

fn parse_port(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|p| *p != 0)
}

/// Read-only projection of an application for routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRoute {
    pub slug: String,
    pub domain_prefix: String,
    pub exposure: ExposurePolicy,
    /// Only the first entry is routed.
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    pub state: AppState,
}

/// Site-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySite {
    /// Dashboard domain; app hosts are `{prefix}.{domain}`.
    pub domain: String,
    /// Operator contact for certificate issuance.
    pub email: String,
    #[serde(default = "default_dashboard_upstream")]
    pub dashboard_upstream: String,
}

fn default_dashboard_upstream() -> String {
    DEFAULT_DASHBOARD_UPSTREAM.to_string()
}

impl ProxySite {
    pub fn new(domain: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            email: email.into(),
            dashboard_upstream: default_dashboard_upstream(),
        }
    }
}

/// Compile the full Caddyfile.
///
/// Routes that are not running, or running without a port, are skipped.
/// Any value that would inject text into the configuration is rejected.
pub fn compile(site: &ProxySite, routes: &[AppRoute]) -> Result<String, ProxyError> {
    if !is_hostname(&site.domain) {
        return Err(ProxyError::InvalidDomain(site.domain.clone()));
    }
    if !is_token(&site.email) || !site.email.contains('@') {
        return Err(ProxyError::InvalidEmail(site.email.clone()));
    }
    if !is_token(&site.dashboard_upstream) {
        return Err(ProxyError::InvalidUpstream(
            site.dashboard_upstream.clone(),
        ));
    }

    let mut active: Vec<&AppRoute> = routes
        .iter()
        .filter(|r| r.state == AppState::Running && !r.ports.is_empty())
        .collect();
    // every emitted field is part of the key
    active.sort_by(|a, b| {
        (&a.slug, &a.domain_prefix, a.exposure, &a.ports)
            .cmp(&(&b.slug, &b.domain_prefix, b.exposure, &b.ports))
    });

    let blocks = active
        .into_iter()
        .map(|route| resolve(route, &site.domain))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Caddyfile { site, blocks: &blocks }.to_string())
}

struct RouteBlock<'a> {
    slug: &'a str,
    host: String,
    exposure: ExposurePolicy,
    port: u16,
}

fn resolve<'a>(route: &'a AppRoute, domain: &str) -> Result<RouteBlock<'a>, ProxyError> {
    // written into a comment line
    if validate_slug(&route.slug).is_err() {
        return Err(ProxyError::InvalidSlug(route.slug.clone()));
    }
    if !is_hostname(&route.domain_prefix) {
        return Err(ProxyError::InvalidPrefix {
            slug: route.slug.clone(),
            prefix: route.domain_prefix.clone(),
        });
    }
    // non-empty, checked by the caller
    let first = &route.ports[0];
    let port = first.upstream_port().ok_or_else(|| ProxyError::InvalidPort {
        slug: route.slug.clone(),
        port: first.to_string(),
    })?;

    Ok(RouteBlock {
        slug: &route.slug,
        host: format!("{}.{domain}", route.domain_prefix),
        exposure: route.exposure,
        port,
    })
}

struct Caddyfile<'a> {
    site: &'a ProxySite,
    blocks: &'a [RouteBlock<'a>],
}

impl fmt::Display for Caddyfile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "\temail {}", self.site.email)?;
        writeln!(f, "}}")?;
        writeln!(f)?;
        writeln!(f, "# Dashboard")?;
        writeln!(f, "{} {{", self.site.domain)?;
        writeln!(f, "\treverse_proxy {}", self.site.dashboard_upstream)?;
        writeln!(f, "}}")?;

        for block in self.blocks {
            writeln!(f)?;
            writeln!(f, "# {}", block.slug)?;
            writeln!(f, "{} {{", block.host)?;
            match block.exposure {
                ExposurePolicy::VpnOnly => {
                    writeln!(f, "\t@vpn {{")?;
                    writeln!(f, "\t\tremote_ip {}", VPN_ALLOWED_RANGES.join(" "))?;
                    writeln!(f, "\t}}")?;
                    writeln!(f, "\thandle @vpn {{")?;
                    writeln!(f, "\t\treverse_proxy localhost:{}", block.port)?;
                    writeln!(f, "\t}}")?;
                    writeln!(f, "\trespond 403")?;
                }
                ExposurePolicy::Public => {
                    writeln!(f, "\treverse_proxy localhost:{}", block.port)?;
                }
                ExposurePolicy::Internal => {
                    writeln!(f, "\trespond 403")?;
                }
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

/// Dot-separated DNS labels (`a-z`, `0-9`, `-`), no leading/trailing hyphen.
fn is_hostname(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 253
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        })
}

/// A single Caddyfile token: nothing that opens a block, starts a comment,
/// quotes, or breaks the line.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && !s
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '{' | '}' | '"' | '#' | '`'))
}
