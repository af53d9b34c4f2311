//! The deployment data model (spec §3): deployments, servers, apps, service
//! definitions, and the mount shapes an app can carry.

use std::collections::HashMap;

use crate::config::ConfigValue;

/// TLS options for a listener (spec §4.7: "`cert_file`, `key_file`, optional
/// `ca_file` -> client certificate required when present").
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub cert_file: String,
    pub key_file: String,
    pub ca_file: Option<String>,
}

impl TlsOptions {
    /// A `ca_file` configured means client certificates are required (mTLS).
    pub fn requires_client_cert(&self) -> bool {
        self.ca_file.is_some()
    }
}

/// Which concrete listener transport an app binds (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerType {
    #[default]
    NetHttp,
    FastHttp,
    Http3,
}

impl ListenerType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "" | "default" | "nethttp" | "net-http" | "http" => Some(ListenerType::NetHttp),
            "fasthttp" | "fast-http" => Some(ListenerType::FastHttp),
            "http3" | "h3" => Some(ListenerType::Http3),
            _ => None,
        }
    }
}

/// A static-file mount (spec §4.9: "static-file mounts").
#[derive(Debug, Clone)]
pub struct StaticMount {
    pub prefix: String,
    pub dir: String,
}

/// A single-page-app mount: serves `dir`, falling back to `index.html` for
/// any non-asset path (spec §4.9).
#[derive(Debug, Clone)]
pub struct SpaMount {
    pub prefix: String,
    pub dir: String,
    pub index_file: String,
}

impl SpaMount {
    pub fn new(prefix: impl Into<String>, dir: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), dir: dir.into(), index_file: "index.html".to_string() }
    }
}

/// A reverse-proxy mount (spec §6: `{prefix, target, strip-prefix?,
/// rewrite?: {from, to}}`).
#[derive(Debug, Clone)]
pub struct ReverseProxyConfig {
    pub prefix: String,
    pub target: String,
    pub strip_prefix: bool,
    /// `from` is a regular expression applied after prefix stripping.
    pub rewrite: Option<(String, String)>,
}

/// One network endpoint (spec §3: "Apps have: bind address, listener type,
/// TLS options, mount lists…, published services, raw routers, and
/// middleware").
#[derive(Debug, Clone, Default)]
pub struct App {
    pub name: String,
    pub addr: String,
    pub listener_type: ListenerType,
    pub tls: Option<TlsOptions>,
    pub published_services: Vec<String>,
    pub routers: Vec<String>,
    pub middlewares: Vec<String>,
    pub mount_static: Vec<StaticMount>,
    pub mount_spa: Vec<SpaMount>,
    pub reverse_proxies: Vec<ReverseProxyConfig>,
}

/// A group of apps sharing a base URL and lifecycle (spec §3).
#[derive(Debug, Clone, Default)]
pub struct Server {
    pub name: String,
    pub base_url: String,
    pub apps: Vec<App>,
    /// Service names this server is responsible for exposing over HTTP
    /// (spec §3 "list of *published service names*").
    pub published_services: Vec<String>,
}

impl Server {
    pub fn publishes(&self, service_name: &str) -> bool {
        self.published_services.iter().any(|s| s == service_name)
    }
}

/// A named instance of a registered [`crate::registry::ServiceType`]
/// (spec §3).
#[derive(Debug, Clone, Default)]
pub struct ServiceDefinition {
    pub name: String,
    pub type_name: String,
    pub config: HashMap<String, ConfigValue>,
    pub depends_on: Vec<String>,
}

/// A named remote-only instance with a fixed base URL (spec §3).
#[derive(Debug, Clone, Default)]
pub struct ExternalServiceDefinition {
    pub name: String,
    pub type_name: String,
    pub url: String,
}

/// A named topology of servers — lets the registry classify dependencies as
/// local or remote (spec §3, GLOSSARY).
#[derive(Debug, Clone, Default)]
pub struct Deployment {
    pub name: String,
    pub servers: Vec<Server>,
    pub service_definitions: HashMap<String, ServiceDefinition>,
    pub external_service_definitions: HashMap<String, ExternalServiceDefinition>,
}

impl Deployment {
    pub fn server(&self, name: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// The server (other than `current`) that publishes `service_name`, if
    /// any (spec §3 classification rule, "published by another server").
    pub fn publisher_of(&self, service_name: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.publishes(service_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_type_parses_aliases() {
        assert_eq!(ListenerType::parse(""), Some(ListenerType::NetHttp));
        assert_eq!(ListenerType::parse("FastHTTP"), Some(ListenerType::FastHttp));
        assert_eq!(ListenerType::parse("http3"), Some(ListenerType::Http3));
        assert_eq!(ListenerType::parse("quic"), None);
    }

    #[test]
    fn tls_options_require_client_cert_only_with_ca_file() {
        let no_ca = TlsOptions { cert_file: "c".into(), key_file: "k".into(), ca_file: None };
        assert!(!no_ca.requires_client_cert());
        let with_ca = TlsOptions { ca_file: Some("ca.pem".into()), ..no_ca };
        assert!(with_ca.requires_client_cert());
    }

    #[test]
    fn server_publishes_checks_list() {
        let server = Server { published_services: vec!["user-svc".into()], ..Default::default() };
        assert!(server.publishes("user-svc"));
        assert!(!server.publishes("order-svc"));
    }
}
