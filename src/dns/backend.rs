//! Lookup backends
//!
//! A backend is the asynchronous hostname-resolution primitive the resolver
//! channel issues lookups against. The production backend is hickory-dns;
//! tests plug in scripted ones.

use super::LookupStatus;
use crate::addr::AddressFamily;
use crate::config::DnsConfig;
use crate::{Error, Result};
use futures::future::BoxFuture;
use hickory_proto::error::ProtoErrorKind;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Future returned by a lookup; always yields a status, never an error
pub type Lookup = BoxFuture<'static, LookupStatus>;

/// Asynchronous hostname resolution
pub trait LookupBackend: Send + Sync {
    /// Look up `host` for a single address family.
    ///
    /// Must not block; the returned future does the work.
    fn lookup(&self, host: &str, family: AddressFamily) -> Lookup;
}

/// Builds a fresh backend each time the channel is (re)initialized
pub trait BackendBuilder: Send + Sync {
    fn build(&self) -> Result<Arc<dyn LookupBackend>>;
}

impl<F> BackendBuilder for F
where
    F: Fn() -> Result<Arc<dyn LookupBackend>> + Send + Sync,
{
    fn build(&self) -> Result<Arc<dyn LookupBackend>> {
        self()
    }
}

/// hickory-dns backed lookups with a static hosts table in front
pub struct HickoryBackend {
    resolver: TokioAsyncResolver,
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl HickoryBackend {
    /// Create backend from config
    pub fn new(config: &DnsConfig) -> Result<Self> {
        let resolver = Self::build_resolver(config)?;

        let mut hosts: HashMap<String, Vec<IpAddr>> = HashMap::new();
        for (domain, ip_str) in &config.hosts {
            match ip_str.parse::<IpAddr>() {
                Ok(ip) => hosts.entry(domain.to_ascii_lowercase()).or_default().push(ip),
                Err(_) => warn!("Ignoring invalid hosts entry {} -> {}", domain, ip_str),
            }
        }

        Ok(HickoryBackend { resolver, hosts })
    }

    /// Build resolver from nameserver list
    fn build_resolver(config: &DnsConfig) -> Result<TokioAsyncResolver> {
        let mut opts = ResolverOpts::default();
        opts.cache_size = 0; // every resolve must hit the wire
        opts.timeout = Duration::from_secs(config.timeout);
        opts.attempts = config.attempts;
        opts.rotate = config.rotate;

        if config.nameserver.is_empty() {
            // Use system default
            let resolver = TokioAsyncResolver::tokio_from_system_conf()
                .map_err(|e| Error::dns(format!("Failed to create system resolver: {}", e)))?;
            return Ok(resolver);
        }

        let mut resolver_config = ResolverConfig::new();
        let mut usable = 0;
        for ns in &config.nameserver {
            match Self::parse_nameserver(ns) {
                Some(ns_config) => {
                    resolver_config.add_name_server(ns_config);
                    usable += 1;
                }
                None => warn!("Ignoring invalid nameserver: {}", ns),
            }
        }

        if usable == 0 {
            return Err(Error::dns("No usable nameserver configured"));
        }

        Ok(TokioAsyncResolver::tokio(resolver_config, opts))
    }

    /// Parse nameserver string
    fn parse_nameserver(ns: &str) -> Option<NameServerConfig> {
        // Handle different formats:
        // - 8.8.8.8
        // - 8.8.8.8:53
        // - tcp://8.8.8.8
        // - tls://1.1.1.1
        let (protocol, rest, default_port) = if let Some(rest) = ns.strip_prefix("tcp://") {
            (Protocol::Tcp, rest, 53)
        } else if let Some(rest) = ns.strip_prefix("tls://") {
            (Protocol::Tls, rest, 853)
        } else if let Some(rest) = ns.strip_prefix("udp://") {
            (Protocol::Udp, rest, 53)
        } else {
            (Protocol::Udp, ns, 53)
        };

        let socket_addr: SocketAddr = match rest.parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(_) => SocketAddr::new(rest.parse::<IpAddr>().ok()?, default_port),
        };

        let tls_dns_name = match protocol {
            Protocol::Tls => Some(socket_addr.ip().to_string()),
            _ => None,
        };

        Some(NameServerConfig {
            socket_addr,
            protocol,
            tls_dns_name,
            trust_negative_responses: true,
            bind_addr: None,
            tls_config: None,
        })
    }

    fn static_lookup(&self, host: &str, family: AddressFamily) -> Option<Vec<IpAddr>> {
        let ips: Vec<IpAddr> = self
            .hosts
            .get(&host.to_ascii_lowercase())?
            .iter()
            .filter(|ip| family.matches(ip))
            .copied()
            .collect();
        (!ips.is_empty()).then_some(ips)
    }
}

impl LookupBackend for HickoryBackend {
    fn lookup(&self, host: &str, family: AddressFamily) -> Lookup {
        // Address literals need no query
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Box::pin(futures::future::ready(LookupStatus::Resolved {
                addresses: vec![ip],
                family: AddressFamily::of(&ip),
            }));
        }

        if let Some(addresses) = self.static_lookup(host, family) {
            debug!("DNS {} -> {:?} (hosts)", host, addresses);
            return Box::pin(futures::future::ready(LookupStatus::Resolved { addresses, family }));
        }

        let resolver = self.resolver.clone();
        let host = host.to_string();
        Box::pin(async move {
            let result = match family {
                AddressFamily::Ipv4 => resolver
                    .ipv4_lookup(host.as_str())
                    .await
                    .map(|r| r.iter().map(|a| IpAddr::V4(a.0)).collect::<Vec<_>>()),
                AddressFamily::Ipv6 => resolver
                    .ipv6_lookup(host.as_str())
                    .await
                    .map(|r| r.iter().map(|aaaa| IpAddr::V6(aaaa.0)).collect::<Vec<_>>()),
            };

            match result {
                Ok(addresses) if !addresses.is_empty() => {
                    debug!("DNS {} -> {:?}", host, addresses);
                    LookupStatus::Resolved { addresses, family }
                }
                Ok(_) => LookupStatus::Failed(format!("no {} address for {}", family, host)),
                Err(e) => {
                    debug!("{} lookup failed for {}: {}", family, host, e);
                    classify(&e)
                }
            }
        })
    }
}

/// Map a hickory failure onto the completion taxonomy
fn classify(err: &ResolveError) -> LookupStatus {
    match err.kind() {
        ResolveErrorKind::Timeout => LookupStatus::Timeout,
        ResolveErrorKind::NoConnections => LookupStatus::Refused,
        ResolveErrorKind::Io(e) => classify_io(e).unwrap_or_else(|| LookupStatus::Failed(err.to_string())),
        ResolveErrorKind::Proto(proto) => match proto.kind() {
            ProtoErrorKind::Timeout => LookupStatus::Timeout,
            ProtoErrorKind::Io(e) => {
                classify_io(e).unwrap_or_else(|| LookupStatus::Failed(err.to_string()))
            }
            _ => LookupStatus::Failed(err.to_string()),
        },
        _ => LookupStatus::Failed(err.to_string()),
    }
}

fn classify_io(e: &io::Error) -> Option<LookupStatus> {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => Some(LookupStatus::Refused),
        io::ErrorKind::TimedOut => Some(LookupStatus::Timeout),
        _ => None,
    }
}

/// Builds a [`HickoryBackend`] from a DNS config snapshot
#[derive(Debug, Clone)]
pub struct HickoryBuilder {
    config: DnsConfig,
}

impl HickoryBuilder {
    pub fn new(config: DnsConfig) -> Self {
        HickoryBuilder { config }
    }
}

impl BackendBuilder for HickoryBuilder {
    fn build(&self) -> Result<Arc<dyn LookupBackend>> {
        Ok(Arc::new(HickoryBackend::new(&self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn backend_with_hosts(hosts: &[(&str, &str)]) -> HickoryBackend {
        let mut config = DnsConfig::default();
        config.nameserver = vec!["127.0.0.1:53".to_string()];
        for (name, ip) in hosts {
            config.hosts.insert(name.to_string(), ip.to_string());
        }
        HickoryBackend::new(&config).unwrap()
    }

    #[test]
    fn test_parse_nameserver() {
        let ns = HickoryBackend::parse_nameserver("8.8.8.8").unwrap();
        assert_eq!(ns.protocol, Protocol::Udp);
        assert_eq!(ns.socket_addr.port(), 53);

        let ns = HickoryBackend::parse_nameserver("8.8.8.8:5353").unwrap();
        assert_eq!(ns.socket_addr.port(), 5353);

        let ns = HickoryBackend::parse_nameserver("tcp://1.1.1.1").unwrap();
        assert_eq!(ns.protocol, Protocol::Tcp);

        let ns = HickoryBackend::parse_nameserver("tls://1.1.1.1").unwrap();
        assert_eq!(ns.protocol, Protocol::Tls);
        assert_eq!(ns.socket_addr.port(), 853);
        assert_eq!(ns.tls_dns_name.as_deref(), Some("1.1.1.1"));

        assert!(HickoryBackend::parse_nameserver("dns.google").is_none());
    }

    #[test]
    fn test_no_usable_nameserver() {
        let mut config = DnsConfig::default();
        config.nameserver = vec!["not-an-ip".to_string()];
        assert!(matches!(HickoryBackend::new(&config), Err(Error::Dns(_))));
    }

    #[tokio::test]
    async fn test_literal_passthrough() {
        let backend = backend_with_hosts(&[]);
        let status = backend.lookup("10.0.0.1", AddressFamily::Ipv4).await;
        assert_eq!(
            status,
            LookupStatus::Resolved {
                addresses: vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))],
                family: AddressFamily::Ipv4,
            }
        );
    }

    #[tokio::test]
    async fn test_hosts_table() {
        let backend = backend_with_hosts(&[("Controller.Local", "192.168.40.1")]);
        let status = backend.lookup("controller.local", AddressFamily::Ipv4).await;
        assert_eq!(
            status,
            LookupStatus::Resolved {
                addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 40, 1))],
                family: AddressFamily::Ipv4,
            }
        );
    }

    #[test]
    fn test_classify_io() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify_io(&refused), Some(LookupStatus::Refused));
        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(classify_io(&other), None);
    }
}
