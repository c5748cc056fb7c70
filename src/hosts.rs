//! Hostname resolution for host mappings

use crate::error::{AppError, Result};
use crate::measure::ProxyLink;
use crate::models::{HostMapping, HostSource, Target};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    system_conf, TokioAsyncResolver,
};

/// Resolves a proxy hostname to an address
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, hostname: &str) -> Option<IpAddr>;
}

/// System DNS resolver backed by trust-dns
pub struct DnsHostResolver {
    resolver: TokioAsyncResolver,
}

impl DnsHostResolver {
    /// Use the system configuration, falling back to the library defaults
    pub fn from_system_conf() -> Self {
        let (config, opts) = system_conf::read_system_conf()
            .unwrap_or_else(|_| (ResolverConfig::default(), ResolverOpts::default()));
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    /// All addresses for a name; errors are surfaced for diagnostics
    pub async fn lookup_all(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        let response = self
            .resolver
            .lookup_ip(hostname)
            .await
            .map_err(|e| AppError::dns_resolution(format!("DNS lookup failed for {}: {}", hostname, e)))?;
        Ok(response.iter().collect())
    }
}

#[async_trait]
impl HostResolver for DnsHostResolver {
    async fn resolve(&self, hostname: &str) -> Option<IpAddr> {
        self.lookup_all(hostname).await.ok()?.into_iter().next()
    }
}

/// Fixed name table, for tests and air-gapped setups
#[derive(Debug, Default, Clone)]
pub struct StaticHostResolver {
    entries: HashMap<String, IpAddr>,
}

impl StaticHostResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, hostname: impl Into<String>, ip: IpAddr) -> Self {
        self.entries.insert(hostname.into().to_lowercase(), ip);
        self
    }
}

#[async_trait]
impl HostResolver for StaticHostResolver {
    async fn resolve(&self, hostname: &str) -> Option<IpAddr> {
        self.entries.get(&hostname.to_lowercase()).copied()
    }
}

/// Host mapping for a target's proxy host.
///
/// IP literals map to themselves; names go through `resolver`. Direct links,
/// unparsable links and unresolvable names yield `None`.
pub async fn host_mapping_for(target: &Target, resolver: Option<&dyn HostResolver>) -> Option<HostMapping> {
    let link = ProxyLink::parse(&target.link).ok()?;
    let hostname = link.host()?;

    let ip = match link.host_ip() {
        Some(ip) => ip,
        None => resolver?.resolve(&hostname).await?,
    };

    Some(HostMapping {
        hostname,
        ip: ip.to_string(),
        description: target.label().to_string(),
        source: HostSource::Speedtest,
    })
}
