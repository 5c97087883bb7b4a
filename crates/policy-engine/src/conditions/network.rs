use std::net::IpAddr;

use tracing::trace;

use crate::decision::{Decision, RiskTier};
use crate::error::PolicyError;
use crate::matcher::{host_ip, is_private_ip, match_domain, parse_url, IpRange};
use crate::schema::NetworkCondition;

/// What a network capability is about to contact.
///
/// When `url` is set, the host and port it names take precedence over the
/// explicit `host` and `port` fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkTarget {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ip: Option<IpAddr>,
    /// Outgoing body size in bytes.
    pub request_size: Option<u64>,
}

impl NetworkTarget {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_request_size(mut self, size: u64) -> Self {
        self.request_size = Some(size);
        self
    }
}

/// Compiled form of [`NetworkCondition`].
#[derive(Debug, Clone)]
pub struct NetworkPolicy {
    allowed_domains: Vec<String>,
    denied_domains: Vec<String>,
    allowed_ips: Vec<IpRange>,
    denied_ips: Vec<IpRange>,
    block_private_ranges: bool,
    allowed_ports: Vec<u16>,
    denied_ports: Vec<u16>,
    max_request_size: u64,
}

impl NetworkPolicy {
    pub fn compile(condition: &NetworkCondition) -> Result<Self, PolicyError> {
        let parse_all = |field: &'static str, entries: &[String]| {
            entries
                .iter()
                .map(|e| IpRange::parse(field, e))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            allowed_domains: condition.allowed_domains.clone(),
            denied_domains: condition.denied_domains.clone(),
            allowed_ips: parse_all("allowed_ips", &condition.allowed_ips)?,
            denied_ips: parse_all("denied_ips", &condition.denied_ips)?,
            block_private_ranges: condition.block_private_ranges,
            allowed_ports: condition.allowed_ports.clone(),
            denied_ports: condition.denied_ports.clone(),
            max_request_size: condition.max_request_size,
        })
    }

    pub fn evaluate(&self, target: &NetworkTarget) -> Decision {
        let mut host = target
            .host
            .as_deref()
            .map(|h| h.trim().trim_end_matches('.').to_ascii_lowercase());
        let mut port = target.port;

        if let Some(url) = &target.url {
            match parse_url(url) {
                Ok(parsed) => {
                    if parsed.host.is_some() {
                        host = parsed.host;
                    }
                    port = Some(parsed.port);
                }
                Err(e) => {
                    return Decision::deny(format!("Invalid URL: {e}"), RiskTier::Medium)
                        .with_rules(["invalid_url"]);
                }
            }
        }

        let host_addr = match host.as_deref().map(host_ip).transpose() {
            Ok(addr) => addr.flatten(),
            Err(e) => {
                return Decision::deny(format!("Invalid host: {e}"), RiskTier::Medium)
                    .with_rules(["invalid_host"]);
            }
        };
        let ip = target.ip.or(host_addr);
        trace!(?host, ?port, ?ip, "checking network condition");

        if host.is_none() && ip.is_none() {
            return Decision::deny("No host or IP to check", RiskTier::Medium)
                .with_rules(["missing_host"]);
        }

        if let Some(host) = &host {
            if let Some(pattern) = self.denied_domains.iter().find(|p| match_domain(host, p)) {
                return Decision::deny(format!("Domain is denied: {host}"), RiskTier::High)
                    .with_rules([format!("denied_domain:{pattern}")]);
            }
        }

        if let Some(port) = port {
            if self.denied_ports.contains(&port) {
                return Decision::deny(format!("Port {port} is denied"), RiskTier::High)
                    .with_rules([format!("denied_port:{port}")]);
            }
            if !self.allowed_ports.is_empty() && !self.allowed_ports.contains(&port) {
                return Decision::deny(format!("Port {port} not in allowed list"), RiskTier::Medium)
                    .with_rules(["allowed_ports"]);
            }
        }

        if let Some(size) = target.request_size.filter(|s| *s > self.max_request_size) {
            return Decision::deny(
                format!(
                    "Request size {size} bytes exceeds limit of {} bytes",
                    self.max_request_size
                ),
                RiskTier::Medium,
            )
            .with_rules(["max_request_size"]);
        }

        if let Some(ip) = ip {
            if self.block_private_ranges && is_private_ip(&ip) {
                return Decision::deny(format!("Private IP address blocked: {ip}"), RiskTier::High)
                    .with_rules(["private_ip"]);
            }
            if let Some(range) = self.denied_ips.iter().find(|r| r.contains(&ip)) {
                return Decision::deny(format!("IP address is denied: {ip}"), RiskTier::High)
                    .with_rules([format!("denied_ip:{}", range.source)]);
            }
        }

        if let Some(host) = host.as_deref().filter(|_| !self.allowed_domains.is_empty()) {
            return match self.allowed_domains.iter().find(|p| match_domain(host, p)) {
                Some(pattern) => Decision::allow("Domain is in allowed list", RiskTier::Low)
                    .with_rules([format!("allowed_domain:{pattern}")]),
                None => Decision::deny(format!("Domain not in allowed list: {host}"), RiskTier::Medium),
            };
        }

        if let Some(ip) = ip.filter(|_| !self.allowed_ips.is_empty()) {
            return match self.allowed_ips.iter().find(|r| r.contains(&ip)) {
                Some(range) => Decision::allow("IP is in allowed list", RiskTier::Low)
                    .with_rules([format!("allowed_ip:{}", range.source)]),
                None => Decision::deny(format!("IP not in allowed list: {ip}"), RiskTier::Medium),
            };
        }

        Decision::allow("Network access not explicitly denied", RiskTier::Low)
    }
}

pub fn evaluate_network_condition(policy: &NetworkPolicy, target: &NetworkTarget) -> Decision {
    policy.evaluate(target)
}
