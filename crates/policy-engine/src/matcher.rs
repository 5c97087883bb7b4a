//! Pattern helpers shared by the condition evaluators: globs, domain
//! patterns, IP ranges and URL host extraction.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use globset::{Glob, GlobMatcher};
use regex::Regex;

use crate::error::PolicyError;

/// A glob kept next to its source text so decisions can name it.
#[derive(Debug, Clone)]
pub struct NamedGlob {
    pub pattern: String,
    matcher: GlobMatcher,
}

impl NamedGlob {
    pub fn compile(field: &'static str, pattern: &str) -> Result<Self, PolicyError> {
        let matcher = Glob::new(pattern)
            .map_err(|e| PolicyError::InvalidPattern {
                field,
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?
            .compile_matcher();
        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

/// A regex kept next to its source text so decisions can name it.
#[derive(Debug, Clone)]
pub struct NamedRegex {
    pub pattern: String,
    regex: Regex,
}

impl NamedRegex {
    /// Compile `pattern` for unanchored searching.
    pub fn search(field: &'static str, pattern: &str) -> Result<Self, PolicyError> {
        Self::build(field, pattern, pattern.to_string())
    }

    /// Compile `pattern` so that it only matches from the start of the input.
    pub fn anchored(field: &'static str, pattern: &str) -> Result<Self, PolicyError> {
        Self::build(field, pattern, format!("^(?:{pattern})"))
    }

    fn build(field: &'static str, pattern: &str, source: String) -> Result<Self, PolicyError> {
        let regex = Regex::new(&source).map_err(|e| PolicyError::InvalidPattern {
            field,
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }
}

pub fn compile_globs(field: &'static str, patterns: &[String]) -> Result<Vec<NamedGlob>, PolicyError> {
    patterns.iter().map(|p| NamedGlob::compile(field, p)).collect()
}

/// Match a hostname against a domain pattern.
///
/// * `example.com` matches only itself.
/// * `*.example.com` matches `example.com` and any subdomain.
/// * `.example.com` behaves the same as `*.example.com`.
/// * `*` matches every host.
///
/// Comparison is case-insensitive.
pub fn match_domain(host: &str, pattern: &str) -> bool {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let pattern = pattern.trim().to_ascii_lowercase();

    if pattern == "*" {
        return true;
    }
    if host == pattern {
        return true;
    }

    let suffix = pattern
        .strip_prefix("*.")
        .or_else(|| pattern.strip_prefix('.'));
    match suffix {
        Some(base) if !base.is_empty() => {
            host == base
                || host
                    .strip_suffix(base)
                    .is_some_and(|head| head.ends_with('.'))
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// IP ranges
// ---------------------------------------------------------------------------

/// A single address or a CIDR block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRange {
    pub source: String,
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn parse(field: &'static str, entry: &str) -> Result<Self, PolicyError> {
        let invalid = || PolicyError::InvalidCidr {
            field,
            entry: entry.to_string(),
        };
        let trimmed = entry.trim();
        let (addr, prefix) = match trimmed.split_once('/') {
            Some((addr, bits)) => {
                let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
                let bits: u8 = bits.parse().map_err(|_| invalid())?;
                (addr, bits)
            }
            None => {
                let addr: IpAddr = trimmed.parse().map_err(|_| invalid())?;
                (addr, max_prefix(&addr))
            }
        };
        if prefix > max_prefix(&addr) {
            return Err(invalid());
        }
        Ok(Self {
            source: entry.to_string(),
            network: addr,
            prefix,
        })
    }

    /// Host bits of the configured network are ignored (non-strict parsing).
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

/// True for private, loopback, link-local and unspecified addresses, in both
/// address families. IPv4-mapped IPv6 addresses are checked as IPv4.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(&v4),
            None => is_private_v6(v6),
        },
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 0.0.0.0/8 ("this network")
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
}

// ---------------------------------------------------------------------------
// URL parsing
// ---------------------------------------------------------------------------

/// Host and port extracted from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTarget {
    pub scheme: String,
    /// `None` when the URL has no authority (e.g. `mailto:` or a bare path).
    pub host: Option<String>,
    pub port: u16,
}

/// Split a URL into scheme, host and port.
///
/// The port defaults to 443 for `https` and 80 for everything else. Bracketed
/// IPv6 hosts are returned without brackets. Fails on a malformed port or an
/// unterminated IPv6 bracket.
pub fn parse_url(url: &str) -> Result<UrlTarget, String> {
    let url = url.trim();
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => (String::new(), ""),
    };
    if !scheme.is_empty()
        && !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return Err(format!("invalid scheme '{scheme}'"));
    }
    let default_port = if scheme == "https" { 443 } else { 80 };

    let authority_end = rest
        .find(|c: char| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    // Clients disagree on where such an authority ends; refuse to guess.
    if let Some(bad) = authority
        .chars()
        .find(|c| *c == '\\' || c.is_whitespace() || c.is_control())
    {
        return Err(format!("invalid character {bad:?} in authority"));
    }
    // Drop any userinfo.
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);

    if host_port.is_empty() {
        return Ok(UrlTarget {
            scheme,
            host: None,
            port: default_port,
        });
    }

    let (host, port_str) = if let Some(bracketed) = host_port.strip_prefix('[') {
        let end = bracketed
            .find(']')
            .ok_or_else(|| "unterminated IPv6 address".to_string())?;
        let host = &bracketed[..end];
        let after = &bracketed[end + 1..];
        let port = match after {
            "" => None,
            p => Some(
                p.strip_prefix(':')
                    .ok_or_else(|| format!("unexpected characters after IPv6 host: '{p}'"))?,
            ),
        };
        (host, port)
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        }
    };

    let port = match port_str {
        None | Some("") => default_port,
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| format!("port could not be parsed: '{p}'"))?,
    };

    let host = host.trim_end_matches('.').to_ascii_lowercase();
    Ok(UrlTarget {
        scheme,
        host: (!host.is_empty()).then_some(host),
        port,
    })
}

/// Interpret `host` as an IP address the way a resolver would.
///
/// Besides the standard textual forms this accepts the legacy IPv4 notations
/// (`2130706433`, `0x7f.1`, `0177.0.0.1`). Returns `Ok(None)` for names and
/// an error for hosts that look numeric but are not a valid address.
pub fn host_ip(host: &str) -> Result<Option<IpAddr>, String> {
    let host = host.trim().trim_end_matches('.');
    let unbracketed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return Ok(Some(ip));
    }
    if !looks_like_ipv4(host) {
        return Ok(None);
    }
    parse_legacy_ipv4(host)
        .map(|v4| Some(IpAddr::V4(v4)))
        .ok_or_else(|| format!("malformed numeric host '{host}'"))
}

/// Every label starts with a digit and uses only hex digits and `x`.
fn looks_like_ipv4(host: &str) -> bool {
    !host.is_empty()
        && host.split('.').all(|part| {
            part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_hexdigit() || c == 'x' || c == 'X')
        })
}

/// inet_aton: one to four parts, each decimal, octal (`0` prefix) or hex
/// (`0x` prefix). The last part fills the remaining bytes.
fn parse_legacy_ipv4(host: &str) -> Option<Ipv4Addr> {
    let parts = host
        .split('.')
        .map(parse_ipv4_part)
        .collect::<Option<Vec<u64>>>()?;
    let (last, head) = parts.split_last()?;
    if head.len() > 3 || head.iter().any(|p| *p > 0xff) {
        return None;
    }
    let tail_bits = 8 * (4 - head.len() as u32);
    if *last >= 1u64 << tail_bits {
        return None;
    }
    let value = head
        .iter()
        .fold(0u64, |acc, p| (acc << 8) | p)
        << tail_bits
        | last;
    u32::try_from(value).ok().map(Ipv4Addr::from)
}

fn parse_ipv4_part(part: &str) -> Option<u64> {
    let (digits, radix) = if let Some(hex) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
        (hex, 16)
    } else if part.len() > 1 && part.starts_with('0') {
        (&part[1..], 8)
    } else {
        (part, 10)
    };
    if digits.is_empty() {
        // "0x" alone is zero
        return (radix == 16).then_some(0);
    }
    if digits.len() > 12 {
        return None;
    }
    u64::from_str_radix(digits, radix).ok()
}

/// Extract the host from a destination that may be a URL, an email address
/// or a bare host name.
pub fn destination_host(destination: &str) -> String {
    let destination = destination.trim();
    if destination.contains("://") {
        if let Ok(UrlTarget { host: Some(host), .. }) = parse_url(destination) {
            return host;
        }
        return destination.to_ascii_lowercase();
    }
    match destination.rsplit_once('@') {
        Some((_, domain)) => domain.to_ascii_lowercase(),
        None => destination.to_ascii_lowercase(),
    }
}
