//! IP list entries and CIDR matching.
//!
//! An entry is either a bare string, matched exactly or as a textual prefix
//! (`"192.168."` covers the whole /16), or a `network/prefix` range matched
//! on the numeric address. Ranges that fail to parse never match.
//!
//! IPv6 ranges are compared bit-exactly, so prefixes that are not multiples
//! of 16 and compressed (`::`) notation both behave as the prefix length says.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

/// A parsed allow/deny list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpRule {
    /// Bare entry, matched exactly or as a string prefix.
    Literal(String),
    /// IPv4 or IPv6 range.
    Range(IpNet),
    /// Unparseable entry. Kept so it can be reported, never matches.
    Malformed(String),
}

impl IpRule {
    pub fn parse(entry: &str) -> Self {
        let entry = entry.trim();
        if entry.is_empty() {
            return IpRule::Malformed(String::new());
        }

        let Some((network, prefix)) = entry.split_once('/') else {
            return IpRule::Literal(entry.to_string());
        };

        match IpNet::from_str(&format!("{}/{}", network.trim(), prefix.trim())) {
            Ok(net) => IpRule::Range(net),
            Err(_) => IpRule::Malformed(entry.to_string()),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, IpRule::Malformed(_))
    }

    /// Whether `ip` (as resolved from the request) falls under this entry.
    pub fn matches(&self, ip: &str) -> bool {
        match self {
            IpRule::Literal(entry) => ip.starts_with(entry.as_str()),
            IpRule::Range(net) => match parse_ip(ip) {
                Some(addr @ IpAddr::V4(_)) => net.contains(&addr),
                Some(IpAddr::V6(addr)) => match (net, addr.to_ipv4_mapped()) {
                    (IpNet::V4(v4), Some(mapped)) => v4.contains(&mapped),
                    _ => net.contains(&IpAddr::V6(addr)),
                },
                None => false,
            },
            IpRule::Malformed(_) => false,
        }
    }
}

impl std::fmt::Display for IpRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpRule::Literal(entry) | IpRule::Malformed(entry) => write!(f, "{}", entry),
            IpRule::Range(net) => write!(f, "{}", net),
        }
    }
}

/// True if any rule matches `ip`.
pub fn any_match<'a>(rules: impl IntoIterator<Item = &'a IpRule>, ip: &str) -> bool {
    rules.into_iter().any(|rule| rule.matches(ip))
}

fn parse_ip(ip: &str) -> Option<IpAddr> {
    ip.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_cidr() {
        let rule = IpRule::parse("10.0.0.0/24");
        assert!(rule.matches("10.0.0.5"));
        assert!(rule.matches("10.0.0.255"));
        assert!(!rule.matches("10.0.1.5"));
        assert!(!rule.matches("not-an-ip"));
    }

    #[test]
    fn test_ipv4_edge_prefixes() {
        assert!(IpRule::parse("0.0.0.0/0").matches("203.0.113.50"));
        assert!(IpRule::parse("203.0.113.50/32").matches("203.0.113.50"));
        assert!(!IpRule::parse("203.0.113.50/32").matches("203.0.113.51"));
        // Host bits in the network are ignored.
        assert!(IpRule::parse("10.1.2.3/8").matches("10.200.0.1"));
    }

    #[test]
    fn test_ipv4_prefix_property() {
        use std::net::Ipv4Addr;

        let network = Ipv4Addr::new(172, 16, 99, 1);
        let samples = [
            Ipv4Addr::new(172, 16, 99, 200),
            Ipv4Addr::new(172, 17, 0, 1),
            Ipv4Addr::new(12, 0, 0, 1),
            Ipv4Addr::new(172, 16, 98, 1),
        ];
        for prefix in 0..=32u32 {
            let rule = IpRule::parse(&format!("{}/{}", network, prefix));
            for ip in samples {
                let shared = prefix == 0 || (u32::from(ip) ^ u32::from(network)).leading_zeros() >= prefix;
                assert_eq!(rule.matches(&ip.to_string()), shared, "{}/{} vs {}", network, prefix, ip);
            }
        }
    }

    #[test]
    fn test_range_display_keeps_entry_shape() {
        assert_eq!(IpRule::parse(" 10.0.0.0 / 24 ").to_string(), "10.0.0.0/24");
        assert_eq!(IpRule::parse("2001:db8::/32").to_string(), "2001:db8::/32");
        assert!(IpRule::parse("10.0.0.0/33").is_malformed());
    }

    #[test]
    fn test_ipv4_mapped_ipv6_matches_v4_range() {
        assert!(IpRule::parse("10.0.0.0/8").matches("::ffff:10.9.8.7"));
    }

    #[test]
    fn test_malformed_entries_never_match() {
        for entry in [
            "10.0.0/24",
            "10.0.0.256/24",
            "10.0.0.0/33",
            "10.0.0.0/-1",
            "10.0.0.0/abc",
            "2001:db8::/129",
            "2001:zz8::/32",
            "",
        ] {
            let rule = IpRule::parse(entry);
            assert!(rule.is_malformed(), "{entry:?} should be malformed");
            assert!(!rule.matches("10.0.0.1"));
            assert!(!rule.matches("2001:db8::1"));
        }
    }

    #[test]
    fn test_literal_exact_and_prefix() {
        let exact = IpRule::parse("192.168.1.10");
        assert!(exact.matches("192.168.1.10"));
        assert!(!exact.matches("192.168.1.11"));
        // Textual prefix semantics: a bare entry also covers longer strings.
        assert!(exact.matches("192.168.1.100"));

        let prefix = IpRule::parse("192.168.");
        assert!(prefix.matches("192.168.44.2"));
        assert!(!prefix.matches("10.168.44.2"));
    }

    #[test]
    fn test_ipv6_cidr() {
        assert!(IpRule::parse("::/0").matches("2001:db8::1"));
        assert!(IpRule::parse("2001:db8::/32").matches("2001:db8:ffff::1"));
        assert!(!IpRule::parse("2001:db8::/32").matches("2001:db9::1"));
        assert!(IpRule::parse("2001:db8::1/128").matches("2001:0db8:0:0:0:0:0:1"));
        assert!(!IpRule::parse("2001:db8::1/128").matches("2001:db8::2"));
        assert!(!IpRule::parse("2001:db8::/32").matches("10.0.0.1"));
    }

    /// Whole-segment comparison of colon-separated groups, as older
    /// deployments matched IPv6 ranges.
    fn segment_match(ip: &str, network: &str, prefix: u32) -> bool {
        if prefix == 0 {
            return true;
        }
        if prefix >= 128 {
            return ip == network;
        }
        let segments = (prefix / 16) as usize;
        let ip: Vec<&str> = ip.split(':').collect();
        let net: Vec<&str> = network.split(':').collect();
        (0..segments).all(|i| ip.get(i) == net.get(i))
    }

    #[test]
    fn test_ipv6_unaligned_prefix_differs_from_segment_match() {
        // /20 covers 2001:0000-2001:0fff; the second group 1db8 is outside.
        assert!(segment_match("2001:1db8::1", "2001:0db8::", 20));
        assert!(!IpRule::parse("2001:0db8::/20").matches("2001:1db8::1"));
        assert!(IpRule::parse("2001:0db8::/20").matches("2001:0abc::1"));

        // /40 keeps half of the third group.
        assert!(segment_match("2001:db8:12ff::1", "2001:db8:1200::", 40));
        assert!(IpRule::parse("2001:db8:1200::/40").matches("2001:db8:12ff::1"));
        assert!(!IpRule::parse("2001:db8:1200::/40").matches("2001:db8:1300::1"));
        assert!(segment_match("2001:db8:1300::1", "2001:db8:1200::", 40));
    }

    #[test]
    fn test_ipv6_aligned_prefix_agrees_with_segment_match() {
        let network = "2001:db8:aaaa:bbbb::";
        for (ip, prefix) in [
            ("2001:db8:aaaa:bbbb:1:2:3:4", 64u8),
            ("2001:db8:aaaa:cccc:1:2:3:4", 64),
            ("2001:db8:aaaa:cccc:1:2:3:4", 48),
            ("2001:db9:aaaa:bbbb:1:2:3:4", 32),
        ] {
            let exact = IpRule::parse(&format!("{network}/{prefix}")).matches(ip);
            assert_eq!(exact, segment_match(ip, network, u32::from(prefix)), "{ip}/{prefix}");
        }
    }

    #[test]
    fn test_compressed_notation() {
        // Segment comparison cannot see through `::`; numeric comparison can.
        assert!(!segment_match("2001:db8:0:0:1::", "2001:db8::", 48));
        assert!(IpRule::parse("2001:db8::/48").matches("2001:db8:0:0:1::"));
    }
}
