use std::net::{IpAddr, Ipv4Addr};

use super::Location;

const SOURCE: &str = "local";

/// `(network, prefix length, country, country code)`.
const BUILTIN_V4: &[(Ipv4Addr, u8, &str, &str)] = &[
    (Ipv4Addr::new(1, 0, 0, 0), 24, "Australia", "AU"),
    (Ipv4Addr::new(1, 1, 1, 0), 24, "Australia", "AU"),
    (Ipv4Addr::new(8, 8, 4, 0), 24, "United States", "US"),
    (Ipv4Addr::new(8, 8, 8, 0), 24, "United States", "US"),
    (Ipv4Addr::new(9, 9, 9, 0), 24, "Switzerland", "CH"),
    (Ipv4Addr::new(114, 114, 114, 0), 24, "China", "CN"),
    (Ipv4Addr::new(223, 5, 5, 0), 24, "China", "CN"),
];

#[derive(Debug, Clone)]
struct Range {
    network: u32,
    mask: u32,
    country: &'static str,
    country_code: &'static str,
}

/// Embedded low-precision lookup. Cannot fail for a parsed address.
#[derive(Debug, Clone)]
pub struct LocalTable {
    ranges: Vec<Range>,
}

impl LocalTable {
    pub fn builtin() -> Self {
        let ranges = BUILTIN_V4
            .iter()
            .map(|&(net, prefix, country, country_code)| {
                let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
                Range {
                    network: u32::from(net) & mask,
                    mask,
                    country,
                    country_code,
                }
            })
            .collect();
        Self { ranges }
    }

    pub fn lookup(&self, ip: IpAddr) -> Location {
        if is_local(ip) {
            return Location {
                country: "LAN".to_string(),
                source: SOURCE.to_string(),
                ..Location::default()
            };
        }

        let IpAddr::V4(v4) = ip else {
            return Location::unknown(SOURCE);
        };
        let bits = u32::from(v4);
        self.ranges
            .iter()
            .find(|r| bits & r.mask == r.network)
            .map_or_else(
                || Location::unknown(SOURCE),
                |r| Location {
                    country: r.country.to_string(),
                    country_code: r.country_code.to_string(),
                    source: SOURCE.to_string(),
                    ..Location::default()
                },
            )
    }
}

fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("10.1.2.3", "LAN")]
    #[case("127.0.0.1", "LAN")]
    #[case("::1", "LAN")]
    #[case("fd00::1", "LAN")]
    #[case("8.8.8.8", "United States")]
    #[case("1.1.1.1", "Australia")]
    #[case("203.0.113.7", "unknown")]
    #[case("2001:db8::1", "unknown")]
    fn lookup_table(#[case] ip: &str, #[case] country: &str) {
        let table = LocalTable::builtin();
        let location = table.lookup(ip.parse().unwrap());
        assert_eq!(location.country, country);
        assert_eq!(location.source, "local");
    }
}
