use crate::error::RuleParseError;
use crate::graph::TraceGraph;
use crate::layer::{Layer, LayerContext};
use crate::model::address_octets;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use tracing::trace;

/// Network plus mask, compared byte by byte.
///
/// An address matches when `address[i] & mask[i] == network[i] & mask[i]` for
/// every byte. Addresses of a different length than the network never match,
/// so an IPv4 rule never captures an IPv6 host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressMatcher {
    network: Vec<u8>,
    mask: Vec<u8>,
}

impl AddressMatcher {
    pub fn new(network: Vec<u8>, mask: Vec<u8>) -> Result<Self, RuleParseError> {
        if network.len() != mask.len() {
            return Err(RuleParseError {
                input: format!("{:?}/{:?}", network, mask),
                reason: "network and mask lengths differ".to_string(),
            });
        }
        Ok(Self { network, mask })
    }

    pub fn from_prefix(network: IpAddr, prefix_len: u8) -> Result<Self, RuleParseError> {
        let network = address_octets(network);
        let bits = network.len() * 8;
        if prefix_len as usize > bits {
            return Err(RuleParseError {
                input: format!("{}", prefix_len),
                reason: format!("prefix longer than {} bits", bits),
            });
        }

        let mask = prefix_mask(network.len(), prefix_len as usize);
        Ok(Self { network, mask })
    }

    /// Matches exactly one address.
    pub fn host(address: IpAddr) -> Self {
        let network = address_octets(address);
        let mask = vec![0xff; network.len()];
        Self { network, mask }
    }

    /// Parse `a.b.c.d`, `a.b.c.d/24`, `a.b.c.d/255.255.0.0` or the IPv6 equivalents.
    pub fn parse(input: &str) -> Result<Self, RuleParseError> {
        let invalid = |reason: &str| RuleParseError {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        let (address, suffix) = match trimmed.split_once('/') {
            Some((address, suffix)) => (address, Some(suffix)),
            None => (trimmed, None),
        };

        let network: IpAddr = address
            .parse()
            .map_err(|_| invalid("not an IP address"))?;

        match suffix {
            None => Ok(Self::host(network)),
            Some(suffix) => {
                if let Ok(prefix_len) = suffix.parse::<u8>() {
                    return Self::from_prefix(network, prefix_len).map_err(|e| invalid(&e.reason));
                }

                let mask: IpAddr = suffix
                    .parse()
                    .map_err(|_| invalid("mask must be a prefix length or an address"))?;
                if mask.is_ipv4() != network.is_ipv4() {
                    return Err(invalid("mask and network are different address families"));
                }
                Ok(Self {
                    network: address_octets(network),
                    mask: address_octets(mask),
                })
            }
        }
    }

    pub fn matches(&self, address: &[u8]) -> bool {
        address.len() == self.network.len()
            && address
                .iter()
                .zip(&self.network)
                .zip(&self.mask)
                .all(|((a, n), m)| a & m == n & m)
    }

    pub fn matches_address(&self, address: IpAddr) -> bool {
        self.matches(&address_octets(address))
    }

    /// Prefix length when the mask is a run of leading ones.
    pub fn prefix_len(&self) -> Option<u8> {
        let ones: u32 = self.mask.iter().map(|b| b.count_ones()).sum();
        (self.mask == prefix_mask(self.mask.len(), ones as usize)).then_some(ones as u8)
    }

    fn network_address(&self) -> Option<IpAddr> {
        crate::model::address_from_octets(&self.network).ok()
    }
}

fn prefix_mask(len: usize, prefix_len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| {
            let bits = prefix_len.saturating_sub(i * 8).min(8);
            if bits == 0 { 0 } else { 0xffu8 << (8 - bits) }
        })
        .collect()
}

impl fmt::Display for AddressMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let network = match self.network_address() {
            Some(address) => address.to_string(),
            None => return write!(f, "{:02x?}/{:02x?}", self.network, self.mask),
        };

        match (self.prefix_len(), crate::model::address_from_octets(&self.mask)) {
            (Some(prefix_len), _) => write!(f, "{}/{}", network, prefix_len),
            (None, Ok(mask)) => write!(f, "{}/{}", network, mask),
            (None, Err(_)) => write!(f, "{}", network),
        }
    }
}

impl TryFrom<String> for AddressMatcher {
    type Error = RuleParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AddressMatcher> for String {
    fn from(matcher: AddressMatcher) -> Self {
        matcher.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingRule {
    #[serde(rename = "network")]
    pub matcher: AddressMatcher,
    /// `false` pins matching hosts to their address text.
    #[serde(default = "default_included")]
    pub included: bool,
    #[serde(default)]
    pub name: String,
}

fn default_included() -> bool {
    true
}

impl NamingRule {
    pub fn include(matcher: AddressMatcher, name: &str) -> Self {
        Self {
            matcher,
            included: true,
            name: name.to_string(),
        }
    }

    pub fn exclude(matcher: AddressMatcher) -> Self {
        Self {
            matcher,
            included: false,
            name: String::new(),
        }
    }
}

/// Names nodes from an ordered rule list, falling back to DNS names.
///
/// Rules are tried in order and the first match decides: an including rule
/// sets the node's name, an excluding rule leaves the address text and also
/// blocks the DNS fallback. Later rules are never consulted, however specific.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingLayer {
    #[serde(default)]
    pub rules: Vec<NamingRule>,
    #[serde(default)]
    pub overwrite_with_dns: bool,
}

impl NamingLayer {
    pub fn new(rules: Vec<NamingRule>) -> Self {
        Self {
            rules,
            overwrite_with_dns: false,
        }
    }

    pub fn with_overwrite_with_dns(mut self, overwrite: bool) -> Self {
        self.overwrite_with_dns = overwrite;
        self
    }

    fn rule_for(&self, address: IpAddr) -> Option<&NamingRule> {
        let octets = address_octets(address);
        self.rules.iter().find(|rule| rule.matcher.matches(&octets))
    }
}

impl Layer for NamingLayer {
    fn execute(&self, graph: &mut TraceGraph, ctx: &LayerContext) {
        for node in graph.nodes_mut() {
            if node.excluded_from_naming {
                continue;
            }

            match self.rule_for(node.address) {
                Some(rule) if rule.included => {
                    node.name = rule.name.clone();
                }
                Some(_) => {
                    node.excluded_from_naming = true;
                }
                None => {
                    if self.overwrite_with_dns {
                        if let Some(dns_name) = node.dns_name.as_ref().filter(|n| !n.is_empty()) {
                            node.name = dns_name.clone();
                        }
                    }
                }
            }

            trace!(run_id = %ctx.run_id, address = %node.address, name = %node.name, "named node");
        }
    }

    fn description(&self) -> String {
        let s = if self.rules.len() == 1 { "" } else { "s" };
        format!("{} Matcher{}", self.rules.len(), s)
    }
}
