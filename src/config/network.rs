// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 proxk3s contributors

//! IPv4 subnet and address-range parsing

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// An IPv4 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// Network address with host bits cleared
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    /// Whether an address lies inside the subnet
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == u32::from(self.network)
    }

    /// Whether an address is the network or broadcast address
    pub fn is_reserved(&self, addr: Ipv4Addr) -> bool {
        if self.prefix >= 31 {
            return false;
        }
        let raw = u32::from(addr);
        raw == u32::from(self.network) || raw == u32::from(self.network) | !self.mask()
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("'{}' has no prefix length", s))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("'{}' is not an IPv4 address", addr))?;
        let prefix: u8 = prefix
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| format!("'{}' is not a prefix length between 0 and 32", prefix))?;

        let mut cidr = Self {
            network: addr,
            prefix,
        };
        cidr.network = Ipv4Addr::from(u32::from(addr) & cidr.mask());
        Ok(cidr)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// An inclusive range of addresses, written `first-last`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub first: Ipv4Addr,
    pub last: Ipv4Addr,
}

impl AddressRange {
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        (u32::from(self.first)..=u32::from(self.last)).contains(&u32::from(addr))
    }
}

impl FromStr for AddressRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (first, last) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("'{}' is not written as first-last", s))?;
        let first: Ipv4Addr = first
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not an IPv4 address", first))?;
        let last: Ipv4Addr = last
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not an IPv4 address", last))?;

        if u32::from(first) > u32::from(last) {
            return Err(format!("range starts after it ends ({} > {})", first, last));
        }

        Ok(Self { first, last })
    }
}
