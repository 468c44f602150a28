//! Caller input checks run before any kernel mutation

use crate::error::{Error, Result};
use crate::link::{IFNAME_MAX, Link, VLAN_ID_MAX, VLAN_ID_MIN};
use crate::network::mapper;
use ipnet::IpNet;
use std::collections::BTreeSet;

pub fn vlan_id(vlan_id: u16) -> Result<()> {
    if !(VLAN_ID_MIN..=VLAN_ID_MAX).contains(&vlan_id) {
        return Err(Error::validation(
            "vlan_id",
            format!(
                "{} is out of range ({}-{})",
                vlan_id, VLAN_ID_MIN, VLAN_ID_MAX
            ),
        ));
    }
    Ok(())
}

/// Check that a generated link name fits the kernel limit
pub fn link_name(field: &str, name: &str) -> Result<()> {
    if name.len() > IFNAME_MAX {
        return Err(Error::validation(
            field,
            format!(
                "resulting interface name '{}' exceeds {} bytes",
                name, IFNAME_MAX
            ),
        ));
    }
    Ok(())
}

pub fn bridge_base(base: &str) -> Result<()> {
    if base.is_empty() {
        return Err(Error::validation("name", "must not be empty"));
    }
    if let Some(c) = base
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(Error::validation(
            "name",
            format!("invalid character '{}' in '{}'", c, base),
        ));
    }
    Ok(())
}

/// Parse CIDR strings, rejecting malformed, link-local and duplicate entries
pub fn addresses(addresses: &[String]) -> Result<BTreeSet<IpNet>> {
    let mut parsed = BTreeSet::new();

    for raw in addresses {
        let net: IpNet = raw.trim().parse().map_err(|_| {
            Error::validation("addresses", format!("'{}' is not a valid CIDR", raw))
        })?;
        if mapper::is_kernel_managed(&net) {
            return Err(Error::validation(
                "addresses",
                format!("'{}' is link-local and assigned by the kernel", net),
            ));
        }
        if !parsed.insert(net) {
            return Err(Error::validation(
                "addresses",
                format!("'{}' is listed twice", net),
            ));
        }
    }

    Ok(parsed)
}

/// Referenced link must be present on the host
pub fn exists(field: &str, name: &str, links: &[Link]) -> Result<()> {
    if !links.iter().any(|l| l.name == name) {
        return Err(Error::validation(
            field,
            format!("link '{}' does not exist", name),
        ));
    }
    Ok(())
}

/// Check bridge members and return them as a set
pub fn slaves(bridge: &str, slaves: &[String], links: &[Link]) -> Result<BTreeSet<String>> {
    let mut parsed = BTreeSet::new();

    for slave in slaves {
        if slave == bridge {
            return Err(Error::validation(
                "slaves",
                format!("'{}' cannot be enslaved to itself", slave),
            ));
        }
        exists("slaves", slave, links)?;
        if !parsed.insert(slave.clone()) {
            return Err(Error::validation(
                "slaves",
                format!("'{}' is listed twice", slave),
            ));
        }
    }

    Ok(parsed)
}
