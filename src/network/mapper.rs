//! Classification of raw kernel links into `Link` variants

use crate::link::{Link, LinkKind};
use ipnet::IpNet;
use std::collections::BTreeSet;

/// A link as reported by the kernel, before classification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLink {
    pub index: u32,
    pub name: String,
    /// `IFLA_INFO_KIND`, absent for plain devices
    pub kind: Option<String>,
    /// `IFLA_LINK`, the lower device for stacked links
    pub parent_index: Option<u32>,
    /// `IFLA_MASTER`, the bridge this link is enslaved to
    pub master_index: Option<u32>,
    pub vlan_id: Option<u16>,
    /// Administratively up
    pub up: bool,
}

/// An address as reported by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAddress {
    pub index: u32,
    pub address: IpNet,
}

/// Addresses the kernel assigns on its own (IPv6 link-local)
pub fn is_kernel_managed(address: &IpNet) -> bool {
    match address {
        IpNet::V6(net) => net.addr().segments()[0] & 0xffc0 == 0xfe80,
        IpNet::V4(_) => false,
    }
}

/// Classify every raw link, attaching its addresses
///
/// VLAN parents are resolved through the parent index and bridge slaves by
/// scanning all links for a matching master index. Both lookups are linear,
/// which is fine for the tens of interfaces a host carries.
pub fn map_links(links: &[RawLink], addresses: &[RawAddress]) -> Vec<Link> {
    links
        .iter()
        .map(|raw| {
            let kind = classify(raw, links);
            let addresses: BTreeSet<IpNet> = addresses
                .iter()
                .filter(|a| a.index == raw.index && !is_kernel_managed(&a.address))
                .map(|a| a.address)
                .collect();

            Link {
                name: raw.name.clone(),
                addresses,
                kind,
            }
        })
        .collect()
}

fn classify(raw: &RawLink, links: &[RawLink]) -> LinkKind {
    match raw.kind.as_deref() {
        None => LinkKind::Device,
        Some("vlan") => LinkKind::Vlan {
            vlan_id: raw.vlan_id.unwrap_or_default(),
            parent: raw
                .parent_index
                .map(|index| name_of(index, links))
                .unwrap_or_default(),
        },
        Some("bridge") => LinkKind::Bridge {
            slaves: links
                .iter()
                .filter(|l| l.master_index == Some(raw.index))
                .map(|l| l.name.clone())
                .collect(),
        },
        Some(_) => LinkKind::Unknown,
    }
}

/// Name of the link with `index`; parents living in another namespace
/// are not in the dump and fall back to their index
fn name_of(index: u32, links: &[RawLink]) -> String {
    links
        .iter()
        .find(|l| l.index == index)
        .map(|l| l.name.clone())
        .unwrap_or_else(|| format!("if{}", index))
}
