//! VLAN operations

use super::diff::symmetric_diff;
use super::{HostNetworkService, managed_link, rollback, validate};
use crate::error::{Error, Result};
use crate::firewall::RuleBackend;
use crate::link::{Link, LinkType};
use crate::manager::HostNetworkManager;
use crate::network::LinkAccessor;
use ipnet::IpNet;
use std::collections::BTreeSet;
use tracing::info;

/// Request to carve a VLAN from an existing link
#[derive(Debug, Clone, Default)]
pub struct NewVlan {
    pub parent: String,
    pub vlan_id: u16,
    pub addresses: Vec<String>,
}

impl<A: LinkAccessor, R: RuleBackend> HostNetworkService<A, R> {
    pub fn create_vlan(&self, request: NewVlan) -> Result<Link> {
        validate::vlan_id(request.vlan_id)?;
        let addresses = validate::addresses(&request.addresses)?;

        let mut manager = self.manager();
        let name = manager.naming().vlan_name(&request.parent, request.vlan_id);
        validate::link_name("parent", &name)?;

        let links = manager.list()?;
        validate::exists("parent", &request.parent, &links)?;
        if links.iter().any(|l| l.name == name) {
            return Err(Error::validation(
                "name",
                format!("'{}' already exists", name),
            ));
        }

        if let Err(e) = build_vlan(&mut manager, &request, &name, &addresses) {
            return Err(rollback(
                &mut manager,
                format!("create vlan '{}'", name),
                e,
            ));
        }

        info!(link = %name, "vlan ready");
        manager.get(&name)
    }

    /// Replace the VLAN's address set with `addresses`
    pub fn update_vlan(&self, name: &str, addresses: &[String]) -> Result<Link> {
        let desired = validate::addresses(addresses)?;

        let mut manager = self.manager();
        let link = managed_link(&manager, name, LinkType::Vlan)?;

        let diff = symmetric_diff(&link.addresses, &desired);
        if diff.is_empty() {
            return Ok(link);
        }

        let result = diff
            .remove
            .iter()
            .try_for_each(|address| manager.remove_address(name, address))
            .and_then(|_| {
                diff.add
                    .iter()
                    .try_for_each(|address| manager.add_address(name, address))
            });
        if let Err(e) = result {
            return Err(rollback(&mut manager, format!("update vlan '{}'", name), e));
        }

        info!(
            link = %name,
            removed = diff.remove.len(),
            added = diff.add.len(),
            "vlan addresses updated"
        );
        manager.get(name)
    }

    pub fn delete_vlan(&self, name: &str) -> Result<()> {
        let mut manager = self.manager();
        managed_link(&manager, name, LinkType::Vlan)?;
        manager.delete_link(name)
    }
}

fn build_vlan<A: LinkAccessor>(
    manager: &mut HostNetworkManager<A>,
    request: &NewVlan,
    name: &str,
    addresses: &BTreeSet<IpNet>,
) -> Result<()> {
    manager.create_vlan(&request.parent, request.vlan_id)?;
    for address in addresses {
        manager.add_address(name, address)?;
    }
    Ok(())
}
