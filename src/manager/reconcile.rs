//! Convergence of the host towards a declared configuration

use super::HostNetworkManager;
use crate::error::{Error, Result};
use crate::link::{Link, LinkType, VLAN_ID_MAX, VLAN_ID_MIN};
use crate::network::LinkAccessor;
use crate::store::HostNetworkConfig;
use ipnet::IpNet;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

/// An address added to or removed from a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressChange {
    pub link: String,
    pub address: IpNet,
}

impl fmt::Display for AddressChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.link, self.address)
    }
}

/// Kernel operations performed by one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub addresses_added: Vec<AddressChange>,
    pub addresses_removed: Vec<AddressChange>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.deleted.is_empty()
            && self.addresses_added.is_empty()
            && self.addresses_removed.is_empty()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} deleted, {} addresses added, {} addresses removed",
            self.created.len(),
            self.deleted.len(),
            self.addresses_added.len(),
            self.addresses_removed.len()
        )
    }
}

/// Which managed namespace a pass works on
#[derive(Debug, Clone, Copy)]
enum Managed {
    Vlans,
    Bridges,
}

impl<A: LinkAccessor> HostNetworkManager<A> {
    /// Converge managed links to `desired`
    ///
    /// VLANs are synced then pruned, then bridges. Sync creates missing links
    /// and adds missing addresses; prune deletes undeclared owned links and
    /// undeclared addresses. Links the engine does not own are never touched,
    /// whatever their name. Bridge membership is left as it is. Does not
    /// change the unsaved-changes state.
    pub fn reconcile(&mut self, desired: &HostNetworkConfig) -> Result<ReconcileReport> {
        self.check_declarations(desired)?;

        let mut report = ReconcileReport::default();

        self.sync(Managed::Vlans, desired, &mut report)?;
        self.prune(Managed::Vlans, desired, &mut report)?;
        self.sync(Managed::Bridges, desired, &mut report)?;
        self.prune(Managed::Bridges, desired, &mut report)?;

        Ok(report)
    }

    /// Reject entries whose name the accessor would not reproduce
    fn check_declarations(&self, desired: &HostNetworkConfig) -> Result<()> {
        for vlan in &desired.vlans {
            if !(VLAN_ID_MIN..=VLAN_ID_MAX).contains(&vlan.vlan_id) {
                return Err(Error::validation(
                    format!("vlans.{}", vlan.name),
                    format!("vlan_id {} out of range", vlan.vlan_id),
                ));
            }
            let expected = self.naming.vlan_name(&vlan.parent, vlan.vlan_id);
            if vlan.name != expected {
                return Err(Error::validation(
                    format!("vlans.{}", vlan.name),
                    format!("name does not match parent and vlan_id (expected {})", expected),
                ));
            }
        }

        for bridge in &desired.bridges {
            if self.naming.bridge_base(&bridge.name).is_none() {
                return Err(Error::validation(
                    format!("bridges.{}", bridge.name),
                    format!(
                        "name must start with '{}' followed by a base name",
                        self.naming.bridge_prefix()
                    ),
                ));
            }
        }

        Ok(())
    }

    fn declared<'a>(
        &self,
        managed: Managed,
        desired: &'a HostNetworkConfig,
    ) -> BTreeMap<&'a str, &'a BTreeSet<IpNet>> {
        match managed {
            Managed::Vlans => desired
                .vlans
                .iter()
                .map(|v| (v.name.as_str(), &v.addresses))
                .collect(),
            Managed::Bridges => desired
                .bridges
                .iter()
                .map(|b| (b.name.as_str(), &b.addresses))
                .collect(),
        }
    }

    /// Engine-owned link of the kind this pass works on
    fn owned(&self, managed: Managed, link: &Link) -> bool {
        let link_type = match managed {
            Managed::Vlans => LinkType::Vlan,
            Managed::Bridges => LinkType::Bridge,
        };
        link.link_type() == link_type && self.naming.owns(link)
    }

    fn sync(
        &mut self,
        managed: Managed,
        desired: &HostNetworkConfig,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        // A declared name held by a link the engine does not own is left
        // to fail on creation
        let host: BTreeMap<String, BTreeSet<IpNet>> = self
            .links
            .list()?
            .into_iter()
            .filter(|link| self.owned(managed, link))
            .map(|link| (link.name, link.addresses))
            .collect();

        for (name, addresses) in self.declared(managed, desired) {
            let current = match host.get(name) {
                Some(current) => current.clone(),
                None => {
                    let created = match managed {
                        Managed::Vlans => {
                            let vlan = desired.vlan(name).ok_or_else(|| {
                                Error::NotFound(format!("vlan declaration '{}'", name))
                            })?;
                            self.links.create_vlan(&vlan.parent, vlan.vlan_id)?
                        }
                        Managed::Bridges => {
                            let base = self.naming.bridge_base(name).unwrap_or(name).to_string();
                            self.links.create_bridge(&base)?
                        }
                    };
                    debug!(link = %created, "reconcile: created");
                    report.created.push(created);
                    BTreeSet::new()
                }
            };

            for address in addresses.difference(&current) {
                self.links.add_address(name, address)?;
                debug!(link = %name, %address, "reconcile: added address");
                report.addresses_added.push(AddressChange {
                    link: name.to_string(),
                    address: *address,
                });
            }
        }

        Ok(())
    }

    fn prune(
        &mut self,
        managed: Managed,
        desired: &HostNetworkConfig,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let declared = self.declared(managed, desired);
        let host = self.links.list()?;

        for link in &host {
            if !self.owned(managed, link) {
                continue;
            }

            let Some(addresses) = declared.get(link.name.as_str()) else {
                match self.links.delete(&link.name) {
                    Ok(()) => {
                        debug!(link = %link.name, "reconcile: deleted");
                        report.deleted.push(link.name.clone());
                    }
                    // Taken down with its parent earlier in this pass
                    Err(e) if e.is_missing_link() => {
                        warn!(link = %link.name, "reconcile: link already gone");
                    }
                    Err(e) => return Err(e),
                }
                continue;
            };

            for address in link.addresses.difference(addresses) {
                self.links.remove_address(&link.name, address)?;
                debug!(link = %link.name, %address, "reconcile: removed address");
                report.addresses_removed.push(AddressChange {
                    link: link.name.clone(),
                    address: *address,
                });
            }
        }

        Ok(())
    }
}
