//! Bridge operations

use super::diff::{Diff, symmetric_diff};
use super::{HostNetworkService, managed_link, rollback, validate};
use crate::error::{Error, Result};
use crate::firewall::RuleBackend;
use crate::link::{Link, LinkType};
use crate::manager::HostNetworkManager;
use crate::network::LinkAccessor;
use ipnet::IpNet;
use std::collections::BTreeSet;
use tracing::info;

/// Request to create a bridge from a base name
#[derive(Debug, Clone, Default)]
pub struct NewBridge {
    /// Base name; the managed prefix is added
    pub name: String,
    pub addresses: Vec<String>,
    pub slaves: Vec<String>,
}

/// Desired bridge state; `None` leaves that aspect unchanged
#[derive(Debug, Clone, Default)]
pub struct BridgeChanges {
    pub addresses: Option<Vec<String>>,
    pub slaves: Option<Vec<String>>,
}

impl<A: LinkAccessor, R: RuleBackend> HostNetworkService<A, R> {
    pub fn create_bridge(&self, request: NewBridge) -> Result<Link> {
        validate::bridge_base(&request.name)?;
        let addresses = validate::addresses(&request.addresses)?;

        let mut manager = self.manager();
        let name = manager.naming().bridge_name(&request.name);
        validate::link_name("name", &name)?;

        let links = manager.list()?;
        if links.iter().any(|l| l.name == name) {
            return Err(Error::validation(
                "name",
                format!("'{}' already exists", name),
            ));
        }
        let slaves = validate::slaves(&name, &request.slaves, &links)?;

        if let Err(e) = build_bridge(&mut manager, &request.name, &addresses, &slaves) {
            return Err(rollback(
                &mut manager,
                format!("create bridge '{}'", name),
                e,
            ));
        }

        info!(link = %name, slaves = slaves.len(), "bridge ready");
        manager.get(&name)
    }

    /// Bring the bridge's addresses and members to the requested sets
    pub fn update_bridge(&self, name: &str, changes: BridgeChanges) -> Result<Link> {
        let desired_addresses = changes
            .addresses
            .as_deref()
            .map(validate::addresses)
            .transpose()?;

        let mut manager = self.manager();
        let link = managed_link(&manager, name, LinkType::Bridge)?;

        let desired_slaves = match &changes.slaves {
            Some(slaves) => Some(validate::slaves(name, slaves, &manager.list()?)?),
            None => None,
        };

        let addresses = desired_addresses
            .map(|desired| symmetric_diff(&link.addresses, &desired))
            .unwrap_or_else(no_change);
        let slaves = desired_slaves
            .map(|desired| {
                let current: BTreeSet<String> = link.slaves().iter().cloned().collect();
                symmetric_diff(&current, &desired)
            })
            .unwrap_or_else(no_change);

        if addresses.is_empty() && slaves.is_empty() {
            return Ok(link);
        }

        if let Err(e) = apply_bridge_changes(&mut manager, name, &addresses, &slaves) {
            let mut err = rollback(&mut manager, format!("update bridge '{}'", name), e);
            if !slaves.is_empty() {
                note_members(&manager, name, link.slaves(), &mut err);
            }
            return Err(err);
        }

        info!(
            link = %name,
            addresses_removed = addresses.remove.len(),
            addresses_added = addresses.add.len(),
            slaves_released = slaves.remove.len(),
            slaves_enslaved = slaves.add.len(),
            "bridge updated"
        );
        manager.get(name)
    }

    /// Delete a bridge; the kernel releases its members
    pub fn delete_bridge(&self, name: &str) -> Result<()> {
        let mut manager = self.manager();
        managed_link(&manager, name, LinkType::Bridge)?;
        manager.delete_link(name)
    }
}

/// Membership is not part of a rollback; record it when it was left changed
fn note_members<A: LinkAccessor>(
    manager: &HostNetworkManager<A>,
    name: &str,
    before: &[String],
    err: &mut Error,
) {
    let Ok(bridge) = manager.get(name) else {
        return;
    };
    let now: BTreeSet<&String> = bridge.slaves().iter().collect();
    let was: BTreeSet<&String> = before.iter().collect();
    if now == was {
        return;
    }

    if let Error::UpdateFailed { context, .. } | Error::RollbackFailed { context, .. } = err {
        context.push_str(&format!(
            " (bridge members not restored: now [{}], was [{}])",
            bridge.slaves().join(", "),
            before.join(", ")
        ));
    }
}

fn no_change<T>() -> Diff<T> {
    Diff {
        remove: Vec::new(),
        add: Vec::new(),
    }
}

fn build_bridge<A: LinkAccessor>(
    manager: &mut HostNetworkManager<A>,
    base: &str,
    addresses: &BTreeSet<IpNet>,
    slaves: &BTreeSet<String>,
) -> Result<()> {
    let name = manager.create_bridge(base)?;
    for address in addresses {
        manager.add_address(&name, address)?;
    }
    for slave in slaves {
        manager.set_master(slave, &name)?;
    }
    Ok(())
}

fn apply_bridge_changes<A: LinkAccessor>(
    manager: &mut HostNetworkManager<A>,
    name: &str,
    addresses: &Diff<IpNet>,
    slaves: &Diff<String>,
) -> Result<()> {
    for address in &addresses.remove {
        manager.remove_address(name, address)?;
    }
    for address in &addresses.add {
        manager.add_address(name, address)?;
    }
    for slave in &slaves.remove {
        manager.unset_master(slave)?;
    }
    for slave in &slaves.add {
        manager.set_master(slave, name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::Op;
    use crate::service::NewVlan;
    use crate::service::tests::{fixture, strings};

    fn request(base: &str, addresses: &[&str], slaves: &[&str]) -> NewBridge {
        NewBridge {
            name: base.into(),
            addresses: strings(addresses),
            slaves: strings(slaves),
        }
    }

    #[test]
    fn test_create_bridge_with_slaves() {
        let f = fixture();
        let bridge = f
            .service
            .create_bridge(request("lab1", &["10.1.0.1/24"], &["eth1", "eth2"]))
            .unwrap();

        assert_eq!(bridge.name, "lb-lab1");
        assert_eq!(bridge.slaves(), ["eth1".to_string(), "eth2".to_string()]);
        assert_eq!(bridge.addresses.len(), 1);
        assert!(f.links.is_up("lb-lab1"));
    }

    #[test]
    fn test_missing_slave_leaves_no_bridge() {
        let f = fixture();
        let err = f
            .service
            .create_bridge(request("lab1", &[], &["nonexistent"]))
            .unwrap_err();

        assert!(err.is_validation());
        assert!(err.to_string().contains("nonexistent"));
        assert!(f.service.get_by_name("lb-lab1").unwrap_err().is_not_found());
        assert_eq!(f.links.mutations(), 0);
    }

    #[test]
    fn test_create_bridge_validation() {
        let f = fixture();
        assert!(f.service.create_bridge(request("lab 1", &[], &[])).is_err());
        assert!(f.service.create_bridge(request("", &[], &[])).is_err());
        assert!(
            f.service
                .create_bridge(request("a-very-long-name", &[], &[]))
                .unwrap_err()
                .is_validation()
        );
        assert!(f.service.create_bridge(request("lab", &[], &["lb-lab"])).is_err());
        assert_eq!(f.links.mutations(), 0);
    }

    #[test]
    fn test_failed_enslave_rolls_back_bridge() {
        let f = fixture();
        f.links.fail_on(Op::SetMaster, "eth2");

        let err = f
            .service
            .create_bridge(request("lab2", &["10.2.0.1/24"], &["eth1", "eth2"]))
            .unwrap_err();

        assert!(matches!(err, Error::UpdateFailed { .. }));
        assert!(f.service.get_by_name("lb-lab2").unwrap_err().is_not_found());
        assert!(!f.service.has_unsaved_changes());
    }

    #[test]
    fn test_update_bridge_slaves_and_addresses() {
        let f = fixture();
        f.service
            .create_bridge(request("lab", &["10.3.0.1/24"], &["eth1"]))
            .unwrap();
        let vlan = f
            .service
            .create_vlan(NewVlan {
                parent: "eth0".into(),
                vlan_id: 3,
                addresses: vec![],
            })
            .unwrap();

        let updated = f
            .service
            .update_bridge(
                "lb-lab",
                BridgeChanges {
                    addresses: None,
                    slaves: Some(vec![vlan.name.clone(), "eth2".into()]),
                },
            )
            .unwrap();

        let mut slaves = updated.slaves().to_vec();
        slaves.sort();
        assert_eq!(slaves, vec!["eth2".to_string(), vlan.name]);
        assert_eq!(updated.addresses.len(), 1);

        let updated = f
            .service
            .update_bridge(
                "lb-lab",
                BridgeChanges {
                    addresses: Some(vec![]),
                    slaves: None,
                },
            )
            .unwrap();
        assert!(updated.addresses.is_empty());
        assert_eq!(updated.slaves().len(), 2);
    }

    #[test]
    fn test_failed_slave_update_rolls_back_addresses() {
        let f = fixture();
        f.service
            .create_bridge(request("lab", &["10.4.0.1/24"], &[]))
            .unwrap();
        f.service.save_configuration().unwrap();

        f.links.fail_on(Op::SetMaster, "eth1");
        let err = f
            .service
            .update_bridge(
                "lb-lab",
                BridgeChanges {
                    addresses: Some(strings(&["10.4.0.2/24"])),
                    slaves: Some(strings(&["eth1"])),
                },
            )
            .unwrap_err();

        assert!(matches!(err, Error::UpdateFailed { .. }));
        let bridge = f.service.get_by_name("lb-lab").unwrap();
        let addresses: Vec<String> = bridge.addresses.iter().map(|a| a.to_string()).collect();
        assert_eq!(addresses, vec!["10.4.0.1/24"]);
    }

    #[test]
    fn test_failed_member_swap_reports_membership() {
        let f = fixture();
        f.service
            .create_bridge(request("lab", &["10.5.0.1/24"], &["eth1"]))
            .unwrap();
        f.service.save_configuration().unwrap();

        f.links.fail_on(Op::SetMaster, "eth2");
        let err = f
            .service
            .update_bridge(
                "lb-lab",
                BridgeChanges {
                    addresses: None,
                    slaves: Some(strings(&["eth2"])),
                },
            )
            .unwrap_err();

        assert!(matches!(err, Error::UpdateFailed { .. }));
        let message = err.to_string();
        assert!(message.contains("bridge members not restored: now [], was [eth1]"));
        assert!(message.contains("links and addresses rolled back"));
        assert!(f.service.get_by_name("lb-lab").unwrap().slaves().is_empty());
    }

    #[test]
    fn test_delete_bridge_releases_slaves() {
        let f = fixture();
        f.service
            .create_bridge(request("lab", &[], &["eth1"]))
            .unwrap();

        f.service.delete_bridge("lb-lab").unwrap();
        assert!(f.service.get_by_name("lb-lab").unwrap_err().is_not_found());
        assert!(f.service.get_by_name("eth1").is_ok());
    }
}
