//! In-memory link accessor simulating the kernel for unprivileged tests

use crate::error::{Error, Result};
use crate::link::{Link, Naming};
use crate::network::accessor::LinkAccessor;
use crate::network::mapper::{self, RawAddress, RawLink};
use ipnet::IpNet;
use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operations that can be made to fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    CreateVlan,
    CreateBridge,
    SetMaster,
    UnsetMaster,
    Delete,
    AddAddress,
    RemoveAddress,
}

#[derive(Debug, Clone)]
struct MemLink {
    index: u32,
    name: String,
    kind: Option<String>,
    parent: Option<u32>,
    master: Option<u32>,
    vlan_id: Option<u16>,
    up: bool,
    addresses: BTreeSet<IpNet>,
}

#[derive(Debug, Default)]
struct Host {
    links: Vec<MemLink>,
    next_index: u32,
    failures: Vec<(Op, String)>,
    mutations: usize,
}

impl Host {
    fn find(&self, name: &str) -> Result<&MemLink> {
        self.links
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| Error::NotFound(format!("link '{}'", name)))
    }

    fn find_mut(&mut self, name: &str) -> Result<&mut MemLink> {
        self.links
            .iter_mut()
            .find(|l| l.name == name)
            .ok_or_else(|| Error::NotFound(format!("link '{}'", name)))
    }

    fn insert(&mut self, name: &str, kind: Option<&str>) -> u32 {
        self.next_index += 1;
        self.links.push(MemLink {
            index: self.next_index,
            name: name.to_string(),
            kind: kind.map(str::to_string),
            parent: None,
            master: None,
            vlan_id: None,
            up: false,
            addresses: BTreeSet::new(),
        });
        self.next_index
    }

    fn insert_vlan(&mut self, name: &str, parent: &str, vlan_id: u16) {
        let parent_index = self.find(parent).expect("parent exists").index;
        self.insert(name, Some("vlan"));
        let link = self.find_mut(name).expect("just inserted");
        link.parent = Some(parent_index);
        link.vlan_id = Some(vlan_id);
    }

    /// Consume a one-shot failure registered for `op` on `target`
    fn check(&mut self, op: Op, target: &str) -> Result<()> {
        if let Some(pos) = self
            .failures
            .iter()
            .position(|(o, t)| *o == op && t == target)
        {
            self.failures.remove(pos);
            return Err(Error::Netlink {
                op: format!("{:?} {}", op, target),
                source: io::Error::from_raw_os_error(libc::EBUSY),
            });
        }
        self.mutations += 1;
        Ok(())
    }
}

fn errno(op: String, code: i32) -> Error {
    Error::Netlink {
        op,
        source: io::Error::from_raw_os_error(code),
    }
}

/// Simulated host; clones share the same state
#[derive(Debug, Clone)]
pub struct MemoryLinks {
    naming: Naming,
    host: Arc<Mutex<Host>>,
}

impl MemoryLinks {
    pub fn new(naming: Naming) -> Self {
        Self {
            naming,
            host: Arc::new(Mutex::new(Host::default())),
        }
    }

    fn host(&self) -> MutexGuard<'_, Host> {
        self.host.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a plain device, as a physical NIC would appear
    pub fn with_device(self, name: &str) -> Self {
        self.host().insert(name, None);
        self
    }

    /// Add a link of an arbitrary kernel kind
    pub fn with_kind(self, name: &str, kind: &str) -> Self {
        self.host().insert(name, Some(kind));
        self
    }

    pub fn with_address(self, name: &str, cidr: &str) -> Self {
        {
            let mut host = self.host();
            let link = host.find_mut(name).expect("link exists");
            link.addresses.insert(cidr.parse().expect("valid cidr"));
        }
        self
    }

    /// Make the next `op` on `target` fail
    pub fn fail_on(&self, op: Op, target: &str) {
        self.host().failures.push((op, target.to_string()));
    }

    /// Number of successful mutating calls so far
    pub fn mutations(&self) -> usize {
        self.host().mutations
    }

    pub fn is_up(&self, name: &str) -> bool {
        self.host().find(name).map(|l| l.up).unwrap_or(false)
    }

    /// Link names currently on the host, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.host().links.iter().map(|l| l.name.clone()).collect();
        names.sort();
        names
    }

    /// Add a VLAN under any name, as `ip link add` would
    pub fn with_vlan(self, name: &str, parent: &str, vlan_id: u16) -> Self {
        self.host().insert_vlan(name, parent, vlan_id);
        self
    }

    /// Create a link behind the engine's back
    pub fn inject_vlan(&self, parent: &str, vlan_id: u16) -> String {
        let name = self.naming.vlan_name(parent, vlan_id);
        self.host().insert_vlan(&name, parent, vlan_id);
        name
    }
}

impl LinkAccessor for MemoryLinks {
    fn list(&self) -> Result<Vec<Link>> {
        let host = self.host();
        let raw: Vec<RawLink> = host
            .links
            .iter()
            .map(|l| RawLink {
                index: l.index,
                name: l.name.clone(),
                kind: l.kind.clone(),
                parent_index: l.parent,
                master_index: l.master,
                vlan_id: l.vlan_id,
                up: l.up,
            })
            .collect();
        let addresses: Vec<RawAddress> = host
            .links
            .iter()
            .flat_map(|l| {
                l.addresses.iter().map(|a| RawAddress {
                    index: l.index,
                    address: *a,
                })
            })
            .collect();
        Ok(mapper::map_links(&raw, &addresses))
    }

    fn get_by_name(&self, name: &str) -> Result<Link> {
        self.list()?
            .into_iter()
            .find(|l| l.name == name)
            .ok_or_else(|| Error::NotFound(format!("link '{}'", name)))
    }

    fn create_vlan(&mut self, parent: &str, vlan_id: u16) -> Result<String> {
        let name = self.naming.vlan_name(parent, vlan_id);
        let mut host = self.host();
        let parent_index = host.find(parent)?.index;
        if host.find(&name).is_ok() {
            return Err(errno(format!("create vlan {}", name), libc::EEXIST));
        }
        host.check(Op::CreateVlan, &name)?;

        host.insert(&name, Some("vlan"));
        let link = host.find_mut(&name)?;
        link.parent = Some(parent_index);
        link.vlan_id = Some(vlan_id);
        link.up = true;
        Ok(name)
    }

    fn create_bridge(&mut self, base: &str) -> Result<String> {
        let name = self.naming.bridge_name(base);
        let mut host = self.host();
        if host.find(&name).is_ok() {
            return Err(errno(format!("create bridge {}", name), libc::EEXIST));
        }
        host.check(Op::CreateBridge, &name)?;

        host.insert(&name, Some("bridge"));
        host.find_mut(&name)?.up = true;
        Ok(name)
    }

    fn set_master(&mut self, slave: &str, master: &str) -> Result<()> {
        let mut host = self.host();
        let master_index = host.find(master)?.index;
        host.find(slave)?;
        host.check(Op::SetMaster, slave)?;
        host.find_mut(slave)?.master = Some(master_index);
        Ok(())
    }

    fn unset_master(&mut self, slave: &str) -> Result<()> {
        let mut host = self.host();
        host.find(slave)?;
        host.check(Op::UnsetMaster, slave)?;
        host.find_mut(slave)?.master = None;
        Ok(())
    }

    fn set_up(&mut self, name: &str) -> Result<()> {
        let mut host = self.host();
        host.find_mut(name)?.up = true;
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        let mut host = self.host();
        let index = match host.find(name) {
            Ok(link) => link.index,
            Err(_) => return Err(errno(format!("delete {}", name), libc::ENODEV)),
        };
        host.check(Op::Delete, name)?;

        // The kernel takes stacked VLANs down with their parent and
        // releases the members of a deleted bridge.
        host.links
            .retain(|l| l.index != index && l.parent != Some(index));
        for link in host.links.iter_mut() {
            if link.master == Some(index) {
                link.master = None;
            }
        }
        Ok(())
    }

    fn add_address(&mut self, name: &str, address: &IpNet) -> Result<()> {
        let mut host = self.host();
        if host.find(name)?.addresses.contains(address) {
            return Err(errno(format!("add {} to {}", address, name), libc::EEXIST));
        }
        host.check(Op::AddAddress, name)?;
        host.find_mut(name)?.addresses.insert(*address);
        Ok(())
    }

    fn remove_address(&mut self, name: &str, address: &IpNet) -> Result<()> {
        let mut host = self.host();
        if !host.find(name)?.addresses.contains(address) {
            return Err(errno(
                format!("remove {} from {}", address, name),
                libc::EADDRNOTAVAIL,
            ));
        }
        host.check(Op::RemoveAddress, name)?;
        host.find_mut(name)?.addresses.remove(address);
        Ok(())
    }
}
