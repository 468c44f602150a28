//! rtnetlink-backed link accessor

use crate::error::{Error, Result};
use crate::link::{Link, Naming};
use crate::network::accessor::LinkAccessor;
use crate::network::mapper;
use crate::network::netlink::{self, RouteSocket};
use ipnet::IpNet;
use std::ffi::CString;
use std::io;
use tracing::debug;

/// Link accessor talking to the running kernel
#[derive(Debug, Clone)]
pub struct KernelLinks {
    naming: Naming,
}

impl KernelLinks {
    pub fn new(naming: Naming) -> Self {
        Self { naming }
    }

    fn execute(&self, op: &str, request: netlink::Request) -> Result<()> {
        debug!(op, "netlink request");
        RouteSocket::open()?.execute(op, request)
    }
}

/// Resolve an interface name to its kernel index
///
/// Uses native if_nametoindex(3).
pub fn interface_index(name: &str) -> Result<u32> {
    let name_cstr = CString::new(name)
        .map_err(|e| Error::validation("name", format!("invalid interface name: {}", e)))?;

    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index != 0 {
        return Ok(index);
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ENODEV) | Some(libc::ENXIO) => Err(Error::NotFound(format!("link '{}'", name))),
        _ => Err(Error::Netlink {
            op: format!("resolve {}", name),
            source: err,
        }),
    }
}

impl LinkAccessor for KernelLinks {
    fn list(&self) -> Result<Vec<Link>> {
        let mut socket = RouteSocket::open()?;
        let links = socket.links()?;
        let addresses = socket.addresses()?;
        Ok(mapper::map_links(&links, &addresses))
    }

    fn get_by_name(&self, name: &str) -> Result<Link> {
        self.list()?
            .into_iter()
            .find(|link| link.name == name)
            .ok_or_else(|| Error::NotFound(format!("link '{}'", name)))
    }

    fn create_vlan(&mut self, parent: &str, vlan_id: u16) -> Result<String> {
        let name = self.naming.vlan_name(parent, vlan_id);
        let parent_index = interface_index(parent)?;

        self.execute(
            &format!("create vlan {}", name),
            netlink::new_vlan(&name, parent_index, vlan_id),
        )?;
        self.set_up(&name)?;

        Ok(name)
    }

    fn create_bridge(&mut self, base: &str) -> Result<String> {
        let name = self.naming.bridge_name(base);

        self.execute(&format!("create bridge {}", name), netlink::new_bridge(&name))?;
        self.set_up(&name)?;

        Ok(name)
    }

    fn set_master(&mut self, slave: &str, master: &str) -> Result<()> {
        let index = interface_index(slave)?;
        let master_index = interface_index(master)?;
        self.execute(
            &format!("enslave {} to {}", slave, master),
            netlink::set_master(index, master_index),
        )
    }

    fn unset_master(&mut self, slave: &str) -> Result<()> {
        let index = interface_index(slave)?;
        self.execute(&format!("release {}", slave), netlink::set_master(index, 0))
    }

    fn set_up(&mut self, name: &str) -> Result<()> {
        let index = interface_index(name)?;
        self.execute(&format!("set {} up", name), netlink::set_up(index))
    }

    fn delete(&mut self, name: &str) -> Result<()> {
        let index = interface_index(name)?;
        self.execute(&format!("delete {}", name), netlink::delete_link(index))
    }

    fn add_address(&mut self, name: &str, address: &IpNet) -> Result<()> {
        let index = interface_index(name)?;
        self.execute(
            &format!("add {} to {}", address, name),
            netlink::add_address(index, address),
        )
    }

    fn remove_address(&mut self, name: &str, address: &IpNet) -> Result<()> {
        let index = interface_index(name)?;
        self.execute(
            &format!("remove {} from {}", address, name),
            netlink::remove_address(index, address),
        )
    }
}
