//! Kernel link accessor interface

use crate::error::Result;
use crate::link::Link;
use ipnet::IpNet;

/// Control surface over the host's network links
///
/// Every mutating call is a direct, blocking kernel operation. Created link
/// names are derived from the inputs so existence can be checked by name.
pub trait LinkAccessor: Send {
    /// Enumerate all links with their addresses
    fn list(&self) -> Result<Vec<Link>>;

    /// Look up a single link, `Error::NotFound` if absent
    fn get_by_name(&self, name: &str) -> Result<Link>;

    /// Create a VLAN on `parent` and bring it up, returning its name
    fn create_vlan(&mut self, parent: &str, vlan_id: u16) -> Result<String>;

    /// Create a bridge from a base name and bring it up, returning its name
    fn create_bridge(&mut self, base: &str) -> Result<String>;

    /// Enslave `slave` to the bridge `master`
    fn set_master(&mut self, slave: &str, master: &str) -> Result<()>;

    /// Release `slave` from whatever bridge holds it
    fn unset_master(&mut self, slave: &str) -> Result<()>;

    /// Set a link administratively up
    fn set_up(&mut self, name: &str) -> Result<()>;

    /// Delete a link
    fn delete(&mut self, name: &str) -> Result<()>;

    fn add_address(&mut self, name: &str, address: &IpNet) -> Result<()>;

    fn remove_address(&mut self, name: &str, address: &IpNet) -> Result<()>;
}
