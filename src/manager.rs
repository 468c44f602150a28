//! Host network manager
//!
//! Owns the link accessor, the configuration store and the unsaved-changes
//! state. All kernel mutations go through here so the state always reflects
//! whether the host may have diverged from the last commit.

pub mod reconcile;
pub mod state;

pub use reconcile::{AddressChange, ReconcileReport};
pub use state::ChangeTracker;

use crate::error::Result;
use crate::link::{Link, Naming};
use crate::network::LinkAccessor;
use crate::store::{ConfigStore, HostNetworkConfig};
use ipnet::IpNet;
use tracing::{debug, info};

/// How an existing committed configuration is treated when opening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    /// Converge the host to the committed configuration (boot time)
    Reconcile,
    /// Leave the host alone and only detect divergence
    Attach,
}

/// Reconciliation engine over one host
pub struct HostNetworkManager<A: LinkAccessor> {
    links: A,
    store: ConfigStore,
    naming: Naming,
    changes: ChangeTracker,
}

impl<A: LinkAccessor> HostNetworkManager<A> {
    /// Open the engine over `links`
    ///
    /// Without a committed configuration the current host is snapshotted and
    /// committed as the initial one.
    pub fn open(links: A, store: ConfigStore, naming: Naming, startup: Startup) -> Result<Self> {
        let mut manager = Self {
            links,
            store,
            naming,
            changes: ChangeTracker::new(),
        };

        if !manager.store.exists() {
            info!(
                path = %manager.store.path().display(),
                "no committed configuration, snapshotting host"
            );
            manager.save_configuration()?;
            return Ok(manager);
        }

        let desired = manager.store.get_config()?;
        match startup {
            Startup::Reconcile => {
                let report = manager.reconcile(&desired)?;
                info!(%report, "startup reconciliation complete");
            }
            Startup::Attach => {
                if !manager.snapshot()?.converged(&desired) {
                    debug!("host differs from committed configuration");
                    manager.changes.touch()?;
                }
            }
        }

        Ok(manager)
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn list(&self) -> Result<Vec<Link>> {
        self.links.list()
    }

    pub fn get(&self, name: &str) -> Result<Link> {
        self.links.get_by_name(name)
    }

    /// Current host state in persisted form
    pub fn snapshot(&self) -> Result<HostNetworkConfig> {
        Ok(HostNetworkConfig::from_links(&self.links.list()?, &self.naming))
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.changes.is_dirty()
    }

    // Mutations mark the engine Dirty before reaching the kernel: a call
    // that fails half-way may still have changed the host.

    pub fn create_vlan(&mut self, parent: &str, vlan_id: u16) -> Result<String> {
        self.changes.touch()?;
        let name = self.links.create_vlan(parent, vlan_id)?;
        info!(link = %name, parent, vlan_id, "created vlan");
        Ok(name)
    }

    pub fn create_bridge(&mut self, base: &str) -> Result<String> {
        self.changes.touch()?;
        let name = self.links.create_bridge(base)?;
        info!(link = %name, "created bridge");
        Ok(name)
    }

    pub fn delete_link(&mut self, name: &str) -> Result<()> {
        self.changes.touch()?;
        self.links.delete(name)?;
        info!(link = %name, "deleted link");
        Ok(())
    }

    pub fn add_address(&mut self, name: &str, address: &IpNet) -> Result<()> {
        self.changes.touch()?;
        self.links.add_address(name, address)?;
        debug!(link = %name, %address, "added address");
        Ok(())
    }

    pub fn remove_address(&mut self, name: &str, address: &IpNet) -> Result<()> {
        self.changes.touch()?;
        self.links.remove_address(name, address)?;
        debug!(link = %name, %address, "removed address");
        Ok(())
    }

    pub fn set_master(&mut self, slave: &str, master: &str) -> Result<()> {
        self.changes.touch()?;
        self.links.set_master(slave, master)?;
        debug!(link = %slave, master, "enslaved link");
        Ok(())
    }

    pub fn unset_master(&mut self, slave: &str) -> Result<()> {
        self.changes.touch()?;
        self.links.unset_master(slave)?;
        debug!(link = %slave, "released link");
        Ok(())
    }

    /// Commit the current host state
    pub fn save_configuration(&mut self) -> Result<HostNetworkConfig> {
        let config = self.snapshot()?;
        self.store.save_config(&config)?;
        self.changes.settle()?;
        Ok(config)
    }

    /// Roll the host back to the last commit; `None` when already Clean
    pub fn reset_changes(&mut self) -> Result<Option<ReconcileReport>> {
        if !self.changes.is_dirty() {
            debug!("no unsaved changes to reset");
            return Ok(None);
        }

        let desired = self.store.get_config()?;
        let report = self.reconcile(&desired)?;
        self.changes.settle()?;

        info!(%report, "reset to committed configuration");
        Ok(Some(report))
    }

    /// Converge the host to the backup generation
    ///
    /// The backup is not promoted to current, so the engine stays Dirty
    /// until the next commit.
    pub fn restore_from_backup(&mut self) -> Result<ReconcileReport> {
        let backup = self.store.get_backup_config()?;
        self.changes.touch()?;
        let report = self.reconcile(&backup)?;

        info!(%report, "restored backup configuration");
        Ok(report)
    }
}
