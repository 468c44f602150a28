//! Host network service
//!
//! Entry point for callers. Validates input, turns desired state into
//! minimal kernel operations and rolls the host back to the last commit
//! when an update fails part way.
//!
//! The manager sits behind a mutex held for the whole of each operation,
//! so mutations are serialized even with several callers.

mod bridge;
pub mod diff;
mod rule;
mod validate;
mod vlan;

pub use bridge::{BridgeChanges, NewBridge};
pub use vlan::NewVlan;

use crate::error::{Error, Result};
use crate::firewall::RuleBackend;
use crate::link::{Link, LinkType};
use crate::manager::{HostNetworkManager, ReconcileReport};
use crate::network::LinkAccessor;
use crate::store::HostNetworkConfig;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, warn};

/// Orchestration layer over the manager and the rule backend
pub struct HostNetworkService<A: LinkAccessor, R: RuleBackend> {
    manager: Mutex<HostNetworkManager<A>>,
    rules: Mutex<R>,
}

impl<A: LinkAccessor, R: RuleBackend> HostNetworkService<A, R> {
    pub fn new(manager: HostNetworkManager<A>, rules: R) -> Self {
        Self {
            manager: Mutex::new(manager),
            rules: Mutex::new(rules),
        }
    }

    fn manager(&self) -> MutexGuard<'_, HostNetworkManager<A>> {
        self.manager.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rules(&self) -> MutexGuard<'_, R> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_list(&self) -> Result<Vec<Link>> {
        self.manager().list()
    }

    pub fn get_by_name(&self, name: &str) -> Result<Link> {
        self.manager().get(name)
    }

    /// Commit the current host state
    pub fn save_configuration(&self) -> Result<HostNetworkConfig> {
        self.manager().save_configuration()
    }

    /// Roll back to the last commit, `None` when nothing was pending
    pub fn reset_changes(&self) -> Result<Option<ReconcileReport>> {
        self.manager().reset_changes()
    }

    pub fn restore_from_backup(&self) -> Result<ReconcileReport> {
        self.manager().restore_from_backup()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.manager().has_unsaved_changes()
    }
}

/// Look up an engine-managed link of `link_type`
///
/// Names outside the managed namespace are read-only for callers.
fn managed_link<A: LinkAccessor>(
    manager: &HostNetworkManager<A>,
    name: &str,
    link_type: LinkType,
) -> Result<Link> {
    let managed = match link_type {
        LinkType::Vlan => manager.naming().is_managed_vlan(name),
        LinkType::Bridge => manager.naming().is_managed_bridge(name),
        _ => false,
    };
    if !managed {
        return Err(Error::validation(
            "name",
            format!("'{}' is not an engine-managed {}", name, link_type),
        ));
    }

    let link = manager.get(name)?;
    if link.link_type() != link_type {
        return Err(Error::validation(
            "name",
            format!("'{}' is a {}, not a {}", name, link.link_type(), link_type),
        ));
    }
    if !manager.naming().owns(&link) {
        return Err(Error::validation(
            "name",
            format!("'{}' was not created by the engine", name),
        ));
    }
    Ok(link)
}

/// Undo a failed multi-step change by resetting to the last commit
///
/// Returns the error to hand back: `UpdateFailed` when the host is back at
/// the committed state, `RollbackFailed` when it is not.
fn rollback<A: LinkAccessor>(
    manager: &mut HostNetworkManager<A>,
    context: String,
    cause: Error,
) -> Error {
    warn!(%context, error = %cause, "change failed, rolling back");

    match manager.reset_changes() {
        Ok(_) => Error::UpdateFailed {
            context,
            source: Box::new(cause),
        },
        Err(rollback) => {
            error!(
                %context,
                error = %cause,
                rollback = %rollback,
                "rollback failed, host matches neither requested nor committed state"
            );
            Error::RollbackFailed {
                context,
                original: Box::new(cause),
                rollback: Box::new(rollback),
            }
        }
    }
}
