//! Persisted host network configuration
//!
//! The store keeps exactly two generations on disk: the current file and a
//! single `.back` copy of whatever was current before the last commit.

use crate::error::{Error, Result};
use crate::link::{Link, LinkKind, LinkType, Naming};
use ipnet::IpNet;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A non-managed link recorded for reference only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub kind: LinkType,
    #[serde(default)]
    pub addresses: BTreeSet<IpNet>,
}

/// An engine-managed VLAN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanEntry {
    pub name: String,
    pub parent: String,
    pub vlan_id: u16,
    #[serde(default)]
    pub addresses: BTreeSet<IpNet>,
}

/// An engine-managed bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEntry {
    pub name: String,
    #[serde(default)]
    pub slaves: Vec<String>,
    #[serde(default)]
    pub addresses: BTreeSet<IpNet>,
}

/// Snapshot of the host's links as committed to disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostNetworkConfig {
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub vlans: Vec<VlanEntry>,
    #[serde(default)]
    pub bridges: Vec<BridgeEntry>,
}

impl HostNetworkConfig {
    /// Build a snapshot from the live link list
    ///
    /// Only links the engine owns become `vlans` and `bridges`; everything
    /// else, prefixed names included, is recorded under `devices`.
    pub fn from_links(links: &[Link], naming: &Naming) -> Self {
        let mut config = HostNetworkConfig::default();

        for link in links {
            match &link.kind {
                LinkKind::Vlan { vlan_id, parent } if naming.owns(link) => {
                    config.vlans.push(VlanEntry {
                        name: link.name.clone(),
                        parent: parent.clone(),
                        vlan_id: *vlan_id,
                        addresses: link.addresses.clone(),
                    });
                }
                LinkKind::Bridge { slaves } if naming.owns(link) => {
                    config.bridges.push(BridgeEntry {
                        name: link.name.clone(),
                        slaves: slaves.clone(),
                        addresses: link.addresses.clone(),
                    });
                }
                _ => config.devices.push(DeviceEntry {
                    name: link.name.clone(),
                    kind: link.link_type(),
                    addresses: link.addresses.clone(),
                }),
            }
        }

        config
    }

    pub fn vlan(&self, name: &str) -> Option<&VlanEntry> {
        self.vlans.iter().find(|v| v.name == name)
    }

    pub fn bridge(&self, name: &str) -> Option<&BridgeEntry> {
        self.bridges.iter().find(|b| b.name == name)
    }

    /// Managed link names mapped to their addresses
    fn managed(&self) -> BTreeMap<&str, &BTreeSet<IpNet>> {
        self.vlans
            .iter()
            .map(|v| (v.name.as_str(), &v.addresses))
            .chain(self.bridges.iter().map(|b| (b.name.as_str(), &b.addresses)))
            .collect()
    }

    /// True when both configs declare the same managed links with the same
    /// addresses; devices and bridge membership are not compared
    pub fn converged(&self, other: &HostNetworkConfig) -> bool {
        self.managed() == other.managed()
    }
}

/// Two-generation file store for `HostNetworkConfig`
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, ".back")
    }

    fn tmp_path(&self) -> PathBuf {
        with_suffix(&self.path, ".tmp")
    }

    fn lock_path(&self) -> PathBuf {
        with_suffix(&self.path, ".lock")
    }

    /// Whether a current configuration has ever been committed
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Commit `config` as current, demoting the previous current to backup
    pub fn save_config(&self, config: &HostNetworkConfig) -> Result<()> {
        let content = toml::to_string(config)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.write_error(parent, e))?;
        }

        let _lock = self.lock()?;

        let tmp = self.tmp_path();
        let mut file = File::create(&tmp).map_err(|e| self.write_error(&tmp, e))?;
        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| self.write_error(&tmp, e))?;

        if self.path.exists() {
            let backup = self.backup_path();
            fs::rename(&self.path, &backup).map_err(|e| self.write_error(&backup, e))?;
            debug!(backup = %backup.display(), "rotated configuration");
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.write_error(&self.path, e))?;

        info!(
            path = %self.path.display(),
            vlans = config.vlans.len(),
            bridges = config.bridges.len(),
            "committed configuration"
        );
        Ok(())
    }

    /// Read the current configuration
    pub fn get_config(&self) -> Result<HostNetworkConfig> {
        read(&self.path)
    }

    /// Read the backup configuration
    pub fn get_backup_config(&self) -> Result<HostNetworkConfig> {
        read(&self.backup_path())
    }

    fn lock(&self) -> Result<Flock<File>> {
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| self.write_error(&path, e))?;

        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| self.write_error(&path, io::Error::from(errno)))
    }

    fn write_error(&self, path: &Path, source: io::Error) -> Error {
        Error::ConfigWrite {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn read(path: &Path) -> Result<HostNetworkConfig> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!(
                "config file '{}'",
                path.display()
            )));
        }
        Err(e) => {
            return Err(Error::ConfigRead {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    Ok(toml::from_str(&content)?)
}
