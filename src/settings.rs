//! Engine settings for labnet
//!
//! Parses `labnet.toml` using serde. Every key is optional.

use crate::error::{Error, Result};
use crate::link::{IFNAME_MAX, Naming};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default location of the settings file
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/labnet/labnet.toml";

/// Load settings from a file, falling back to defaults if it does not exist
pub fn load(path: &Path) -> Result<Settings> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(e) => {
            return Err(Error::ConfigRead {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let settings: Settings = toml::from_str(&content)?;
    settings.validate()?;

    Ok(settings)
}

/// Root settings structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineConfig,
}

/// `[engine]` section
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Current configuration file; the backup lives next to it as `.back`
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    #[serde(default = "default_vlan_prefix")]
    pub vlan_prefix: String,

    #[serde(default = "default_bridge_prefix")]
    pub bridge_prefix: String,

    /// netfilter command used for traffic rules
    #[serde(default = "default_iptables")]
    pub iptables: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            vlan_prefix: default_vlan_prefix(),
            bridge_prefix: default_bridge_prefix(),
            iptables: default_iptables(),
        }
    }
}

impl Settings {
    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;

        if engine.vlan_prefix.is_empty() || engine.bridge_prefix.is_empty() {
            return Err(Error::ConfigValidation(
                "vlan_prefix and bridge_prefix must not be empty".into(),
            ));
        }

        // Managed namespaces must not overlap
        if engine.vlan_prefix.starts_with(&engine.bridge_prefix)
            || engine.bridge_prefix.starts_with(&engine.vlan_prefix)
        {
            return Err(Error::ConfigValidation(format!(
                "vlan_prefix '{}' and bridge_prefix '{}' overlap",
                engine.vlan_prefix, engine.bridge_prefix
            )));
        }

        // Shortest VLAN name is `<prefix>x.1`
        if engine.vlan_prefix.len() + 3 > IFNAME_MAX {
            return Err(Error::ConfigValidation(format!(
                "vlan_prefix '{}' leaves no room for interface names",
                engine.vlan_prefix
            )));
        }
        if engine.bridge_prefix.len() + 1 > IFNAME_MAX {
            return Err(Error::ConfigValidation(format!(
                "bridge_prefix '{}' leaves no room for interface names",
                engine.bridge_prefix
            )));
        }

        if engine.iptables.trim().is_empty() {
            return Err(Error::ConfigValidation("iptables must not be empty".into()));
        }

        Ok(())
    }

    pub fn naming(&self) -> Naming {
        Naming::new(&self.engine.vlan_prefix, &self.engine.bridge_prefix)
    }
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/var/lib/labnet/host-network.toml")
}

fn default_vlan_prefix() -> String {
    "lv-".into()
}

fn default_bridge_prefix() -> String {
    "lb-".into()
}

fn default_iptables() -> String {
    "iptables".into()
}
