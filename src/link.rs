//! Link model and engine naming conventions
//!
//! Provides:
//! - The `Link` record with its variant payload (device, VLAN, bridge, unknown)
//! - Deterministic names for engine-managed VLANs and bridges
//! - Managed-namespace detection by prefix

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kernel interface name limit (IFNAMSIZ minus the terminating NUL)
pub const IFNAME_MAX: usize = 15;

/// Lowest valid 802.1Q tag
pub const VLAN_ID_MIN: u16 = 1;

/// Highest valid 802.1Q tag
pub const VLAN_ID_MAX: u16 = 4094;

/// Variant tag of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Device,
    Vlan,
    Bridge,
    Unknown,
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkType::Device => write!(f, "device"),
            LinkType::Vlan => write!(f, "vlan"),
            LinkType::Bridge => write!(f, "bridge"),
            LinkType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Variant-specific link attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkKind {
    /// Physical or otherwise plain device
    Device,
    /// 802.1Q VLAN carved from `parent`
    Vlan { vlan_id: u16, parent: String },
    /// Bridge with its currently enslaved members
    Bridge { slaves: Vec<String> },
    /// Any other kernel link kind
    Unknown,
}

/// A kernel network link as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub name: String,
    pub addresses: BTreeSet<IpNet>,
    #[serde(flatten)]
    pub kind: LinkKind,
}

impl Link {
    pub fn new(name: impl Into<String>, kind: LinkKind) -> Self {
        Self {
            name: name.into(),
            addresses: BTreeSet::new(),
            kind,
        }
    }

    pub fn with_address(mut self, address: IpNet) -> Self {
        self.addresses.insert(address);
        self
    }

    pub fn link_type(&self) -> LinkType {
        match self.kind {
            LinkKind::Device => LinkType::Device,
            LinkKind::Vlan { .. } => LinkType::Vlan,
            LinkKind::Bridge { .. } => LinkType::Bridge,
            LinkKind::Unknown => LinkType::Unknown,
        }
    }

    /// Bridge members, empty for non-bridge links
    pub fn slaves(&self) -> &[String] {
        match &self.kind {
            LinkKind::Bridge { slaves } => slaves,
            _ => &[],
        }
    }
}

/// Name prefixes reserved for engine-managed links
///
/// VLANs are named `<vlan_prefix><parent>.<vlan_id>`, bridges
/// `<bridge_prefix><base>`. Only links in these namespaces are ever created,
/// pruned or restored by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    vlan_prefix: String,
    bridge_prefix: String,
}

impl Naming {
    pub fn new(vlan_prefix: impl Into<String>, bridge_prefix: impl Into<String>) -> Self {
        Self {
            vlan_prefix: vlan_prefix.into(),
            bridge_prefix: bridge_prefix.into(),
        }
    }

    pub fn vlan_prefix(&self) -> &str {
        &self.vlan_prefix
    }

    pub fn bridge_prefix(&self) -> &str {
        &self.bridge_prefix
    }

    pub fn vlan_name(&self, parent: &str, vlan_id: u16) -> String {
        format!("{}{}.{}", self.vlan_prefix, parent, vlan_id)
    }

    pub fn bridge_name(&self, base: &str) -> String {
        format!("{}{}", self.bridge_prefix, base)
    }

    /// Base name of a managed bridge (`lb-lab1` -> `lab1`)
    pub fn bridge_base<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.bridge_prefix.as_str())
            .filter(|base| !base.is_empty())
    }

    pub fn is_managed_vlan(&self, name: &str) -> bool {
        name.starts_with(&self.vlan_prefix)
    }

    pub fn is_managed_bridge(&self, name: &str) -> bool {
        name.starts_with(&self.bridge_prefix)
    }

    pub fn is_managed(&self, name: &str) -> bool {
        self.is_managed_vlan(name) || self.is_managed_bridge(name)
    }

    /// Whether the engine owns `link`
    ///
    /// A VLAN is owned only under the exact name derived from its parent and
    /// tag, a bridge only with a base name after the bridge prefix. Other
    /// links are observed, even when their name carries a managed prefix.
    pub fn owns(&self, link: &Link) -> bool {
        match &link.kind {
            LinkKind::Vlan { vlan_id, parent } => {
                (VLAN_ID_MIN..=VLAN_ID_MAX).contains(vlan_id)
                    && link.name == self.vlan_name(parent, *vlan_id)
            }
            LinkKind::Bridge { .. } => self.bridge_base(&link.name).is_some(),
            LinkKind::Device | LinkKind::Unknown => false,
        }
    }
}

impl Default for Naming {
    fn default() -> Self {
        Self::new("lv-", "lb-")
    }
}
