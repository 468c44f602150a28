//! Command-line interface for labnet
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use ipnet::IpNet;
use labnet::firewall::{Table, TrafficRule};
use labnet::settings::DEFAULT_SETTINGS_PATH;
use std::path::PathBuf;

/// labnet - host network reconciliation for lab segments
#[derive(Parser)]
#[command(name = "labnet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path
    #[arg(short, long, default_value = DEFAULT_SETTINGS_PATH)]
    pub settings: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// List all host links
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show a single link
    Show {
        /// Link name
        name: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage engine VLANs
    Vlan {
        #[command(subcommand)]
        action: VlanAction,
    },

    /// Manage engine bridges
    Bridge {
        #[command(subcommand)]
        action: BridgeAction,
    },

    /// Manage netfilter traffic rules
    Rule {
        #[command(subcommand)]
        action: RuleAction,
    },

    /// Commit the current host state (previous commit becomes the backup)
    Save,

    /// Roll the host back to the last commit
    Reset,

    /// Converge the host to the backup generation (stays unsaved)
    Restore,

    /// Show whether the host has unsaved changes
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Reconcile the host with the last commit (run once at boot)
    Boot,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// VLAN subcommands
#[derive(Subcommand)]
pub enum VlanAction {
    /// Create a VLAN on a parent link
    Create {
        /// Parent link
        parent: String,

        /// 802.1Q tag (1-4094)
        vlan_id: u16,

        /// Address in CIDR form (repeatable)
        #[arg(short = 'a', long = "address")]
        addresses: Vec<String>,
    },

    /// Replace the addresses of a VLAN
    Update {
        /// VLAN link name
        name: String,

        /// Address in CIDR form (repeatable, none clears all)
        #[arg(short = 'a', long = "address")]
        addresses: Vec<String>,
    },

    /// Delete a VLAN
    Delete {
        /// VLAN link name
        name: String,
    },
}

/// Bridge subcommands
#[derive(Subcommand)]
pub enum BridgeAction {
    /// Create a bridge
    Create {
        /// Base name (the bridge prefix is added)
        name: String,

        /// Address in CIDR form (repeatable)
        #[arg(short = 'a', long = "address")]
        addresses: Vec<String>,

        /// Member link (repeatable)
        #[arg(short = 's', long = "slave")]
        slaves: Vec<String>,
    },

    /// Update addresses and/or members of a bridge
    Update {
        /// Bridge link name
        name: String,

        /// Address in CIDR form (repeatable, replaces the current set)
        #[arg(short = 'a', long = "address")]
        addresses: Vec<String>,

        /// Remove all addresses
        #[arg(long, conflicts_with = "addresses")]
        clear_addresses: bool,

        /// Member link (repeatable, replaces the current members)
        #[arg(short = 's', long = "slave")]
        slaves: Vec<String>,

        /// Release all members
        #[arg(long, conflicts_with = "slaves")]
        clear_slaves: bool,
    },

    /// Delete a bridge
    Delete {
        /// Bridge link name
        name: String,
    },
}

/// Traffic rule subcommands
#[derive(Subcommand)]
pub enum RuleAction {
    /// Append a rule
    Add(RuleSpec),

    /// Delete a rule
    Delete(RuleSpec),

    /// List rules of a table or chain
    List {
        /// Table (filter, nat, mangle, raw)
        table: Table,

        /// Restrict to one chain
        chain: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// A rule given on the command line
#[derive(Args)]
pub struct RuleSpec {
    /// Table (filter, nat, mangle, raw)
    pub table: Table,

    /// Chain, e.g. FORWARD or POSTROUTING
    pub chain: String,

    /// Target, e.g. ACCEPT or MASQUERADE
    pub action: String,

    /// Source network
    #[arg(long)]
    pub source: Option<IpNet>,

    /// Destination network
    #[arg(long)]
    pub destination: Option<IpNet>,
}

impl RuleSpec {
    pub fn rule(&self) -> TrafficRule {
        TrafficRule {
            chain: self.chain.clone(),
            action: self.action.clone(),
            source: self.source,
            destination: self.destination,
        }
    }
}

/// Collapse a repeatable flag and its `--clear-*` switch into an update
pub fn replacement(values: Vec<String>, clear: bool) -> Option<Vec<String>> {
    if clear {
        Some(Vec::new())
    } else if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "labnet", &mut std::io::stdout());
    }
}
