//! labnet - host network reconciliation engine
//!
//! Command-line front end over the host network service.

mod cli;

use cli::{BridgeAction, Cli, Commands, RuleAction, VlanAction};
use labnet::error::Result;
use labnet::firewall::{Iptables, TrafficRule};
use labnet::link::{Link, LinkKind};
use labnet::manager::{HostNetworkManager, ReconcileReport, Startup};
use labnet::network::KernelLinks;
use labnet::service::{BridgeChanges, HostNetworkService, NewBridge, NewVlan};
use labnet::settings;
use labnet::store::ConfigStore;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

type Service = HostNetworkService<KernelLinks, Iptables>;

fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        if e.is_fatal() {
            eprintln!();
            eprintln!("The host matches neither the requested nor the last saved configuration.");
            eprintln!("Inspect it with 'labnet list', fix the cause, then run 'labnet reset'.");
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    // Commands that don't touch the host
    if let Commands::Completion { shell } = cli.command {
        Cli::generate_completion(shell);
        return Ok(());
    }

    let settings = settings::load(&cli.settings)?;
    let naming = settings.naming();

    // Only boot converges the host; other invocations must not undo the
    // unsaved work of earlier ones
    let startup = match cli.command {
        Commands::Boot => Startup::Reconcile,
        _ => Startup::Attach,
    };

    let manager = HostNetworkManager::open(
        KernelLinks::new(naming.clone()),
        ConfigStore::new(&settings.engine.config_path),
        naming,
        startup,
    )?;
    let service: Service =
        HostNetworkService::new(manager, Iptables::new(&settings.engine.iptables));

    match cli.command {
        Commands::Completion { .. } => {}

        Commands::Boot => {
            println!("Host reconciled with {}", settings.engine.config_path.display());
        }

        Commands::List { json } => {
            let links = service.get_list()?;
            if json {
                print_json(&links)?;
            } else {
                print_links(&links);
            }
        }

        Commands::Show { name, json } => {
            let link = service.get_by_name(&name)?;
            if json {
                print_json(&link)?;
            } else {
                print_links(std::slice::from_ref(&link));
            }
        }

        Commands::Vlan { action } => match action {
            VlanAction::Create {
                parent,
                vlan_id,
                addresses,
            } => {
                let link = service.create_vlan(NewVlan {
                    parent,
                    vlan_id,
                    addresses,
                })?;
                println!("Created VLAN '{}'", link.name);
                print_unsaved(&service);
            }
            VlanAction::Update { name, addresses } => {
                let link = service.update_vlan(&name, &addresses)?;
                println!("Updated VLAN '{}'", link.name);
                print_unsaved(&service);
            }
            VlanAction::Delete { name } => {
                service.delete_vlan(&name)?;
                println!("Deleted VLAN '{}'", name);
                print_unsaved(&service);
            }
        },

        Commands::Bridge { action } => match action {
            BridgeAction::Create {
                name,
                addresses,
                slaves,
            } => {
                let link = service.create_bridge(NewBridge {
                    name,
                    addresses,
                    slaves,
                })?;
                println!("Created bridge '{}'", link.name);
                print_unsaved(&service);
            }
            BridgeAction::Update {
                name,
                addresses,
                clear_addresses,
                slaves,
                clear_slaves,
            } => {
                let changes = BridgeChanges {
                    addresses: cli::replacement(addresses, clear_addresses),
                    slaves: cli::replacement(slaves, clear_slaves),
                };
                let link = service.update_bridge(&name, changes)?;
                println!("Updated bridge '{}'", link.name);
                print_unsaved(&service);
            }
            BridgeAction::Delete { name } => {
                service.delete_bridge(&name)?;
                println!("Deleted bridge '{}'", name);
                print_unsaved(&service);
            }
        },

        Commands::Rule { action } => match action {
            RuleAction::Add(spec) => {
                let rule = spec.rule();
                service.create_traffic_rule(spec.table, &rule)?;
                println!("Added rule to {}: {}", spec.table, rule);
            }
            RuleAction::Delete(spec) => {
                let rule = spec.rule();
                service.delete_traffic_rule(spec.table, &rule)?;
                println!("Deleted rule from {}: {}", spec.table, rule);
            }
            RuleAction::List { table, chain, json } => {
                let rules = match &chain {
                    Some(chain) => service.get_chain_rules(table, chain)?,
                    None => service.get_table_rules(table)?,
                };
                if json {
                    print_json(&rules)?;
                } else {
                    print_rules(&rules);
                }
            }
        },

        Commands::Save => {
            let config = service.save_configuration()?;
            println!(
                "Saved {} VLAN(s) and {} bridge(s)",
                config.vlans.len(),
                config.bridges.len()
            );
        }

        Commands::Reset => match service.reset_changes()? {
            Some(report) => print_report("Reset to last saved configuration", &report),
            None => println!("No unsaved changes."),
        },

        Commands::Restore => {
            let report = service.restore_from_backup()?;
            print_report("Restored backup configuration", &report);
            println!("Run 'labnet save' to keep it.");
        }

        Commands::Status { json } => {
            let unsaved = service.has_unsaved_changes();
            if json {
                print_json(&serde_json::json!({ "unsaved_changes": unsaved }))?;
            } else if unsaved {
                println!("Unsaved changes present.");
            } else {
                println!("Host matches the saved configuration.");
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_links(links: &[Link]) {
    println!("{:<16} {:<8} {:<32} DETAILS", "NAME", "TYPE", "ADDRESSES");
    for link in links {
        let addresses: Vec<String> = link.addresses.iter().map(|a| a.to_string()).collect();
        let details = match &link.kind {
            LinkKind::Vlan { vlan_id, parent } => {
                format!("id {} on {}", vlan_id, parent)
            }
            LinkKind::Bridge { slaves } if !slaves.is_empty() => {
                format!("members: {}", slaves.join(", "))
            }
            _ => String::new(),
        };
        let addresses = if addresses.is_empty() {
            "-".to_string()
        } else {
            addresses.join(",")
        };
        println!(
            "{:<16} {:<8} {:<32} {}",
            link.name,
            link.link_type().to_string(),
            addresses,
            details
        );
    }
}

fn print_rules(rules: &[TrafficRule]) {
    if rules.is_empty() {
        println!("No rules.");
        return;
    }
    for rule in rules {
        println!("  {}", rule);
    }
}

fn print_report(headline: &str, report: &ReconcileReport) {
    println!("{}: {}", headline, report);
    for name in &report.created {
        println!("  + {}", name);
    }
    for name in &report.deleted {
        println!("  - {}", name);
    }
    for change in &report.addresses_added {
        println!("  + {}", change);
    }
    for change in &report.addresses_removed {
        println!("  - {}", change);
    }
}

fn print_unsaved(service: &Service) {
    if service.has_unsaved_changes() {
        println!("Run 'labnet save' to commit or 'labnet reset' to discard.");
    }
}
