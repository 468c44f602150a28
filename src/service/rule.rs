//! Traffic rule operations
//!
//! Rules go straight to the kernel and do not affect the unsaved-changes
//! state.

use super::HostNetworkService;
use crate::error::{Error, Result};
use crate::firewall::{self, RuleBackend, Table, TrafficRule};
use crate::network::LinkAccessor;
use tracing::info;

impl<A: LinkAccessor, R: RuleBackend> HostNetworkService<A, R> {
    pub fn create_traffic_rule(&self, table: Table, rule: &TrafficRule) -> Result<()> {
        rule.validate()?;

        let mut rules = self.rules();
        if rules.exists(table, rule)? {
            return Err(Error::validation(
                "rule",
                format!("'{}' already exists in table {}", rule, table),
            ));
        }
        rules.append(table, rule)?;

        info!(%table, %rule, "created traffic rule");
        Ok(())
    }

    pub fn delete_traffic_rule(&self, table: Table, rule: &TrafficRule) -> Result<()> {
        rule.validate()?;

        let mut rules = self.rules();
        if !rules.exists(table, rule)? {
            return Err(Error::NotFound(format!(
                "rule '{}' in table {}",
                rule, table
            )));
        }
        rules.delete(table, rule)?;

        info!(%table, %rule, "deleted traffic rule");
        Ok(())
    }

    pub fn get_chain_rules(&self, table: Table, chain: &str) -> Result<Vec<TrafficRule>> {
        firewall::validate_chain(chain)?;
        self.rules().list(table, Some(chain))
    }

    pub fn get_table_rules(&self, table: Table) -> Result<Vec<TrafficRule>> {
        self.rules().list(table, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::fixture;

    fn masquerade() -> TrafficRule {
        TrafficRule::new("POSTROUTING", "MASQUERADE").with_source("10.0.1.0/24".parse().unwrap())
    }

    #[test]
    fn test_create_and_list_rules() {
        let f = fixture();
        f.service.create_traffic_rule(Table::Nat, &masquerade()).unwrap();
        f.service
            .create_traffic_rule(Table::Filter, &TrafficRule::new("FORWARD", "ACCEPT"))
            .unwrap();

        assert_eq!(
            f.service.get_chain_rules(Table::Nat, "POSTROUTING").unwrap(),
            vec![masquerade()]
        );
        assert!(f.service.get_chain_rules(Table::Nat, "PREROUTING").unwrap().is_empty());
        assert_eq!(f.service.get_table_rules(Table::Filter).unwrap().len(), 1);
        assert_eq!(
            f.rules.calls(),
            vec![
                "-A nat POSTROUTING -s 10.0.1.0/24 -j MASQUERADE",
                "-A filter FORWARD -j ACCEPT",
            ]
        );
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let f = fixture();
        f.service.create_traffic_rule(Table::Nat, &masquerade()).unwrap();

        let err = f
            .service
            .create_traffic_rule(Table::Nat, &masquerade())
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(f.rules.calls().len(), 1);
    }

    #[test]
    fn test_delete_rule() {
        let f = fixture();
        f.service.create_traffic_rule(Table::Nat, &masquerade()).unwrap();
        f.service.delete_traffic_rule(Table::Nat, &masquerade()).unwrap();

        assert!(f.service.get_table_rules(Table::Nat).unwrap().is_empty());
        assert!(
            f.service
                .delete_traffic_rule(Table::Nat, &masquerade())
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_rules_do_not_touch_change_state() {
        let f = fixture();
        f.service.create_traffic_rule(Table::Nat, &masquerade()).unwrap();
        assert!(!f.service.has_unsaved_changes());
    }

    #[test]
    fn test_invalid_rule_never_reaches_backend() {
        let f = fixture();
        let rule = TrafficRule::new("FORWARD", "ACCEPT").with_source("fd00::/8".parse().unwrap());

        assert!(f.service.create_traffic_rule(Table::Filter, &rule).unwrap_err().is_validation());
        assert!(f.service.get_chain_rules(Table::Filter, "bad chain").is_err());
        assert!(f.rules.calls().is_empty());
    }
}
