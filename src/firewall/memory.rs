//! In-memory rule backend recording every call

use crate::error::{Error, Result};
use crate::firewall::{RuleBackend, Table, TrafficRule};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Rules {
    rules: Vec<(Table, TrafficRule)>,
    calls: Vec<String>,
}

/// Rule backend keeping rules in a list; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemoryRules {
    inner: Arc<Mutex<Rules>>,
}

impl MemoryRules {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Rules> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutating calls in order, e.g. `-A nat POSTROUTING -j MASQUERADE`
    pub fn calls(&self) -> Vec<String> {
        self.inner().calls.clone()
    }
}

impl RuleBackend for MemoryRules {
    fn append(&mut self, table: Table, rule: &TrafficRule) -> Result<()> {
        let mut inner = self.inner();
        inner.calls.push(format!("-A {} {}", table, rule));
        inner.rules.push((table, rule.clone()));
        Ok(())
    }

    fn delete(&mut self, table: Table, rule: &TrafficRule) -> Result<()> {
        let mut inner = self.inner();
        inner.calls.push(format!("-D {} {}", table, rule));
        let pos = inner
            .rules
            .iter()
            .position(|(t, r)| *t == table && r == rule)
            .ok_or_else(|| Error::CommandFailed {
                command: "iptables -D".into(),
                message: "Bad rule (does a matching rule exist in that chain?)".into(),
            })?;
        inner.rules.remove(pos);
        Ok(())
    }

    fn exists(&self, table: Table, rule: &TrafficRule) -> Result<bool> {
        Ok(self
            .inner()
            .rules
            .iter()
            .any(|(t, r)| *t == table && r == rule))
    }

    fn list(&self, table: Table, chain: Option<&str>) -> Result<Vec<TrafficRule>> {
        Ok(self
            .inner()
            .rules
            .iter()
            .filter(|(t, r)| *t == table && chain.is_none_or(|c| r.chain == c))
            .map(|(_, r)| r.clone())
            .collect())
    }
}
