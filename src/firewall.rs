//! Netfilter traffic rules
//!
//! Rules are read and written against the kernel through the `iptables`
//! command; they are never persisted by the engine.

#[cfg(test)]
pub mod memory;

use crate::error::{Error, Result};
use ipnet::IpNet;
use nom::{
    Parser,
    branch::alt,
    bytes::complete::{take_till, take_while1},
    character::complete::{char, space0},
    multi::many0,
    sequence::{delimited, preceded},
};
use serde::Serialize;
use std::fmt;
use std::process::{Command, Output};
use std::str::FromStr;
use tracing::debug;

/// Longest chain name netfilter accepts
pub const CHAIN_NAME_MAX: usize = 28;

/// Netfilter table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Filter,
    Nat,
    Mangle,
    Raw,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
            Table::Mangle => "mangle",
            Table::Raw => "raw",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "filter" => Ok(Table::Filter),
            "nat" => Ok(Table::Nat),
            "mangle" => Ok(Table::Mangle),
            "raw" => Ok(Table::Raw),
            other => Err(Error::validation(
                "table",
                format!("unknown table '{}' (expected filter, nat, mangle or raw)", other),
            )),
        }
    }
}

/// A live netfilter rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficRule {
    pub chain: String,
    pub action: String,
    pub source: Option<IpNet>,
    pub destination: Option<IpNet>,
}

impl TrafficRule {
    pub fn new(chain: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            action: action.into(),
            source: None,
            destination: None,
        }
    }

    pub fn with_source(mut self, source: IpNet) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_destination(mut self, destination: IpNet) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_chain(&self.chain)?;

        if self.action.is_empty() || self.action.chars().any(char::is_whitespace) {
            return Err(Error::validation(
                "action",
                "must be a single non-empty target",
            ));
        }

        for (field, net) in [("source", &self.source), ("destination", &self.destination)] {
            if let Some(IpNet::V6(_)) = net {
                return Err(Error::validation(field, "IPv6 networks are not supported"));
            }
        }

        Ok(())
    }

    /// Arguments following `-A`/`-D`/`-C`
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![self.chain.clone()];
        if let Some(source) = &self.source {
            args.push("-s".into());
            args.push(source.to_string());
        }
        if let Some(destination) = &self.destination {
            args.push("-d".into());
            args.push(destination.to_string());
        }
        args.push("-j".into());
        args.push(self.action.clone());
        args
    }
}

impl fmt::Display for TrafficRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_args().join(" "))
    }
}

pub fn validate_chain(chain: &str) -> Result<()> {
    if chain.is_empty() || chain.chars().any(char::is_whitespace) {
        return Err(Error::validation(
            "chain",
            "must be non-empty without whitespace",
        ));
    }
    if chain.len() > CHAIN_NAME_MAX {
        return Err(Error::validation(
            "chain",
            format!("must be at most {} characters", CHAIN_NAME_MAX),
        ));
    }
    Ok(())
}

/// Control surface over the kernel's traffic rules
pub trait RuleBackend: Send {
    fn append(&mut self, table: Table, rule: &TrafficRule) -> Result<()>;

    fn delete(&mut self, table: Table, rule: &TrafficRule) -> Result<()>;

    fn exists(&self, table: Table, rule: &TrafficRule) -> Result<bool>;

    /// Rules of a table, restricted to `chain` when given
    fn list(&self, table: Table, chain: Option<&str>) -> Result<Vec<TrafficRule>>;
}

/// `iptables` command backend
#[derive(Debug, Clone)]
pub struct Iptables {
    program: String,
}

impl Iptables {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, table: Table, args: &[String]) -> Result<Output> {
        debug!(program = %self.program, table = %table, args = ?args, "running");

        Command::new(&self.program)
            .args(["-w", "-t", table.as_str()])
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                command: self.program.clone(),
                message: e.to_string(),
            })
    }

    fn run_checked(&self, table: Table, args: &[String]) -> Result<Output> {
        let output = self.run(table, args)?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: format!("{} -t {} {}", self.program, table, args.join(" ")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    fn command(flag: &str, rule: &TrafficRule) -> Vec<String> {
        let mut args = vec![flag.to_string()];
        args.extend(rule.to_args());
        args
    }
}

impl Default for Iptables {
    fn default() -> Self {
        Self::new("iptables")
    }
}

impl RuleBackend for Iptables {
    fn append(&mut self, table: Table, rule: &TrafficRule) -> Result<()> {
        self.run_checked(table, &Self::command("-A", rule))?;
        Ok(())
    }

    fn delete(&mut self, table: Table, rule: &TrafficRule) -> Result<()> {
        self.run_checked(table, &Self::command("-D", rule))?;
        Ok(())
    }

    fn exists(&self, table: Table, rule: &TrafficRule) -> Result<bool> {
        let args = Self::command("-C", rule);
        let output = self.run(table, &args)?;

        // -C exits 1 for a missing rule, anything else is a real failure
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Error::CommandFailed {
                command: format!("{} -t {} {}", self.program, table, args.join(" ")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn list(&self, table: Table, chain: Option<&str>) -> Result<Vec<TrafficRule>> {
        let mut args = vec!["-S".to_string()];
        if let Some(chain) = chain {
            args.push(chain.to_string());
        }

        let output = self.run_checked(table, &args)?;
        parse_rules(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `iptables -S` output
///
/// Policy and chain declarations are skipped, as are negated rules which
/// `TrafficRule` cannot express. Match options other than source and
/// destination are ignored.
pub fn parse_rules(output: &str) -> Result<Vec<TrafficRule>> {
    let mut rules = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rule) = parse_rule_line(line)? {
            rules.push(rule);
        }
    }

    Ok(rules)
}

fn parse_rule_line(line: &str) -> Result<Option<TrafficRule>> {
    let tokens = match split_tokens.parse(line) {
        Ok((rest, tokens)) if rest.trim().is_empty() => tokens,
        _ => return Err(Error::CommandFailed {
            command: "iptables -S".into(),
            message: format!("unparseable rule: {}", line),
        }),
    };

    let mut iter = tokens.into_iter();
    if iter.next() != Some("-A") {
        return Ok(None);
    }
    let Some(chain) = iter.next() else {
        return Ok(None);
    };

    let mut rule = TrafficRule::new(chain, "");
    while let Some(token) = iter.next() {
        match token {
            "!" => {
                debug!(line, "skipping negated rule");
                return Ok(None);
            }
            "-s" => rule.source = iter.next().map(parse_net).transpose()?,
            "-d" => rule.destination = iter.next().map(parse_net).transpose()?,
            "-j" => rule.action = iter.next().unwrap_or_default().to_string(),
            _ => {}
        }
    }

    // Rules without a target only count packets
    if rule.action.is_empty() {
        return Ok(None);
    }
    Ok(Some(rule))
}

fn parse_net(s: &str) -> Result<IpNet> {
    s.parse::<IpNet>()
        .or_else(|_| s.parse::<std::net::IpAddr>().map(IpNet::from))
        .map_err(|_| Error::CommandFailed {
            command: "iptables -S".into(),
            message: format!("invalid network '{}'", s),
        })
}

fn split_tokens(input: &str) -> nom::IResult<&str, Vec<&str>> {
    many0(preceded(
        space0,
        alt((
            delimited(char('"'), take_till(|c| c == '"'), char('"')),
            take_while1(|c: char| !c.is_whitespace() && c != '"'),
        )),
    ))
    .parse(input)
}
