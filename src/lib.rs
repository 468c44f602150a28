//! labnet - host network reconciliation engine
//!
//! Keeps the kernel's engine-managed VLANs and bridges in line with an
//! operator-committed configuration, with one backup generation for
//! rollback, and drives the netfilter rules that lab segments use.

pub mod error;
pub mod firewall;
pub mod link;
pub mod manager;
pub mod network;
pub mod service;
pub mod settings;
pub mod store;
