//! Kernel link access for engine-managed networks
//!
//! Provides:
//! - The `LinkAccessor` seam over the host's interface control surface
//! - A synchronous rtnetlink implementation (`KernelLinks`)
//! - Classification of raw kernel links into `Link` variants

pub mod accessor;
pub mod kernel;
pub mod mapper;
#[cfg(test)]
pub mod memory;
pub mod netlink;

pub use accessor::LinkAccessor;
pub use kernel::KernelLinks;
pub use mapper::{RawAddress, RawLink};
