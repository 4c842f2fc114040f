//! The virtual-network IP allocator.
//!
//! Hands out addresses from a host-local /24 for instances that want
//! container-to-container reachability. Used octets are seeded from the
//! store at startup and guarded by a short-held lock thereafter.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use tokio::sync::Mutex;

use crate::{PodbaseError, PodbaseResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// First assignable last octet (.1 is the gateway).
const FIRST_OCTET: u8 = 2;

/// Last assignable last octet (.255 is broadcast).
const LAST_OCTET: u8 = 254;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Reserve/release of addresses on the named virtual network.
#[derive(Debug)]
pub struct VnetAllocator {
    /// Network name the leases belong to.
    name: String,

    /// First three octets of the /24, e.g. "10.89.0".
    subnet_base: String,

    /// Leased last octets.
    used: Mutex<BTreeSet<u8>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VnetAllocator {
    /// Creates an allocator seeded with the octets already leased in the
    /// store.
    pub fn new(name: impl Into<String>, subnet_base: impl Into<String>, used: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            subnet_base: subnet_base.into(),
            used: Mutex::new(used.into_iter().collect()),
        }
    }

    /// The network name this allocator serves.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reserves the lowest free address.
    pub async fn reserve(&self) -> PodbaseResult<Ipv4Addr> {
        let mut used = self.used.lock().await;
        let octet = (FIRST_OCTET..=LAST_OCTET)
            .find(|candidate| !used.contains(candidate))
            .ok_or_else(|| PodbaseError::VnetExhausted(self.name.clone()))?;
        used.insert(octet);

        let ip: Ipv4Addr = format!("{}.{octet}", self.subnet_base)
            .parse()
            .map_err(|_| {
                PodbaseError::Invariant(format!("bad vnet subnet base '{}'", self.subnet_base))
            })?;
        Ok(ip)
    }

    /// Releases a previously reserved address. Releasing an unknown address
    /// is a no-op, which keeps destroy idempotent.
    pub async fn release(&self, ip: &str) {
        let prefix = format!("{}.", self.subnet_base);
        if let Some(octet) = ip.strip_prefix(&prefix).and_then(|last| last.parse::<u8>().ok()) {
            self.used.lock().await.remove(&octet);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_reserve_skips_seeded_octets() -> anyhow::Result<()> {
        let allocator = VnetAllocator::new("podbase0", "10.89.0", vec![2, 3]);
        let ip = allocator.reserve().await?;
        assert_eq!(ip, "10.89.0.4".parse::<Ipv4Addr>()?);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_release_makes_octet_reusable() -> anyhow::Result<()> {
        let allocator = VnetAllocator::new("podbase0", "10.89.0", vec![]);
        let first = allocator.reserve().await?;
        allocator.release(&first.to_string()).await;
        let second = allocator.reserve().await?;
        assert_eq!(first, second);

        // Releasing something never handed out changes nothing.
        allocator.release("10.89.0.200").await;
        allocator.release("192.168.1.5").await;
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_exhaustion_is_reported() {
        let used: Vec<u8> = (FIRST_OCTET..=LAST_OCTET).collect();
        let allocator = VnetAllocator::new("podbase0", "10.89.0", used);
        assert!(matches!(
            allocator.reserve().await,
            Err(PodbaseError::VnetExhausted(_))
        ));
    }
}
