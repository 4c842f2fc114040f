//! Host capacity and runtime availability.

use serde::Serialize;
use sysinfo::System;

use crate::orchestrator::Orchestrator;
use crate::{PodbaseError, PodbaseResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Environment-derived host capacity served by the API and consulted at
/// create time.
#[derive(Debug, Clone, Serialize)]
pub struct HostCapacity {
    /// Logical CPU count.
    pub cpus: usize,
    /// Total physical memory in MiB.
    pub total_memory_mb: u64,
    /// Currently available memory in MiB.
    pub available_memory_mb: u64,
    /// Kernel and distribution, when known.
    pub os: Option<String>,
    /// Container runtime availability.
    pub runtime: RuntimeStatus,
}

/// Whether the container runtime answered, and with which version.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    /// Whether the runtime binary responded.
    pub installed: bool,
    /// Version line reported by the runtime.
    pub version: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads current host capacity and probes the runtime.
pub async fn host_capacity(orchestrator: &Orchestrator) -> HostCapacity {
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_cpu_all();

    let runtime = match orchestrator.runtime_version().await {
        Ok(version) => RuntimeStatus {
            installed: true,
            version: Some(version),
        },
        Err(_) => RuntimeStatus {
            installed: false,
            version: None,
        },
    };

    HostCapacity {
        cpus: system.cpus().len(),
        total_memory_mb: system.total_memory() / (1024 * 1024),
        available_memory_mb: system.available_memory() / (1024 * 1024),
        os: System::long_os_version(),
        runtime,
    }
}

/// Rejects resource envelopes the host cannot satisfy.
pub fn check_capacity(requested_memory_mb: i64) -> PodbaseResult<()> {
    let mut system = System::new();
    system.refresh_memory();
    let total_mb = (system.total_memory() / (1024 * 1024)) as i64;

    // A zero reading means the probe failed; do not block creation on it.
    if total_mb > 0 && requested_memory_mb > total_mb {
        return Err(PodbaseError::Validation(format!(
            "requested {requested_memory_mb} MiB exceeds host memory of {total_mb} MiB"
        )));
    }
    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasonable_requests_pass() {
        assert!(check_capacity(128).is_ok());
    }

    #[test]
    fn test_absurd_requests_fail() {
        // 16 PiB of RAM should exceed any host this runs on.
        assert!(check_capacity(1 << 44).is_err());
    }
}
