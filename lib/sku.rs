//! The SKU catalog.
//!
//! SKU ids follow an Azure-style series + size scheme. The series letter
//! picks the scheduling behavior applied at container create; the numeric
//! suffix picks the resource envelope.

use std::{collections::BTreeMap, sync::LazyLock};

use serde::Serialize;

use crate::{PodbaseError, PodbaseResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A SKU series determining container scheduling behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SkuSeries {
    /// Low priority, yields under contention.
    Burstable,
    /// Balanced baseline.
    General,
    /// Keeps data in RAM, protected from the OOM killer.
    MemoryOptimized,
    /// High CPU priority, strict no-swap.
    ComputeOptimized,
    /// User-specified resources, general scheduling.
    Custom,
}

/// A named resource tier.
#[derive(Debug, Clone, Serialize)]
pub struct Sku {
    /// Catalog id, e.g. "d2".
    pub id: &'static str,

    /// Scheduling series.
    pub series: SkuSeries,

    /// Memory envelope in MiB.
    pub memory_mb: i64,

    /// CPU envelope in vCPUs.
    pub cpus: f64,

    /// Storage envelope in GiB.
    pub storage_gb: i64,
}

/// Scheduling flags a series maps to at container create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingHints {
    /// Relative CPU weight under contention.
    pub cpu_shares: u32,

    /// Memory swappiness override, when set.
    pub swappiness: Option<u32>,

    /// OOM score adjustment, when set.
    pub oom_score_adj: Option<i32>,

    /// Whether swap is clamped to the memory limit (strict no-swap).
    pub strict_no_swap: bool,
}

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The static SKU catalog, keyed by id.
pub static SKU_CATALOG: LazyLock<BTreeMap<&'static str, Sku>> = LazyLock::new(|| {
    use SkuSeries::*;

    let mut catalog = BTreeMap::new();
    let entries = [
        // B-series: burstable
        ("b1", Burstable, 1024, 0.5, 10),
        ("b2", Burstable, 2048, 1.0, 20),
        ("b4", Burstable, 4096, 2.0, 40),
        // D-series: general purpose
        ("d2", General, 4096, 2.0, 50),
        ("d4", General, 8192, 4.0, 100),
        ("d8", General, 16384, 8.0, 200),
        ("d16", General, 32768, 16.0, 500),
        ("d32", General, 65536, 32.0, 1024),
        ("d64", General, 131072, 64.0, 2048),
        // E-series: memory optimized
        ("e2", MemoryOptimized, 8192, 2.0, 50),
        ("e4", MemoryOptimized, 16384, 4.0, 100),
        ("e8", MemoryOptimized, 32768, 8.0, 200),
        ("e16", MemoryOptimized, 65536, 16.0, 500),
        ("e32", MemoryOptimized, 131072, 32.0, 1024),
        ("e64", MemoryOptimized, 262144, 64.0, 2048),
        // F-series: compute optimized
        ("f2", ComputeOptimized, 2048, 2.0, 30),
        ("f4", ComputeOptimized, 4096, 4.0, 60),
        ("f8", ComputeOptimized, 8192, 8.0, 120),
        ("f16", ComputeOptimized, 16384, 16.0, 240),
        ("f32", ComputeOptimized, 32768, 32.0, 480),
        ("f64", ComputeOptimized, 65536, 64.0, 960),
    ];

    for (id, series, memory_mb, cpus, storage_gb) in entries {
        catalog.insert(
            id,
            Sku {
                id,
                series,
                memory_mb,
                cpus,
                storage_gb,
            },
        );
    }
    catalog
});

/// The id accepted for user-specified resource envelopes.
pub const CUSTOM_SKU_ID: &str = "custom";

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SkuSeries {
    /// Scheduling flags this series maps to.
    pub fn scheduling_hints(&self) -> SchedulingHints {
        match self {
            SkuSeries::Burstable => SchedulingHints {
                cpu_shares: 512,
                swappiness: None,
                oom_score_adj: None,
                strict_no_swap: false,
            },
            SkuSeries::General | SkuSeries::Custom => SchedulingHints {
                cpu_shares: 1024,
                swappiness: None,
                oom_score_adj: None,
                strict_no_swap: false,
            },
            SkuSeries::MemoryOptimized => SchedulingHints {
                cpu_shares: 1024,
                swappiness: Some(0),
                oom_score_adj: Some(-500),
                strict_no_swap: false,
            },
            SkuSeries::ComputeOptimized => SchedulingHints {
                cpu_shares: 2048,
                swappiness: Some(0),
                oom_score_adj: None,
                strict_no_swap: true,
            },
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Looks up a SKU by id. `custom` is not in the catalog; callers handle it
/// before resolving.
pub fn get_sku(id: &str) -> PodbaseResult<&'static Sku> {
    SKU_CATALOG
        .get(id)
        .ok_or_else(|| PodbaseError::SkuUnknown(id.to_string()))
}

/// The series a SKU id belongs to, derived from its leading letter.
pub fn series_of(id: &str) -> SkuSeries {
    match id.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('b') => SkuSeries::Burstable,
        Some('d') => SkuSeries::General,
        Some('e') => SkuSeries::MemoryOptimized,
        Some('f') => SkuSeries::ComputeOptimized,
        _ => SkuSeries::Custom,
    }
}

/// All catalog entries, for the /skus listing.
pub fn list_skus() -> Vec<&'static Sku> {
    SKU_CATALOG.values().collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_all_series_sizes() {
        assert_eq!(SKU_CATALOG.len(), 21);
        assert!(get_sku("b1").is_ok());
        assert!(get_sku("d64").is_ok());
        assert!(get_sku("z9").is_err());
        assert!(get_sku(CUSTOM_SKU_ID).is_err());
    }

    #[test]
    fn test_d2_envelope() {
        let sku = get_sku("d2").unwrap();
        assert_eq!(sku.memory_mb, 4096);
        assert_eq!(sku.cpus, 2.0);
        assert_eq!(sku.storage_gb, 50);
    }

    #[test]
    fn test_series_scheduling_hints() {
        let b = SkuSeries::Burstable.scheduling_hints();
        assert_eq!(b.cpu_shares, 512);
        assert!(b.swappiness.is_none());

        let e = SkuSeries::MemoryOptimized.scheduling_hints();
        assert_eq!(e.swappiness, Some(0));
        assert_eq!(e.oom_score_adj, Some(-500));

        let f = SkuSeries::ComputeOptimized.scheduling_hints();
        assert_eq!(f.cpu_shares, 2048);
        assert!(f.strict_no_swap);
    }

    #[test]
    fn test_series_derived_from_id() {
        assert_eq!(series_of("e16"), SkuSeries::MemoryOptimized);
        assert_eq!(series_of("custom"), SkuSeries::Custom);
    }
}
