//! DuckDB adapter.
//!
//! DuckDB is an embedded, in-process engine: no container is created, no
//! port is bound. Provisioning allocates a volume holding the database file
//! and records the instance; clients open the file directly.

use crate::credentials::Charset;

use super::{EngineAdapter, EngineCategory, InstanceCtx, Supports};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for DuckDB.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "duckdb",
    display_name: "DuckDB",
    description: "In-process analytical database, the SQLite of OLAP",
    category: EngineCategory::Analytical,
    image: "",
    default_port: 0,
    data_mount: "",
    config_mount: None,
    dump_extension: ".duckdb",
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        logical_databases: true,
        users: false,
        backup: true,
        metrics: false,
        embedded: true,
    },
    extra_capabilities: &[],
    read_only_rootfs: false,
    min_memory_mb: 256,
    readiness_timeout_s: 5,
    container_env: super::no_env,
    container_args: super::no_args,
    render_config: None,
    connection_string: connection_string,
    health_cmd: super::no_cmd,
    parse_health: super::parse_health_exit_only,
    metrics_cmd: super::no_cmd,
    parse_metrics: super::no_metrics,
    snapshot_cmd: super::no_transfer_cmd,
    restore_cmd: super::no_transfer_cmd,
    rotate_cmd: None,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn connection_string(_: &str, _: u16, ctx: &InstanceCtx) -> String {
    format!("duckdb:///{}", ctx.database)
}
