//! H2 adapter.
//!
//! H2 is an embedded Java engine; like DuckDB it gets a volume and a record
//! but no container. The recorded port refers to H2's TCP server mode when
//! an embedding application starts one.

use crate::credentials::Charset;

use super::{EngineAdapter, EngineCategory, InstanceCtx, Supports};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for H2.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "h2",
    display_name: "H2 Database",
    description: "Embedded Java SQL database with optional TCP server mode",
    category: EngineCategory::Embedded,
    image: "",
    default_port: 9092,
    data_mount: "",
    config_mount: None,
    dump_extension: ".sql",
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        logical_databases: true,
        users: true,
        backup: true,
        metrics: false,
        embedded: true,
    },
    extra_capabilities: &[],
    read_only_rootfs: false,
    min_memory_mb: 256,
    readiness_timeout_s: 30,
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

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!("jdbc:h2:tcp://{}:{}/{}", host, port, ctx.database)
}
