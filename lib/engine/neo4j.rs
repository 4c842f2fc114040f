//! Neo4j 5 adapter.

use crate::credentials::Charset;

use super::{EngineAdapter, EngineCategory, EngineMetrics, InstanceCtx, Supports};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The capability bundle for Neo4j.
pub(super) static ADAPTER: EngineAdapter = EngineAdapter {
    engine: "neo4j",
    display_name: "Neo4j 5",
    description: "Property-graph database with the Cypher query language",
    category: EngineCategory::Graph,
    image: "docker.io/library/neo4j:5",
    default_port: 7687,
    data_mount: "/data",
    config_mount: None,
    dump_extension: ".dump",
    // The NEO4J_AUTH value is user/password; keep both URL- and
    // separator-safe.
    password_charset: Charset::Alphanumeric,
    supports: Supports {
        logical_databases: true,
        users: true,
        backup: true,
        metrics: true,
        embedded: false,
    },
    extra_capabilities: &["SETGID", "SETUID", "CHOWN"],
    read_only_rootfs: false,
    min_memory_mb: 1024,
    readiness_timeout_s: 180,
    container_env: env,
    container_args: super::no_args,
    render_config: None,
    connection_string: connection_string,
    health_cmd: health_cmd,
    parse_health: super::parse_health_exit_only,
    metrics_cmd: metrics_cmd,
    parse_metrics: parse_metrics,
    snapshot_cmd: snapshot_cmd,
    restore_cmd: restore_cmd,
    rotate_cmd: Some(rotate_cmd),
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn env(ctx: &InstanceCtx) -> Vec<(String, String)> {
    let mut env = vec![(
        "NEO4J_AUTH".to_string(),
        format!("{}/{}", ctx.username, ctx.password),
    )];
    // Heap + pagecache tuning only makes sense with room to spare.
    env.push(("NEO4J_PLUGINS".to_string(), "[\"apoc\"]".to_string()));
    env
}

fn connection_string(host: &str, port: u16, ctx: &InstanceCtx) -> String {
    format!("bolt://{}:{}@{}:{}", ctx.username, ctx.password, host, port)
}

fn health_cmd(_: &InstanceCtx) -> Vec<String> {
    // The HTTP port answers as soon as bolt is serviceable.
    vec![
        "curl".to_string(),
        "-sf".to_string(),
        "http://localhost:7474".to_string(),
    ]
}

fn metrics_cmd(ctx: &InstanceCtx) -> Vec<String> {
    vec![
        "cypher-shell".to_string(),
        "-u".to_string(),
        ctx.username.to_string(),
        "-p".to_string(),
        ctx.password.to_string(),
        "--format".to_string(),
        "plain".to_string(),
        "MATCH (n) RETURN count(n);".to_string(),
    ]
}

fn parse_metrics(stdout: &str) -> EngineMetrics {
    let mut metrics = EngineMetrics::default();
    // Plain format: a "count(n)" header line then the number.
    if let Some(count) = stdout
        .lines()
        .filter_map(|line| line.trim().parse::<i64>().ok())
        .next()
    {
        metrics.extra.insert("node_count".to_string(), count.into());
    }
    metrics
}

fn snapshot_cmd(ctx: &InstanceCtx, dest: &str) -> Vec<String> {
    let database = if ctx.database.is_empty() { "neo4j" } else { ctx.database };
    // database dump requires the target db stopped inside the DBMS.
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "cypher-shell -u {u} -p '{p}' -d system 'STOP DATABASE {db};' && \
             neo4j-admin database dump {db} --to-path=/tmp/podbase_dump --overwrite-destination=true && \
             cypher-shell -u {u} -p '{p}' -d system 'START DATABASE {db};' && \
             cp /tmp/podbase_dump/{db}.dump {dest}",
            u = ctx.username,
            p = ctx.password,
            db = database,
            dest = dest
        ),
    ]
}

fn restore_cmd(ctx: &InstanceCtx, source: &str) -> Vec<String> {
    let database = if ctx.database.is_empty() { "neo4j" } else { ctx.database };
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "mkdir -p /tmp/podbase_dump && cp {source} /tmp/podbase_dump/{db}.dump && \
             cypher-shell -u {u} -p '{p}' -d system 'STOP DATABASE {db};' && \
             neo4j-admin database load {db} --from-path=/tmp/podbase_dump --overwrite-destination=true && \
             cypher-shell -u {u} -p '{p}' -d system 'START DATABASE {db};'",
            u = ctx.username,
            p = ctx.password,
            db = database,
            source = source
        ),
    ]
}

fn rotate_cmd(ctx: &InstanceCtx, new_password: &str) -> Vec<String> {
    vec![
        "cypher-shell".to_string(),
        "-u".to_string(),
        ctx.username.to_string(),
        "-p".to_string(),
        ctx.password.to_string(),
        "-d".to_string(),
        "system".to_string(),
        format!(
            "ALTER CURRENT USER SET PASSWORD FROM '{}' TO '{}';",
            ctx.password, new_password
        ),
    ]
}
