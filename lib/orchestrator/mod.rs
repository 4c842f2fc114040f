//! The container orchestrator.
//!
//! A typed wrapper over the rootless Podman CLI. Every call shells out with
//! an explicit deadline and maps the runtime's stderr shapes onto the crate
//! error taxonomy. Containers created here carry the control plane's labels
//! so stray containers are attributable.

mod options;

use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;

use crate::{PodbaseError, PodbaseResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use options::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Label identifying containers managed by this control plane.
pub const MANAGED_BY_LABEL: &str = "managed-by=podbase";

/// Default deadline for short runtime calls.
const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(30);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of running a runtime command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    /// Exit code, or -1 when unknown.
    pub exit_code: i64,
    /// Captured stdout, trimmed.
    pub stdout: String,
    /// Captured stderr, trimmed.
    pub stderr: String,
}

/// Typed operations against the container runtime.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    /// Runtime binary, normally `podman`.
    bin: String,
}

/// Condensed view of `podman inspect` for one container.
#[derive(Debug, Clone, Default)]
pub struct ContainerState {
    /// Short container id.
    pub id: String,
    /// Runtime status string, e.g. "running", "exited".
    pub status: String,
    /// Whether the runtime reports the container running.
    pub running: bool,
    /// Exit code of the last run, when stopped.
    pub exit_code: i64,
    /// When the container was started, RFC3339.
    pub started_at: Option<String>,
    /// Image reference the container was created from.
    pub image: String,
    /// The raw inspect document for callers that need more.
    pub raw: serde_json::Value,
}

/// Parsed `podman stats` snapshot for one container.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ContainerStats {
    /// CPU usage percentage.
    pub cpu_percent: f64,
    /// Memory used in MiB.
    pub memory_used_mb: f64,
    /// Memory limit in MiB.
    pub memory_limit_mb: f64,
    /// Memory used as a percentage of the limit.
    pub memory_percent: f64,
}

#[derive(Debug, Deserialize)]
struct RawStats {
    #[serde(rename = "CPUPerc", default)]
    cpu_perc: String,
    #[serde(rename = "MemUsage", default)]
    mem_usage: String,
    #[serde(rename = "MemPerc", default)]
    mem_perc: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Creates an orchestrator driving the given runtime binary.
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Checks the runtime is installed, returning its version line.
    pub async fn runtime_version(&self) -> PodbaseResult<String> {
        let out = self.run(&["--version"], DEFAULT_CMD_TIMEOUT).await?;
        if out.exit_code == 0 {
            Ok(out.stdout)
        } else {
            Err(PodbaseError::RuntimeUnavailable(out.stderr))
        }
    }

    /// Pulls an image, streaming nothing but waiting out the long tail of a
    /// first-time download.
    pub async fn pull(&self, image: &str, deadline: Duration) -> PodbaseResult<()> {
        let out = self.run(&["pull", image], deadline).await?;
        if out.exit_code == 0 {
            Ok(())
        } else {
            Err(PodbaseError::ImagePull {
                image: image.to_string(),
                reason: out.stderr,
            })
        }
    }

    /// Creates and starts a container from assembled options, returning the
    /// short container id.
    pub async fn create(&self, options: &CreateOptions, deadline: Duration) -> PodbaseResult<String> {
        let args = options.to_args();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.run(&arg_refs, deadline).await?;

        if out.exit_code == 0 {
            Ok(out.stdout.chars().take(12).collect())
        } else if out.stderr.contains("address already in use")
            || out.stderr.contains("port is already allocated")
        {
            Err(PodbaseError::PortInUse(options.host_port.unwrap_or(0)))
        } else {
            Err(PodbaseError::Exec {
                exit_code: out.exit_code,
                stderr: out.stderr,
            })
        }
    }

    /// Starts a stopped container.
    pub async fn start(&self, name_or_id: &str, deadline: Duration) -> PodbaseResult<()> {
        self.simple_op(&["start", name_or_id], name_or_id, deadline).await
    }

    /// Gracefully stops a container, waiting up to `grace` before the
    /// runtime escalates to SIGKILL.
    pub async fn stop(&self, name_or_id: &str, grace: Duration) -> PodbaseResult<()> {
        let grace_arg = grace.as_secs().to_string();
        self.simple_op(
            &["stop", "-t", &grace_arg, name_or_id],
            name_or_id,
            // The runtime needs the grace window plus slack to escalate.
            grace + DEFAULT_CMD_TIMEOUT,
        )
        .await
    }

    /// Force-kills a container.
    pub async fn kill(&self, name_or_id: &str) -> PodbaseResult<()> {
        self.simple_op(&["kill", name_or_id], name_or_id, DEFAULT_CMD_TIMEOUT)
            .await
    }

    /// Restarts a container.
    pub async fn restart(&self, name_or_id: &str, deadline: Duration) -> PodbaseResult<()> {
        self.simple_op(&["restart", name_or_id], name_or_id, deadline).await
    }

    /// Removes a container, optionally forcing a running one.
    pub async fn remove(&self, name_or_id: &str, force: bool) -> PodbaseResult<()> {
        let args: Vec<&str> = if force {
            vec!["rm", "-f", name_or_id]
        } else {
            vec!["rm", name_or_id]
        };
        self.simple_op(&args, name_or_id, DEFAULT_CMD_TIMEOUT).await
    }

    /// Inspects a container. Returns `ContainerNotFound` when the runtime
    /// does not know it.
    pub async fn inspect(&self, name_or_id: &str) -> PodbaseResult<ContainerState> {
        let out = self
            .run(&["inspect", name_or_id], DEFAULT_CMD_TIMEOUT)
            .await?;
        if out.exit_code != 0 {
            return Err(classify_not_found(name_or_id, &out.stderr));
        }

        let parsed: serde_json::Value = serde_json::from_str(&out.stdout)?;
        let doc = parsed
            .as_array()
            .and_then(|list| list.first())
            .cloned()
            .ok_or_else(|| PodbaseError::ContainerNotFound(name_or_id.to_string()))?;

        Ok(ContainerState {
            id: doc["Id"].as_str().unwrap_or("").chars().take(12).collect(),
            status: doc["State"]["Status"].as_str().unwrap_or("unknown").to_string(),
            running: doc["State"]["Running"].as_bool().unwrap_or(false),
            exit_code: doc["State"]["ExitCode"].as_i64().unwrap_or(0),
            started_at: doc["State"]["StartedAt"].as_str().map(str::to_string),
            image: doc["ImageName"]
                .as_str()
                .or_else(|| doc["Image"].as_str())
                .unwrap_or("")
                .to_string(),
            raw: doc,
        })
    }

    /// Takes one non-streaming stats sample.
    pub async fn stats(&self, name_or_id: &str) -> PodbaseResult<ContainerStats> {
        let out = self
            .run(
                &["stats", "--no-stream", "--format", "json", name_or_id],
                DEFAULT_CMD_TIMEOUT,
            )
            .await?;
        if out.exit_code != 0 {
            return Err(classify_not_found(name_or_id, &out.stderr));
        }

        let list: Vec<RawStats> = serde_json::from_str(&out.stdout)?;
        let raw = list
            .into_iter()
            .next()
            .ok_or_else(|| PodbaseError::ContainerNotFound(name_or_id.to_string()))?;
        Ok(parse_stats(&raw))
    }

    /// Fetches container logs with an optional tail and time bounds.
    pub async fn logs(
        &self,
        name_or_id: &str,
        tail: Option<u32>,
        since: Option<&str>,
        until: Option<&str>,
    ) -> PodbaseResult<String> {
        let mut args: Vec<String> = vec!["logs".to_string(), "--timestamps".to_string()];
        if let Some(tail) = tail {
            args.push("--tail".to_string());
            args.push(tail.to_string());
        }
        if let Some(since) = since {
            args.push("--since".to_string());
            args.push(since.to_string());
        }
        if let Some(until) = until {
            args.push("--until".to_string());
            args.push(until.to_string());
        }
        args.push(name_or_id.to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.run(&arg_refs, DEFAULT_CMD_TIMEOUT).await?;
        if out.exit_code != 0 {
            return Err(classify_not_found(name_or_id, &out.stderr));
        }
        // Engines log to both streams; interleave what the runtime captured.
        Ok(if out.stdout.is_empty() {
            out.stderr
        } else {
            out.stdout
        })
    }

    /// Executes a command inside a running container.
    pub async fn exec(
        &self,
        name_or_id: &str,
        command: &[String],
        deadline: Duration,
    ) -> PodbaseResult<CmdOutput> {
        let mut args = vec!["exec".to_string(), name_or_id.to_string()];
        args.extend(command.iter().cloned());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let out = self.run(&arg_refs, deadline).await?;
        if out.stderr.contains("no such container")
            || out.stderr.contains("no container with name")
        {
            return Err(PodbaseError::ContainerNotFound(name_or_id.to_string()));
        }
        Ok(out)
    }

    /// Copies a file out of a container to the host.
    pub async fn copy_from(
        &self,
        name_or_id: &str,
        container_path: &str,
        host_path: &str,
        deadline: Duration,
    ) -> PodbaseResult<()> {
        let source = format!("{name_or_id}:{container_path}");
        self.simple_op(&["cp", &source, host_path], name_or_id, deadline).await
    }

    /// Copies a host file into a container.
    pub async fn copy_to(
        &self,
        name_or_id: &str,
        host_path: &str,
        container_path: &str,
        deadline: Duration,
    ) -> PodbaseResult<()> {
        let dest = format!("{name_or_id}:{container_path}");
        self.simple_op(&["cp", host_path, &dest], name_or_id, deadline).await
    }

    /// Whether a named network exists on the host.
    pub async fn network_exists(&self, name: &str) -> PodbaseResult<bool> {
        let out = self
            .run(&["network", "exists", name], DEFAULT_CMD_TIMEOUT)
            .await?;
        Ok(out.exit_code == 0)
    }

    /// Creates a named bridge network with the given /24.
    pub async fn network_create(&self, name: &str, subnet_base: &str) -> PodbaseResult<()> {
        let subnet = format!("{subnet_base}.0/24");
        let out = self
            .run(
                &["network", "create", "--subnet", &subnet, name],
                DEFAULT_CMD_TIMEOUT,
            )
            .await?;
        if out.exit_code == 0 || out.stderr.contains("already exists") {
            Ok(())
        } else {
            Err(PodbaseError::Exec {
                exit_code: out.exit_code,
                stderr: out.stderr,
            })
        }
    }

    /// Runs a runtime subcommand to completion under a deadline.
    async fn run(&self, args: &[&str], deadline: Duration) -> PodbaseResult<CmdOutput> {
        let future = Command::new(&self.bin).args(args).output();
        let output = match timeout(deadline, future).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PodbaseError::RuntimeUnavailable(format!(
                    "{} not found on PATH",
                    self.bin
                )));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(PodbaseError::Timeout(format!(
                    "{} {} exceeded {}s",
                    self.bin,
                    args.first().unwrap_or(&""),
                    deadline.as_secs()
                )));
            }
        };

        Ok(CmdOutput {
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn simple_op(
        &self,
        args: &[&str],
        name_or_id: &str,
        deadline: Duration,
    ) -> PodbaseResult<()> {
        let out = self.run(args, deadline).await?;
        if out.exit_code == 0 {
            Ok(())
        } else {
            Err(classify_not_found(name_or_id, &out.stderr))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn classify_not_found(name_or_id: &str, stderr: &str) -> PodbaseError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("no such container") || lowered.contains("no container with name") {
        PodbaseError::ContainerNotFound(name_or_id.to_string())
    } else if lowered.contains("cannot connect to podman")
        || lowered.contains("connection refused")
    {
        PodbaseError::RuntimeUnavailable(stderr.to_string())
    } else {
        PodbaseError::Exec {
            exit_code: 1,
            stderr: stderr.to_string(),
        }
    }
}

fn parse_stats(raw: &RawStats) -> ContainerStats {
    let cpu_percent = parse_percent(&raw.cpu_perc);
    let (memory_used_mb, memory_limit_mb) = parse_mem_usage(&raw.mem_usage);
    let mut memory_percent = parse_percent(&raw.mem_perc);
    if memory_percent == 0.0 && memory_limit_mb > 0.0 {
        memory_percent = (memory_used_mb / memory_limit_mb) * 100.0;
    }
    ContainerStats {
        cpu_percent,
        memory_used_mb,
        memory_limit_mb,
        memory_percent,
    }
}

/// Parses "12.34%" into 12.34.
fn parse_percent(s: &str) -> f64 {
    s.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}

/// Parses "123.4MiB / 2GiB" into (used, limit) in MiB.
fn parse_mem_usage(s: &str) -> (f64, f64) {
    let Some((used, limit)) = s.split_once('/') else {
        return (0.0, 0.0);
    };
    (parse_mem_size(used), parse_mem_size(limit))
}

/// Parses a unit-suffixed size ("512MB", "2GiB", "100B") into MiB.
pub(crate) fn parse_mem_size(s: &str) -> f64 {
    let s = s.trim();
    let split = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    let value: f64 = s[..split].trim().parse().unwrap_or(0.0);
    let unit = s[split..].trim().to_ascii_uppercase();

    match unit.as_str() {
        "" | "B" | "BYTES" => value / (1024.0 * 1024.0),
        "K" | "KB" | "KIB" => value / 1024.0,
        "M" | "MB" | "MIB" => value,
        "G" | "GB" | "GIB" => value * 1024.0,
        "T" | "TB" | "TIB" => value * 1024.0 * 1024.0,
        _ => 0.0,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mem_size_units() {
        assert_eq!(parse_mem_size("512MB"), 512.0);
        assert_eq!(parse_mem_size("512MiB"), 512.0);
        assert_eq!(parse_mem_size("2GiB"), 2048.0);
        assert_eq!(parse_mem_size("1024KB"), 1.0);
        assert!((parse_mem_size("1048576B") - 1.0).abs() < 1e-9);
        assert_eq!(parse_mem_size("bogus"), 0.0);
    }

    #[test]
    fn test_parse_stats_computes_missing_percent() {
        let raw = RawStats {
            cpu_perc: "12.5%".to_string(),
            mem_usage: "256MiB / 1GiB".to_string(),
            mem_perc: String::new(),
        };
        let stats = parse_stats(&raw);
        assert_eq!(stats.cpu_percent, 12.5);
        assert_eq!(stats.memory_used_mb, 256.0);
        assert_eq!(stats.memory_limit_mb, 1024.0);
        assert!((stats.memory_percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_classify_not_found() {
        assert!(matches!(
            classify_not_found("db1", "Error: no such container db1"),
            PodbaseError::ContainerNotFound(_)
        ));
        assert!(matches!(
            classify_not_found("db1", "cannot connect to Podman socket"),
            PodbaseError::RuntimeUnavailable(_)
        ));
        assert!(matches!(
            classify_not_found("db1", "permission denied"),
            PodbaseError::Exec { .. }
        ));
    }
}
