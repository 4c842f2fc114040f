//! Container create options and argument assembly.

use typed_builder::TypedBuilder;

use crate::sku::SchedulingHints;

use super::MANAGED_BY_LABEL;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A volume mount applied at container create.
#[derive(Debug, Clone)]
pub struct Mount {
    /// Absolute host path.
    pub host_path: String,
    /// Absolute container path.
    pub container_path: String,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

/// Everything `create` applies to a new container.
///
/// Security hardening is unconditional: all capabilities are dropped (the
/// adapter adds back the few it needs), privilege escalation is disabled,
/// and the pid count is capped.
#[derive(Debug, Clone, TypedBuilder)]
pub struct CreateOptions {
    /// Container name.
    pub name: String,

    /// Image reference.
    pub image: String,

    /// Instance id recorded in the labels.
    pub instance_id: i64,

    /// Engine tag recorded in the labels.
    pub engine: String,

    /// Environment variables.
    #[builder(default)]
    pub env: Vec<(String, String)>,

    /// Command override appended after the image.
    #[builder(default)]
    pub command: Vec<String>,

    /// Volume mounts.
    #[builder(default)]
    pub mounts: Vec<Mount>,

    /// Capabilities added back after drop-all.
    #[builder(default)]
    pub cap_add: Vec<String>,

    /// Mount the root filesystem read-only; the adapter sets this where the
    /// engine confines writes to its data mount and the runtime tmpfs.
    #[builder(default = false)]
    pub read_only_rootfs: bool,

    /// Memory cap in MiB.
    pub memory_mb: i64,

    /// CPU cap in vCPUs.
    pub cpus: f64,

    /// SKU scheduling flags.
    pub scheduling: SchedulingHints,

    /// Host address for the port binding, when port-mapped.
    #[builder(default, setter(strip_option))]
    pub host_ip: Option<String>,

    /// Host port for the binding, when port-mapped.
    #[builder(default, setter(strip_option))]
    pub host_port: Option<u16>,

    /// Container port the binding targets.
    #[builder(default = 0)]
    pub container_port: u16,

    /// Named network to attach instead of the default bridge.
    #[builder(default, setter(strip_option))]
    pub network: Option<String>,

    /// Static address on the named network.
    #[builder(default, setter(strip_option))]
    pub static_ip: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CreateOptions {
    /// Assembles the full `podman run` argument vector (without the binary
    /// itself).
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--label".to_string(),
            MANAGED_BY_LABEL.to_string(),
            "--label".to_string(),
            format!("instance-id={}", self.instance_id),
            "--label".to_string(),
            format!("engine={}", self.engine),
            format!("--memory={}m", self.memory_mb),
            format!("--cpus={}", self.cpus),
            "--cap-drop=all".to_string(),
            "--security-opt=no-new-privileges".to_string(),
            "--pids-limit=100".to_string(),
        ];

        if self.read_only_rootfs {
            args.push("--read-only".to_string());
        }

        for cap in &self.cap_add {
            args.push("--cap-add".to_string());
            args.push(cap.clone());
        }

        args.push(format!("--cpu-shares={}", self.scheduling.cpu_shares));
        if let Some(swappiness) = self.scheduling.swappiness {
            args.push(format!("--memory-swappiness={swappiness}"));
        }
        if let Some(adj) = self.scheduling.oom_score_adj {
            args.push(format!("--oom-score-adj={adj}"));
        }
        if self.scheduling.strict_no_swap {
            args.push(format!("--memory-swap={}m", self.memory_mb));
        }

        match (&self.network, &self.static_ip) {
            (Some(network), Some(ip)) => {
                args.push("--network".to_string());
                args.push(network.clone());
                args.push("--ip".to_string());
                args.push(ip.clone());
            }
            _ => {
                if let (Some(host_ip), Some(host_port)) = (&self.host_ip, self.host_port) {
                    args.push("-p".to_string());
                    args.push(format!("{host_ip}:{host_port}:{}", self.container_port));
                }
            }
        }

        for mount in &self.mounts {
            // :Z relabels for SELinux under rootless Podman.
            let suffix = if mount.read_only { ":Z,ro" } else { ":Z" };
            args.push("-v".to_string());
            args.push(format!(
                "{}:{}{suffix}",
                mount.host_path, mount.container_path
            ));
        }

        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::sku::SkuSeries;

    use super::*;

    fn base_options() -> CreateOptions {
        CreateOptions::builder()
            .name("db_postgresql_app".to_string())
            .image("docker.io/library/postgres:16-alpine".to_string())
            .instance_id(7)
            .engine("postgresql".to_string())
            .memory_mb(4096)
            .cpus(2.0)
            .scheduling(SkuSeries::General.scheduling_hints())
            .host_ip("127.0.0.1".to_string())
            .host_port(10432)
            .container_port(5432)
            .build()
    }

    #[test]
    fn test_hardening_flags_always_present() {
        let args = base_options().to_args();
        assert!(args.contains(&"--cap-drop=all".to_string()));
        assert!(args.contains(&"--security-opt=no-new-privileges".to_string()));
        assert!(args.contains(&"--pids-limit=100".to_string()));
        assert!(args.contains(&"--memory=4096m".to_string()));
        assert!(args.contains(&"--cpus=2".to_string()));
    }

    #[test]
    fn test_read_only_rootfs_flag_is_opt_in() {
        let args = base_options().to_args();
        assert!(!args.contains(&"--read-only".to_string()));

        let mut options = base_options();
        options.read_only_rootfs = true;
        let args = options.to_args();
        assert!(args.contains(&"--read-only".to_string()));
    }

    #[test]
    fn test_labels_identify_the_instance() {
        let args = base_options().to_args();
        assert!(args.contains(&"managed-by=podbase".to_string()));
        assert!(args.contains(&"instance-id=7".to_string()));
        assert!(args.contains(&"engine=postgresql".to_string()));
    }

    #[test]
    fn test_loopback_port_binding() {
        let args = base_options().to_args();
        assert!(args.contains(&"127.0.0.1:10432:5432".to_string()));
    }

    #[test]
    fn test_vnet_attachment_replaces_port_binding() {
        let mut options = base_options();
        options.network = Some("podbase0".to_string());
        options.static_ip = Some("10.89.0.5".to_string());
        let args = options.to_args();
        assert!(args.contains(&"podbase0".to_string()));
        assert!(args.contains(&"10.89.0.5".to_string()));
        assert!(!args.iter().any(|a| a.contains("10432")));
    }

    #[test]
    fn test_memory_series_scheduling_flags() {
        let mut options = base_options();
        options.scheduling = SkuSeries::MemoryOptimized.scheduling_hints();
        let args = options.to_args();
        assert!(args.contains(&"--memory-swappiness=0".to_string()));
        assert!(args.contains(&"--oom-score-adj=-500".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--memory-swap=")));
    }

    #[test]
    fn test_compute_series_clamps_swap() {
        let mut options = base_options();
        options.scheduling = SkuSeries::ComputeOptimized.scheduling_hints();
        let args = options.to_args();
        assert!(args.contains(&"--memory-swap=4096m".to_string()));
        assert!(args.contains(&"--cpu-shares=2048".to_string()));
    }

    #[test]
    fn test_readonly_mount_suffix() {
        let mut options = base_options();
        options.mounts.push(Mount {
            host_path: "/srv/podbase/volumes/7/config/postgresql.conf".to_string(),
            container_path: "/etc/postgresql/postgresql.conf".to_string(),
            read_only: true,
        });
        let args = options.to_args();
        assert!(args
            .iter()
            .any(|a| a.ends_with("/etc/postgresql/postgresql.conf:Z,ro")));
    }

    #[test]
    fn test_image_precedes_command_override() {
        let mut options = base_options();
        options.command = vec!["-c".to_string(), "ssl=on".to_string()];
        let args = options.to_args();
        let image_pos = args.iter().position(|a| a.contains("postgres:16")).unwrap();
        let flag_pos = args.iter().position(|a| a == "ssl=on").unwrap();
        assert!(image_pos < flag_pos);
    }
}
