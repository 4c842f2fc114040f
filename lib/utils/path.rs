use std::path::{Path, PathBuf};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The environment variable overriding the data root directory.
pub const PODBASE_DATA_ROOT_ENV_VAR: &str = "PODBASE_DATA_ROOT";

/// The sub directory where podbase artifacts, configs, etc are stored.
pub const PODBASE_SUBDIR: &str = ".podbase";

/// The filename of the relational store holding all control-plane tables.
pub const STORE_DB_FILENAME: &str = "instances.db";

/// The sub directory holding per-instance runtime metadata.
pub const CONTAINERS_SUBDIR: &str = "containers";

/// The sub directory holding per-instance data volumes.
pub const VOLUMES_SUBDIR: &str = "volumes";

/// The sub directory holding per-instance snapshot dumps.
pub const SNAPSHOTS_SUBDIR: &str = "snapshots";

/// The sub directory holding per-instance TLS material.
pub const TLS_SUBDIR: &str = "tls";

/// The sub directory holding per-instance log captures.
pub const LOGS_SUBDIR: &str = "logs";

/// Maximum length of an instance name.
pub const MAX_INSTANCE_NAME_LEN: usize = 64;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the path where all podbase data is stored, honoring the
/// environment override.
pub fn data_root_path() -> PathBuf {
    if let Ok(root) = std::env::var(PODBASE_DATA_ROOT_ENV_VAR) {
        PathBuf::from(root)
    } else {
        crate::config::DEFAULT_DATA_ROOT.to_owned()
    }
}

/// Validates a name for use in filesystem paths and container names.
///
/// Names must start with an alphanumeric character, may contain dots,
/// underscores, and hyphens, and are capped at 64 characters. Path
/// separators and traversal sequences are rejected outright.
pub fn is_valid_instance_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_INSTANCE_NAME_LEN {
        return false;
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return false;
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphanumeric() {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

/// Checks that `path` resolves inside `base`, guarding against traversal
/// out of the data root.
pub fn path_within_base(path: &Path, base: &Path) -> bool {
    let path = match path.canonicalize() {
        Ok(p) => p,
        // Not yet on disk; fall back to a lexical check.
        Err(_) => normalize_lexically(path),
    };
    let base = match base.canonicalize() {
        Ok(b) => b,
        Err(_) => normalize_lexically(base),
    };
    path == base || path.starts_with(&base)
}

/// Resolves `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_instance_names() {
        assert!(is_valid_instance_name("app"));
        assert!(is_valid_instance_name("app-prod-01"));
        assert!(is_valid_instance_name("my.database_2"));
        assert!(is_valid_instance_name("a"));
    }

    #[test]
    fn test_invalid_instance_names() {
        assert!(!is_valid_instance_name(""));
        assert!(!is_valid_instance_name("-leading-dash"));
        assert!(!is_valid_instance_name(".hidden"));
        assert!(!is_valid_instance_name("has space"));
        assert!(!is_valid_instance_name("has/slash"));
        assert!(!is_valid_instance_name("dot..dot"));
        assert!(!is_valid_instance_name(&"x".repeat(65)));
    }

    #[test]
    fn test_path_within_base() {
        let base = Path::new("/data/podbase");
        assert!(path_within_base(Path::new("/data/podbase/volumes/1"), base));
        assert!(path_within_base(base, base));
        assert!(!path_within_base(Path::new("/data/other"), base));
        assert!(!path_within_base(
            Path::new("/data/podbase/volumes/../../escape"),
            base
        ));
    }
}
