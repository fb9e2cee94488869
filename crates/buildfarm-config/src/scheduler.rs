//! Scheduler configuration parsing.

use crate::{ConfigError, ConfigResult};
use buildfarm_core::ArchivePurpose;
use kdl::{KdlDocument, KdlNode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RESUME_TIMEOUT_SECS: u64 = 300;
const DEFAULT_ARCHIVE_ROOT: &str = "http://ftpmaster.internal/";

/// Scheduler tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Bound on every builder RPC except `resume`.
    pub rpc_timeout: Duration,
    /// Bound on `resume`, which restarts a virtual machine.
    pub resume_timeout: Duration,
    /// Base URL archives are served from; used to build the extra source
    /// lines handed to builders.
    pub archive_root: Url,
    /// Catalog snapshot file.
    pub catalog: Option<PathBuf>,
    /// Archive classes scanned when none are given on the command line.
    /// Empty means all.
    pub archives: Vec<ArchivePurpose>,
    /// Credentials builders use to fetch files from private archives.
    pub archive_auth: Option<ArchiveAuth>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveAuth {
    pub user: String,
    pub password: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
            resume_timeout: Duration::from_secs(DEFAULT_RESUME_TIMEOUT_SECS),
            archive_root: Url::parse(DEFAULT_ARCHIVE_ROOT).expect("default archive root is valid"),
            catalog: None,
            archives: Vec::new(),
            archive_auth: None,
        }
    }
}

/// Read and parse a configuration file.
pub fn load_scheduler_config(path: impl AsRef<Path>) -> ConfigResult<SchedulerConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_scheduler_config(&content)
}

/// Parse scheduler configuration from KDL text.
pub fn parse_scheduler_config(kdl: &str) -> ConfigResult<SchedulerConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut config = SchedulerConfig::default();
    let mut seen = false;

    for node in doc.nodes() {
        match node.name().value() {
            "scheduler" => {
                if seen {
                    return Err(ConfigError::Duplicate("scheduler".to_string()));
                }
                seen = true;
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        apply_setting(&mut config, child)?;
                    }
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn apply_setting(config: &mut SchedulerConfig, node: &KdlNode) -> ConfigResult<()> {
    let key = node.name().value();
    match key {
        "rpc-timeout" => {
            config.rpc_timeout = Duration::from_secs(get_positive_int_arg(node, key)?);
        }
        "resume-timeout" => {
            config.resume_timeout = Duration::from_secs(get_positive_int_arg(node, key)?);
        }
        "archive-root" => {
            let raw = get_first_string_arg(node)
                .ok_or_else(|| ConfigError::MissingField(key.to_string()))?;
            let mut url = Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                field: key.to_string(),
                message: e.to_string(),
            })?;
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
            config.archive_root = url;
        }
        "catalog" => {
            let path = get_first_string_arg(node)
                .ok_or_else(|| ConfigError::MissingField(key.to_string()))?;
            config.catalog = Some(PathBuf::from(path));
        }
        "archives" => {
            config.archives = get_all_string_args(node)
                .iter()
                .map(|s| {
                    s.parse::<ArchivePurpose>()
                        .map_err(|e| ConfigError::InvalidValue {
                            field: key.to_string(),
                            message: e.to_string(),
                        })
                })
                .collect::<ConfigResult<Vec<_>>>()?;
        }
        "archive-auth" => {
            let user = get_string_prop(node, "user")
                .ok_or_else(|| ConfigError::MissingField("archive-auth user".to_string()))?;
            let password = get_string_prop(node, "password")
                .ok_or_else(|| ConfigError::MissingField("archive-auth password".to_string()))?;
            config.archive_auth = Some(ArchiveAuth { user, password });
        }
        _ => {}
    }
    Ok(())
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_positive_int_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;

    if value <= 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("must be positive, got {}", value),
        });
    }

    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("out of range: {}", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_scheduler_config("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.rpc_timeout, Duration::from_secs(30));
        assert_eq!(config.resume_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            scheduler {
                rpc-timeout 45
                resume-timeout 600
                archive-root "http://archive.example.com/pool"
                catalog "/var/lib/buildfarm/catalog.json"
                archives "primary" "ppa"
                archive-auth user="buildd" password="sekrit"
            }
        "#;

        let config = parse_scheduler_config(kdl).unwrap();
        assert_eq!(config.rpc_timeout, Duration::from_secs(45));
        assert_eq!(config.resume_timeout, Duration::from_secs(600));
        assert_eq!(
            config.archive_root.as_str(),
            "http://archive.example.com/pool/"
        );
        assert_eq!(
            config.catalog,
            Some(PathBuf::from("/var/lib/buildfarm/catalog.json"))
        );
        assert_eq!(
            config.archives,
            vec![ArchivePurpose::Primary, ArchivePurpose::Ppa]
        );
        assert_eq!(
            config.archive_auth,
            Some(ArchiveAuth {
                user: "buildd".to_string(),
                password: "sekrit".to_string(),
            })
        );
    }

    #[test]
    fn test_reject_non_positive_timeout() {
        let result = parse_scheduler_config("scheduler {\n rpc-timeout 0\n}");
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_reject_unknown_archive_class() {
        let result = parse_scheduler_config("scheduler {\n archives \"primary\" \"nightly\"\n}");
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_reject_duplicate_scheduler_block() {
        let result = parse_scheduler_config("scheduler {}\nscheduler {}");
        assert!(matches!(result.unwrap_err(), ConfigError::Duplicate(_)));
    }

    #[test]
    fn test_archive_auth_requires_password() {
        let result = parse_scheduler_config("scheduler {\n archive-auth user=\"buildd\"\n}");
        assert!(matches!(result.unwrap_err(), ConfigError::MissingField(_)));
    }
}
