// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Loading `ServiceConfig` from disk and applying command-line overrides.

use std::path::Path;

use tracing::{info, warn};

use tillprint_core::config::ServiceConfig;
use tillprint_core::error::{Result, TillprintError};

pub const CONFIG_FILE: &str = "config.json";

/// Values given on the command line; each one beats the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen_addr: Option<String>,
    pub queue_capacity: Option<usize>,
    pub default_printer: Option<String>,
}

impl Overrides {
    pub fn apply(self, mut config: ServiceConfig) -> ServiceConfig {
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(printer) = self.default_printer {
            config.default_printer = Some(printer);
        }
        config
    }
}

/// Load the effective configuration.
///
/// An explicit path must exist and parse. Without one, `config.json` in
/// `data_dir` is used when present and readable; otherwise defaults apply.
pub fn load(explicit: Option<&Path>, data_dir: &Path, overrides: Overrides) -> Result<ServiceConfig> {
    let config = match explicit {
        Some(path) => read(path)?,
        None => {
            let path = data_dir.join(CONFIG_FILE);
            if path.exists() {
                read(&path).unwrap_or_else(|e| {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable config, using defaults");
                    ServiceConfig::default()
                })
            } else {
                info!(path = %path.display(), "No config file, using defaults");
                ServiceConfig::default()
            }
        }
    };
    overrides.apply(config).validate()
}

fn read(path: &Path) -> Result<ServiceConfig> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| TillprintError::Config(format!("cannot read {}: {e}", path.display())))?;
    let config = serde_json::from_str(&data)?;
    info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load(None, dir.path(), Overrides::default()).expect("config");
        assert_eq!(config.listen_addr, "127.0.0.1:8766");
        assert_eq!(config.queue_capacity, 50);
    }

    #[test]
    fn file_in_data_dir_is_used() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"queue_capacity": 5, "allowed_origins": ["http://localhost:*"]}"#,
        )
        .expect("write");
        let config = load(None, dir.path(), Overrides::default()).expect("config");
        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.allowed_origins, vec!["http://localhost:*".to_string()]);
    }

    #[test]
    fn corrupt_default_file_falls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "{ nope").expect("write");
        let config = load(None, dir.path(), Overrides::default()).expect("config");
        assert_eq!(config.queue_capacity, 50);
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("other.json");
        assert!(matches!(
            load(Some(&missing), dir.path(), Overrides::default()),
            Err(TillprintError::Config(_))
        ));
    }

    #[test]
    fn overrides_win_and_are_validated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("till.json");
        std::fs::write(&path, r#"{"queue_capacity": 5, "default_printer": "Bar"}"#).expect("write");

        let config = load(
            Some(&path),
            dir.path(),
            Overrides {
                listen_addr: Some("0.0.0.0:9000".into()),
                queue_capacity: Some(0),
                default_printer: Some("Kitchen".into()),
            },
        )
        .expect("config");
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.default_printer.as_deref(), Some("Kitchen"));

        let bad = load(
            Some(&path),
            dir.path(),
            Overrides {
                listen_addr: Some("nowhere".into()),
                ..Overrides::default()
            },
        );
        assert!(bad.is_err());
    }
}
