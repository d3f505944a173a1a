//! Workspace configuration for edsync-server.

use edsync_core::SyncSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub(crate) const CONFIG_FILES: &[&str] = &["edsync.toml", ".edsync.toml"];

/// Default TCP address for editor connections.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:4420";

/// Configuration loaded from `edsync.toml`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Workspace root.
    pub root: PathBuf,
    /// Config file path (if found).
    pub config_path: Option<PathBuf>,
    /// TCP listen address.
    pub listen: String,
    /// Synchronization core settings.
    pub sync: SyncSettings,
    /// Whether filesystem watching is enabled.
    pub watch: bool,
    /// Whether the bundled POM analyzer runs.
    pub pom_reconcile: bool,
    /// Telemetry configuration (opt-in).
    pub telemetry: TelemetryConfig,
}

impl ServerConfig {
    /// Load configuration for a workspace root.
    pub fn load(root: &Path) -> Self {
        match find_config_file(root) {
            Some(path) => Self::load_file(root, &path),
            None => Self::base(root, None),
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_file(root: &Path, path: &Path) -> Self {
        let path = resolve_path(root, &path.to_string_lossy());
        let Ok(contents) = std::fs::read_to_string(&path) else {
            warn!("Failed to read edsync config at {}", path.display());
            return Self::base(root, Some(path));
        };
        Self::from_contents(root, Some(path), &contents)
    }

    pub fn from_contents(root: &Path, config_path: Option<PathBuf>, contents: &str) -> Self {
        let mut config = Self::base(root, config_path);
        let parsed: ConfigFile = match toml::from_str(contents) {
            Ok(parsed) => parsed,
            Err(err) => {
                if let Some(path) = &config.config_path {
                    warn!("Failed to parse edsync config at {}: {err}", path.display());
                } else {
                    warn!("Failed to parse edsync config: {err}");
                }
                return config;
            }
        };

        if let Some(listen) = parsed.server.listen {
            config.listen = listen;
        }
        if let Some(shadow_dir) = parsed.working_copies.shadow_dir {
            let trimmed = shadow_dir.trim_matches('/');
            if trimmed.is_empty() || trimmed.split('/').any(|segment| segment == "..") {
                warn!("Ignoring invalid working_copies.shadow_dir '{shadow_dir}'");
            } else {
                config.sync.shadow_dir = trimmed.to_string();
            }
        }
        if let Some(ms) = parsed.watcher.delete_debounce_ms {
            config.sync.delete_debounce = Duration::from_millis(ms);
        }
        config.watch = parsed.watcher.enabled.unwrap_or(true);
        config.pom_reconcile = parsed.reconcile.pom.unwrap_or(true);
        config.telemetry = TelemetryConfig::from_section(root, parsed.telemetry);
        config
    }

    fn base(root: &Path, config_path: Option<PathBuf>) -> Self {
        Self {
            root: root.to_path_buf(),
            config_path,
            listen: DEFAULT_LISTEN.to_string(),
            sync: SyncSettings::default(),
            watch: true,
            pom_reconcile: true,
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Telemetry configuration (opt-in).
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    pub flush_every: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            flush_every: 25,
        }
    }
}

impl TelemetryConfig {
    fn from_section(root: &Path, section: TelemetrySection) -> Self {
        let enabled = section.enabled.unwrap_or(false);
        let path = section.path.map(|path| resolve_path(root, &path));
        let path = if enabled {
            Some(path.unwrap_or_else(|| resolve_path(root, ".edsync/telemetry.jsonl")))
        } else {
            path
        };
        TelemetryConfig {
            enabled,
            path,
            flush_every: section.flush_every.unwrap_or(25),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    working_copies: WorkingCopiesSection,
    #[serde(default)]
    watcher: WatcherSection,
    #[serde(default)]
    reconcile: ReconcileSection,
    #[serde(default)]
    telemetry: TelemetrySection,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    listen: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkingCopiesSection {
    shadow_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WatcherSection {
    enabled: Option<bool>,
    delete_debounce_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReconcileSection {
    pom: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TelemetrySection {
    enabled: Option<bool>,
    path: Option<String>,
    flush_every: Option<usize>,
}

pub(crate) fn find_config_file(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
}

fn resolve_path(root: &Path, entry: &str) -> PathBuf {
    let path = PathBuf::from(entry);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;
    use std::fs;

    #[test]
    fn loads_all_sections() {
        let root = temp_dir("edsync-config");
        fs::write(
            root.join("edsync.toml"),
            r#"
[server]
listen = "0.0.0.0:5000"

[working_copies]
shadow_dir = "/.cache/copies/"

[watcher]
enabled = false
delete_debounce_ms = 250

[reconcile]
pom = false

[telemetry]
enabled = true
flush_every = 5
"#,
        )
        .expect("write config");

        let config = ServerConfig::load(&root);
        assert_eq!(config.config_path, Some(root.join("edsync.toml")));
        assert_eq!(config.listen, "0.0.0.0:5000");
        assert_eq!(config.sync.shadow_dir, ".cache/copies");
        assert!(!config.watch);
        assert_eq!(config.sync.delete_debounce, Duration::from_millis(250));
        assert!(!config.pom_reconcile);
        assert!(config.telemetry.enabled);
        assert_eq!(
            config.telemetry.path,
            Some(root.join(".edsync/telemetry.jsonl"))
        );
        assert_eq!(config.telemetry.flush_every, 5);

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn missing_config_uses_defaults() {
        let root = temp_dir("edsync-config-missing");
        let config = ServerConfig::load(&root);
        assert_eq!(config.config_path, None);
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(config.sync, SyncSettings::default());
        assert!(config.watch);
        assert!(config.pom_reconcile);
        assert!(!config.telemetry.enabled);
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn invalid_config_falls_back_to_defaults() {
        let root = PathBuf::from("/ws");
        let config = ServerConfig::from_contents(&root, None, "[server\nlisten = 1");
        assert_eq!(config.listen, DEFAULT_LISTEN);

        let config =
            ServerConfig::from_contents(&root, None, "[working_copies]\nshadow_dir = \"../out\"");
        assert_eq!(config.sync.shadow_dir, SyncSettings::default().shadow_dir);
    }
}
