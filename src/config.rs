use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::core::models::TransferDestinations;
use crate::core::retry::{RouteConfig, RoutingTable};

pub const DEFAULT_CONFIG_PATH: &str = "cfex-ingest.toml";
pub const CONFIG_PATH_ENV: &str = "CFEX_INGEST_CONFIG";
pub const ENV_PREFIX: &str = "CFEX_INGEST_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub rpc_bind: SocketAddr,
    pub verbose: bool,
    pub json_logs: bool,
    /// Mount point watched for card removal; defaults to the batch source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_path: Option<PathBuf>,
    pub verify_checksums: bool,
    pub sync_files: bool,
    /// Default destinations for `transfer` when none are given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destinations: Option<TransferDestinations>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannelType {
    #[default]
    None,
    Slack,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub channel: NotificationChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc_bind: SocketAddr::from(([127, 0, 0, 1], 9847)),
            verbose: false,
            json_logs: false,
            card_path: None,
            verify_checksums: false,
            sync_files: true,
            destinations: None,
            routes: Vec::new(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Layered load: defaults, TOML file, `CFEX_INGEST_*` environment,
    /// then whatever CLI arguments were given.
    pub fn new<T: Serialize>(args: Option<&T>, config_path: Option<&Path>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(args) = args {
            figment = figment.merge(Serialized::defaults(args));
        }

        figment
            .extract()
            .with_context(|| format!("Failed to load configuration ({})", path.display()))
    }

    pub fn routing_table(&self) -> RoutingTable {
        RoutingTable::new(self.routes.clone())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::DestinationClass;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        verbose: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        verify_checksums: Option<bool>,
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = tempdir().unwrap();
        let config =
            AppConfig::new(None::<&Overrides>, Some(&temp.path().join("absent.toml"))).unwrap();
        assert_eq!(config.rpc_bind.port(), 9847);
        assert!(config.sync_files);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_file_and_args_are_layered() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("cfex-ingest.toml");
        std::fs::write(
            &path,
            r#"
verbose = false
verify_checksums = false
card_path = "/Volumes/CFEX"

[destinations]
photos = "/Users/me/Pictures/Ingest"
raw_videos = "/Volumes/Archive/Raw"

[[routes]]
root = "/Volumes/Archive"
class = "network"

[notifications]
channel = "slack"
slack_webhook = "https://hooks.example.invalid/x"
"#,
        )
        .unwrap();

        let args = Overrides {
            verbose: Some(true),
            verify_checksums: None,
        };
        let config = AppConfig::new(Some(&args), Some(&path)).unwrap();

        assert!(config.verbose);
        assert!(!config.verify_checksums);
        assert_eq!(config.card_path, Some(PathBuf::from("/Volumes/CFEX")));
        assert_eq!(
            config.destinations.as_ref().unwrap().raw_videos,
            PathBuf::from("/Volumes/Archive/Raw")
        );
        assert_eq!(config.notifications.channel, NotificationChannelType::Slack);

        let policy = config
            .routing_table()
            .resolve(Path::new("/Volumes/Archive/Raw/C0001.MP4"));
        assert_eq!(policy.class, DestinationClass::Network);
        assert_eq!(policy.max_retries, 5);
    }

    #[test]
    fn test_config_renders_as_toml() {
        let config = AppConfig {
            routes: vec![RouteConfig {
                root: PathBuf::from("/mnt/nas"),
                class: DestinationClass::Network,
                max_retries: Some(2),
                base_delay_ms: None,
            }],
            ..AppConfig::default()
        };
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("rpc_bind = \"127.0.0.1:9847\""));
        assert!(rendered.contains("[[routes]]"));
        assert!(rendered.contains("class = \"network\""));
    }
}
