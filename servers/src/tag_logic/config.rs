use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One-shot operations run through a direct session instead of the cluster.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the current value of a tag.
    Read { tag: String },
    /// Write a value to a tag.
    Write { tag: String, value: String },
    /// Evaluate a function expression on the host, e.g. `Version(3)`.
    Call { expression: String },
    /// Search host objects and print the rows as JSON.
    Search { query: String },
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "CtAPI tag list monitor", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "CTAPI_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "CTAPI_SITE_PATH", help = "Path to the JSON5 site file (endpoints, lists, tags).")]
    pub site_path: Option<PathBuf>,

    #[clap(long, env = "CTAPI_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "CTAPI_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "CTAPI_SCAN_INTERVAL_MS", help = "Overrides the site's poll cycle pacing in milliseconds.")]
    pub scan_interval_ms: Option<u64>,

    #[clap(long, env = "CTAPI_SIMULATE_MS", help = "Interval of simulated value changes in milliseconds; 0 disables them.")]
    pub simulate_ms: Option<u64>,

    #[clap(subcommand)]
    #[serde(skip)]
    pub command: Option<Command>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            site_path: other.site_path.or(self.site_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            scan_interval_ms: other.scan_interval_ms.or(self.scan_interval_ms),
            simulate_ms: other.simulate_ms.or(self.simulate_ms),
            command: other.command.or(self.command),
        }
    }

    pub fn site_path(&self) -> &Path {
        self.site_path.as_deref().unwrap_or(Path::new("site.json5"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

fn defaults() -> Config {
    Config {
        site_path: Some(PathBuf::from("site.json5")),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        simulate_ms: Some(1000),
        ..Default::default()
    }
}

/// Resolves the configuration: defaults, then the config file, then
/// environment variables and CLI arguments.
pub fn load_config() -> Config {
    resolve(Config::parse())
}

pub fn resolve(cli: Config) -> Config {
    let mut current_config = defaults();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_tags.conf"));

    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<Config>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                log::warn!("Failed to parse config file: {}. Falling back to other sources.", config_file_path.display());
            }
        } else {
            log::warn!("Failed to read config file: {}. Falling back to other sources.", config_file_path.display());
        }
    } else {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", config_file_path.display());
    }

    current_config.merge(cli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(Config {
            config_path: Some(PathBuf::from("/nonexistent/server_tags.conf")),
            ..Default::default()
        });
        assert_eq!(config.site_path(), Path::new("site.json5"));
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.simulate_ms, Some(1000));
        assert_eq!(config.command, None);
    }

    #[test]
    fn test_file_overrides_defaults_and_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "logLevel": "debug", "scanIntervalMs": 250, "simulateMs": 0 }}"#).unwrap();

        let config = resolve(Config {
            config_path: Some(file.path().to_path_buf()),
            scan_interval_ms: Some(50),
            command: Some(Command::Read { tag: "Pump1_Speed".to_string() }),
            ..Default::default()
        });
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.scan_interval_ms, Some(50));
        assert_eq!(config.simulate_ms, Some(0));
        assert_eq!(config.command, Some(Command::Read { tag: "Pump1_Speed".to_string() }));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let config = Config::try_parse_from(["server_tags", "--log-level", "warn", "write", "SP1", "42"]).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("warn"));
        assert_eq!(
            config.command,
            Some(Command::Write { tag: "SP1".to_string(), value: "42".to_string() })
        );
    }
}
