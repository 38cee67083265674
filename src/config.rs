use clap::Parser;
use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Open user databases in read-only access mode
    #[serde(default)]
    pub read_only: bool,
    pub execute_timeout_secs: u64,
    /// User database files kept open at once; idle ones beyond this are closed
    #[serde(default = "default_max_open_databases")]
    pub max_open_databases: usize,
}

fn default_max_open_databases() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    pub backend: String, // "duckdb" or "memory"
    pub path: String,
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "ollama", "remote", or "huggingface"
    pub model: String,   // Model name
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub history: HistoryConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    /// Backend for the model-assisted strategy; `llm` is used when absent
    pub assisted_llm: Option<LlmConfig>,
    pub data_dir: String,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory holding the per-user databases
    #[arg(long)]
    pub data_dir: Option<String>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = [
                "config.toml",
                "config/config.toml",
                "/etc/textql/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;
        config.apply_overrides(args);

        Ok(config)
    }

    fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(host) = &args.host {
            self.web.host = host.clone();
        }
        if let Some(port) = args.port {
            self.web.port = port;
        }
        if let Some(data_dir) = &args.data_dir {
            self.data_dir = data_dir.clone();
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                read_only: false,
                execute_timeout_secs: 30,
                max_open_databases: default_max_open_databases(),
            },
            history: HistoryConfig {
                backend: "duckdb".to_string(),
                path: "history.duckdb".to_string(),
                pool_size: 5,
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            llm: LlmConfig {
                backend: "ollama".to_string(),
                model: "sqlcoder".to_string(),
                api_key: None,
                api_url: None,
                timeout_secs: 60,
            },
            assisted_llm: None,
            data_dir: "data".to_string(),
            log: LogConfig::default(),
        }
    }
}
