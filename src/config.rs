use clap::Parser;
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "openai" or "ollama"
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: u64,
    pub answer_language: String,
    pub insight_max_rows: usize,
    pub insight_table_rows: usize,
    pub insight_max_chars: usize,
    pub max_bulk_rows: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub analyze_ttl_secs: u64,
    pub clear_on_ddl: bool,
    pub max_cached_rows: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScaffoldConfig {
    pub output_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub scaffold: ScaffoldConfig,
}

#[derive(Parser, Debug, Default)]
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

    /// DuckDB database file
    #[arg(long)]
    pub database: Option<String>,
}

const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_ANALYZE_TTL_SECS: u64 = 60;

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        Self::load(args, |key| std::env::var(key).ok())
    }

    /// Layers defaults, the config file, environment variables (read through `env`)
    /// and finally command line flags.
    pub fn load<F>(args: &CliArgs, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config_builder = with_defaults(Config::builder())?;

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nl-sql-gateway/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        config_builder = with_env_overrides(config_builder, &env)?;

        // Build the config
        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(database) = &args.database {
            config.database.connection_string = database.clone();
        }

        Ok(config)
    }
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = AppConfig::default();
    builder
        .set_default("database.connection_string", defaults.database.connection_string)?
        .set_default("database.pool_size", defaults.database.pool_size as u64)?
        .set_default("web.host", defaults.web.host)?
        .set_default("web.port", defaults.web.port as u64)?
        .set_default("llm.backend", defaults.llm.backend)?
        .set_default("llm.timeout_secs", defaults.llm.timeout_secs)?
        .set_default("llm.answer_language", defaults.llm.answer_language)?
        .set_default("llm.insight_max_rows", defaults.llm.insight_max_rows as u64)?
        .set_default("llm.insight_table_rows", defaults.llm.insight_table_rows as u64)?
        .set_default("llm.insight_max_chars", defaults.llm.insight_max_chars as u64)?
        .set_default("llm.max_bulk_rows", defaults.llm.max_bulk_rows)?
        .set_default("cache.ttl_secs", defaults.cache.ttl_secs)?
        .set_default("cache.analyze_ttl_secs", defaults.cache.analyze_ttl_secs)?
        .set_default("cache.clear_on_ddl", defaults.cache.clear_on_ddl)?
        .set_default("cache.max_cached_rows", defaults.cache.max_cached_rows as u64)?
        .set_default("scaffold.output_dir", defaults.scaffold.output_dir)
}

fn with_env_overrides<F>(
    builder: ConfigBuilder<DefaultState>,
    env: &F,
) -> Result<ConfigBuilder<DefaultState>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let first = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .filter_map(|key| env(key))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
    };
    let positive = |keys: &[&str]| -> Option<u64> {
        first(keys)
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|ttl| *ttl > 0)
    };

    let backend = first(&["LLM_DRIVER"]).map(|b| b.to_lowercase());
    let (model_key, url_key) = match backend.as_deref() {
        Some("ollama") => ("OLLAMA_MODEL", "OLLAMA_BASE_URL"),
        _ => ("OPENAI_MODEL", "OPENAI_BASE_URL"),
    };

    let ttl = positive(&["DB_CACHE_TTL"]);
    let analyze_ttl = positive(&["ANALYZE_CACHE_TTL"]).or(ttl);

    builder
        .set_override_option("llm.backend", backend)?
        .set_override_option("llm.model", first(&["LLM_MODEL", model_key]))?
        .set_override_option("llm.api_url", first(&["LLM_BASE_URL", url_key]))?
        .set_override_option("llm.api_key", first(&["LLM_API_KEY", "OPENAI_API_KEY"]))?
        .set_override_option("llm.timeout_secs", positive(&["LLM_TIMEOUT_SECS"]))?
        .set_override_option("cache.ttl_secs", ttl)?
        .set_override_option("cache.analyze_ttl_secs", analyze_ttl)?
        .set_override_option(
            "cache.clear_on_ddl",
            first(&["CACHE_CLEAR_ON_DDL"]).map(|flag| flag.eq_ignore_ascii_case("true")),
        )?
        .set_override_option("database.connection_string", first(&["DB_PATH"]))?
        .set_override_option("scaffold.output_dir", first(&["SCAFFOLD_DIR"]))
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                connection_string: "nl-sql.duckdb".to_string(),
                pool_size: 5,
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            llm: LlmConfig {
                backend: "openai".to_string(),
                model: None,
                api_key: None,
                api_url: None,
                timeout_secs: 300,
                answer_language: "Portuguese".to_string(),
                insight_max_rows: 15,
                insight_table_rows: 10,
                insight_max_chars: 6000,
                max_bulk_rows: 10,
            },
            cache: CacheConfig {
                ttl_secs: DEFAULT_TTL_SECS,
                analyze_ttl_secs: DEFAULT_ANALYZE_TTL_SECS,
                clear_on_ddl: false,
                max_cached_rows: 5000,
            },
            scaffold: ScaffoldConfig {
                output_dir: "generated".to_string(),
            },
        }
    }
}
