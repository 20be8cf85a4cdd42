use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Record per-column change history on every instance
    pub track_revisions: bool,
    /// First numeric key the in-memory adapter hands out
    pub first_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            track_revisions: true,
            first_id: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional `memmodel` config file
    /// and `MEMMODEL__`-prefixed environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("memmodel").required(false));

        // e.g. MEMMODEL__MODEL__TRACK_REVISIONS=false
        config = config.add_source(
            config::Environment::with_prefix("MEMMODEL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }
}

/// Install the global logger; `RUST_LOG` overrides the configured level.
/// Safe to call more than once.
pub fn init_logging(config: &LoggingConfig) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.level.as_str()),
    )
    .try_init();
}
