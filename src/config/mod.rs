use serde::Deserialize;

/// Service configuration, deserialized from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Development mode: infrastructure failures are logged instead of
    /// terminating the process.
    pub dev: bool,

    /// Log output format; "json" selects the structured formatter.
    #[serde(default)]
    pub log_format: Option<String>,

    /// Default log level when RUST_LOG is not set.
    #[serde(default)]
    pub log_level: Option<String>,

    /// Include file and line number in log events.
    #[serde(default)]
    pub log_trace: bool,

    pub http_ip: String,
    pub http_port: String,

    /// S3-compatible CDN bucket credentials and layout.
    pub cdn_key: String,
    pub cdn_secret: String,
    pub cdn_endpoint: String,
    pub cdn_bucket: String,
    pub cdn_region: String,
    pub cdn_images_folder: String,

    pub rabbitmq_url: String,

    /// Credentials expected in the `user`/`pass` headers of job submissions.
    pub img_username: String,
    pub img_password: String,

    /// Worker pool size override.
    #[serde(default)]
    pub img_workers_number: Option<usize>,

    /// Offload function runtime; local processing when unset.
    #[serde(default)]
    pub lambda_func: Option<String>,
    #[serde(default)]
    pub lambda_id: Option<String>,
    #[serde(default)]
    pub lambda_secret: Option<String>,
    #[serde(default)]
    pub lambda_token: Option<String>,
    #[serde(default)]
    pub lambda_region: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        envy::from_env().map_err(ConfigError::IncompleteEnvironment)
    }

    /// Worker pool size: configured override, else twice the logical CPU
    /// count.
    pub fn worker_count(&self) -> usize {
        match self.img_workers_number {
            Some(n) if n > 0 => n,
            _ => 2 * num_cpus::get(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_ip, self.http_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("INCOMPLETE_ENVIRONMENT: {0}")]
    IncompleteEnvironment(#[from] envy::Error),
}
