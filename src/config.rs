use {
    config::{Config, ConfigError, File, FileFormat},
    serde::de::DeserializeOwned,
    std::time::Duration,
};

fn from_toml<T: DeserializeOwned>(config_path: &str) -> Result<T, ConfigError> {
    let builder = Config::builder().add_source(File::new(config_path, FileFormat::Toml));

    builder.build()?.try_deserialize()
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct TallyServerConfig {
    pub grpc: GrpcConfig,
    pub http: HttpConfig,
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    pub victoria_metrics: Option<VictoriaMetricsConfig>,
    pub debug: bool,
}

impl TallyServerConfig {
    pub fn from_file(config_path: &str) -> Result<Self, ConfigError> {
        from_toml(config_path)
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct TallyClientConfig {
    pub grpc: GrpcConfig,
    pub debug: bool,
    /// Number of concurrent workers.
    pub tasks: usize,
    /// Simulated users are drawn from `1..=users`.
    pub users: u64,
    /// Percent of operations that complete an order.
    pub order_chance: u32,
    /// Percent of operations that pay with points; the rest are admin adjustments.
    pub payment_chance: u32,
}

impl TallyClientConfig {
    pub fn from_file(config_path: &str) -> Result<Self, ConfigError> {
        from_toml(config_path)
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct GrpcConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct PersistenceConfig {
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl PersistenceConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_db_path() -> String {
    "tally.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct LedgerConfig {
    /// Buffered notifications per subscriber before it starts lagging.
    pub notification_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            notification_capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct VictoriaMetricsConfig {
    pub remote_write_url: String,
    pub push_interval_seconds: u64,
}
